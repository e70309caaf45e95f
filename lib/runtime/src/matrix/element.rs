// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use num_complex::Complex;
use std::fmt::Debug;
use std::ops::{Add, Mul};

/// Scalar types a tile can hold.
///
/// Implemented for `f32`, `f64`, `Complex<f32>` and `Complex<f64>`.
pub trait Element:
    bytemuck::Pod
    + Default
    + Debug
    + PartialEq
    + Send
    + Sync
    + Add<Output = Self>
    + Mul<Output = Self>
    + 'static
{
    const NAME: &'static str;

    /// Build a value from real and imaginary parts; real types drop `im`.
    fn from_parts(re: f64, im: f64) -> Self;
}

impl Element for f32 {
    const NAME: &'static str = "f32";

    fn from_parts(re: f64, _im: f64) -> Self {
        re as f32
    }
}

impl Element for f64 {
    const NAME: &'static str = "f64";

    fn from_parts(re: f64, _im: f64) -> Self {
        re
    }
}

impl Element for Complex<f32> {
    const NAME: &'static str = "c32";

    fn from_parts(re: f64, im: f64) -> Self {
        Complex::new(re as f32, im as f32)
    }
}

impl Element for Complex<f64> {
    const NAME: &'static str = "c64";

    fn from_parts(re: f64, im: f64) -> Self {
        Complex::new(re, im)
    }
}
