// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use num_complex::Complex;
use rstest::rstest;
use tessera_comm::{Communicator, LocalFabric, LocalTransport, schedule_recv, schedule_send};
use tessera_runtime::matrix::{DefaultAllocator, Element, Tile, TileSize};
use tessera_runtime::{Device, Pipeline, Runtime, TuneParameters};

struct Rank {
    comm: Pipeline<Communicator<LocalTransport>>,
}

fn group(runtime: &Runtime, size: usize) -> (LocalFabric, Vec<Rank>) {
    let fabric = LocalFabric::new(size);
    let ranks = fabric
        .endpoints()
        .into_iter()
        .map(|endpoint| Rank {
            comm: Pipeline::new(Communicator::new(runtime, endpoint)),
        })
        .collect();
    (fabric, ranks)
}

fn tile<T: Element>(rows: i64, cols: i64, f: impl FnMut(i64, i64) -> T) -> Tile<T> {
    let mut tile = Tile::allocate(&DefaultAllocator::default(), TileSize::new(rows, cols), Device::Cpu).unwrap();
    tile.fill_with(f);
    tile
}

/// Values with irregular bit patterns, including signed zero and subnormals.
fn awkward(i: i64, j: i64) -> f64 {
    match (i + j) % 5 {
        0 => -0.0,
        1 => f64::MIN_POSITIVE / 3.0,
        2 => std::f64::consts::PI * (i as f64 - j as f64),
        3 => 1.0 / (1.0 + (i * j) as f64),
        _ => -1e300,
    }
}

async fn send_tag_7<T: Element>(rows: i64, cols: i64, value: impl Fn(i64, i64) -> T) {
    let runtime = Runtime::from_current(TuneParameters::for_testing()).unwrap();
    let (_fabric, ranks) = group(&runtime, 2);

    let a = Pipeline::new(tile(rows, cols, &value));
    let b = Pipeline::new(tile(rows, cols, |_, _| T::default()));

    let send = schedule_send(&runtime, ranks[0].comm.read_write(), 1, 7, a.read_only());
    let recv = schedule_recv(&runtime, ranks[1].comm.read_write(), 0, 7, b.read_write());
    send.await.unwrap();
    recv.await.unwrap();

    let sent = a.finish().await.to_vec();
    let received = b.finish().await.to_vec();
    assert_eq!(
        bytemuck::cast_slice::<T, u8>(&sent),
        bytemuck::cast_slice::<T, u8>(&received)
    );
}

#[rstest]
#[case::square(24, 24)]
#[case::tall(37, 5)]
#[case::single_column(50, 1)]
#[case::empty(0, 3)]
#[tokio::test]
async fn send_recv_f64(#[case] rows: i64, #[case] cols: i64) {
    send_tag_7(rows, cols, awkward).await;
}

#[tokio::test]
async fn send_recv_f32() {
    send_tag_7(24, 17, |i, j| awkward(i, j) as f32).await;
}

#[tokio::test]
async fn send_recv_complex() {
    send_tag_7(24, 17, |i, j| Complex::new(awkward(i, j) as f32, awkward(j, i) as f32)).await;
    send_tag_7(24, 17, |i, j| Complex::new(awkward(i, j), -awkward(j, i))).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn messages_match_in_issue_order_per_tag() {
    let runtime = Runtime::from_current(TuneParameters::for_testing()).unwrap();
    let (_fabric, ranks) = group(&runtime, 2);

    let sources: Vec<_> = (0..4)
        .map(|k| Pipeline::new(tile(3, 3, move |_, _| k as f64)))
        .collect();
    let targets: Vec<_> = (0..4)
        .map(|_| Pipeline::new(tile(3, 3, |_, _| -1.0f64)))
        .collect();

    // receives are issued first, on alternating tags
    let mut completions = Vec::new();
    for (k, target) in targets.iter().enumerate() {
        let tag = (k % 2) as u32;
        completions.push(schedule_recv(&runtime, ranks[1].comm.read_write(), 0, tag, target.read_write()));
    }
    for (k, source) in sources.iter().enumerate() {
        let tag = (k % 2) as u32;
        completions.push(schedule_send(&runtime, ranks[0].comm.read_write(), 1, tag, source.read_only()));
    }
    for completion in completions {
        completion.await.unwrap();
    }

    for (k, target) in targets.into_iter().enumerate() {
        assert_eq!(target.finish().await.get(2, 2), k as f64);
    }
}

#[tokio::test]
async fn shutdown_fails_pending_receive() {
    let runtime = Runtime::from_current(TuneParameters::for_testing()).unwrap();
    let (fabric, ranks) = group(&runtime, 2);
    let target = Pipeline::new(tile(4, 4, |_, _| 1.0f64));

    let recv = schedule_recv(&runtime, ranks[1].comm.read_write(), 0, 0, target.read_write());
    // the communicator grant is released once the receive is issued
    drop(ranks[1].comm.read_write().await);
    fabric.shutdown();

    let error = recv.await.unwrap_err();
    assert!(error.to_string().contains("disconnected"), "{error}");
    assert_eq!(target.finish().await.get(0, 0), 1.0);
}
