// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Completion notifications for asynchronous device and network operations.
//!
//! Operations that complete outside of Tokio (CUDA events, transport requests)
//! are registered with a background task that polls a [`CompletionChecker`]
//! at a fixed interval and resolves a [`CompletionNotification`] once the
//! checker reports completion or failure.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::warn;
use uuid::Uuid;

#[cfg(feature = "cuda")]
pub mod cuda_event;
pub mod notification;

#[cfg(feature = "cuda")]
pub use cuda_event::CudaEventChecker;
pub use notification::CompletionNotification;

/// Pending operations older than this are reported
const SLOW_COMPLETION_THRESHOLD: Duration = Duration::from_secs(60);

/// Minimum time between two reports about the same operation
const SLOW_COMPLETION_REWARN: Duration = Duration::from_secs(30);

/// Trait for checking if an asynchronous operation has completed.
pub trait CompletionChecker: Send + 'static {
    /// Returns true if the operation is complete, false if still pending.
    fn is_complete(&self) -> Result<bool>;
}

/// Registration message for polling-based completion.
struct Registration {
    uuid: Uuid,
    label: &'static str,
    checker: Box<dyn CompletionChecker>,
    done: oneshot::Sender<Result<()>>,
}

struct Outstanding {
    label: &'static str,
    checker: Box<dyn CompletionChecker>,
    done: oneshot::Sender<Result<()>>,
    arrived_at: Instant,
    last_warned_at: Option<Instant>,
}

/// Cloneable handle used to register checkers with the polling task.
#[derive(Debug, Clone)]
pub struct NotificationHandle {
    tx: mpsc::UnboundedSender<Registration>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("uuid", &self.uuid)
            .field("label", &self.label)
            .finish()
    }
}

impl NotificationHandle {
    /// Spawn the polling task on `handle` and return a handle to it.
    ///
    /// The task exits once every `NotificationHandle` is dropped and all
    /// outstanding operations have resolved.
    pub fn spawn(handle: &tokio::runtime::Handle, polling_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(process_polling_notifications(rx, polling_interval));
        Self { tx }
    }

    /// Register a checker; the returned notification resolves when it reports
    /// completion or an error.
    pub fn register<C: CompletionChecker>(
        &self,
        label: &'static str,
        checker: C,
    ) -> CompletionNotification {
        let (done, status) = oneshot::channel();
        let registration = Registration {
            uuid: Uuid::new_v4(),
            label,
            checker: Box::new(checker),
            done,
        };

        if let Err(mpsc::error::SendError(registration)) = self.tx.send(registration) {
            let _ = registration
                .done
                .send(Err(anyhow::anyhow!("notification processor has shut down")));
        }

        CompletionNotification { status }
    }
}

fn check_and_warn_slow_completion(
    uuid: &Uuid,
    label: &str,
    arrived_at: Instant,
    last_warned_at: Option<Instant>,
) -> Option<Instant> {
    let elapsed = arrived_at.elapsed();
    if elapsed > SLOW_COMPLETION_THRESHOLD {
        let should_warn = last_warned_at
            .map(|last| last.elapsed() > SLOW_COMPLETION_REWARN)
            .unwrap_or(true);

        if should_warn {
            warn!(
                uuid = %uuid,
                label,
                elapsed_secs = elapsed.as_secs(),
                "operation has been pending for over 1 minute"
            );
            return Some(Instant::now());
        }
    }
    last_warned_at
}

/// Query every outstanding checker once and resolve the finished ones.
fn poll_outstanding(outstanding: &mut HashMap<Uuid, Outstanding>) {
    let mut completed = Vec::new();

    for (uuid, pending) in outstanding.iter_mut() {
        match pending.checker.is_complete() {
            Ok(true) => completed.push((*uuid, Ok(()))),
            Ok(false) => {
                pending.last_warned_at = check_and_warn_slow_completion(
                    uuid,
                    pending.label,
                    pending.arrived_at,
                    pending.last_warned_at,
                );
            }
            Err(e) => {
                tracing::debug!(uuid = %uuid, label = pending.label, error = %e, "completion check failed");
                completed.push((*uuid, Err(e)));
            }
        }
    }

    for (uuid, result) in completed {
        if let Some(pending) = outstanding.remove(&uuid) {
            // the waiter may have been dropped
            let _ = pending.done.send(result);
        }
    }
}

async fn process_polling_notifications(
    mut rx: mpsc::UnboundedReceiver<Registration>,
    polling_interval: Duration,
) {
    let mut outstanding: HashMap<Uuid, Outstanding> = HashMap::new();
    let mut check_interval = interval(polling_interval);
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            registration = rx.recv() => {
                match registration {
                    Some(r) => {
                        outstanding.insert(r.uuid, Outstanding {
                            label: r.label,
                            checker: r.checker,
                            done: r.done,
                            arrived_at: Instant::now(),
                            last_warned_at: None,
                        });
                    }
                    None => break,
                }
            }

            _ = check_interval.tick(), if !outstanding.is_empty() => {
                poll_outstanding(&mut outstanding);
            }
        }
    }

    // all handles are gone; drain what is still in flight
    while !outstanding.is_empty() {
        check_interval.tick().await;
        poll_outstanding(&mut outstanding);
    }
}
