//! Progress delivery from a running bootstrap to its single subscriber.
//!
//! Phase entries and the terminal event are sent with backpressure and are
//! never dropped. Sub-progress within a phase is best effort: it is throttled
//! to one event per bucket (a percent, or a MiB when the total is unknown)
//! and discarded when the subscriber's buffer is full.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::{BootstrapError, BootstrapResult, PhaseError};
use crate::phase::{BootstrapFailure, BootstrapPhase, BootstrapSummary, PhaseKind};

/// One event in a run's progress stream.
///
/// Consecutive events with the same phase are sub-progress updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapProgress {
    pub phase: BootstrapPhase,
    /// Completion of the current phase in `0.0..=1.0`, `None` when indeterminate.
    pub fraction: Option<f32>,
    pub detail: Option<String>,
}

impl BootstrapProgress {
    pub const fn entered(phase: BootstrapPhase) -> Self {
        Self {
            phase,
            fraction: None,
            detail: None,
        }
    }

    pub const fn kind(&self) -> PhaseKind {
        self.phase.kind()
    }

    pub const fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Creates a bounded progress channel.
pub fn channel(capacity: usize) -> (ProgressSender, ProgressStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ProgressSender { tx, current: None },
        ProgressStream { rx },
    )
}

/// The producing half, owned by the orchestrator.
///
/// Tracks the current phase and refuses transitions the state machine does
/// not allow.
#[derive(Debug)]
pub struct ProgressSender {
    tx: mpsc::Sender<BootstrapProgress>,
    current: Option<PhaseKind>,
}

impl ProgressSender {
    pub const fn current(&self) -> Option<PhaseKind> {
        self.current
    }

    /// Moves to `phase` and announces it.
    ///
    /// # Errors
    /// Returns [`BootstrapError::Internal`] when `phase` may not follow the
    /// current phase.
    pub async fn enter(&mut self, phase: BootstrapPhase) -> BootstrapResult<()> {
        let next = phase.kind();
        let allowed = match self.current {
            None => next == PhaseKind::Idle,
            Some(current) => current.can_advance_to(next),
        };
        if !allowed {
            return Err(BootstrapError::Internal(format!(
                "illegal phase transition {} -> {next}",
                self.current.map_or("start", PhaseKind::as_str)
            )));
        }

        log::debug!("Entering phase {next}");
        self.current = Some(next);
        self.deliver(BootstrapProgress::entered(phase)).await;
        Ok(())
    }

    /// Emits the terminal event for `outcome`.
    ///
    /// Does nothing if a terminal event was already sent.
    pub async fn finish(&mut self, outcome: &Result<BootstrapSummary, PhaseError>) {
        if self.current.is_some_and(PhaseKind::is_terminal) {
            return;
        }
        let phase = match outcome {
            Ok(summary) => BootstrapPhase::Completed(summary.clone()),
            Err(err) => BootstrapPhase::Error(BootstrapFailure::from(err)),
        };
        self.current = Some(phase.kind());
        self.deliver(BootstrapProgress::entered(phase)).await;
    }

    /// A reporter for sub-progress within the current phase.
    pub fn sub_progress(&self, phase: BootstrapPhase) -> SubProgress {
        SubProgress {
            tx: self.tx.clone(),
            phase,
            last_bucket: Arc::new(AtomicU32::new(u32::MAX)),
        }
    }

    async fn deliver(&self, event: BootstrapProgress) {
        if self.tx.send(event).await.is_err() {
            log::debug!("Progress subscriber went away; continuing without it");
        }
    }
}

/// Best-effort sub-progress reporter for a single phase.
///
/// Cheap to clone and usable from blocking threads.
#[derive(Debug, Clone)]
pub struct SubProgress {
    tx: mpsc::Sender<BootstrapProgress>,
    phase: BootstrapPhase,
    last_bucket: Arc<AtomicU32>,
}

impl SubProgress {
    /// Reports `done` out of `total`; indeterminate when `total` is unknown.
    pub fn bytes(&self, done: u64, total: Option<u64>) {
        match total {
            Some(total) if total > 0 => {
                #[allow(clippy::cast_precision_loss)]
                let fraction = done as f64 / total as f64;
                self.fraction(fraction, Some(format!("{done} / {total} bytes")));
            }
            _ => {
                let bucket = u32::try_from(done >> 20).unwrap_or(u32::MAX - 1);
                self.emit(bucket, None, Some(format!("{done} bytes")));
            }
        }
    }

    /// Reports a completion fraction, clamped to `0.0..=1.0`.
    pub fn fraction(&self, fraction: f64, detail: Option<String>) {
        let fraction = fraction.clamp(0.0, 1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = (fraction * 100.0).floor() as u32;
        #[allow(clippy::cast_possible_truncation)]
        self.emit(percent, Some(fraction as f32), detail);
    }

    fn emit(&self, bucket: u32, fraction: Option<f32>, detail: Option<String>) {
        if self.last_bucket.swap(bucket, Ordering::Relaxed) == bucket {
            return;
        }
        let event = BootstrapProgress {
            phase: self.phase.clone(),
            fraction,
            detail,
        };
        if let Err(e) = self.tx.try_send(event) {
            log::trace!("Dropped sub-progress update: {e}");
        }
    }
}

/// The consuming half of a progress channel.
#[derive(Debug)]
pub struct ProgressStream {
    rx: mpsc::Receiver<BootstrapProgress>,
}

impl ProgressStream {
    /// Waits for the next event; `None` once the run has finished and every
    /// event was delivered.
    pub async fn recv(&mut self) -> Option<BootstrapProgress> {
        self.rx.recv().await
    }

    /// Drains the stream until it closes.
    pub async fn collect_all(mut self) -> Vec<BootstrapProgress> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for ProgressStream {
    type Item = BootstrapProgress;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
