//! The fault window.
//!
//! A [`FaultWindow`] marks the interval during which a destructive action
//! against the system under test is in flight. It has exactly one writer
//! (the orchestrator) and any number of readers (workers classifying their
//! operations).
//!
//! ## Visibility contract
//!
//! Readers see transitions eventually, not immediately: a worker may read
//! `PreFault` a few microseconds after the orchestrator opened the window.
//! The window shares no lock with the workload, so observing it does not
//! perturb the races under test. What is guaranteed is that a reader never
//! sees a torn or intermediate value; the phase is a single atomic byte.
//!
//! The window also owns the scenario epoch. Every harness timestamp is a
//! `Duration` since the window was created.

use faultline_types::WindowPhase;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::error::{HarnessError, Result};

/// Shared fault window handle. Cloning shares the same window.
#[derive(Debug, Clone)]
pub struct FaultWindow {
    inner: Arc<WindowInner>,
}

#[derive(Debug)]
struct WindowInner {
    phase: AtomicU8,
    epoch: Instant,
    opened_at: OnceLock<Duration>,
    closed_at: OnceLock<Duration>,
    changed: Notify,
}

/// Edges of the window relative to the scenario epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowBounds {
    /// When the window opened.
    pub opened_at: Duration,
    /// When it closed, if it has.
    pub closed_at: Option<Duration>,
}

impl Default for FaultWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultWindow {
    /// Create a closed window; the scenario epoch starts now.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(WindowInner {
                phase: AtomicU8::new(WindowPhase::PreFault.as_u8()),
                epoch: Instant::now(),
                opened_at: OnceLock::new(),
                closed_at: OnceLock::new(),
                changed: Notify::new(),
            }),
        }
    }

    /// Mark the start of the destructive action.
    ///
    /// # Errors
    ///
    /// `WindowAlreadyOpened` if the window is not in its initial phase.
    pub fn signal_open(&self) -> Result<()> {
        let now = self.elapsed();
        self.transition(WindowPhase::PreFault, WindowPhase::Open)
            .map_err(|phase| {
                tracing::error!("signal_open called in phase {}", phase);
                HarnessError::WindowAlreadyOpened { phase }
            })?;
        let _ = self.inner.opened_at.set(now);
        tracing::info!("Fault window opened at {}ms", now.as_millis());
        self.inner.changed.notify_waiters();
        Ok(())
    }

    /// Mark the end of the destructive action.
    ///
    /// # Errors
    ///
    /// `WindowNotOpen` if the window was never opened, `WindowAlreadyClosed`
    /// if it was already closed.
    pub fn signal_close(&self) -> Result<()> {
        let now = self.elapsed();
        self.transition(WindowPhase::Open, WindowPhase::PostFault)
            .map_err(|phase| {
                tracing::error!("signal_close called in phase {}", phase);
                match phase {
                    WindowPhase::PreFault => HarnessError::WindowNotOpen,
                    _ => HarnessError::WindowAlreadyClosed,
                }
            })?;
        let _ = self.inner.closed_at.set(now);
        tracing::info!("Fault window closed at {}ms", now.as_millis());
        self.inner.changed.notify_waiters();
        Ok(())
    }

    fn transition(
        &self,
        from: WindowPhase,
        to: WindowPhase,
    ) -> std::result::Result<(), WindowPhase> {
        self.inner
            .phase
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(decode)
    }

    /// Last fully written phase.
    pub fn phase(&self) -> WindowPhase {
        decode(self.inner.phase.load(Ordering::Acquire))
    }

    /// Returns true while the destructive action is in flight.
    pub fn is_open(&self) -> bool {
        self.phase() == WindowPhase::Open
    }

    /// Time since the scenario epoch.
    pub fn elapsed(&self) -> Duration {
        self.inner.epoch.elapsed()
    }

    /// When the window opened, if it has.
    pub fn opened_at(&self) -> Option<Duration> {
        self.inner.opened_at.get().copied()
    }

    /// When the window closed, if it has.
    pub fn closed_at(&self) -> Option<Duration> {
        self.inner.closed_at.get().copied()
    }

    /// Window edges, or `None` if the window never opened.
    pub fn bounds(&self) -> Option<WindowBounds> {
        self.opened_at().map(|opened_at| WindowBounds {
            opened_at,
            closed_at: self.closed_at(),
        })
    }

    /// Wait until the window has reached `phase` (or moved past it).
    pub async fn wait_for(&self, phase: WindowPhase) {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.phase() >= phase {
                return;
            }
            notified.await;
        }
    }
}

// Only the three encodings written by `transition` can ever be stored.
fn decode(raw: u8) -> WindowPhase {
    WindowPhase::from_u8(raw).unwrap_or(WindowPhase::PostFault)
}
