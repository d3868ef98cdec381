//! # Isolation boundary around one cell boot.
//!
//! A [`Boundary`] runs the cell entry future somewhere the host can abandon:
//!
//! ```text
//! Boundary::boot(cell, mode, entry future)
//!   ├─ DedicatedRuntime ──► new multi-thread runtime ──► runtime.spawn(entry)
//!   └─ SharedRuntime    ──► tokio::spawn(entry)
//!
//! join()    ──► Completed(outcome) | Panicked(message) | Discarded
//! discard() ──► abort entry task + runtime.shutdown_background()   (idempotent)
//! ```
//!
//! ## Rules
//! - Panics inside the entry future never reach the supervisor; they surface as
//!   [`BoundaryExit::Panicked`].
//! - `discard` never blocks, so it is safe from async code and on unresponsive cells.
//! - Dropping a boundary discards it.

use std::future::Future;

use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

use super::config::IsolationMode;
use super::signal::CellOutcome;
use crate::error::LoadError;

/// How a boot ended, as seen from outside the boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoundaryExit {
    /// The entry point returned.
    Completed(CellOutcome),
    /// The entry point panicked.
    Panicked(String),
    /// The boundary was discarded before the entry point returned.
    Discarded,
}

/// One isolated cell boot.
pub struct Boundary {
    runtime: Option<Runtime>,
    join: Option<JoinHandle<CellOutcome>>,
}

impl Boundary {
    /// Starts `entry` inside a new boundary.
    pub fn boot<F>(cell: &str, mode: IsolationMode, entry: F) -> Result<Self, LoadError>
    where
        F: Future<Output = CellOutcome> + Send + 'static,
    {
        match mode {
            IsolationMode::DedicatedRuntime { worker_threads } => {
                let runtime = Builder::new_multi_thread()
                    .worker_threads(worker_threads.max(1))
                    .thread_name(format!("cell-{cell}"))
                    .enable_all()
                    .build()
                    .map_err(|e| LoadError::Boundary {
                        error: e.to_string(),
                    })?;
                let join = runtime.spawn(entry);
                Ok(Self {
                    runtime: Some(runtime),
                    join: Some(join),
                })
            }
            IsolationMode::SharedRuntime => Ok(Self {
                runtime: None,
                join: Some(tokio::spawn(entry)),
            }),
        }
    }

    /// Waits for the entry point. Cancel-safe: may be called again after being dropped.
    pub async fn join(&mut self) -> BoundaryExit {
        let Some(handle) = self.join.as_mut() else {
            return BoundaryExit::Discarded;
        };
        let res = handle.await;
        self.join = None;
        match res {
            Ok(outcome) => BoundaryExit::Completed(outcome),
            Err(e) if e.is_panic() => {
                BoundaryExit::Panicked(super::panic_message(e.into_panic().as_ref()))
            }
            Err(_) => BoundaryExit::Discarded,
        }
    }

    /// Tears the boundary down without waiting. Idempotent.
    pub fn discard(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }

    /// Returns true once the entry point is finished or the boundary discarded.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for Boundary {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signal::RestartSignal;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const DEDICATED: IsolationMode = IsolationMode::DedicatedRuntime { worker_threads: 1 };

    #[tokio::test]
    async fn returns_the_entry_outcome() {
        let mut b = Boundary::boot("ok", DEDICATED, async {
            CellOutcome::Restart(RestartSignal::ConfigurationChanged)
        })
        .unwrap();
        assert_eq!(
            b.join().await,
            BoundaryExit::Completed(CellOutcome::Restart(RestartSignal::ConfigurationChanged))
        );
        assert!(b.is_finished());
    }

    async fn explode() -> CellOutcome {
        panic!("cell exploded")
    }

    #[tokio::test]
    async fn contains_panics() {
        for mode in [DEDICATED, IsolationMode::SharedRuntime] {
            let mut b = Boundary::boot("panicky", mode, explode()).unwrap();
            assert_eq!(b.join().await, BoundaryExit::Panicked("cell exploded".into()));
        }
    }

    async fn tick_forever(ticks: Arc<AtomicUsize>) -> CellOutcome {
        loop {
            ticks.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn discard_stops_an_unresponsive_cell() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut b = Boundary::boot("stuck", DEDICATED, tick_forever(ticks.clone())).unwrap();

        assert!(tokio::time::timeout(Duration::from_millis(50), b.join()).await.is_err());
        b.discard();
        b.discard();
        assert_eq!(b.join().await, BoundaryExit::Discarded);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(settled > 0);
        assert_eq!(ticks.load(Ordering::SeqCst), settled);
    }
}
