//! Runners: drive the services of one cell.
//!
//! - [`QueuedServiceRunner`] round-robin over queued services;
//! - [`ScheduledServiceRunner`] fixed-phase interval scheduling;
//! - [`CellScheduler`] the cell's main loop over both runners plus background services.

mod cell;
mod queued;
mod scheduled;

pub use cell::{CellScheduler, CellState};
pub use queued::{QueuedServiceRunner, RunnerFault};
pub use scheduled::ScheduledServiceRunner;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;

/// Runs one handler invocation with an optional timeout, containing panics.
///
/// On timeout the invocation's `child` token is cancelled and
/// [`ServiceError::Timeout`] is returned. A panic becomes [`ServiceError::Fail`].
pub(crate) async fn invoke<F>(
    fut: F,
    timeout: Option<Duration>,
    child: &CancellationToken,
) -> Result<(), ServiceError>
where
    F: Future<Output = Result<(), ServiceError>>,
{
    let guarded = AssertUnwindSafe(fut).catch_unwind();
    let res = match timeout.filter(|d| *d > Duration::ZERO) {
        Some(dur) => match time::timeout(dur, guarded).await {
            Ok(r) => r,
            Err(_elapsed) => {
                child.cancel();
                return Err(ServiceError::Timeout { timeout: dur });
            }
        },
        None => guarded.await,
    };
    res.unwrap_or_else(|panic| {
        Err(ServiceError::fail(format!(
            "panicked: {}",
            crate::core::panic_message(panic.as_ref())
        )))
    })
}
