//! Workload execution with concurrent resource sampling.
//!
//! The exec call runs on its own task and reports back over a oneshot
//! channel. Meanwhile the caller polls `sample` on a fixed interval and folds
//! every successful reading into a running peak, stopping as soon as the
//! exec completes. Transient sample failures are skipped; a permanent one
//! ends polling for the rest of the workload.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::backend::{Backend, BenchError, ExecOutcome, Snapshot};

/// Readings and outcome of one workload execution.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Measured<S> {
    pub before: S,
    pub after: S,
    /// Field-wise maximum over `before`, `after` and every intermediate sample.
    pub peak: S,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Aborts the exec task if the measurement is cancelled.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs `cmd` in sandbox `id` while sampling its resource usage.
///
/// The pre and post samples are fatal on error; samples taken while the
/// command runs are best effort. A non-zero exit code is returned as data.
pub(crate) async fn measure<B: Backend + 'static>(
    backend: &Arc<B>,
    id: &str,
    cmd: &str,
    timeout_ms: u64,
    poll: Duration,
) -> Result<Measured<B::Snapshot>, BenchError> {
    let before = backend.sample(id).await?;

    let (done_tx, mut done_rx) = oneshot::channel::<Result<ExecOutcome, BenchError>>();
    let _exec = {
        let backend = Arc::clone(backend);
        let id = id.to_string();
        let cmd = cmd.to_string();
        AbortOnDrop(tokio::spawn(async move {
            let result = backend.exec(&id, &cmd, timeout_ms).await;
            let _ = done_tx.send(result);
        }))
    };

    let mut peak = before;
    let mut ticker = interval_at(Instant::now() + poll, poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sampling = true;
    let completed = loop {
        tokio::select! {
            biased;
            result = &mut done_rx => break result,
            _ = ticker.tick(), if sampling => match backend.sample(id).await {
                Ok(reading) => peak = peak.peak(reading),
                Err(e) if e.is_transient() => {
                    debug!("Skipping {} sample for {}: {}", backend.name(), id, e);
                }
                Err(e) => {
                    warn!("Stopped sampling {} {} mid-workload: {}", backend.name(), id, e);
                    sampling = false;
                }
            },
        }
    };
    let outcome = completed.map_err(|_| {
        BenchError::transport(format!("exec task for {id} ended without a result"))
    })??;

    let after = backend.sample(id).await?;
    peak = peak.peak(after);

    debug!(
        "Workload in {} {} exited {} after {}ms",
        backend.name(),
        id,
        outcome.exit_code,
        outcome.duration_ms
    );

    Ok(Measured {
        before,
        after,
        peak,
        exit_code: outcome.exit_code,
        duration_ms: outcome.duration_ms,
    })
}
