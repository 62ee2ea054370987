use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{LifecycleError, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    ShuttingDown,
    /// Reached only after a clean teardown.
    Stopped,
}

/// Drives one background task through `Running → ShuttingDown → Stopped`.
///
/// The task is expected to watch [`Supervisor::token`] and return once it is
/// cancelled. After a signal the task gets `drain` to do so; exceeding it, an
/// error from the task, or a panic is reported as `Err` and the phase stays
/// where it was.
pub struct Supervisor {
    name: &'static str,
    token: CancellationToken,
    phase: watch::Sender<Phase>,
    drain: Duration,
}

impl Supervisor {
    pub fn new(name: &'static str, drain: Duration) -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        Self {
            name,
            token: CancellationToken::new(),
            phase,
            drain,
        }
    }

    /// Токен для фоновой задачи.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Ждать `shutdown` или самостоятельного завершения worker'а.
    pub async fn run<S, E>(
        self,
        shutdown: S,
        mut worker: JoinHandle<Result<(), E>>,
    ) -> Result<(), LifecycleError<E>>
    where
        S: Future<Output = Signal>,
    {
        tokio::select! {
            signal = shutdown => {
                tracing::info!(process = self.name, %signal, "signal received, shutting down gracefully");
                self.phase.send_replace(Phase::ShuttingDown);
                self.token.cancel();

                match tokio::time::timeout(self.drain, &mut worker).await {
                    Ok(joined) => flatten(joined)?,
                    Err(_) => {
                        worker.abort();
                        return Err(LifecycleError::DrainTimeout(self.drain));
                    }
                }
            }
            joined = &mut worker => {
                self.token.cancel();
                flatten(joined)?;
                tracing::info!(process = self.name, "worker finished before any signal");
            }
        }

        self.phase.send_replace(Phase::Stopped);
        tracing::info!(process = self.name, "finished graceful shutdown");
        Ok(())
    }
}

fn flatten<E>(
    joined: Result<Result<(), E>, tokio::task::JoinError>,
) -> Result<(), LifecycleError<E>> {
    joined?.map_err(LifecycleError::Worker)
}
