//! Fire-and-forget task supervision
//!
//! Failures of work that nobody awaits, such as state saves, are logged
//! here. Under `Exit` the process terminates with code 1 after logging.

use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackgroundFailurePolicy {
    #[default]
    Log,
    Exit,
}

impl BackgroundFailurePolicy {
    /// Record a failure of the task named `task`.
    pub fn report(self, task: &str, err: &anyhow::Error) {
        error!(task, "Background task failed: {:#}", err);
        if self == BackgroundFailurePolicy::Exit {
            error!("Exiting because of background task failure.");
            std::process::exit(1);
        }
    }

    /// Run `fut` on `handle`, reporting an error result or a panic.
    pub fn spawn_on<F>(self, handle: &Handle, task: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let inner = handle.spawn(fut);
        handle.spawn(async move {
            match inner.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.report(task, &e),
                Err(join_err) if join_err.is_panic() => {
                    self.report(task, &anyhow::anyhow!("task panicked: {}", join_err))
                }
                Err(_) => {}
            }
        })
    }

    /// `spawn_on` using the current runtime.
    pub fn spawn<F>(self, task: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.spawn_on(&Handle::current(), task, fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_policy_survives_failure_and_panic() {
        let policy = BackgroundFailurePolicy::Log;
        policy
            .spawn("failing", async { Err::<(), _>(anyhow::anyhow!("disk full")) })
            .await
            .unwrap();
        policy
            .spawn("panicking", async move {
                if policy == BackgroundFailurePolicy::Log {
                    panic!("boom");
                }
                Ok(())
            })
            .await
            .unwrap();
    }
}
