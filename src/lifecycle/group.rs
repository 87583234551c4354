//! A group of concurrently running tasks with joined errors.
//!
//! Every task's failure is kept, in completion order. The first failure
//! also triggers the group's shutdown signal so the remaining tasks wind
//! down instead of running forever.

use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::error::{BoxError, ErrorAggregate};
use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::shutdown::Shutdown;

#[derive(Debug, Clone)]
pub struct TaskGroup {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    errors: Mutex<ErrorAggregate<LifecycleError>>,
    pending: watch::Sender<usize>,
    shutdown: Shutdown,
}

impl TaskGroup {
    pub fn new(shutdown: Shutdown) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                errors: Mutex::new(ErrorAggregate::new()),
                pending,
                shutdown,
            }),
        }
    }

    /// Number of tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    /// Run `task` on the runtime. A panic is recorded as
    /// [`LifecycleError::Panicked`] instead of tearing the group down.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), LifecycleError>> + Send + 'static,
    {
        let name = name.into();
        self.inner.pending.send_modify(|n| *n += 1);

        let inner = self.inner.clone();
        let handle = tokio::spawn(task);
        tokio::spawn(async move {
            let failure = match handle.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) if e.is_panic() => Some(LifecycleError::Panicked { task: name }),
                Err(_) => Some(LifecycleError::Task {
                    task: name,
                    source: "task was cancelled".into(),
                }),
            };

            if let Some(error) = failure {
                tracing::debug!(error = %error, "Lifecycle task failed");
                inner
                    .errors
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(error);
                inner.shutdown.trigger();
            }
            inner.pending.send_modify(|n| *n -= 1);
        });
    }

    /// Like [`spawn`](Self::spawn) for tasks with their own error type,
    /// which is wrapped in [`LifecycleError::Task`].
    pub fn spawn_task<F, E>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let name = name.into();
        let label = name.clone();
        self.spawn(name, async move {
            task.await.map_err(|e| LifecycleError::Task {
                task: label,
                source: e.into(),
            })
        });
    }

    /// Wait until every spawned task has finished and take the errors
    /// collected so far.
    pub async fn wait(&self) -> ErrorAggregate<LifecycleError> {
        let mut pending = self.inner.pending.subscribe();
        let _ = pending.wait_for(|n| *n == 0).await;
        std::mem::take(
            &mut *self
                .inner
                .errors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_with_no_tasks() {
        let group = TaskGroup::new(Shutdown::new());
        assert!(group.wait().await.is_empty());
    }

    #[tokio::test]
    async fn test_first_failure_triggers_shutdown() {
        let shutdown = Shutdown::new();
        let group = TaskGroup::new(shutdown.clone());

        let mut signal = shutdown.subscribe();
        group.spawn("waiter", async move {
            signal.cancelled().await;
            Ok(())
        });
        group.spawn_task("failing", async { Err::<(), _>("boom") });

        let errors = group.wait().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.iter().next().unwrap().owner(), "failing");
        assert!(shutdown.is_triggered());
        assert_eq!(group.pending(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_recorded() {
        let group = TaskGroup::new(Shutdown::new());
        group.spawn("panicky", async {
            let missing: Option<()> = None;
            missing.expect("state present");
            Ok(())
        });

        let errors = group.wait().await.into_vec();
        assert!(matches!(&errors[0], LifecycleError::Panicked { task } if task == "panicky"));
    }
}
