//! Background batching in front of an exporter.
//!
//! Items are queued without blocking the caller. A worker task exports a
//! batch when it fills up or when the flush interval ticks. Shutdown drains
//! the queue, exports what is left, and shuts the exporter down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};

use crate::observability::exporter::{ExportError, Exporter};
use crate::observability::registry::ErrorHandler;

/// Queue and flush settings.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_queue_size: usize,
    pub max_batch_size: usize,
    pub scheduled_delay: Duration,
    pub export_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_batch_size: 512,
            scheduled_delay: Duration::from_secs(1),
            export_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("{pipeline}: queue full, item dropped")]
    QueueFull { pipeline: String },

    #[error("{pipeline}: processor is shut down")]
    Closed { pipeline: String },

    #[error("{pipeline}: export failed: {source}")]
    Export {
        pipeline: String,
        #[source]
        source: ExportError,
    },
}

enum Message<T> {
    Item(T),
    Flush(oneshot::Sender<Result<(), ExportError>>),
    Shutdown(oneshot::Sender<Result<(), ExportError>>),
}

/// Handle to a batching worker.
pub struct BatchProcessor<T> {
    name: String,
    tx: mpsc::Sender<Message<T>>,
    closed: AtomicBool,
}

impl<T> std::fmt::Debug for BatchProcessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> BatchProcessor<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> BatchProcessor<T> {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// Failures of scheduled exports have no caller to return to; they are
    /// passed to `errors`.
    pub fn spawn<E>(name: impl Into<String>, exporter: E, config: BatchConfig, errors: ErrorHandler) -> Self
    where
        E: Exporter<T>,
    {
        let name = name.into();
        // Room for control messages on top of the item queue.
        let (tx, rx) = mpsc::channel(config.max_queue_size.max(1) + 2);

        let worker_name = name.clone();
        tokio::spawn(async move {
            worker(worker_name, exporter, config, errors, rx).await;
        });

        Self {
            name,
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Queue an item. Never waits; a full queue drops the item.
    pub fn emit(&self, item: T) -> Result<(), BatchError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.tx.try_send(Message::Item(item)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BatchError::QueueFull {
                pipeline: self.name.clone(),
            },
            mpsc::error::TrySendError::Closed(_) => self.closed_error(),
        })
    }

    /// Export everything queued so far.
    pub async fn force_flush(&self) -> Result<(), BatchError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let (ack, done) = oneshot::channel();
        self.request(Message::Flush(ack), done).await
    }

    /// Drain, export, and shut the exporter down. Only the first call does
    /// any work; later calls return [`BatchError::Closed`].
    pub async fn shutdown(&self) -> Result<(), BatchError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(self.closed_error());
        }
        let (ack, done) = oneshot::channel();
        self.request(Message::Shutdown(ack), done).await
    }

    async fn request(
        &self,
        message: Message<T>,
        done: oneshot::Receiver<Result<(), ExportError>>,
    ) -> Result<(), BatchError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| self.closed_error())?;
        match done.await {
            Ok(result) => result.map_err(|source| BatchError::Export {
                pipeline: self.name.clone(),
                source,
            }),
            Err(_) => Err(self.closed_error()),
        }
    }

    fn closed_error(&self) -> BatchError {
        BatchError::Closed {
            pipeline: self.name.clone(),
        }
    }
}

async fn worker<T, E>(
    name: String,
    exporter: E,
    config: BatchConfig,
    errors: ErrorHandler,
    mut rx: mpsc::Receiver<Message<T>>,
) where
    T: Send + 'static,
    E: Exporter<T>,
{
    let max_batch = config.max_batch_size.max(1);
    let mut batch: Vec<T> = Vec::with_capacity(max_batch);
    let mut ticker = time::interval(config.scheduled_delay);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(Message::Item(item)) => {
                    batch.push(item);
                    if batch.len() >= max_batch {
                        report(&errors, &name, export(&exporter, &mut batch, max_batch, config.export_timeout).await);
                    }
                }
                Some(Message::Flush(ack)) => {
                    let mut result = Ok(());
                    while !batch.is_empty() && result.is_ok() {
                        result = export(&exporter, &mut batch, max_batch, config.export_timeout).await;
                    }
                    let _ = ack.send(result);
                }
                Some(Message::Shutdown(ack)) => {
                    rx.close();
                    // A flush that raced the shutdown still gets an answer.
                    while let Ok(pending) = rx.try_recv() {
                        match pending {
                            Message::Item(item) => batch.push(item),
                            Message::Flush(flush_ack) => {
                                let mut result = Ok(());
                                while !batch.is_empty() && result.is_ok() {
                                    result = export(&exporter, &mut batch, max_batch, config.export_timeout).await;
                                }
                                let _ = flush_ack.send(result);
                            }
                            Message::Shutdown(other) => {
                                let _ = other.send(Ok(()));
                            }
                        }
                    }
                    let mut result = Ok(());
                    while !batch.is_empty() && result.is_ok() {
                        result = export(&exporter, &mut batch, max_batch, config.export_timeout).await;
                    }
                    let closed = exporter.shutdown().await;
                    let _ = ack.send(result.and(closed));
                    break;
                }
                None => {
                    // Every handle dropped without shutdown.
                    report(&errors, &name, export(&exporter, &mut batch, max_batch, config.export_timeout).await);
                    break;
                }
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    report(&errors, &name, export(&exporter, &mut batch, max_batch, config.export_timeout).await);
                }
            }
        }
    }

    tracing::debug!(pipeline = %name, "batch worker stopped");
}

/// Export up to `max_batch` items; the rest stays buffered.
async fn export<T, E>(
    exporter: &E,
    batch: &mut Vec<T>,
    max_batch: usize,
    timeout: Duration,
) -> Result<(), ExportError>
where
    E: Exporter<T>,
{
    if batch.is_empty() {
        return Ok(());
    }
    let count = batch.len().min(max_batch);
    let items: Vec<T> = batch.drain(..count).collect();
    match time::timeout(timeout, exporter.export(items)).await {
        Ok(result) => result,
        Err(_) => Err(ExportError::Timeout(timeout)),
    }
}

fn report(errors: &ErrorHandler, name: &str, result: Result<(), ExportError>) {
    if let Err(source) = result {
        errors.handle(&BatchError::Export {
            pipeline: name.to_string(),
            source,
        });
    }
}
