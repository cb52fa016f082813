use crate::config::DeletionConfig;
use crate::error::{DeletionError, Result};
use parking_lot::Mutex;
use snip_core::{DeleteTarget, EntryStore, ShortCode, StoreError};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Codes one user asked to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionRequest {
    pub user_id: String,
    pub codes: Vec<ShortCode>,
}

/// Fire-and-forget soft deletion.
///
/// [`submit`](Self::submit) only enqueues; a single dispatcher task takes
/// requests in arrival order and fans each one out to at most
/// `config.workers` workers pulling chunks from a shared queue. Worker
/// failures are merged and logged once the request's workers have all
/// joined. Nothing is retried and nothing is reported back to the submitter.
pub struct DeletionPipeline {
    requests: mpsc::Sender<DeletionRequest>,
    stop: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    config: DeletionConfig,
}

impl DeletionPipeline {
    /// Starts the dispatcher on the current tokio runtime.
    pub fn spawn(store: Arc<dyn EntryStore>, config: DeletionConfig) -> Self {
        let config = config.normalized();
        let (requests, receiver) = mpsc::channel(config.queue_depth);
        let (stop, stopped) = watch::channel(false);
        let dispatcher = tokio::spawn(dispatch(store, config, receiver, stopped));

        info!(
            workers = config.workers,
            queue_depth = config.queue_depth,
            chunk_size = config.chunk_size,
            "deletion pipeline started"
        );

        Self {
            requests,
            stop,
            dispatcher: Mutex::new(Some(dispatcher)),
            config,
        }
    }

    pub fn config(&self) -> &DeletionConfig {
        &self.config
    }

    /// Whether new requests are still accepted.
    pub fn is_accepting(&self) -> bool {
        !*self.stop.borrow() && !self.requests.is_closed()
    }

    /// Queues `codes` for deletion on behalf of `user_id` and returns without
    /// waiting for the store.
    pub fn submit(&self, user_id: impl Into<String>, codes: Vec<ShortCode>) -> Result<()> {
        if !self.is_accepting() {
            return Err(DeletionError::Stopped);
        }
        if codes.is_empty() {
            return Ok(());
        }

        let request = DeletionRequest {
            user_id: user_id.into(),
            codes,
        };
        let (user_id, count) = (request.user_id.clone(), request.codes.len());

        match self.requests.try_send(request) {
            Ok(()) => {
                debug!(user_id = %user_id, codes = count, "deletion request received");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(user_id = %user_id, codes = count, "deletion queue full, request rejected");
                Err(DeletionError::QueueFull(self.config.queue_depth))
            }
            Err(TrySendError::Closed(_)) => Err(DeletionError::Stopped),
        }
    }

    /// Stops accepting requests, finishes the ones already queued, and waits
    /// for the dispatcher to exit. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            if let Err(err) = dispatcher.await {
                error!(error = %err, "deletion dispatcher panicked");
            }
        }
    }
}

impl std::fmt::Debug for DeletionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionPipeline")
            .field("config", &self.config)
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

async fn dispatch(
    store: Arc<dyn EntryStore>,
    config: DeletionConfig,
    mut requests: mpsc::Receiver<DeletionRequest>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(request) => run(&store, &config, request).await,
                None => break,
            },
            _ = stop.changed() => {
                requests.close();
                while let Some(request) = requests.recv().await {
                    run(&store, &config, request).await;
                }
                break;
            }
        }
    }
    info!("deletion pipeline stopped");
}

async fn run(store: &Arc<dyn EntryStore>, config: &DeletionConfig, request: DeletionRequest) {
    let user_id = request.user_id.clone();
    let count = request.codes.len();

    match process(store, config, request).await {
        Ok(()) => debug!(user_id = %user_id, codes = count, "deletion request done"),
        Err(err) => error!(user_id = %user_id, codes = count, error = %err, "deletion request failed"),
    }
}

/// Deletes one request's codes with up to `config.workers` concurrent workers.
///
/// Returns once every worker has joined. A failed chunk does not stop the
/// others; all failures come back together.
pub(crate) async fn process(
    store: &Arc<dyn EntryStore>,
    config: &DeletionConfig,
    request: DeletionRequest,
) -> Result<()> {
    let DeletionRequest { user_id, codes } = request;
    let chunks: VecDeque<Vec<DeleteTarget>> = codes
        .chunks(config.chunk_size.max(1))
        .map(|chunk| {
            chunk
                .iter()
                .map(|code| DeleteTarget::new(user_id.clone(), code.clone()))
                .collect()
        })
        .collect();

    let workers = config.workers.max(1).min(chunks.len());
    debug!(user_id = %user_id, chunks = chunks.len(), workers, "deletion request dispatched");

    let queue = Arc::new(Mutex::new(chunks));
    let mut set = JoinSet::new();
    for worker in 0..workers {
        let queue = Arc::clone(&queue);
        let store = Arc::clone(store);
        set.spawn(async move {
            let mut failures = Vec::new();
            loop {
                let next = queue.lock().pop_front();
                let Some(chunk) = next else {
                    break;
                };
                if let Err(err) = store.delete_user_urls(&chunk).await {
                    warn!(worker, codes = chunk.len(), error = %err, "deletion chunk failed");
                    failures.push(err);
                }
            }
            failures
        });
    }

    let mut failures = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(worker_failures) => failures.extend(worker_failures),
            Err(err) => failures.push(StoreError::Operation(format!(
                "deletion worker panicked: {err}"
            ))),
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(DeletionError::Failed(failures))
    }
}
