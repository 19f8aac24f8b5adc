//! Step callbacks and the background partition prefetcher.
//!
//! In pipelined mode a single task walks the partition list in order and
//! pushes each result into a bounded channel; the loader pops them in the
//! same order, so reconstruction and callbacks stay strictly sequential
//! while the network keeps working ahead.
//!
//! ```text
//! Time →
//! fetch:    [part-0][part-1]  [part-2]
//! compute:          [step 0][cb 0][step 1][cb 1][step 2][cb 2]
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{BoxError, FetchError};
use crate::fetch::Fetch;
use crate::model::ModelHandle;

/// Arguments passed to a step callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInfo {
    /// Zero-based index of the step just injected.
    pub step: usize,
    pub is_last: bool,
    pub num_steps: usize,
}

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'a>>;

/// Invoked after every step's weights are injected.
///
/// The model borrow lasts only for the returned future; the loader awaits
/// it before touching the weights again. Plain closures
/// `FnMut(&ModelHandle, StepInfo) -> Result<(), BoxError>` implement this.
pub trait StepCallback: Send {
    fn on_step<'a>(&'a mut self, model: &'a ModelHandle, info: StepInfo) -> StepFuture<'a>;
}

impl<F> StepCallback for F
where
    F: FnMut(&ModelHandle, StepInfo) -> Result<(), BoxError> + Send,
{
    fn on_step<'a>(&'a mut self, model: &'a ModelHandle, info: StepInfo) -> StepFuture<'a> {
        let result = self(model, info);
        Box::pin(std::future::ready(result))
    }
}

/// One partition as delivered by the fetch task.
pub(crate) struct Fetched {
    pub step: usize,
    pub location: String,
    pub result: Result<Vec<u8>, FetchError>,
}

/// Background fetch task feeding partitions in step order.
///
/// The task stops after the first failed fetch and is aborted when the
/// prefetcher is dropped, so no fetch outlives the driver.
pub(crate) struct PartitionPrefetcher {
    rx: mpsc::Receiver<Fetched>,
    task: JoinHandle<()>,
}

impl PartitionPrefetcher {
    pub fn spawn<F: Fetch + 'static>(
        handle: &Handle,
        fetcher: Arc<F>,
        jobs: Vec<(usize, String)>,
        depth: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let task = handle.spawn(async move {
            for (step, location) in jobs {
                let result = fetcher.fetch_bytes(&location).await;
                let failed = result.is_err();
                // Receiver gone means the driver returned early.
                if tx.send(Fetched { step, location, result }).await.is_err() || failed {
                    break;
                }
            }
        });
        Self { rx, task }
    }

    /// Next partition in step order, or `None` once the task has stopped.
    pub async fn next(&mut self) -> Option<Fetched> {
        self.rx.recv().await
    }
}

impl Drop for PartitionPrefetcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
