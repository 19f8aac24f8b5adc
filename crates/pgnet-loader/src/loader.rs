//! The progressive loader state machine.
//!
//! ```text
//! Uninitialized ──init()──► Initialized ──step 0──► Stepping(1) ─ … ─► Completed
//!        │                      │                       │
//!        └──────────────────────┴───────── error ───────┴──► Failed
//! ```
//!
//! A failed step leaves `current_step` where it was, so calling
//! [`advance_one_step`](ProgressiveLoader::advance_one_step) again retries it.

use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::buffers::WeightStore;
use crate::config::{LoaderConfig, SchedulingPolicy};
use crate::descriptor::ModelDescriptor;
use crate::driver::{PartitionPrefetcher, StepCallback, StepInfo};
use crate::error::LoadError;
use crate::fetch::Fetch;
use crate::manifest::PartitionManifest;
use crate::model::ModelHandle;

pub const MANIFEST_FILE: &str = "progressive.json";
pub const MODEL_FILE: &str = "model.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Uninitialized,
    Initialized,
    /// Steps `0..n` have been injected.
    Stepping(usize),
    Completed,
    Failed,
}

/// Fetches partitions, rebuilds tensors and injects them step by step.
pub struct ProgressiveLoader<F> {
    config: LoaderConfig,
    fetcher: Arc<F>,
    manifest: Option<Arc<PartitionManifest>>,
    model: Option<ModelHandle>,
    store: WeightStore,
    current_step: usize,
    num_steps: usize,
    state: LoaderState,
}

impl<F: Fetch + 'static> ProgressiveLoader<F> {
    pub fn new(config: LoaderConfig, fetcher: F) -> Self {
        Self::with_shared_fetcher(config, Arc::new(fetcher))
    }

    pub fn with_shared_fetcher(config: LoaderConfig, fetcher: Arc<F>) -> Self {
        let store = WeightStore::new(config.reconstruction);
        Self {
            config,
            fetcher,
            manifest: None,
            model: None,
            store,
            current_step: 0,
            num_steps: 0,
            state: LoaderState::Uninitialized,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// Next step to load; equals `num_steps` once complete.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// `min(requested, levels)`, known after `init()`.
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn manifest(&self) -> Option<&PartitionManifest> {
        self.manifest.as_deref()
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        self.model.as_ref()
    }

    pub fn into_model(self) -> Option<ModelHandle> {
        self.model
    }

    /// Fetch the manifest and model descriptor and build the model shell.
    ///
    /// Calling it again starts over from step 0.
    pub async fn init(&mut self) -> Result<(), LoadError> {
        let result = self.try_init().await;
        self.track(result)
    }

    async fn try_init(&mut self) -> Result<(), LoadError> {
        let manifest_location = self.config.location(MANIFEST_FILE);
        let manifest_json = self
            .fetcher
            .fetch_json(&manifest_location)
            .await
            .map_err(|source| LoadError::ManifestFetch {
                location: manifest_location,
                source,
            })?;
        let manifest = PartitionManifest::from_json(manifest_json)?;

        let levels = manifest.num_levels();
        let num_steps = self
            .config
            .num_progress_steps
            .map_or(levels, |requested| requested.min(levels));

        let model_location = self.config.location(MODEL_FILE);
        let model_json = self
            .fetcher
            .fetch_json(&model_location)
            .await
            .map_err(|source| LoadError::ManifestFetch {
                location: model_location,
                source,
            })?;
        let descriptor = ModelDescriptor::from_json(model_json)?;
        let mut model = ModelHandle::from_descriptor(&descriptor)?;

        if self.config.prefill_weights {
            model.load_weights(manifest.midpoint_weights()?);
        }

        info!(
            model = self.config.base_url(),
            format = model.format().as_str(),
            layers = manifest.layers.len(),
            interface = %manifest.interface(),
            steps = num_steps,
            bytes = manifest.total_bytes(),
            "initialized progressive model"
        );

        self.manifest = Some(Arc::new(manifest));
        self.model = Some(model);
        self.store = WeightStore::new(self.config.reconstruction);
        self.current_step = 0;
        self.num_steps = num_steps;
        self.state = if num_steps == 0 {
            LoaderState::Completed
        } else {
            LoaderState::Initialized
        };
        Ok(())
    }

    /// Load the next partition and inject the refined weights.
    ///
    /// Returns the step just completed, or `None` once every step is done
    /// (and on every call after that).
    pub async fn advance_one_step(&mut self) -> Result<Option<usize>, LoadError> {
        let Some(step) = self.next_step()? else {
            return Ok(None);
        };
        let location = self.partition_location(step)?;

        let started = Instant::now();
        let fetched = self
            .fetcher
            .fetch_bytes(&location)
            .await
            .map_err(|source| LoadError::PartitionFetch {
                step,
                location,
                source,
            });
        let bytes = self.track(fetched)?;
        debug!(step, bytes = bytes.len(), fetch_ms = started.elapsed().as_millis() as u64, "fetched partition");

        let applied = self.apply_partition(step, &bytes);
        self.track(applied)?;
        Ok(Some(step))
    }

    /// Run every remaining step under the configured policy, invoking
    /// `callback` after each injection.
    pub async fn drive<C: StepCallback>(&mut self, callback: C) -> Result<&ModelHandle, LoadError> {
        let policy = self.config.policy();
        self.drive_with(policy, callback).await
    }

    pub async fn drive_with<C: StepCallback>(
        &mut self,
        policy: SchedulingPolicy,
        mut callback: C,
    ) -> Result<&ModelHandle, LoadError> {
        match policy {
            SchedulingPolicy::Sequential => self.drive_sequential(&mut callback).await?,
            SchedulingPolicy::Pipelined => self.drive_pipelined(&mut callback).await?,
        }
        self.model.as_ref().ok_or(LoadError::NotInitialized)
    }

    async fn drive_sequential<C: StepCallback>(&mut self, callback: &mut C) -> Result<(), LoadError> {
        while let Some(step) = self.advance_one_step().await? {
            self.notify(callback, step).await?;
        }
        Ok(())
    }

    async fn drive_pipelined<C: StepCallback>(&mut self, callback: &mut C) -> Result<(), LoadError> {
        let Some(start) = self.next_step()? else {
            return Ok(());
        };
        let handle = match Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!("no tokio runtime for background fetches; loading sequentially");
                return self.drive_sequential(callback).await;
            }
        };

        let jobs = (start..self.num_steps)
            .map(|step| Ok((step, self.partition_location(step)?)))
            .collect::<Result<Vec<_>, LoadError>>()?;
        let mut prefetcher = PartitionPrefetcher::spawn(
            &handle,
            Arc::clone(&self.fetcher),
            jobs,
            self.config.prefetch_depth,
        );

        for expected in start..self.num_steps {
            let fetched = match prefetcher.next().await {
                Some(f) if f.step == expected => f,
                _ => return self.track(Err(LoadError::FetchTaskStopped(expected))),
            };
            let bytes = fetched.result.map_err(|source| LoadError::PartitionFetch {
                step: expected,
                location: fetched.location,
                source,
            });
            let bytes = self.track(bytes)?;
            debug!(step = expected, bytes = bytes.len(), "received prefetched partition");

            let applied = self.apply_partition(expected, &bytes);
            self.track(applied)?;
            self.notify(callback, expected).await?;
        }
        Ok(())
    }

    async fn notify<C: StepCallback>(&self, callback: &mut C, step: usize) -> Result<(), LoadError> {
        let model = self.model.as_ref().ok_or(LoadError::NotInitialized)?;
        let info = StepInfo {
            step,
            is_last: step + 1 == self.num_steps,
            num_steps: self.num_steps,
        };
        callback
            .on_step(model, info)
            .await
            .map_err(|source| LoadError::Callback { step, source })
    }

    fn next_step(&self) -> Result<Option<usize>, LoadError> {
        if self.manifest.is_none() {
            return Err(LoadError::NotInitialized);
        }
        Ok((self.current_step < self.num_steps).then_some(self.current_step))
    }

    fn partition_location(&self, step: usize) -> Result<String, LoadError> {
        let manifest = self.manifest.as_ref().ok_or(LoadError::NotInitialized)?;
        Ok(self.config.location(&manifest.files[step]))
    }

    /// Split, merge and inject one partition.
    fn apply_partition(&mut self, step: usize, bytes: &[u8]) -> Result<(), LoadError> {
        let manifest = Arc::clone(self.manifest.as_ref().ok_or(LoadError::NotInitialized)?);
        let started = Instant::now();

        let slices = manifest.split_partition(step, bytes)?;
        let tensors = self.store.apply(&manifest, &slices)?;
        let model = self.model.as_mut().ok_or(LoadError::NotInitialized)?;
        model.load_weights(tensors);

        self.current_step = step + 1;
        self.state = if self.current_step == self.num_steps {
            LoaderState::Completed
        } else {
            LoaderState::Stepping(self.current_step)
        };

        let restore_ms = started.elapsed().as_secs_f64() * 1e3;
        if self.config.logging {
            info!(step, restore_ms, "restored weights");
        } else {
            debug!(step, restore_ms, "restored weights");
        }
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T, LoadError>) -> Result<T, LoadError> {
        if result.is_err() {
            self.state = LoaderState::Failed;
        }
        result
    }
}

/// Initialize and drive a loader in one call, returning the final model.
pub async fn load_progressively<F, C>(
    config: LoaderConfig,
    fetcher: F,
    callback: C,
) -> Result<ModelHandle, LoadError>
where
    F: Fetch + 'static,
    C: StepCallback,
{
    config.validate()?;
    let mut loader = ProgressiveLoader::new(config, fetcher);
    loader.init().await?;
    loader.drive(callback).await?;
    loader.into_model().ok_or(LoadError::NotInitialized)
}
