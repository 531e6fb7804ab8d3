use std::{collections::HashMap, future::Future, sync::Arc};

use tokio::sync::{OnceCell, RwLock};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ServerConfig,
    error::Result,
    media::{pipe::CameraPipeline, types::CameraId},
};

// Filled exactly once; concurrent creators of the same id await the same cell.
type Slot = Arc<OnceCell<Arc<CameraPipeline>>>;

/// Camera id -> live pipeline. The single source of truth for which cameras
/// are currently ingesting.
#[derive(Clone)]
pub struct StreamRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    pipes: RwLock<HashMap<CameraId, Slot>>,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
}

impl StreamRegistry {
    pub fn new(config: Arc<ServerConfig>, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                pipes: RwLock::new(HashMap::new()),
                config,
                cancel,
            }),
        }
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.inner.config
    }

    /// Returns the pipeline registered for `id`, starting one when there is
    /// none or the previous one has closed. Only the map lookup is serialized;
    /// codec startup runs outside the lock.
    pub async fn get_or_create(&self, id: &CameraId) -> Result<Arc<CameraPipeline>> {
        if let Some(pipe) = self.get(id).await {
            return Ok(pipe);
        }

        let slot = self.slot(id).await;
        let started = slot
            .get_or_try_init(|| {
                CameraPipeline::start(
                    id.clone(),
                    Arc::clone(&self.inner.config),
                    self.clone(),
                    self.inner.cancel.child_token(),
                )
            })
            .await;
        match started {
            Ok(pipe) => Ok(Arc::clone(pipe)),
            Err(e) => {
                self.discard(id, &slot).await;
                Err(e)
            }
        }
    }

    /// The registered pipeline for `id` unless it has already closed.
    pub async fn get(&self, id: &CameraId) -> Option<Arc<CameraPipeline>> {
        let pipes = self.inner.pipes.read().await;
        pipes
            .get(id)
            .and_then(|slot| slot.get())
            .filter(|pipe| !pipe.is_closed())
            .cloned()
    }

    /// Deregisters `pipe`. A newer pipeline registered under the same id is
    /// left alone.
    pub async fn remove(&self, id: &CameraId, pipe: &Arc<CameraPipeline>) -> bool {
        self.remove_then(id, pipe, async {}).await
    }

    /// Like [`remove`](Self::remove), then runs `vacate` when no other
    /// pipeline holds or is starting under `id`. The registry stays locked
    /// until `vacate` finishes, so a successor cannot start in between.
    pub async fn remove_then<F>(&self, id: &CameraId, pipe: &Arc<CameraPipeline>, vacate: F) -> bool
    where
        F: Future<Output = ()>,
    {
        let mut pipes = self.inner.pipes.write().await;
        let current = pipes
            .get(id)
            .and_then(|slot| slot.get())
            .is_some_and(|registered| Arc::ptr_eq(registered, pipe));
        if current {
            pipes.remove(id);
            log::debug!("Registry: removed {}", id);
        }
        if !pipes.contains_key(id) {
            vacate.await;
        }
        current
    }

    /// Sorted ids of pipelines that have not closed.
    pub async fn list(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self
            .snapshot()
            .await
            .into_iter()
            .map(|pipe| pipe.id().clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn snapshot(&self) -> Vec<Arc<CameraPipeline>> {
        let pipes = self.inner.pipes.read().await;
        pipes
            .values()
            .filter_map(|slot| slot.get())
            .filter(|pipe| !pipe.is_closed())
            .cloned()
            .collect()
    }

    /// Drops a slot whose pipeline failed to start, unless another caller
    /// has filled or replaced it meanwhile or is still waiting on it.
    async fn discard(&self, id: &CameraId, slot: &Slot) {
        let mut pipes = self.inner.pipes.write().await;
        // one reference in the map, one held by the caller
        let stale = pipes.get(id).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && !current.initialized() && Arc::strong_count(slot) == 2
        });
        if stale {
            pipes.remove(id);
        }
    }

    /// Existing slot for `id`, or a fresh one replacing a closed pipeline.
    async fn slot(&self, id: &CameraId) -> Slot {
        let mut pipes = self.inner.pipes.write().await;
        if let Some(slot) = pipes.get(id) {
            let stale = slot.get().is_some_and(|pipe| pipe.is_closed());
            if !stale {
                return Arc::clone(slot);
            }
        }
        let slot = Slot::default();
        pipes.insert(id.clone(), Arc::clone(&slot));
        slot
    }
}
