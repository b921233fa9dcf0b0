//! One metadata client per remote instance

use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use super::api::ApiResult;
use super::instance::InstanceId;
use super::metadata::MetadataClient;

/// Builds a client for an instance on first use.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, instance: &InstanceId) -> ApiResult<MetadataClient>;
}

impl<F> ClientFactory for F
where
    F: Fn(&InstanceId) -> ApiResult<MetadataClient> + Send + Sync,
{
    fn connect(&self, instance: &InstanceId) -> ApiResult<MetadataClient> {
        self(instance)
    }
}

/// Memoizes one constructed client per instance identity.
///
/// Lookups across instances (resolving another instance's artifacts)
/// reuse the client instead of reconnecting and re-authenticating. The
/// factory runs at most once per identity, even under concurrent first
/// use; a failed connect caches nothing. Connecting holds only that
/// identity's slot, so other instances are never blocked behind it.
pub struct InstanceClientCache {
    slots: DashMap<InstanceId, Arc<Slot>>,
    factory: Box<dyn ClientFactory>,
}

type Slot = Mutex<Option<Arc<MetadataClient>>>;

impl InstanceClientCache {
    pub fn new(factory: impl ClientFactory + 'static) -> Self {
        Self {
            slots: DashMap::new(),
            factory: Box::new(factory),
        }
    }

    /// Get the client for `instance`, connecting if this is the first use.
    pub fn get_or_connect(&self, instance: &InstanceId) -> ApiResult<Arc<MetadataClient>> {
        // Clone the slot out so no map lock is held while connecting
        let slot = self.slots.entry(instance.clone()).or_default().clone();
        let mut client = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = client.as_ref() {
            return Ok(client.clone());
        }
        debug!(%instance, "connecting metadata client");
        let connected = Arc::new(self.factory.connect(instance)?);
        *client = Some(connected.clone());
        Ok(connected)
    }

    /// Pre-populate the cache with an already constructed client.
    pub fn insert(&self, client: Arc<MetadataClient>) {
        let instance = client.instance().clone();
        self.slots
            .insert(instance, Arc::new(Mutex::new(Some(client))));
    }

    pub fn contains(&self, instance: &InstanceId) -> bool {
        self.slots
            .get(instance)
            .is_some_and(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).is_some())
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached client.
    pub fn clear(&self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::api::ApiError;
    use crate::client::memory::MemoryApi;
    use crate::client::token::StaticToken;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_cache() -> (InstanceClientCache, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let api = Arc::new(MemoryApi::new());
        let cache = InstanceClientCache::new(move |instance: &InstanceId| -> ApiResult<MetadataClient> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(MetadataClient::new(
                instance.clone(),
                api.clone(),
                Arc::new(StaticToken::new("t")),
            ))
        });
        (cache, connects)
    }

    #[test]
    fn connects_once_per_instance() {
        let (cache, connects) = counting_cache();
        let a = InstanceId::new("laminlabs", "lamindata");
        let b = InstanceId::new("laminlabs", "cellxgene");

        let first = cache.get_or_connect(&a).unwrap();
        let again = cache.get_or_connect(&a).unwrap();
        cache.get_or_connect(&b).unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_first_use_connects_once() {
        let (cache, connects) = counting_cache();
        let cache = Arc::new(cache);
        let instance = InstanceId::new("laminlabs", "lamindata");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let instance = instance.clone();
                std::thread::spawn(move || cache.get_or_connect(&instance).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slow_connect_does_not_block_other_instances() {
        let api = Arc::new(MemoryApi::new());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let cache = Arc::new(InstanceClientCache::new(
            move |instance: &InstanceId| -> ApiResult<MetadataClient> {
                if instance.name == "slow" {
                    entered_tx.send(()).unwrap();
                    release_rx.lock().unwrap().recv().unwrap();
                }
                Ok(MetadataClient::new(
                    instance.clone(),
                    api.clone(),
                    Arc::new(StaticToken::new("t")),
                ))
            },
        ));

        let slow = {
            let cache = cache.clone();
            std::thread::spawn(move || cache.get_or_connect(&InstanceId::new("laminlabs", "slow")))
        };
        entered_rx.recv().unwrap();

        // Completes while the slow connect is still in progress
        cache
            .get_or_connect(&InstanceId::new("laminlabs", "fast"))
            .unwrap();
        release_tx.send(()).unwrap();
        slow.join().unwrap().unwrap();

        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_evicts_everything() {
        let (cache, connects) = counting_cache();
        let instance = InstanceId::new("laminlabs", "lamindata");
        cache.get_or_connect(&instance).unwrap();

        cache.clear();
        assert!(cache.is_empty());
        cache.get_or_connect(&instance).unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_connect_is_not_cached() {
        let cache = InstanceClientCache::new(|_: &InstanceId| -> ApiResult<MetadataClient> {
            Err(ApiError::Auth("no credentials".into()))
        });
        let instance = InstanceId::new("laminlabs", "private");
        assert!(cache.get_or_connect(&instance).is_err());
        assert!(!cache.contains(&instance));
    }
}
