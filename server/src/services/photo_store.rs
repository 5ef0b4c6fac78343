use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::services::local_store::KeyValueStore;

pub const PHOTOS_KEY: &str = "spotwalk.photos";

/// Captured photo blobs (data URLs) keyed by spot index.
pub struct PhotoStore {
    photos: DashMap<usize, String>,
    backing: Option<Arc<KeyValueStore>>,
    write_lock: Mutex<()>,
}

impl PhotoStore {
    /// Photos persisted under [`PHOTOS_KEY`] in the local store.
    pub async fn load(backing: Arc<KeyValueStore>) -> Self {
        let photos = DashMap::new();
        if let Some(json) = backing.get(PHOTOS_KEY).await {
            match serde_json::from_str::<BTreeMap<String, String>>(&json) {
                Ok(stored) => {
                    for (key, photo) in stored {
                        match key.parse::<usize>() {
                            Ok(index) => {
                                photos.insert(index, photo);
                            }
                            Err(_) => warn!(key, "ignoring photo stored under a non-index key"),
                        }
                    }
                }
                Err(e) => warn!(error = %e, "stored photos are unreadable; starting empty"),
            }
        }
        info!(photos = photos.len(), "photo store loaded");
        Self {
            photos,
            backing: Some(backing),
            write_lock: Mutex::new(()),
        }
    }

    /// Photos kept for the lifetime of the process only.
    pub fn in_memory() -> Self {
        Self {
            photos: DashMap::new(),
            backing: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Store `photo` for `spot_index`, replacing any earlier capture.
    pub async fn put(&self, spot_index: usize, photo: String) -> io::Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(backing) = &self.backing {
            let mut stored: BTreeMap<String, String> = self
                .photos
                .iter()
                .map(|entry| (entry.key().to_string(), entry.value().clone()))
                .collect();
            stored.insert(spot_index.to_string(), photo.clone());
            let json = serde_json::to_string(&stored).map_err(io::Error::other)?;
            backing.set(PHOTOS_KEY, json).await?;
        }
        self.photos.insert(spot_index, photo);
        Ok(())
    }

    pub fn get(&self, spot_index: usize) -> Option<String> {
        self.photos.get(&spot_index).map(|entry| entry.value().clone())
    }

    pub fn indices(&self) -> BTreeSet<usize> {
        self.photos.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::{PHOTOS_KEY, PhotoStore};
    use crate::services::local_store::KeyValueStore;
    use crate::services::local_store::tests::scratch_path;

    #[tokio::test]
    async fn photos_persist_under_their_own_key() {
        let path = scratch_path("photos");
        let store = Arc::new(KeyValueStore::open(&path).await.expect("open"));
        let photos = PhotoStore::load(store.clone()).await;
        photos
            .put(2, "data:image/png;base64,AAAA".to_string())
            .await
            .expect("put");

        let raw = store.get(PHOTOS_KEY).await.expect("persisted");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["2"], serde_json::json!("data:image/png;base64,AAAA"));

        let reloaded =
            PhotoStore::load(Arc::new(KeyValueStore::open(&path).await.expect("reopen"))).await;
        assert_eq!(reloaded.indices(), BTreeSet::from([2]));
        assert_eq!(
            reloaded.get(2).as_deref(),
            Some("data:image/png;base64,AAAA")
        );
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[tokio::test]
    async fn in_memory_store_replaces_earlier_capture() {
        let photos = PhotoStore::in_memory();
        photos.put(0, "first".into()).await.expect("put");
        photos.put(0, "second".into()).await.expect("put");
        assert_eq!(photos.get(0).as_deref(), Some("second"));
        assert_eq!(photos.get(1), None);
    }
}
