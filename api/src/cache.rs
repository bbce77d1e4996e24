use std::sync::Arc;

use essayist_shared::PostSummary;
use tokio::sync::RwLock;

use crate::error::ApiResult;
use crate::store::Store;

/// Published post summaries, newest first.
///
/// Filled on the first read after startup or after an invalidation; every
/// write that touches a post (create, update, delete, view, like) must call
/// [`PostCache::invalidate`].
#[derive(Default)]
pub struct PostCache {
    published: RwLock<Option<Arc<Vec<PostSummary>>>>,
}

impl PostCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self, store: &Store) -> ApiResult<Arc<Vec<PostSummary>>> {
        {
            let cached = self.published.read().await;
            if let Some(ref posts) = *cached {
                return Ok(Arc::clone(posts));
            }
        }

        let mut slot = self.published.write().await;
        // Another request may have filled it while we waited for the lock.
        if let Some(ref posts) = *slot {
            return Ok(Arc::clone(posts));
        }
        let posts = Arc::new(store.list_published().await?);
        tracing::debug!(count = posts.len(), "post cache populated");
        *slot = Some(Arc::clone(&posts));
        Ok(posts)
    }

    pub async fn invalidate(&self) {
        let mut slot = self.published.write().await;
        if slot.take().is_some() {
            tracing::debug!("post cache invalidated");
        }
    }

    #[cfg(test)]
    pub async fn is_populated(&self) -> bool {
        self.published.read().await.is_some()
    }
}
