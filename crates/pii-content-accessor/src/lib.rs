#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pii-content-accessor** – Cache-first read layer over the corporate
//! wiki's spaces, pages, and attachments.
//!
//! The actual HTTP wire protocol to the content platform is an external
//! collaborator (see [`ContentBackend`]); this crate owns only the
//! read-through space cache and its background refresh loop. A minimal
//! generic-REST [`HttpContentBackend`] is provided for administrative
//! tooling (`pii-scan-cli`) to have something concrete to run against; the
//! specific wire contract of any one deployed wiki (pagination shape, auth
//! scheme, field names) is still the external collaborator's concern and is
//! expected to be adapted at the call site if it differs.

mod http;

pub use http::HttpContentBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pii_types::{AttachmentName, PageId, SpaceKey};

/// A wiki space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Space {
    /// Stable space identifier.
    pub key: SpaceKey,
    /// Human-readable space name.
    pub name: String,
}

/// A single page within a space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Page identifier, unique within its space.
    pub id: PageId,
    /// Owning space.
    pub space_key: SpaceKey,
    /// Page title.
    pub title: String,
    /// Rendered page body text.
    pub body: String,
}

/// Metadata for an attachment on a page, without its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    /// Attachment file name, unique within its page.
    pub name: AttachmentName,
    /// Owning page.
    pub page_id: PageId,
    /// MIME content type as reported by the content platform.
    pub content_type: String,
}

/// Errors surfaced while reading from the content platform.
#[derive(Debug, Error)]
pub enum ContentAccessError {
    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend call failed (network, auth, or platform-side error).
    #[error("content platform error: {0}")]
    Backend(String),
}

/// External collaborator: the actual wire protocol used to reach the
/// content platform (REST, GraphQL, etc). This crate only consumes it.
#[async_trait]
pub trait ContentBackend: Send + Sync {
    /// List every space visible to the scanning identity.
    async fn list_spaces(&self) -> Result<Vec<Space>, ContentAccessError>;
    /// Fetch one page's full body.
    async fn get_page(&self, id: &PageId) -> Result<Page, ContentAccessError>;
    /// List pages in a space, in the content platform's native order.
    async fn list_pages(&self, space_key: &SpaceKey) -> Result<Vec<Page>, ContentAccessError>;
    /// List attachment metadata on a page.
    async fn list_attachments(
        &self,
        page_id: &PageId,
    ) -> Result<Vec<AttachmentInfo>, ContentAccessError>;
    /// Download one attachment's raw bytes.
    async fn download_attachment(
        &self,
        page_id: &PageId,
        name: &AttachmentName,
    ) -> Result<Vec<u8>, ContentAccessError>;
}

/// Cache-first accessor wrapping a [`ContentBackend`].
///
/// Only the space listing is cached; pages, attachment metadata, and
/// attachment bytes are always read through to the backend since they are
/// read once per scan item rather than repeatedly across a scan.
pub struct CachingContentAccessor {
    backend: Arc<dyn ContentBackend>,
    space_cache: DashMap<SpaceKey, Space>,
}

impl CachingContentAccessor {
    /// Construct an accessor with an empty cache.
    pub fn new(backend: Arc<dyn ContentBackend>) -> Self {
        Self {
            backend,
            space_cache: DashMap::new(),
        }
    }

    /// Spawn the background refresh loop: after `initial_delay`, reload the
    /// full space list every `refresh_interval`. Refresh failures are
    /// logged and retried on the next tick; they never panic the task.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        initial_delay: Duration,
        refresh_interval: Duration,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut interval = tokio::time::interval(refresh_interval);
            loop {
                interval.tick().await;
                if let Err(e) = this.refresh_spaces().await {
                    warn!("space cache refresh failed: {e}");
                }
            }
        })
    }

    async fn refresh_spaces(&self) -> Result<(), ContentAccessError> {
        let spaces = self.backend.list_spaces().await?;
        self.space_cache.clear();
        for space in spaces {
            self.space_cache.insert(space.key.clone(), space);
        }
        debug!(count = self.space_cache.len(), "refreshed space cache");
        Ok(())
    }

    /// List all spaces, serving from cache when populated.
    pub async fn list_spaces(&self) -> Result<Vec<Space>, ContentAccessError> {
        if self.space_cache.is_empty() {
            self.refresh_spaces().await?;
        }
        Ok(self.space_cache.iter().map(|e| e.value().clone()).collect())
    }

    /// Fetch one space by key, serving from cache on hit.
    pub async fn get_space(&self, key: &SpaceKey) -> Result<Space, ContentAccessError> {
        if let Some(space) = self.space_cache.get(key) {
            return Ok(space.clone());
        }
        self.refresh_spaces().await?;
        self.space_cache
            .get(key)
            .map(|s| s.clone())
            .ok_or_else(|| ContentAccessError::NotFound(format!("space {key}")))
    }

    /// List pages in a space. Always reads through to the backend.
    pub async fn list_pages(&self, space_key: &SpaceKey) -> Result<Vec<Page>, ContentAccessError> {
        self.backend.list_pages(space_key).await
    }

    /// Fetch one page's body. Always reads through to the backend.
    pub async fn get_page(&self, id: &PageId) -> Result<Page, ContentAccessError> {
        self.backend.get_page(id).await
    }

    /// List attachment metadata on a page. Always reads through.
    pub async fn list_attachments(
        &self,
        page_id: &PageId,
    ) -> Result<Vec<AttachmentInfo>, ContentAccessError> {
        self.backend.list_attachments(page_id).await
    }

    /// Download one attachment's bytes. Always reads through.
    pub async fn download_attachment(
        &self,
        page_id: &PageId,
        name: &AttachmentName,
    ) -> Result<Vec<u8>, ContentAccessError> {
        self.backend.download_attachment(page_id, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBackend {
        spaces_calls: AtomicUsize,
    }

    #[async_trait]
    impl ContentBackend for FakeBackend {
        async fn list_spaces(&self) -> Result<Vec<Space>, ContentAccessError> {
            self.spaces_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Space {
                key: SpaceKey::new("ENG").unwrap(),
                name: "Engineering".to_string(),
            }])
        }

        async fn get_page(&self, id: &PageId) -> Result<Page, ContentAccessError> {
            Ok(Page {
                id: id.clone(),
                space_key: SpaceKey::new("ENG").unwrap(),
                title: "Runbook".to_string(),
                body: "body text".to_string(),
            })
        }

        async fn list_pages(&self, space_key: &SpaceKey) -> Result<Vec<Page>, ContentAccessError> {
            Ok(vec![Page {
                id: PageId::new("1").unwrap(),
                space_key: space_key.clone(),
                title: "Runbook".to_string(),
                body: "body text".to_string(),
            }])
        }

        async fn list_attachments(
            &self,
            page_id: &PageId,
        ) -> Result<Vec<AttachmentInfo>, ContentAccessError> {
            Ok(vec![AttachmentInfo {
                name: AttachmentName::new("notes.txt").unwrap(),
                page_id: page_id.clone(),
                content_type: "text/plain".to_string(),
            }])
        }

        async fn download_attachment(
            &self,
            _page_id: &PageId,
            _name: &AttachmentName,
        ) -> Result<Vec<u8>, ContentAccessError> {
            Ok(b"hello".to_vec())
        }
    }

    #[tokio::test]
    async fn list_spaces_populates_cache_once() {
        let backend = Arc::new(FakeBackend {
            spaces_calls: AtomicUsize::new(0),
        });
        let accessor = CachingContentAccessor::new(backend.clone());

        let first = accessor.list_spaces().await.unwrap();
        let second = accessor.list_spaces().await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(backend.spaces_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_space_misses_trigger_a_fetch() {
        let backend = Arc::new(FakeBackend {
            spaces_calls: AtomicUsize::new(0),
        });
        let accessor = CachingContentAccessor::new(backend.clone());

        let space = accessor.get_space(&SpaceKey::new("ENG").unwrap()).await.unwrap();
        assert_eq!(space.name, "Engineering");
        assert_eq!(backend.spaces_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_space_unknown_key_errors_after_refresh() {
        let backend = Arc::new(FakeBackend {
            spaces_calls: AtomicUsize::new(0),
        });
        let accessor = CachingContentAccessor::new(backend);

        let result = accessor.get_space(&SpaceKey::new("NOPE").unwrap()).await;
        assert!(matches!(result, Err(ContentAccessError::NotFound(_))));
    }

    #[tokio::test]
    async fn pages_and_attachments_read_through_every_call() {
        let backend = Arc::new(FakeBackend {
            spaces_calls: AtomicUsize::new(0),
        });
        let accessor = CachingContentAccessor::new(backend);

        let pages = accessor.list_pages(&SpaceKey::new("ENG").unwrap()).await.unwrap();
        assert_eq!(pages.len(), 1);

        let attachments = accessor.list_attachments(&pages[0].id).await.unwrap();
        assert_eq!(attachments.len(), 1);

        let bytes = accessor
            .download_attachment(&pages[0].id, &attachments[0].name)
            .await
            .unwrap();
        assert_eq!(bytes, b"hello");
    }
}
