use crate::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use snip_core::{CompactionReport, EntryStore, NewEntry, ShortCode, Stat};
use snip_deletion::{DeletionConfig, DeletionPipeline};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of shortening one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shortened {
    pub short_url: String,
    /// The user had already shortened this URL; `short_url` is the old one.
    pub duplicate: bool,
}

/// One URL of a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub correlation_id: String,
    pub original_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchShortened {
    pub correlation_id: String,
    pub short_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUrl {
    pub short_url: String,
    pub original_url: String,
}

/// Shortens, resolves and deletes URLs on top of a single [`EntryStore`].
///
/// Deletion requests are handed to a [`DeletionPipeline`] and return before
/// the store has been touched.
pub struct ShortenerService {
    store: Arc<dyn EntryStore>,
    deletions: DeletionPipeline,
    base_url: String,
}

impl std::fmt::Debug for ShortenerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShortenerService")
            .field("base_url", &self.base_url)
            .field("deletions", &self.deletions)
            .finish()
    }
}

impl ShortenerService {
    /// Creates the service and starts its deletion pipeline on the current
    /// tokio runtime.
    pub fn new(
        store: Arc<dyn EntryStore>,
        deletion: DeletionConfig,
        base_url: impl Into<String>,
    ) -> Self {
        let deletions = DeletionPipeline::spawn(Arc::clone(&store), deletion);
        Self {
            store,
            deletions,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Validates that the URL is non-empty, uses http or https, and has a host.
    fn validate_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(ServiceError::InvalidUrl("URL cannot be empty".to_string()));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ServiceError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        };
        if scheme.is_empty() || rest.is_empty() || rest.starts_with('/') {
            return Err(ServiceError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        }

        let scheme = scheme.to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ServiceError::InvalidUrl(format!(
                "URL scheme must be http or https: {}",
                scheme
            )));
        }

        Ok(())
    }

    fn short_url(&self, code: &ShortCode) -> String {
        code.to_url(&self.base_url)
    }

    /// Shortens `original_url` for `user_id` with a generated code.
    ///
    /// Shortening the same URL twice for the same user is not an error: the
    /// existing short URL comes back with `duplicate` set.
    pub async fn create(&self, original_url: &str, user_id: &str) -> Result<Shortened> {
        self.post(NewEntry::new(original_url, user_id)).await
    }

    /// Like [`create`](Self::create) but asks for a specific short code.
    ///
    /// Fails with [`StoreError::ShortCodeTaken`](snip_core::StoreError) if
    /// another entry already owns it.
    pub async fn create_with_code(
        &self,
        original_url: &str,
        user_id: &str,
        code: ShortCode,
    ) -> Result<Shortened> {
        self.post(NewEntry::new(original_url, user_id).with_short_code(code))
            .await
    }

    async fn post(&self, entry: NewEntry) -> Result<Shortened> {
        Self::validate_url(&entry.original_url)?;
        let user_id = entry.user_id.clone();

        let outcome = self.store.post(entry).await?;
        let shortened = Shortened {
            short_url: self.short_url(outcome.short_code()),
            duplicate: outcome.duplicate,
        };

        if shortened.duplicate {
            debug!(user_id = %user_id, short_url = %shortened.short_url, "url already shortened");
        } else {
            info!(user_id = %user_id, short_url = %shortened.short_url, "url shortened");
        }
        Ok(shortened)
    }

    /// Shortens several URLs in one store call, answering in input order.
    ///
    /// Every URL is validated before anything is written. Correlation ids
    /// are echoed from the request, also for items that turn out to be
    /// duplicates of an earlier entry.
    pub async fn create_batch(
        &self,
        user_id: &str,
        items: Vec<BatchItem>,
    ) -> Result<Vec<BatchShortened>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        for (index, item) in items.iter().enumerate() {
            Self::validate_url(&item.original_url).map_err(|err| match err {
                ServiceError::InvalidUrl(message) => ServiceError::InvalidUrl(format!(
                    "item {} ({}): {}",
                    index, item.correlation_id, message
                )),
                other => other,
            })?;
        }

        let entries = items
            .iter()
            .map(|item| {
                NewEntry::new(item.original_url.as_str(), user_id)
                    .with_correlation_id(item.correlation_id.as_str())
            })
            .collect();
        let outcomes = self.store.post_batch(entries).await?;

        let shortened: Vec<BatchShortened> = items
            .into_iter()
            .zip(outcomes)
            .map(|(item, outcome)| BatchShortened {
                correlation_id: item.correlation_id,
                short_url: self.short_url(outcome.short_code()),
            })
            .collect();

        info!(user_id = %user_id, count = shortened.len(), "batch shortened");
        Ok(shortened)
    }

    /// Returns the original URL behind `code`.
    pub async fn resolve(&self, code: &ShortCode) -> Result<String> {
        match self.store.get(code).await? {
            None => Err(ServiceError::NotFound(code.to_string())),
            Some(entry) if entry.deleted => Err(ServiceError::Deleted(code.to_string())),
            Some(entry) => Ok(entry.original_url),
        }
    }

    /// Lists the live URLs `user_id` has shortened.
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<UserUrl>> {
        let entries = self.store.get_user_urls(user_id).await?;
        Ok(entries
            .into_iter()
            .map(|entry| UserUrl {
                short_url: self.short_url(&entry.short_code),
                original_url: entry.original_url,
            })
            .collect())
    }

    /// Queues `codes` for soft deletion on behalf of `user_id`.
    ///
    /// Returns once the request is accepted. Codes the user does not own are
    /// silently skipped by the store.
    pub fn delete_by_user(&self, user_id: &str, codes: Vec<ShortCode>) -> Result<()> {
        let count = codes.len();
        self.deletions.submit(user_id, codes)?;
        info!(user_id = %user_id, codes = count, "deletion accepted");
        Ok(())
    }

    pub async fn stats(&self) -> Result<Stat> {
        Ok(self.store.get_stat().await?)
    }

    pub async fn ping(&self) -> Result<()> {
        Ok(self.store.ping().await?)
    }

    pub async fn compact(&self) -> Result<CompactionReport> {
        let report = self.store.compact().await?;
        info!(
            entries = report.entries,
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            "store compacted"
        );
        Ok(report)
    }

    /// Finishes every accepted deletion, then closes the store.
    pub async fn shutdown(&self) -> Result<()> {
        self.deletions.shutdown().await;
        if let Err(err) = self.store.close().await {
            warn!(error = %err, "closing entry store failed");
            return Err(err.into());
        }
        info!("shortener service stopped");
        Ok(())
    }
}
