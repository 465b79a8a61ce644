use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::ServiceError;
use crate::types::SiteConfig;

/// Read-only lookup of per-site permissions and instructions.
#[async_trait]
pub trait SiteConfigStore: Send + Sync {
    async fn site_config(&self, site_id: &str) -> Result<SiteConfig, ServiceError>;
}

#[derive(Default)]
pub struct InMemorySiteConfigStore {
    sites: DashMap<String, SiteConfig>,
}

impl InMemorySiteConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, site_id: impl Into<String>, config: SiteConfig) {
        self.sites.insert(site_id.into(), config);
    }
}

#[async_trait]
impl SiteConfigStore for InMemorySiteConfigStore {
    async fn site_config(&self, site_id: &str) -> Result<SiteConfig, ServiceError> {
        self.sites
            .get(site_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::failed("site-config", format!("unknown site `{}`", site_id)))
    }
}
