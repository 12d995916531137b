//! Shared application state for the Axum API server.

use std::sync::Arc;

use courier_cache::CacheService;
use courier_common::config::AppConfig;
use courier_email::AuditStore;
use courier_messaging::EventBus;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<dyn EventBus>,
    pub cache: Arc<CacheService>,
    /// Absent when no audit database is configured; accepted jobs are then
    /// not persisted and job lookups return not-found.
    pub audit: Option<AuditStore>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(
        bus: Arc<dyn EventBus>,
        cache: Arc<CacheService>,
        audit: Option<AuditStore>,
        config: AppConfig,
    ) -> Self {
        Self {
            bus,
            cache,
            audit,
            config,
        }
    }
}
