use std::sync::Arc;

use sqlx::PgPool;

use crate::audit::analysis::AuditAnalyzer;
use crate::config::Config;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Pluggable audit backend. Default: `LlmAuditAnalyzer`.
    pub analyzer: Arc<dyn AuditAnalyzer>,
}
