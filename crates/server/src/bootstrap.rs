use std::sync::Arc;

use axum::Router;
use coachline_agent::{AgentRuntime, TurnPolicy};
use coachline_core::config::{AppConfig, ConfigError};
use coachline_db::{
    connect_from_config, migrations, DbPool, SqlContextRepository, SqlProfileRepository,
};
use thiserror::Error;
use tracing::info;

use crate::crm::HttpCrmTransport;
use crate::llm::build_llm_client;
use crate::turns::TurnState;
use crate::{health, turns};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub agent_runtime: AgentRuntime,
}

impl Application {
    /// Turn API and health check on one listener.
    pub fn router(&self) -> Router {
        let state = TurnState::new(
            self.agent_runtime.clone(),
            Arc::new(SqlContextRepository::new(self.db_pool.clone())),
            Arc::new(SqlProfileRepository::new(self.db_pool.clone())),
        );
        turns::router(state).merge(health::router(self.db_pool.clone()))
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let transport = Arc::new(HttpCrmTransport::from_config(&config.crm));
    let llm = build_llm_client(&config.llm);
    let agent_runtime = AgentRuntime::new(llm, transport, TurnPolicy::from_config(&config));
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        llm_model = %config.llm.model,
        crm_base_url = %config.crm.base_url,
        "turn runtime initialized"
    );

    Ok(Application { config, db_pool, agent_runtime })
}
