use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use coachline_core::context::ConversationContext;
use coachline_core::profile::CrmProfile;

pub mod context;
pub mod memory;
pub mod profile;

pub use context::SqlContextRepository;
pub use memory::{InMemoryContextRepository, InMemoryProfileRepository};
pub use profile::SqlProfileRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// A user's persisted topic list and when it was last written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredContext {
    pub user_id: String,
    pub topics: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl StoredContext {
    pub fn context(&self) -> ConversationContext {
        ConversationContext::unpack(&self.topics)
    }
}

#[async_trait]
pub trait ContextRepository: Send + Sync {
    async fn find_latest(&self, user_id: &str) -> Result<Option<StoredContext>, RepositoryError>;
    async fn upsert(
        &self,
        user_id: &str,
        context: &ConversationContext,
    ) -> Result<(), RepositoryError>;
    /// Returns whether a stored context existed.
    async fn clear(&self, user_id: &str) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<CrmProfile>, RepositoryError>;
    async fn save(&self, profile: CrmProfile) -> Result<(), RepositoryError>;
}
