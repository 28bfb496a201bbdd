use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use coachline_core::context::ConversationContext;
use coachline_core::profile::CrmProfile;

use super::{ContextRepository, ProfileRepository, RepositoryError, StoredContext};

#[derive(Default)]
pub struct InMemoryContextRepository {
    contexts: RwLock<HashMap<String, StoredContext>>,
}

#[async_trait::async_trait]
impl ContextRepository for InMemoryContextRepository {
    async fn find_latest(&self, user_id: &str) -> Result<Option<StoredContext>, RepositoryError> {
        let contexts = self.contexts.read().await;
        Ok(contexts.get(user_id).cloned())
    }

    async fn upsert(
        &self,
        user_id: &str,
        context: &ConversationContext,
    ) -> Result<(), RepositoryError> {
        let mut contexts = self.contexts.write().await;
        contexts.insert(
            user_id.to_string(),
            StoredContext {
                user_id: user_id.to_string(),
                topics: context.pack().unwrap_or_default(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn clear(&self, user_id: &str) -> Result<bool, RepositoryError> {
        let mut contexts = self.contexts.write().await;
        Ok(contexts.remove(user_id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryProfileRepository {
    profiles: RwLock<HashMap<String, CrmProfile>>,
}

#[async_trait::async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<CrmProfile>, RepositoryError> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(user_id).cloned())
    }

    async fn save(&self, profile: CrmProfile) -> Result<(), RepositoryError> {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.user_id.clone(), profile);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use coachline_core::context::ConversationContext;
    use coachline_core::profile::CrmProfile;

    use crate::repositories::{
        ContextRepository, InMemoryContextRepository, InMemoryProfileRepository,
        ProfileRepository,
    };

    #[tokio::test]
    async fn in_memory_context_repo_round_trip() {
        let repo = InMemoryContextRepository::default();
        let context = ConversationContext {
            contact_id: Some("C1".to_string()),
            phone_id: Some("P1".to_string()),
            ..ConversationContext::default()
        };

        repo.upsert("u-1", &context).await.expect("upsert");
        let stored = repo.find_latest("u-1").await.expect("find").expect("stored");

        assert_eq!(stored.topics, vec!["contactId:C1".to_string(), "phoneId:P1".to_string()]);
        assert_eq!(stored.context(), context);
        assert!(repo.clear("u-1").await.expect("clear"));
        assert!(repo.find_latest("u-1").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn in_memory_profile_repo_round_trip() {
        let repo = InMemoryProfileRepository::default();
        let profile = CrmProfile {
            user_id: "u-1".to_string(),
            display_name: None,
            api_key: "k".to_string().into(),
            api_secret: "s".to_string().into(),
            enabled: true,
        };

        repo.save(profile).await.expect("save");
        let found = repo.find_by_user("u-1").await.expect("find").expect("profile");
        assert!(found.credentials().is_ok());
    }
}
