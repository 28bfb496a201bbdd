use chrono::Utc;
use secrecy::ExposeSecret;
use sqlx::Row;

use coachline_core::profile::CrmProfile;

use super::{ProfileRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProfileRepository {
    pool: DbPool,
}

impl SqlProfileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> Result<CrmProfile, RepositoryError> {
    let user_id: String =
        row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let display_name: Option<String> =
        row.try_get("display_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let api_key: String =
        row.try_get("api_key").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let api_secret: String =
        row.try_get("api_secret").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let enabled: i64 =
        row.try_get("enabled").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(CrmProfile {
        user_id,
        display_name,
        api_key: api_key.into(),
        api_secret: api_secret.into(),
        enabled: enabled != 0,
    })
}

#[async_trait::async_trait]
impl ProfileRepository for SqlProfileRepository {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<CrmProfile>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, display_name, api_key, api_secret, enabled
             FROM crm_profile WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_profile).transpose()
    }

    async fn save(&self, profile: CrmProfile) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO crm_profile (user_id, display_name, api_key, api_secret, enabled, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 api_key = excluded.api_key,
                 api_secret = excluded.api_secret,
                 enabled = excluded.enabled,
                 updated_at = excluded.updated_at",
        )
        .bind(&profile.user_id)
        .bind(&profile.display_name)
        .bind(profile.api_key.expose_secret())
        .bind(profile.api_secret.expose_secret())
        .bind(i64::from(profile.enabled))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use coachline_core::errors::ProfileError;
    use coachline_core::profile::CrmProfile;

    use super::SqlProfileRepository;
    use crate::repositories::ProfileRepository;
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlProfileRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlProfileRepository::new(pool)
    }

    fn profile() -> CrmProfile {
        CrmProfile {
            user_id: "coach-7".to_string(),
            display_name: Some("Riley".to_string()),
            api_key: "key-7".to_string().into(),
            api_secret: "secret-7".to_string().into(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn save_then_find_round_trips_credentials() {
        let repo = repo().await;
        repo.save(profile()).await.expect("save");

        let found = repo.find_by_user("coach-7").await.expect("find").expect("profile");
        assert_eq!(found.display_name.as_deref(), Some("Riley"));
        assert_eq!(found.api_key.expose_secret(), "key-7");
        assert_eq!(found.api_secret.expose_secret(), "secret-7");
        assert!(found.enabled);
        assert!(repo.find_by_user("nobody").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn disabling_a_profile_blocks_credentials() {
        let repo = repo().await;
        repo.save(profile()).await.expect("save");
        repo.save(CrmProfile { enabled: false, ..profile() }).await.expect("disable");

        let found = repo.find_by_user("coach-7").await.expect("find").expect("profile");
        assert!(matches!(found.credentials(), Err(ProfileError::Disabled { .. })));
    }
}
