use coachline_core::profile::CrmProfile;
use coachline_db::{ProfileRepository, SqlProfileRepository};
use secrecy::{ExposeSecret, SecretString};

use crate::commands::{
    require_user_id, with_database, CommandResult, Failure, EXIT_INVALID_INPUT, EXIT_NOT_FOUND,
    EXIT_PERSISTENCE,
};

pub fn set(
    user_id: &str,
    api_key: &str,
    api_secret: &str,
    display_name: Option<&str>,
) -> CommandResult {
    let user_id = user_id.to_string();
    let api_key = api_key.trim().to_string();
    let api_secret = api_secret.trim().to_string();
    let display_name =
        display_name.map(str::trim).filter(|name| !name.is_empty()).map(str::to_string);

    with_database("profile.set", |pool| async move {
        let user_id = require_user_id(&user_id)?;
        if api_key.is_empty() || api_secret.is_empty() {
            return Err((
                "invalid_input",
                "api key and api secret must not be blank".to_string(),
                EXIT_INVALID_INPUT,
            ));
        }

        let repository = SqlProfileRepository::new(pool);
        repository
            .save(CrmProfile {
                user_id: user_id.clone(),
                display_name,
                api_key: SecretString::from(api_key),
                api_secret: SecretString::from(api_secret),
                enabled: true,
            })
            .await
            .map_err(persistence)?;
        Ok(format!("crm profile saved for `{user_id}`"))
    })
}

pub fn disable(user_id: &str) -> CommandResult {
    let user_id = user_id.to_string();
    with_database("profile.disable", |pool| async move {
        let user_id = require_user_id(&user_id)?;
        let repository = SqlProfileRepository::new(pool);
        let mut profile = find(&repository, &user_id).await?;
        if !profile.enabled {
            return Ok(format!("crm profile for `{user_id}` was already disabled"));
        }
        profile.enabled = false;
        repository.save(profile).await.map_err(persistence)?;
        Ok(format!("crm profile disabled for `{user_id}`"))
    })
}

pub fn show(user_id: &str) -> CommandResult {
    let user_id = user_id.to_string();
    with_database("profile.show", |pool| async move {
        let user_id = require_user_id(&user_id)?;
        let profile = find(&SqlProfileRepository::new(pool), &user_id).await?;
        Ok(render(&profile))
    })
}

async fn find(repository: &SqlProfileRepository, user_id: &str) -> Result<CrmProfile, Failure> {
    repository.find_by_user(user_id).await.map_err(persistence)?.ok_or_else(|| {
        ("not_found", format!("no crm profile for `{user_id}`"), EXIT_NOT_FOUND)
    })
}

fn render(profile: &CrmProfile) -> String {
    [
        format!("user_id = {}", profile.user_id),
        format!("display_name = {}", profile.display_name.as_deref().unwrap_or("<unset>")),
        format!("enabled = {}", profile.enabled),
        format!("api_key = {}", redact(profile.api_key.expose_secret())),
        format!("api_secret = {}", redact(profile.api_secret.expose_secret())),
    ]
    .join("\n")
}

/// Keeps the last four characters of anything long enough to not give it away.
fn redact(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    let count = trimmed.chars().count();
    if count <= 8 {
        return "<redacted>".to_string();
    }
    let tail = trimmed.chars().skip(count - 4).collect::<String>();
    format!("***{tail}")
}

fn persistence(error: coachline_db::RepositoryError) -> Failure {
    ("persistence", error.to_string(), EXIT_PERSISTENCE)
}

#[cfg(test)]
mod tests {
    use super::redact;

    #[test]
    fn redaction_never_prints_short_secrets() {
        assert_eq!(redact(""), "<empty>");
        assert_eq!(redact("abc123"), "<redacted>");
        assert_eq!(redact("sk-live-1234567890"), "***7890");
    }
}
