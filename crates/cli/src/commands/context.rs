use coachline_db::{ContextRepository, RepositoryError, SqlContextRepository};

use crate::commands::{
    require_user_id, with_database, CommandResult, Failure, EXIT_NOT_FOUND, EXIT_PERSISTENCE,
};

pub fn show(user_id: &str) -> CommandResult {
    let user_id = user_id.to_string();
    with_database("context.show", |pool| async move {
        let user_id = require_user_id(&user_id)?;
        let stored = SqlContextRepository::new(pool)
            .find_latest(&user_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| {
                ("not_found", format!("no stored context for `{user_id}`"), EXIT_NOT_FOUND)
            })?;

        let mut lines = vec![format!("updated_at = {}", stored.updated_at.to_rfc3339())];
        if stored.topics.is_empty() {
            lines.push("topics = <empty>".to_string());
        } else {
            lines.extend(stored.topics.iter().map(|topic| format!("- {topic}")));
        }
        Ok(lines.join("\n"))
    })
}

pub fn clear(user_id: &str) -> CommandResult {
    let user_id = user_id.to_string();
    with_database("context.clear", |pool| async move {
        let user_id = require_user_id(&user_id)?;
        let existed =
            SqlContextRepository::new(pool).clear(&user_id).await.map_err(persistence)?;
        Ok(if existed {
            format!("stored context cleared for `{user_id}`")
        } else {
            format!("no stored context for `{user_id}`; nothing to clear")
        })
    })
}

fn persistence(error: RepositoryError) -> Failure {
    ("persistence", error.to_string(), EXIT_PERSISTENCE)
}
