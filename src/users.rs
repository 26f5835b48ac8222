//! Users — the two collaborators (one human, one AI agent).
//!
//! Rows are seeded out-of-band and never written by the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row of the `users` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_ai: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Short badge shown next to a task: initials, or "AI" for the agent.
    pub fn badge(&self) -> String {
        if self.is_ai {
            return "AI".to_string();
        }
        let initials: String = self
            .name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .flat_map(char::to_uppercase)
            .take(2)
            .collect();
        if initials.is_empty() { "?".to_string() } else { initials }
    }
}

/// Look up a user by id.
pub fn find_user(users: &[User], id: Uuid) -> Option<&User> {
    users.iter().find(|u| u.id == id)
}

/// Resolve a user from free text: exact id, case-insensitive name, or
/// `ai` / `me` shorthands.
pub fn resolve_user<'a>(users: &'a [User], query: &str, me: Option<Uuid>) -> Option<&'a User> {
    let query = query.trim();
    if let Ok(id) = query.parse::<Uuid>() {
        return find_user(users, id);
    }
    match query.to_ascii_lowercase().as_str() {
        "ai" | "agent" => users.iter().find(|u| u.is_ai),
        "me" => me.and_then(|id| find_user(users, id)),
        lowered => users
            .iter()
            .find(|u| u.name.to_ascii_lowercase() == lowered)
            .or_else(|| {
                users
                    .iter()
                    .find(|u| u.name.to_ascii_lowercase().starts_with(lowered))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u128, name: &str, is_ai: bool) -> User {
        User {
            id: Uuid::from_u128(id),
            name: name.to_string(),
            email: None,
            avatar_url: None,
            is_ai,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn badge_uses_initials_or_ai() {
        assert_eq!(user(1, "ada lovelace", false).badge(), "AL");
        assert_eq!(user(2, "Hex", true).badge(), "AI");
        assert_eq!(user(3, "  ", false).badge(), "?");
    }

    #[test]
    fn resolve_by_name_prefix_and_shorthand() {
        let users = vec![user(1, "Ada", false), user(2, "Hex", true)];
        assert_eq!(resolve_user(&users, "ada", None).unwrap().id, Uuid::from_u128(1));
        assert_eq!(resolve_user(&users, "he", None).unwrap().id, Uuid::from_u128(2));
        assert_eq!(resolve_user(&users, "ai", None).unwrap().id, Uuid::from_u128(2));
        assert_eq!(
            resolve_user(&users, "me", Some(Uuid::from_u128(1))).unwrap().name,
            "Ada"
        );
        assert!(resolve_user(&users, "bob", None).is_none());
    }

    #[test]
    fn user_row_parses_without_optional_columns() {
        let json = r#"{"id":"00000000-0000-0000-0000-000000000002","name":"Hex","is_ai":true,"created_at":"2026-01-01T00:00:00Z"}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert!(user.is_ai);
        assert!(user.email.is_none());
    }
}
