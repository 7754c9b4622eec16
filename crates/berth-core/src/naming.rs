//! Deterministic names derived from the (userId, appId) identity
//!
//! Every resource the agent touches — container, routing rule set,
//! database, image repository — is keyed by names produced here, so the
//! functions must stay pure and collision-free across identities.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::DB_NAME_MAX_LEN;

/// Runs of characters outside the database identifier alphabet
static DB_SANITIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("invalid db sanitize regex"));

/// Container name for an application
pub fn container_name(user_id: &str, app_id: &str) -> String {
    format!("rt-u{user_id}-app{app_id}")
}

/// Image repository suffix used to match an application's images
/// regardless of registry or namespace prefix
pub fn image_suffix(user_id: &str, app_id: &str) -> String {
    format!("/u{user_id}-app{app_id}")
}

/// Database name from the configured template
///
/// The template's `{userId}`/`{appId}` placeholders are substituted,
/// invalid character runs collapse to a single underscore, and a
/// template that produces nothing usable falls back to the fixed
/// `db_u{userId}_a{appId}` pattern. The result is capped at the
/// engine's identifier limit.
pub fn db_name(template: &str, user_id: &str, app_id: &str) -> String {
    let raw = template
        .replace("{userId}", user_id)
        .replace("{appId}", app_id);
    let mut name = DB_SANITIZE_RE.replace_all(raw.trim(), "_").into_owned();
    if name.is_empty() || name.chars().all(|c| c == '_') {
        let fallback = format!("db_u{user_id}_a{app_id}");
        name = DB_SANITIZE_RE.replace_all(&fallback, "_").into_owned();
    }
    name.truncate(DB_NAME_MAX_LEN);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_DB_TEMPLATE;

    #[test]
    fn test_container_name() {
        assert_eq!(container_name("7", "42"), "rt-u7-app42");
    }

    #[test]
    fn test_container_names_distinct_across_identities() {
        // (1, 23) and (12, 3) must not collide
        assert_ne!(container_name("1", "23"), container_name("12", "3"));
    }

    #[test]
    fn test_image_suffix() {
        assert_eq!(image_suffix("7", "42"), "/u7-app42");
    }

    #[test]
    fn test_db_name_default_template() {
        assert_eq!(db_name(DEFAULT_DB_TEMPLATE, "7", "42"), "db_u7_a42");
    }

    #[test]
    fn test_db_name_sanitizes_invalid_runs() {
        assert_eq!(db_name("db.{userId}--{appId}", "7", "42"), "db_7_42");
    }

    #[test]
    fn test_db_name_falls_back_when_template_unusable() {
        assert_eq!(db_name("!!!", "7", "42"), "db_u7_a42");
        assert_eq!(db_name("", "7", "42"), "db_u7_a42");
    }

    #[test]
    fn test_db_name_truncated() {
        let long_id = "a".repeat(100);
        let name = db_name(DEFAULT_DB_TEMPLATE, &long_id, "1");
        assert_eq!(name.len(), DB_NAME_MAX_LEN);
    }
}
