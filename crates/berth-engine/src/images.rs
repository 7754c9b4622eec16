//! Image repository matching
//!
//! Application images are identified by a repository path ending in
//! `/u{userId}-app{appId}`, regardless of which registry or namespace
//! prefixes it. Matching is the only authorization to delete: an entry
//! whose repository does not parse as an application suffix is never
//! touched.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Application image suffix with the embedded app id captured
static APP_IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/u\d+-app(\d+)$").expect("invalid app image regex"));

/// Split a `repository:tag` entry into its repository part
///
/// The tag separator is the last colon, so registries with ports
/// (`registry:5000/foo:latest`) parse correctly.
fn repository_of(entry: &str) -> Option<&str> {
    let (repo, tag) = entry.rsplit_once(':')?;
    if repo.contains("<none>") || tag.contains("<none>") {
        return None;
    }
    Some(repo)
}

/// App id embedded in a repository path, if it has the app suffix shape
pub fn parse_app_id(repository: &str) -> Option<String> {
    APP_IMAGE_RE
        .captures(repository)
        .map(|caps| caps[1].to_string())
}

/// Entries belonging to one application (repository ends with its suffix)
pub fn images_with_suffix<'a>(tags: &'a [String], suffix: &str) -> Vec<&'a String> {
    tags.iter()
        .filter(|entry| {
            repository_of(entry)
                .map(|repo| repo.ends_with(suffix))
                .unwrap_or(false)
        })
        .collect()
}

/// Entries whose embedded app id is outside the authoritative set
///
/// Untagged/dangling entries and repositories without the app suffix
/// shape are skipped.
pub fn orphaned_images<'a>(tags: &'a [String], valid_app_ids: &HashSet<String>) -> Vec<&'a String> {
    tags.iter()
        .filter(|entry| {
            repository_of(entry)
                .and_then(parse_app_id)
                .map(|app_id| !valid_app_ids.contains(&app_id))
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_app_id() {
        assert_eq!(parse_app_id("registry.local/apps/u7-app42"), Some("42".to_string()));
        assert_eq!(parse_app_id("registry:5000/u1-app9"), Some("9".to_string()));
        assert_eq!(parse_app_id("library/nginx"), None);
        assert_eq!(parse_app_id("foo/u7-app42/extra"), None);
    }

    #[test]
    fn test_images_with_suffix() {
        let tags = tags(&[
            "registry.local/u7-app42:latest",
            "registry.local/u7-app42:v2",
            "registry.local/u7-app43:latest",
            "<none>:<none>",
        ]);
        let matched = images_with_suffix(&tags, "/u7-app42");
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_orphaned_images_respects_authoritative_set() {
        let tags = tags(&[
            "registry.local/u1-app1:latest",
            "registry.local/u2-app9:latest",
            "library/nginx:latest",
            "<none>:<none>",
        ]);
        let valid: HashSet<String> = ["1".to_string()].into_iter().collect();
        let orphans = orphaned_images(&tags, &valid);
        assert_eq!(orphans, vec!["registry.local/u2-app9:latest"]);
    }

    #[test]
    fn test_dangling_entries_skipped() {
        let tags = tags(&["<none>:<none>", "registry.local/u2-app9:<none>"]);
        let valid = HashSet::new();
        assert!(orphaned_images(&tags, &valid).is_empty());
    }
}
