//! Traefik routing labels for deployed applications
//!
//! Labels are consumed by the external proxy's own watcher; the agent
//! only attaches them at container creation. The set is fully
//! determined by (appId, containerPort, basePath) and kept in an
//! ordered map so re-deploys produce byte-identical label sets — the
//! proxy's hot-reload treats any difference as a config change.

use std::collections::BTreeMap;

/// Normalize an external base path for an application
///
/// Blank means the per-app default prefix. A leading slash is forced,
/// and a single trailing slash is stripped unless the whole path is
/// just `/`.
pub fn normalize_base_path(base_path: &str, app_id: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() {
        return format!("/runtime/{app_id}");
    }
    let mut path = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

/// Label key carrying the backend port for an application's service
pub fn backend_port_key(app_id: &str) -> String {
    format!("traefik.http.services.rt-svc-{app_id}.loadbalancer.server.port")
}

/// Routing label set for one application
///
/// PathPrefix match on the normalized prefix, a strip-prefix middleware
/// bound to the same prefix, the backend port, and the router-service
/// binding, all keyed by deterministic per-app identifiers.
pub fn labels_for_app(
    app_id: &str,
    container_port: u16,
    base_path: &str,
) -> BTreeMap<String, String> {
    let prefix = normalize_base_path(base_path, app_id);
    let router = format!("rt-app-{app_id}");
    let service = format!("rt-svc-{app_id}");
    let middleware = format!("rt-mw-{app_id}");

    let mut labels = BTreeMap::new();
    labels.insert("traefik.enable".to_string(), "true".to_string());
    labels.insert(
        format!("traefik.http.routers.{router}.rule"),
        format!("PathPrefix(`{prefix}`)"),
    );
    labels.insert(
        format!("traefik.http.routers.{router}.middlewares"),
        middleware.clone(),
    );
    labels.insert(
        format!("traefik.http.routers.{router}.service"),
        service.clone(),
    );
    labels.insert(
        format!("traefik.http.middlewares.{middleware}.stripprefix.prefixes"),
        prefix,
    );
    labels.insert(backend_port_key(app_id), container_port.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_base_path_uses_default_prefix() {
        assert_eq!(normalize_base_path("", "5"), "/runtime/5");
        assert_eq!(normalize_base_path("  ", "5"), "/runtime/5");
    }

    #[test]
    fn test_trailing_slash_stripped() {
        assert_eq!(normalize_base_path("/custom/", "5"), "/custom");
        assert_eq!(normalize_base_path("/custom", "5"), "/custom");
    }

    #[test]
    fn test_leading_slash_forced() {
        assert_eq!(normalize_base_path("custom/path", "5"), "/custom/path");
    }

    #[test]
    fn test_root_path_kept() {
        assert_eq!(normalize_base_path("/", "5"), "/");
    }

    #[test]
    fn test_labels_for_default_prefix() {
        let labels = labels_for_app("5", 8080, "");
        assert_eq!(labels["traefik.enable"], "true");
        assert_eq!(
            labels["traefik.http.routers.rt-app-5.rule"],
            "PathPrefix(`/runtime/5`)"
        );
        assert_eq!(
            labels["traefik.http.middlewares.rt-mw-5.stripprefix.prefixes"],
            "/runtime/5"
        );
        assert_eq!(
            labels["traefik.http.services.rt-svc-5.loadbalancer.server.port"],
            "8080"
        );
        assert_eq!(labels["traefik.http.routers.rt-app-5.service"], "rt-svc-5");
        assert_eq!(
            labels["traefik.http.routers.rt-app-5.middlewares"],
            "rt-mw-5"
        );
    }

    #[test]
    fn test_labels_for_custom_prefix() {
        let labels = labels_for_app("5", 8080, "/custom/");
        assert_eq!(
            labels["traefik.http.routers.rt-app-5.rule"],
            "PathPrefix(`/custom`)"
        );
        assert_eq!(
            labels["traefik.http.middlewares.rt-mw-5.stripprefix.prefixes"],
            "/custom"
        );
    }

    #[test]
    fn test_labels_are_deterministic() {
        let first = labels_for_app("5", 8080, "/custom");
        let second = labels_for_app("5", 8080, "/custom");
        let a: Vec<_> = first.iter().collect();
        let b: Vec<_> = second.iter().collect();
        assert_eq!(a, b);
    }
}
