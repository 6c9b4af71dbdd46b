//! Reverse-proxy routing labels.
//!
//! Turns a service's routing settings into the `key=value` labels Traefik
//! reads from the container. Output order is fixed so descriptors diff cleanly.

use crate::service::RoutingConfig;

const SECURE_ENTRYPOINT: &str = "websecure";
const PLAIN_ENTRYPOINT: &str = "web";
const REDIRECT_TO_HTTPS: &str = "redirect-to-https";

pub struct LabelInput<'a> {
    pub project: &'a str,
    pub service: &'a str,
    pub routing: &'a RoutingConfig,
    pub port: Option<u16>,
    pub cert_resolver: &'a str,
}

pub fn router_name(project: &str, service: &str) -> String {
    format!("{}-{}", project, service)
}

/// Generate the labels for one service. Empty when no primary domain is set.
pub fn generate(input: &LabelInput<'_>) -> Vec<String> {
    let Some(domain) = input.routing.domain() else {
        return Vec::new();
    };

    let router = router_name(input.project, input.service);
    let rule = host_rule(domain, input.routing.sub_path());
    let strip = input.routing.sub_path().map(|p| (format!("{}-strip", router), p));
    let tls = input.routing.tls;

    let mut labels = vec!["traefik.enable=true".to_string()];

    if let Some(port) = input.port {
        labels.push(format!(
            "traefik.http.services.{}.loadbalancer.server.port={}",
            router, port
        ));
    }

    if tls {
        push_router(&mut labels, &router, &rule, SECURE_ENTRYPOINT);
        push_tls(&mut labels, &router, input.cert_resolver);
        if let Some((name, _)) = &strip {
            push_middlewares(&mut labels, &router, name);
        }

        let http_router = format!("{}-http", router);
        push_router(&mut labels, &http_router, &rule, PLAIN_ENTRYPOINT);
        let chain = match &strip {
            Some((name, _)) => format!("{},{}", name, REDIRECT_TO_HTTPS),
            None => REDIRECT_TO_HTTPS.to_string(),
        };
        push_middlewares(&mut labels, &http_router, &chain);
    } else {
        push_router(&mut labels, &router, &rule, PLAIN_ENTRYPOINT);
        if let Some((name, _)) = &strip {
            push_middlewares(&mut labels, &router, name);
        }
    }

    if let Some((name, path)) = &strip {
        labels.push(format!(
            "traefik.http.middlewares.{}.stripprefix.prefixes={}",
            name, path
        ));
    }

    let scheme = if tls { "https" } else { "http" };
    for (n, alias) in input
        .routing
        .aliases
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .enumerate()
    {
        let alias_router = format!("{}-alias-{}", router, n + 1);
        let redirect = format!("{}-redirect", alias_router);
        let alias_rule = host_rule(alias, None);

        if tls {
            push_router(&mut labels, &alias_router, &alias_rule, SECURE_ENTRYPOINT);
            push_tls(&mut labels, &alias_router, input.cert_resolver);
            push_middlewares(&mut labels, &alias_router, &redirect);

            let alias_http = format!("{}-http", alias_router);
            push_router(&mut labels, &alias_http, &alias_rule, PLAIN_ENTRYPOINT);
            push_middlewares(&mut labels, &alias_http, REDIRECT_TO_HTTPS);
        } else {
            push_router(&mut labels, &alias_router, &alias_rule, PLAIN_ENTRYPOINT);
            push_middlewares(&mut labels, &alias_router, &redirect);
        }

        labels.push(format!(
            "traefik.http.middlewares.{}.redirectregex.regex=^https?://{}(.*)",
            redirect,
            regex::escape(alias)
        ));
        labels.push(format!(
            "traefik.http.middlewares.{}.redirectregex.replacement={}://{}${{1}}",
            redirect, scheme, domain
        ));
        labels.push(format!(
            "traefik.http.middlewares.{}.redirectregex.permanent=true",
            redirect
        ));
    }

    if tls {
        labels.push(format!(
            "traefik.http.middlewares.{}.redirectscheme.scheme=https",
            REDIRECT_TO_HTTPS
        ));
        labels.push(format!(
            "traefik.http.middlewares.{}.redirectscheme.permanent=true",
            REDIRECT_TO_HTTPS
        ));
    }

    labels
}

fn host_rule(domain: &str, path: Option<&str>) -> String {
    match path {
        Some(path) => format!("Host(`{}`) && PathPrefix(`{}`)", domain, path),
        None => format!("Host(`{}`)", domain),
    }
}

fn push_router(labels: &mut Vec<String>, router: &str, rule: &str, entrypoint: &str) {
    labels.push(format!("traefik.http.routers.{}.rule={}", router, rule));
    labels.push(format!(
        "traefik.http.routers.{}.entrypoints={}",
        router, entrypoint
    ));
}

fn push_tls(labels: &mut Vec<String>, router: &str, resolver: &str) {
    labels.push(format!("traefik.http.routers.{}.tls=true", router));
    labels.push(format!(
        "traefik.http.routers.{}.tls.certresolver={}",
        router, resolver
    ));
}

fn push_middlewares(labels: &mut Vec<String>, router: &str, chain: &str) {
    labels.push(format!(
        "traefik.http.routers.{}.middlewares={}",
        router, chain
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routing(domain: &str, path: Option<&str>, tls: bool, aliases: &[&str]) -> RoutingConfig {
        RoutingConfig {
            domain: Some(domain.to_string()),
            path: path.map(str::to_string),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            tls,
        }
    }

    fn labels_for(routing: &RoutingConfig, port: Option<u16>) -> Vec<String> {
        generate(&LabelInput {
            project: "myapp",
            service: "api",
            routing,
            port,
            cert_resolver: "letsencrypt",
        })
    }

    fn values<'a>(labels: &'a [String], key: &str) -> Vec<&'a str> {
        labels
            .iter()
            .filter_map(|l| l.split_once('='))
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v)
            .collect()
    }

    #[test]
    fn no_domain_means_no_labels() {
        let routing = RoutingConfig::default();
        assert!(labels_for(&routing, Some(8080)).is_empty());
    }

    #[test]
    fn tls_with_sub_path() {
        let r = routing("example.com", Some("/api"), true, &[]);
        let labels = labels_for(&r, Some(8080));

        let secure_rules = values(&labels, "traefik.http.routers.myapp-api.rule");
        assert_eq!(secure_rules, vec!["Host(`example.com`) && PathPrefix(`/api`)"]);
        assert_eq!(
            values(&labels, "traefik.http.routers.myapp-api.entrypoints"),
            vec!["websecure"]
        );
        assert_eq!(values(&labels, "traefik.http.routers.myapp-api.tls"), vec!["true"]);
        assert_eq!(
            values(&labels, "traefik.http.routers.myapp-api.tls.certresolver"),
            vec!["letsencrypt"]
        );
        assert_eq!(
            values(&labels, "traefik.http.routers.myapp-api.middlewares"),
            vec!["myapp-api-strip"]
        );
        assert_eq!(
            values(&labels, "traefik.http.middlewares.myapp-api-strip.stripprefix.prefixes"),
            vec!["/api"]
        );
        assert_eq!(
            values(&labels, "traefik.http.routers.myapp-api-http.rule"),
            secure_rules
        );
        assert_eq!(
            values(&labels, "traefik.http.routers.myapp-api-http.middlewares"),
            vec!["myapp-api-strip,redirect-to-https"]
        );
        assert_eq!(
            values(&labels, "traefik.http.middlewares.redirect-to-https.redirectscheme.scheme"),
            vec!["https"]
        );
        assert_eq!(
            values(&labels, "traefik.http.services.myapp-api.loadbalancer.server.port"),
            vec!["8080"]
        );
        let secure_routers = labels
            .iter()
            .filter(|l| l.ends_with(".entrypoints=websecure"))
            .count();
        assert_eq!(secure_routers, 1);
    }

    #[test]
    fn root_path_matches_empty_path() {
        let root = labels_for(&routing("example.com", Some("/"), true, &[]), None);
        let empty = labels_for(&routing("example.com", None, true, &[]), None);
        assert_eq!(root, empty);
        assert_eq!(
            values(&root, "traefik.http.routers.myapp-api.rule"),
            vec!["Host(`example.com`)"]
        );
        assert!(!root.iter().any(|l| l.contains("stripprefix")));
        assert_eq!(
            values(&root, "traefik.http.routers.myapp-api-http.middlewares"),
            vec!["redirect-to-https"]
        );
    }

    #[test]
    fn plain_http_has_single_router() {
        let labels = labels_for(&routing("example.com", None, false, &[]), None);
        assert_eq!(
            values(&labels, "traefik.http.routers.myapp-api.entrypoints"),
            vec!["web"]
        );
        assert!(!labels.iter().any(|l| l.contains("-http.")));
        assert!(!labels.iter().any(|l| l.contains("tls")));
        assert!(!labels.iter().any(|l| l.contains("redirect-to-https")));
    }

    #[test]
    fn aliases_redirect_to_primary_domain() {
        let r = routing("example.com", None, true, &["www.example.com"]);
        let labels = labels_for(&r, None);

        assert_eq!(
            values(&labels, "traefik.http.routers.myapp-api-alias-1.rule"),
            vec!["Host(`www.example.com`)"]
        );
        assert_eq!(
            values(&labels, "traefik.http.routers.myapp-api-alias-1.tls"),
            vec!["true"]
        );
        assert_eq!(
            values(&labels, "traefik.http.routers.myapp-api-alias-1-http.middlewares"),
            vec!["redirect-to-https"]
        );
        assert_eq!(
            values(
                &labels,
                "traefik.http.middlewares.myapp-api-alias-1-redirect.redirectregex.regex"
            ),
            vec![r"^https?://www\.example\.com(.*)"]
        );
        assert_eq!(
            values(
                &labels,
                "traefik.http.middlewares.myapp-api-alias-1-redirect.redirectregex.replacement"
            ),
            vec!["https://example.com${1}"]
        );
    }

    #[test]
    fn plain_alias_uses_http_scheme() {
        let r = routing("example.com", None, false, &["old.example.com"]);
        let labels = labels_for(&r, None);
        assert_eq!(
            values(
                &labels,
                "traefik.http.middlewares.myapp-api-alias-1-redirect.redirectregex.replacement"
            ),
            vec!["http://example.com${1}"]
        );
        assert!(!labels.iter().any(|l| l.contains("alias-1-http")));
    }

    #[test]
    fn output_is_deterministic() {
        let r = routing("example.com", Some("/api"), true, &["a.example.com", "b.example.com"]);
        assert_eq!(labels_for(&r, Some(80)), labels_for(&r, Some(80)));
    }
}
