//! Compose document rendering.
//!
//! The whole descriptor is regenerated from the project's service list. Maps
//! are `BTreeMap` so the same input always renders the same text.

use serde::Serialize;
use serde_yml::{Mapping, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::labels::{self, LabelInput};
use crate::runtime;
use crate::service::ServiceConfig;

#[derive(Debug, Clone, Serialize)]
pub struct ComposeFile {
    pub name: String,
    pub services: BTreeMap<String, ComposeService>,
    pub networks: BTreeMap<String, ComposeNetwork>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, ComposeVolume>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeService {
    pub image: String,
    pub container_name: String,
    pub restart: String,
    pub env_file: Vec<String>,
    pub networks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<ComposeHealthcheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeHealthcheck {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeNetwork {
    pub external: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ComposeVolume {}

/// Stack-wide values the renderer needs besides the services themselves.
pub struct RenderContext<'a> {
    pub project: &'a str,
    pub ingress_network: &'a str,
    pub private_network: &'a str,
    pub cert_resolver: &'a str,
}

/// Env file name of a service, relative to the stack directory.
pub fn env_file_name(service: &str) -> String {
    format!("{}.env", service)
}

/// Render the descriptor for `services`. `version_of` supplies each built
/// service's tag; pre-built services use their literal reference.
pub fn render<F>(ctx: &RenderContext<'_>, services: &[ServiceConfig], version_of: F) -> Result<String>
where
    F: Fn(&ServiceConfig) -> u32,
{
    let mut file = ComposeFile {
        name: ctx.project.to_string(),
        services: BTreeMap::new(),
        networks: BTreeMap::new(),
        volumes: BTreeMap::new(),
    };

    file.networks.insert(
        ctx.private_network.to_string(),
        ComposeNetwork { external: true },
    );

    for svc in services {
        let entry = render_service(ctx, svc, version_of(svc));
        if svc.has_routing() {
            file.networks.insert(
                ctx.ingress_network.to_string(),
                ComposeNetwork { external: true },
            );
        }
        for volume in svc.volumes.keys() {
            file.volumes.insert(volume.clone(), ComposeVolume::default());
        }
        file.services.insert(svc.name.clone(), entry);
    }

    serde_yml::to_string(&file)
        .map_err(|e| Error::internal_unexpected(format!("Failed to render descriptor: {}", e)))
}

fn render_service(ctx: &RenderContext<'_>, svc: &ServiceConfig, version: u32) -> ComposeService {
    let mut networks = vec![ctx.private_network.to_string()];
    let mut route_labels = Vec::new();

    if svc.has_routing() {
        networks.push(ctx.ingress_network.to_string());
        route_labels = labels::generate(&LabelInput {
            project: ctx.project,
            service: &svc.name,
            routing: &svc.routing,
            port: svc.port,
            cert_resolver: ctx.cert_resolver,
        });
        route_labels.push(format!("traefik.docker.network={}", ctx.ingress_network));
        // Compose interpolates `$`; redirect replacements carry `${1}`.
        route_labels = route_labels.into_iter().map(|l| l.replace('$', "$$")).collect();
    }

    let healthcheck = svc
        .health_check
        .as_ref()
        .filter(|_| svc.has_health_check())
        .map(|hc| ComposeHealthcheck {
            test: vec!["CMD-SHELL".to_string(), hc.command.clone()],
            interval: format!("{}s", hc.interval_secs),
            timeout: format!("{}s", hc.timeout_secs),
            retries: hc.retries,
        });

    ComposeService {
        image: svc.image_ref(ctx.project, version),
        container_name: runtime::container_name(ctx.project, &svc.name),
        restart: "unless-stopped".to_string(),
        env_file: vec![env_file_name(&svc.name)],
        networks,
        volumes: svc
            .volumes
            .iter()
            .map(|(name, mount)| format!("{}:{}", name, mount))
            .collect(),
        labels: route_labels,
        healthcheck,
    }
}

/// Add a `{service}-canary` entry to `current`, copied from `service`'s entry
/// in `next` but with its own container name and no routing labels.
pub fn canary_variant(current: &str, next: &str, project: &str, service: &str) -> Result<String> {
    let mut doc: Value = parse(current)?;
    let next_doc: Value = parse(next)?;

    let mut entry = next_doc
        .get("services")
        .and_then(|s| s.get(service))
        .cloned()
        .ok_or_else(|| {
            Error::descriptor_invalid(format!("service '{}' missing from new descriptor", service))
        })?;

    let canary = format!("{}-canary", service);
    if let Some(map) = entry.as_mapping_mut() {
        map.remove("labels");
        map.insert(
            Value::String("container_name".to_string()),
            Value::String(runtime::container_name(project, &canary)),
        );
    }

    let root = doc
        .as_mapping_mut()
        .ok_or_else(|| Error::descriptor_invalid("descriptor root is not a mapping"))?;

    let services_key = Value::String("services".to_string());
    if !root.get(&services_key).is_some_and(Value::is_mapping) {
        root.insert(services_key.clone(), Value::Mapping(Mapping::new()));
    }
    if let Some(services) = root.get_mut(&services_key).and_then(Value::as_mapping_mut) {
        services.insert(Value::String(canary), entry);
    }

    // Networks the canary joins must be declared too.
    if let Some(next_networks) = next_doc.get("networks").and_then(Value::as_mapping) {
        let networks_key = Value::String("networks".to_string());
        if !root.get(&networks_key).is_some_and(Value::is_mapping) {
            root.insert(networks_key.clone(), Value::Mapping(Mapping::new()));
        }
        if let Some(networks) = root.get_mut(&networks_key).and_then(Value::as_mapping_mut) {
            for (name, def) in next_networks {
                if !networks.contains_key(name) {
                    networks.insert(name.clone(), def.clone());
                }
            }
        }
    }

    serde_yml::to_string(&doc)
        .map_err(|e| Error::internal_unexpected(format!("Failed to render canary descriptor: {}", e)))
}

/// Point `service`'s entry at `image`, leaving every other entry alone.
/// Returns `None` when the service is not in the descriptor.
pub fn set_image(text: &str, service: &str, image: &str) -> Result<Option<String>> {
    let mut doc = parse(text)?;
    let Some(entry) = doc
        .get_mut("services")
        .and_then(|s| s.get_mut(service))
        .and_then(Value::as_mapping_mut)
    else {
        return Ok(None);
    };
    entry.insert(
        Value::String("image".to_string()),
        Value::String(image.to_string()),
    );
    serde_yml::to_string(&doc)
        .map(Some)
        .map_err(|e| Error::internal_unexpected(format!("Failed to render descriptor: {}", e)))
}

fn parse(text: &str) -> Result<Value> {
    serde_yml::from_str(text)
        .map_err(|e| Error::descriptor_invalid(format!("cannot parse descriptor: {}", e)))
}
