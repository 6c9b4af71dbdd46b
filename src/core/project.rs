use crate::config::{self, ConfigEntity};
use crate::error::{Error, Result};
use crate::paths;
use crate::server::{self, Server};
use crate::service::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// A stack on one host: where it lives and which services make it up.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(skip_deserializing, default)]
    pub id: String,

    pub server_id: String,

    /// Remote directory holding the descriptor and env files.
    pub stack_path: String,

    /// Local directory that relative build contexts resolve against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl ConfigEntity for Project {
    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn config_path(id: &str) -> Result<PathBuf> {
        paths::project(id)
    }
    fn config_dir() -> Result<PathBuf> {
        paths::projects()
    }
    fn not_found_error(id: String, suggestions: Vec<String>) -> Error {
        Error::project_not_found(id, suggestions)
    }

    fn validate(&self) -> Result<()> {
        if self.stack_path.trim().is_empty() {
            return Err(Error::config_missing_key(
                "stackPath",
                Some(format!("projects/{}.json", self.id)),
            ));
        }

        if !server::exists(&self.server_id) {
            let suggestions = config::find_similar_ids::<Server>(&self.server_id);
            return Err(Error::server_not_found(self.server_id.clone(), suggestions));
        }

        let mut seen = HashSet::new();
        for svc in &self.services {
            svc.validate()?;
            if !seen.insert(svc.name.as_str()) {
                return Err(Error::config_invalid_value(
                    format!("projects/{}.services", self.id),
                    Some(svc.name.clone()),
                    "duplicate service name",
                ));
            }
        }

        for svc in &self.services {
            for dep in &svc.depends_on {
                if dep == &svc.name {
                    return Err(Error::config_invalid_value(
                        format!("services.{}.dependsOn", svc.name),
                        Some(dep.clone()),
                        "a service cannot depend on itself",
                    ));
                }
            }
        }

        Ok(())
    }
}

impl Project {
    /// Look up a service by name, suggesting close matches when absent.
    pub fn service(&self, name: &str) -> Result<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name).ok_or_else(|| {
            let suggestions =
                config::similar_names(name, self.services.iter().map(|s| s.name.as_str()));
            Error::service_not_found(name, suggestions)
        })
    }

    /// Resolve a service's build context to a local path.
    pub fn context_dir(&self, service: &ServiceConfig) -> Option<PathBuf> {
        let context = service.context.as_deref()?;
        let expanded = PathBuf::from(shellexpand::tilde(context).to_string());
        if expanded.is_absolute() {
            return Some(expanded);
        }
        match self.source_root.as_deref() {
            Some(root) => Some(PathBuf::from(shellexpand::tilde(root).to_string()).join(expanded)),
            None => Some(expanded),
        }
    }
}

pub fn load(id: &str) -> Result<Project> {
    config::load::<Project>(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        serde_json::from_str(
            r#"{
                "serverId": "prod",
                "stackPath": "/srv/myapp",
                "sourceRoot": "/home/dev/myapp",
                "services": [
                    {"name": "api", "context": "./api", "dependsOn": ["db"]},
                    {"name": "db", "image": "postgres:16"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn service_lookup_suggests_close_names() {
        let p = project();
        assert!(p.service("api").is_ok());
        let err = p.service("apu").unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::ServiceNotFound);
        assert!(err.message.contains("apu"));
    }

    #[test]
    fn relative_context_resolves_against_source_root() {
        let p = project();
        let api = p.service("api").unwrap();
        assert_eq!(
            p.context_dir(api),
            Some(PathBuf::from("/home/dev/myapp/./api"))
        );
        assert_eq!(p.context_dir(p.service("db").unwrap()), None);
    }
}
