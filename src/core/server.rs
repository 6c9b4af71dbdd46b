use crate::config::{self, ConfigEntity};
use crate::error::{Error, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    #[serde(skip_deserializing, default)]
    pub id: String,
    pub host: String,
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub identity_file: Option<String>,
}

fn default_port() -> u16 {
    22
}

impl Server {
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && !self.user.is_empty()
    }
}

impl ConfigEntity for Server {
    fn id(&self) -> &str {
        &self.id
    }
    fn set_id(&mut self, id: String) {
        self.id = id;
    }
    fn config_path(id: &str) -> Result<PathBuf> {
        paths::server(id)
    }
    fn config_dir() -> Result<PathBuf> {
        paths::servers()
    }
    fn not_found_error(id: String, suggestions: Vec<String>) -> Error {
        Error::server_not_found(id, suggestions)
    }

    fn validate(&self) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::config_invalid_value(
                format!("servers/{}.host", self.id),
                None,
                "server requires both host and user",
            ));
        }
        Ok(())
    }
}

pub fn load(id: &str) -> Result<Server> {
    config::load::<Server>(id)
}

pub fn exists(id: &str) -> bool {
    paths::server(id).map(|p| p.exists()).unwrap_or(false)
}
