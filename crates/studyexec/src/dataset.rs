//! Dataset connection parameters
//!
//! The engine never opens the dataset itself. It hands these parameters to
//! every runnable through environment variables, and whichever process
//! issues queries owns the connection.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const ENV_HOST: &str = "DATABASE_HOST";
pub const ENV_PORT: &str = "DATABASE_PORT";
pub const ENV_NAME: &str = "DATABASE_NAME";
pub const ENV_USER: &str = "DATABASE_USER";
pub const ENV_PASSWORD: &str = "DATABASE_PASSWORD";

/// Connection parameters for the analytics dataset
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_password")]
    pub password: String,
}

impl DatasetConfig {
    /// Environment variables passed to runnables
    pub fn env_vars(&self) -> [(&'static str, String); 5] {
        [
            (ENV_HOST, self.host.clone()),
            (ENV_PORT, self.port.to_string()),
            (ENV_NAME, self.name.clone()),
            (ENV_USER, self.user.clone()),
            (ENV_PASSWORD, self.password.clone()),
        ]
    }

    /// `host:port/name`, safe to log
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.name)
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            name: default_name(),
            user: default_user(),
            password: default_password(),
        }
    }
}

impl fmt::Debug for DatasetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_host() -> String {
    "omop-db".to_owned()
}

fn default_port() -> u16 {
    5432
}

fn default_name() -> String {
    "omop_cdm".to_owned()
}

fn default_user() -> String {
    "omop_user".to_owned()
}

fn default_password() -> String {
    "omop_password".to_owned()
}
