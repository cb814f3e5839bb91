use crate::engine::DebugConfiguration;
use crate::error::{Error, Result};
use anyhow::Context;
use itertools::Itertools;
use log::LevelFilter;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{RwLock, RwLockReadGuard};

/// Transport server settings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Serve right away when started without a subcommand.
    pub autostart: bool,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4712,
            autostart: true,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn log_level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }
}

/// Debug adapter serving one configuration type.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AdapterConfig {
    /// `host:port` of an adapter listening for DAP connections.
    pub address: String,
}

/// Application configuration file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub configurations: Vec<DebugConfiguration>,
    pub adapters: HashMap<String, AdapterConfig>,
}

impl Config {
    /// `$HOME/.config/dapmux/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        home::home_dir().map(|home| home.join(".config").join("dapmux").join("config.toml"))
    }

    /// Read configuration file, a missing file means default configuration.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        if !path.exists() {
            log::info!(target: "config", "{} not found, using defaults", path.display());
            return Ok(Config::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read configuration file {}", path.display()))?;
        let config = Config::parse(&data)
            .with_context(|| format!("parse configuration file {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(data: &str) -> Result<Config> {
        let config: Config = toml::from_str(data).map_err(|e| Error::Config(e.to_string()))?;

        if let Some(name) = config
            .configurations
            .iter()
            .map(|c| c.name.as_str())
            .duplicates()
            .next()
        {
            return Err(Error::Config(format!(
                "duplicate launch configuration `{name}`"
            )));
        }
        Ok(config)
    }

    /// Adapter addresses keyed by configuration type.
    pub fn adapter_addresses(&self) -> HashMap<String, String> {
        self.adapters
            .iter()
            .map(|(kind, adapter)| (kind.clone(), adapter.address.clone()))
            .collect()
    }
}

/// Workspace launch configurations, replaced as a whole on reload.
#[derive(Default)]
pub struct LaunchConfigurations {
    list: RwLock<Vec<DebugConfiguration>>,
}

impl LaunchConfigurations {
    pub fn new(list: Vec<DebugConfiguration>) -> Self {
        Self {
            list: RwLock::new(list),
        }
    }

    fn list(&self) -> RwLockReadGuard<'_, Vec<DebugConfiguration>> {
        self.list.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn replace(&self, list: Vec<DebugConfiguration>) {
        *self.list.write().unwrap_or_else(|e| e.into_inner()) = list;
    }

    pub fn all(&self) -> Vec<DebugConfiguration> {
        self.list().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.list().iter().map(|c| c.name.clone()).collect()
    }

    pub fn find(&self, name: &str) -> Result<DebugConfiguration> {
        let list = self.list();
        list.iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| Error::ConfigurationNotFound {
                name: name.to_string(),
                available: list.iter().map(|c| c.name.clone()).collect(),
            })
    }
}
