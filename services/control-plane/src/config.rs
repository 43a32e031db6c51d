use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::db::DbConfig;
use crate::sync::SyncSettings;

/// Which resource store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub grpc_listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub auth_token: String,
    pub store: StoreBackend,
    pub sync: SyncSettings,
    pub database: DbConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("listen_addr", &self.listen_addr)
            .field("grpc_listen_addr", &self.grpc_listen_addr)
            .field("log_level", &self.log_level)
            .field("dev_mode", &self.dev_mode)
            .field("auth_token", &"<redacted>")
            .field("store", &self.store)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr = lookup("FLEET_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse()
            .context("FLEET_LISTEN_ADDR")?;

        let grpc_listen_addr = lookup("FLEET_GRPC_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:9090".to_string())
            .parse()
            .context("FLEET_GRPC_LISTEN_ADDR")?;

        let log_level = lookup("FLEET_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let dev_mode = lookup("FLEET_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let auth_token = match lookup("FLEET_AUTH_TOKEN") {
            Some(token) if !token.trim().is_empty() => token.trim().to_string(),
            _ => bail!("FLEET_AUTH_TOKEN must be set"),
        };

        let store = match lookup("FLEET_STORE").as_deref().unwrap_or("postgres") {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => bail!("FLEET_STORE must be postgres or memory, got {other:?}"),
        };

        let defaults = SyncSettings::default();
        let poll_interval = parse_or(&lookup, "FLEET_WATCH_POLL_INTERVAL_MS", 0u64)?;
        let sync = SyncSettings {
            poll_interval: if poll_interval == 0 {
                defaults.poll_interval
            } else {
                Duration::from_millis(poll_interval)
            },
            batch_size: parse_or(&lookup, "FLEET_SYNC_BATCH_SIZE", defaults.batch_size)?.max(1),
            page_size: parse_or(&lookup, "FLEET_BOOTSTRAP_PAGE_SIZE", defaults.page_size)?.max(1),
        };

        let database = DbConfig::from_lookup(&lookup);

        Ok(Self {
            listen_addr,
            grpc_listen_addr,
            log_level,
            dev_mode,
            auth_token,
            store,
            sync,
            database,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value.trim().parse().with_context(|| key.to_string()),
        None => Ok(default),
    }
}
