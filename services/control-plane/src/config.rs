use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::clients::AgentClientConfig;
use crate::db::DbConfig;

/// Which [`crate::db::Store`] backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub store: StoreKind,
    pub database: DbConfig,
    pub admin_token: String,
    pub agent_token: String,
    pub node_liveness: Duration,
    pub metering_interval: Duration,
    pub agent: AgentClientConfig,
    pub workloads_zone: String,
    pub nodes_zone: String,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn secs_var(name: &str, default: u64) -> Result<Duration> {
    match std::env::var(name) {
        Ok(v) => {
            let secs: u64 = v.parse().with_context(|| format!("{name} must be a number of seconds"))?;
            if secs == 0 {
                bail!("{name} must be greater than zero");
            }
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn required_var(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => bail!("{name} must be set"),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = var_or("FLEET_LISTEN_ADDR", "127.0.0.1:8080")
            .parse()
            .context("FLEET_LISTEN_ADDR is not a socket address")?;

        let log_level = var_or("FLEET_LOG_LEVEL", "info");

        let dev_mode = std::env::var("FLEET_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let store = match var_or("FLEET_STORE", "postgres").as_str() {
            "postgres" => StoreKind::Postgres,
            "memory" if dev_mode => StoreKind::Memory,
            "memory" => bail!("FLEET_STORE=memory is only allowed with FLEET_DEV=true"),
            other => bail!("unknown FLEET_STORE: {other}"),
        };

        let agent_port = var_or("FLEET_AGENT_PORT", "443")
            .parse()
            .context("FLEET_AGENT_PORT is not a port")?;
        let agent = AgentClientConfig {
            scheme: var_or("FLEET_AGENT_SCHEME", "https"),
            port: agent_port,
            timeout: secs_var("FLEET_AGENT_TIMEOUT_SECS", 30)?,
        };

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            store,
            database: DbConfig::from_env(),
            admin_token: required_var("FLEET_ADMIN_TOKEN")?,
            agent_token: required_var("FLEET_AGENT_TOKEN")?,
            node_liveness: secs_var("FLEET_NODE_LIVENESS_SECS", 120)?,
            metering_interval: secs_var("FLEET_METERING_INTERVAL_SECS", 60)?,
            agent,
            workloads_zone: var_or("FLEET_WORKLOADS_ZONE", "workloads.local"),
            nodes_zone: var_or("FLEET_NODES_ZONE", "nodes.local"),
        })
    }
}
