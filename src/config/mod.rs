use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::NodeRole;

/// Config holds all runtime tuning. Every console wait is explicit here:
/// the consoles have no reliable prompt marker, so pacing is time based.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    pub project_name: String,
    pub api_timeout: Duration,
    pub connect_timeout: Duration,
    pub readiness_timeout: Duration,
    pub readiness_poll: Duration,
    pub router_settle: Duration,
    pub switch_settle: Duration,
    pub host_settle: Duration,
    pub quiet_timeout: Duration,
    pub probe_window: Duration,
    pub convergence_delay: Duration,
    pub workers: usize,
    pub run_deadline: Duration,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            server_url: get_env("LAB_SERVER_URL", "http://127.0.0.1:3080"),
            project_name: get_env("LAB_PROJECT", "VLAN_Lab_Automation"),
            api_timeout: Duration::from_secs(get_num("LAB_API_TIMEOUT_SECS", 30)),
            connect_timeout: Duration::from_millis(get_num("CONSOLE_CONNECT_TIMEOUT_MS", 10_000)),
            readiness_timeout: Duration::from_secs(get_num("READINESS_TIMEOUT_SECS", 30)),
            readiness_poll: Duration::from_millis(get_num("READINESS_POLL_MS", 500)),
            router_settle: Duration::from_millis(get_num("ROUTER_SETTLE_MS", 300)),
            switch_settle: Duration::from_millis(get_num("SWITCH_SETTLE_MS", 300)),
            host_settle: Duration::from_millis(get_num("HOST_SETTLE_MS", 150)),
            quiet_timeout: Duration::from_millis(get_num("QUIET_TIMEOUT_MS", 1_000)),
            probe_window: Duration::from_secs(get_num("PROBE_WINDOW_SECS", 4)),
            convergence_delay: Duration::from_secs(get_num("CONVERGENCE_DELAY_SECS", 5)),
            workers: get_num::<usize>("WORKERS", 4).max(1),
            run_deadline: Duration::from_secs(get_num("RUN_DEADLINE_SECS", 900)),
        }
    }

    /// Settle delay after each command line for a device role
    pub fn settle_delay(&self, role: NodeRole) -> Duration {
        match role {
            NodeRole::Router => self.router_settle,
            NodeRole::Switch => self.switch_settle,
            NodeRole::Host => self.host_settle,
        }
    }

    /// Host part of the lab server URL, used when a node reports a wildcard console host
    pub fn server_host(&self) -> String {
        let without_scheme = self
            .server_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.server_url);
        let authority = without_scheme.split('/').next().unwrap_or_default();
        let host = match authority.strip_prefix('[') {
            Some(v6) => v6.split(']').next().unwrap_or_default(),
            None => authority.rsplit_once(':').map(|(h, _)| h).unwrap_or(authority),
        };
        if host.is_empty() {
            "127.0.0.1".to_string()
        } else {
            host.to_string()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3080".to_string(),
            project_name: "VLAN_Lab_Automation".to_string(),
            api_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            readiness_timeout: Duration::from_secs(30),
            readiness_poll: Duration::from_millis(500),
            router_settle: Duration::from_millis(300),
            switch_settle: Duration::from_millis(300),
            host_settle: Duration::from_millis(150),
            quiet_timeout: Duration::from_secs(1),
            probe_window: Duration::from_secs(4),
            convergence_delay: Duration::from_secs(5),
            workers: 4,
            run_deadline: Duration::from_secs(900),
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_num<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("{}={} is not a valid number, using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
