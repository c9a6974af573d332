use std::fmt;

use serde::{Deserialize, Serialize};

use super::NodeRole;

/// ConsoleEndpoint is where a started node's console listens.
/// Discovered from the lab service after start; may change across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsoleEndpoint {
    pub host: String,
    pub port: u16,
}

impl ConsoleEndpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ConsoleEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr())
    }
}

/// Handle to a project in the lab service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectHandle {
    pub project_id: String,
    pub name: String,
}

/// Handle to a node created (or found) in a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHandle {
    pub node_id: String,
    pub name: String,
}

/// Handle to a link created (or found) in a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkHandle {
    pub link_id: String,
}

/// DeviceConfig is the ordered command sequence for one console.
/// Built only by the generator; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceConfig {
    device: String,
    role: NodeRole,
    commands: Vec<String>,
}

impl DeviceConfig {
    pub(crate) fn new(device: &str, role: NodeRole, commands: Vec<String>) -> Self {
        Self {
            device: device.to_string(),
            role,
            commands,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}
