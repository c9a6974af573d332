use serde::{Deserialize, Serialize};

// --- Lab service API types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerVersion {
    pub version: String,
    #[serde(default)]
    pub local: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabTemplate {
    pub template_id: String,
    pub name: String,
    #[serde(default)]
    pub template_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabProject {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabNode {
    pub node_id: String,
    pub name: String,
    #[serde(default)]
    pub console: Option<u16>,
    #[serde(default)]
    pub console_host: Option<String>,
    #[serde(default)]
    pub console_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl LabNode {
    /// A node reports `started` once its emulator is running
    pub fn is_started(&self) -> bool {
        self.status.as_deref().map_or(true, |s| s == "started")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkNodeRef {
    pub node_id: String,
    pub adapter_number: u32,
    pub port_number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabLink {
    pub link_id: String,
    #[serde(default)]
    pub nodes: Vec<LinkNodeRef>,
}

impl LabLink {
    /// Same two ports, in either order
    pub fn joins(&self, a: &LinkNodeRef, b: &LinkNodeRef) -> bool {
        matches!(self.nodes.as_slice(), [x, y] if (x == a && y == b) || (x == b && y == a))
    }

    pub fn uses(&self, port: &LinkNodeRef) -> bool {
        self.nodes.iter().any(|n| n == port)
    }
}

// --- Create request types ---

#[derive(Debug, Serialize)]
pub(crate) struct ProjectCreate {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct NodeFromTemplate {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Serialize)]
pub(crate) struct NodeRename {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct LinkCreate {
    pub nodes: Vec<LinkNodeRef>,
}
