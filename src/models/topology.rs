use std::fmt;

use serde::{Deserialize, Serialize};

/// Device role; each role speaks one fixed command dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Router,
    Switch,
    Host,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Router => "router",
            NodeRole::Switch => "switch",
            NodeRole::Host => "host",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_interface_prefix() -> String {
    "GigabitEthernet0/".to_string()
}

/// NodeSpec describes one emulated device to create in the lab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub role: NodeRole,
    /// Template name as known to the lab service (e.g. "Cisco 2911", "VPCS")
    pub template: String,
    /// Adapter n maps to interface `<interface_prefix><n>` in generated config
    #[serde(default = "default_interface_prefix")]
    pub interface_prefix: String,
}

impl NodeSpec {
    pub fn new(name: &str, role: NodeRole, template: &str) -> Self {
        Self {
            name: name.to_string(),
            role,
            template: template.to_string(),
            interface_prefix: default_interface_prefix(),
        }
    }

    pub fn interface_name(&self, adapter: u32) -> String {
        format!("{}{}", self.interface_prefix, adapter)
    }
}

/// Topology is the named, ordered set of nodes in a lab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub name: String,
    pub nodes: Vec<NodeSpec>,
}

impl Topology {
    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn nodes_with_role(&self, role: NodeRole) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(move |n| n.role == role)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes_with_role(NodeRole::Host)
    }
}

/// One side of a link: (node, adapter, port)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkEndpoint {
    pub node: String,
    pub adapter: u32,
    #[serde(default)]
    pub port: u32,
}

impl LinkEndpoint {
    pub fn new(node: &str, adapter: u32, port: u32) -> Self {
        Self {
            node: node.to_string(),
            adapter,
            port,
        }
    }
}

impl fmt::Display for LinkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}/{}]", self.node, self.adapter, self.port)
    }
}

/// LinkSpec patches two node ports together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub a: LinkEndpoint,
    pub b: LinkEndpoint,
}

impl LinkSpec {
    pub fn new(a: LinkEndpoint, b: LinkEndpoint) -> Self {
        Self { a, b }
    }

    /// The endpoint on the far side of `node`/`adapter`, if this link touches it
    pub fn peer_of(&self, node: &str, adapter: u32) -> Option<&LinkEndpoint> {
        if self.a.node == node && self.a.adapter == adapter {
            Some(&self.b)
        } else if self.b.node == node && self.b.adapter == adapter {
            Some(&self.a)
        } else {
            None
        }
    }
}

impl fmt::Display for LinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.a, self.b)
    }
}
