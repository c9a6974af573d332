use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::{LinkEndpoint, LinkSpec, NodeRole, NodeSpec, PortAssignment, PortEntry, Topology, Vlan, VlanPlan};
use crate::error::LabError;
use crate::ipam;
use crate::utils::is_valid_hostname;

/// A reachability probe: ping `destination` from the console of host `source`.
/// `destination` is an IPv4 address or the name of another host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub source: String,
    pub destination: String,
}

impl ProbeSpec {
    pub fn new(source: &str, destination: &str) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
        }
    }
}

/// LabPlan is the complete declarative input of a run. Loaded once, validated,
/// then shared read-only by every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabPlan {
    pub topology: Topology,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    pub vlans: VlanPlan,
    pub ports: PortAssignment,
    #[serde(default)]
    pub probes: Vec<ProbeSpec>,
}

impl LabPlan {
    /// Load a plan from a JSON file and validate it
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading lab plan {}", path.display()))?;
        let plan: LabPlan = serde_json::from_str(&content)
            .with_context(|| format!("parsing lab plan {}", path.display()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn router(&self) -> Option<&NodeSpec> {
        self.topology.nodes_with_role(NodeRole::Router).next()
    }

    pub fn switch(&self) -> Option<&NodeSpec> {
        self.topology.nodes_with_role(NodeRole::Switch).next()
    }

    /// Far end of the link plugged into `node`/`adapter`, if any
    pub fn peer_of(&self, node: &str, adapter: u32) -> Option<&LinkEndpoint> {
        self.links.iter().find_map(|l| l.peer_of(node, adapter))
    }

    /// Structural validation. Unknown VLAN ids in port assignments are left to
    /// the generator, which reports them per device.
    pub fn validate(&self) -> Result<(), LabError> {
        self.validate_nodes()?;
        self.validate_links()?;
        self.vlans.validate()?;
        self.validate_ports()?;
        self.validate_probes()?;
        Ok(())
    }

    fn validate_nodes(&self) -> Result<(), LabError> {
        let mut names = HashSet::new();
        for node in &self.topology.nodes {
            if !is_valid_hostname(&node.name) {
                return Err(LabError::InvalidPlan(format!("invalid node name '{}'", node.name)));
            }
            if !names.insert(node.name.as_str()) {
                return Err(LabError::InvalidPlan(format!("duplicate node name '{}'", node.name)));
            }
            if node.template.trim().is_empty() {
                return Err(LabError::InvalidPlan(format!("node '{}' has no template", node.name)));
            }
        }

        for (role, first) in [(NodeRole::Router, self.router()), (NodeRole::Switch, self.switch())] {
            let Some(first) = first else {
                return Err(LabError::InvalidPlan(format!("topology has no {}", role)));
            };
            if let Some(extra) = self.topology.nodes_with_role(role).nth(1) {
                return Err(LabError::InvalidPlan(format!(
                    "expected exactly one {}, found '{}' and '{}'",
                    role, first.name, extra.name
                )));
            }
        }
        Ok(())
    }

    fn validate_links(&self) -> Result<(), LabError> {
        let mut used: HashSet<&LinkEndpoint> = HashSet::new();
        for link in &self.links {
            for end in [&link.a, &link.b] {
                if self.topology.node(&end.node).is_none() {
                    return Err(LabError::InvalidPlan(format!(
                        "link {} references unknown node '{}'",
                        link, end.node
                    )));
                }
                if !used.insert(end) {
                    return Err(LabError::InvalidPlan(format!("port {} is patched twice", end)));
                }
            }
            if link.a.node == link.b.node {
                return Err(LabError::InvalidPlan(format!("link {} loops back to its own node", link)));
            }
        }
        Ok(())
    }

    fn validate_ports(&self) -> Result<(), LabError> {
        let mut seen = HashSet::new();
        for entry in self.ports.iter() {
            if self.topology.node(&entry.device).is_none() {
                return Err(LabError::InvalidPlan(format!(
                    "port assignment references unknown device '{}'",
                    entry.device
                )));
            }
            if !seen.insert((entry.device.as_str(), entry.adapter)) {
                return Err(LabError::InvalidPlan(format!(
                    "adapter {} of '{}' assigned more than once",
                    entry.adapter, entry.device
                )));
            }
        }

        for host in self.topology.hosts() {
            let count = self.ports.iter().filter(|e| e.device == host.name).count();
            if count != 1 {
                return Err(LabError::InvalidPlan(format!(
                    "host '{}' must be assigned to exactly one VLAN (found {})",
                    host.name, count
                )));
            }
        }

        for link in &self.links {
            for (near, far) in [(&link.a, &link.b), (&link.b, &link.a)] {
                let far_is_host = self
                    .topology
                    .node(&far.node)
                    .map_or(false, |n| n.role == NodeRole::Host);
                let near_is_switch = self
                    .topology
                    .node(&near.node)
                    .map_or(false, |n| n.role == NodeRole::Switch);
                if near_is_switch && far_is_host && self.ports.vlan_for(&near.node, near.adapter).is_none() {
                    return Err(LabError::InvalidPlan(format!(
                        "host-facing port {} has no VLAN assignment",
                        near
                    )));
                }
            }

            let a = self.ports.vlan_for(&link.a.node, link.a.adapter);
            let b = self.ports.vlan_for(&link.b.node, link.b.adapter);
            if let (Some(a), Some(b)) = (a, b) {
                if a != b {
                    return Err(LabError::InvalidPlan(format!(
                        "link {} joins VLAN {} to VLAN {}",
                        link, a, b
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_probes(&self) -> Result<(), LabError> {
        for probe in &self.probes {
            match self.topology.node(&probe.source) {
                Some(n) if n.role == NodeRole::Host => {}
                _ => {
                    return Err(LabError::InvalidPlan(format!(
                        "probe source '{}' is not a host",
                        probe.source
                    )))
                }
            }
            let is_host = self
                .topology
                .node(&probe.destination)
                .map_or(false, |n| n.role == NodeRole::Host);
            if !is_host && ipam::parse_ipv4(&probe.destination).is_err() {
                return Err(LabError::InvalidPlan(format!(
                    "probe destination '{}' is neither a host nor an IPv4 address",
                    probe.destination
                )));
            }
        }
        Ok(())
    }

    /// One router, one L2 switch and six hosts in three /26 VLANs
    pub fn reference_lab() -> Self {
        let mut nodes = vec![
            NodeSpec::new("R1", NodeRole::Router, "Cisco 2911"),
            NodeSpec::new("SW1", NodeRole::Switch, "IOSv-L2"),
        ];
        for i in 1..=6 {
            nodes.push(NodeSpec::new(&format!("PC{}", i), NodeRole::Host, "VPCS"));
        }

        let mut links = Vec::new();
        let mut ports = Vec::new();
        for (adapter, vlan) in [(0u32, 10u16), (1, 20), (2, 30)] {
            links.push(LinkSpec::new(
                LinkEndpoint::new("R1", adapter, 0),
                LinkEndpoint::new("SW1", adapter, 0),
            ));
            ports.push(PortEntry::new("R1", adapter, vlan));
            ports.push(PortEntry::new("SW1", adapter, vlan));
        }
        for (i, vlan) in [10u16, 10, 20, 20, 30, 30].iter().enumerate() {
            let host = format!("PC{}", i + 1);
            let sw_adapter = 3 + i as u32;
            links.push(LinkSpec::new(
                LinkEndpoint::new("SW1", sw_adapter, 0),
                LinkEndpoint::new(&host, 0, 0),
            ));
            ports.push(PortEntry::new("SW1", sw_adapter, *vlan));
            ports.push(PortEntry::new(&host, 0, *vlan));
        }

        let mut vlans = BTreeMap::new();
        for (id, name, subnet, hosts) in [
            (10u16, "Engineering", "10.0.0.0", ["10.0.0.1", "10.0.0.2"]),
            (20, "HR", "10.0.0.64", ["10.0.0.65", "10.0.0.66"]),
            (30, "Sales", "10.0.0.128", ["10.0.0.129", "10.0.0.130"]),
        ] {
            vlans.insert(
                id,
                Vlan {
                    name: name.to_string(),
                    subnet: subnet.to_string(),
                    prefix_length: 26,
                    host_ips: hosts.iter().map(|h| h.to_string()).collect(),
                },
            );
        }

        Self {
            topology: Topology {
                name: "VLAN_Lab_Automation".to_string(),
                nodes,
            },
            links,
            vlans: VlanPlan::new(vlans),
            ports: PortAssignment::new(ports),
            probes: vec![
                ProbeSpec::new("PC1", "10.0.0.65"),
                ProbeSpec::new("PC3", "10.0.0.1"),
                ProbeSpec::new("PC5", "10.0.0.129"),
            ],
        }
    }
}
