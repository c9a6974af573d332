use std::net::Ipv4Addr;

use crate::error::LabError;
use crate::models::{DeviceConfig, LabPlan, NodeRole, NodeSpec, Vlan};

/// Addressing handed to one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    pub vlan: u16,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

/// ConfigGenerator turns the plan into per-device command sequences.
/// Pure: the same plan always yields byte-identical output.
pub struct ConfigGenerator<'a> {
    plan: &'a LabPlan,
}

impl<'a> ConfigGenerator<'a> {
    pub fn new(plan: &'a LabPlan) -> Self {
        Self { plan }
    }

    pub fn generate(&self, node: &NodeSpec) -> Result<DeviceConfig, LabError> {
        let commands = match node.role {
            NodeRole::Router => self.router(node)?,
            NodeRole::Switch => self.switch(node)?,
            NodeRole::Host => self.host(node)?,
        };
        Ok(DeviceConfig::new(&node.name, node.role, commands))
    }

    /// Every node's config in topology order, failures kept per device
    pub fn generate_all(&self) -> Vec<(&'a NodeSpec, Result<DeviceConfig, LabError>)> {
        self.plan
            .topology
            .nodes
            .iter()
            .map(|node| (node, self.generate(node)))
            .collect()
    }

    /// Address of a host: the VLAN's host IPs are handed out in topology order
    /// to the hosts assigned to that VLAN.
    pub fn host_address(&self, host: &str) -> Result<HostAddress, LabError> {
        let entry = self
            .plan
            .ports
            .for_device(host)
            .into_iter()
            .next()
            .ok_or_else(|| LabError::IncompletePlan(format!("host {} has no port assignment", host)))?;
        let vlan = self.vlan(entry.vlan, host)?;

        let index = self
            .plan
            .topology
            .hosts()
            .filter(|h| self.plan.ports.for_device(&h.name).first().map(|e| e.vlan) == Some(entry.vlan))
            .position(|h| h.name == host)
            .ok_or_else(|| LabError::IncompletePlan(format!("{} is not a host in the topology", host)))?;
        let raw = vlan.host_ips.get(index).ok_or_else(|| {
            LabError::IncompletePlan(format!(
                "VLAN {} has {} host addresses, not enough for {}",
                entry.vlan,
                vlan.host_ips.len(),
                host
            ))
        })?;

        Ok(HostAddress {
            vlan: entry.vlan,
            address: crate::ipam::parse_ipv4(raw)?,
            netmask: vlan.netmask()?,
            gateway: vlan.gateway()?,
        })
    }

    fn vlan(&self, id: u16, device: &str) -> Result<&'a Vlan, LabError> {
        self.plan
            .vlans
            .get(id)
            .ok_or_else(|| LabError::IncompletePlan(format!("{} is assigned to VLAN {} which is not defined", device, id)))
    }

    fn preamble(node: &NodeSpec) -> Vec<String> {
        vec![
            String::new(),
            "enable".to_string(),
            "terminal length 0".to_string(),
            "configure terminal".to_string(),
            format!("hostname {}", node.name),
        ]
    }

    fn router(&self, node: &NodeSpec) -> Result<Vec<String>, LabError> {
        let assigned = self.plan.ports.for_device(&node.name);
        for entry in &assigned {
            self.vlan(entry.vlan, &node.name)?;
        }

        let mut cmds = Self::preamble(node);
        cmds.push("no ip domain-lookup".to_string());
        for (id, vlan) in self.plan.vlans.iter() {
            let adapter = assigned
                .iter()
                .find(|e| e.vlan == id)
                .map(|e| e.adapter)
                .ok_or_else(|| LabError::IncompletePlan(format!("{} has no adapter in VLAN {}", node.name, id)))?;
            let peer = self
                .plan
                .peer_of(&node.name, adapter)
                .map(|p| p.node.as_str())
                .unwrap_or("LAN");

            cmds.push(format!("interface {}", node.interface_name(adapter)));
            cmds.push(format!(" description Link-to-{}-VLAN{}", peer, id));
            cmds.push(format!(" ip address {} {}", vlan.gateway()?, vlan.netmask()?));
            cmds.push(" no shutdown".to_string());
        }
        cmds.push("end".to_string());
        cmds.push("write memory".to_string());
        Ok(cmds)
    }

    fn switch(&self, node: &NodeSpec) -> Result<Vec<String>, LabError> {
        let mut cmds = Self::preamble(node);
        for (id, vlan) in self.plan.vlans.iter() {
            cmds.push(format!("vlan {}", id));
            cmds.push(format!(" name {}", vlan.name));
        }
        for entry in self.plan.ports.for_device(&node.name) {
            self.vlan(entry.vlan, &node.name)?;
            let peer = self
                .plan
                .peer_of(&node.name, entry.adapter)
                .map(|p| (p.node.as_str(), self.plan.topology.node(&p.node).map(|n| n.role)));
            let description = match peer {
                Some((name, Some(NodeRole::Host))) => format!("{}-VLAN{}", name, entry.vlan),
                // uplink, named the same way as the router side
                Some((name, _)) => format!("Link-to-{}-VLAN{}", name, entry.vlan),
                None => format!("VLAN{}-access", entry.vlan),
            };
            cmds.push(format!("interface {}", node.interface_name(entry.adapter)));
            cmds.push(format!(" description {}", description));
            cmds.push(" switchport mode access".to_string());
            cmds.push(format!(" switchport access vlan {}", entry.vlan));
            cmds.push(" no shutdown".to_string());
        }
        cmds.push("end".to_string());
        cmds.push("write memory".to_string());
        Ok(cmds)
    }

    fn host(&self, node: &NodeSpec) -> Result<Vec<String>, LabError> {
        let addr = self.host_address(&node.name)?;
        Ok(vec![
            format!("ip {} {} {}", addr.address, addr.netmask, addr.gateway),
            "save".to_string(),
        ])
    }
}
