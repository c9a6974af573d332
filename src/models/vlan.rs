use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::LabError;
use crate::ipam::{self, Subnet};

/// Vlan is one broadcast domain with its addressing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vlan {
    pub name: String,
    /// Subnet base address, dotted quad
    pub subnet: String,
    pub prefix_length: u8,
    /// Host addresses handed out to the VLAN's hosts in topology order
    #[serde(default)]
    pub host_ips: Vec<String>,
}

impl Vlan {
    pub fn block(&self) -> Result<Subnet, LabError> {
        Subnet::new(ipam::parse_ipv4(&self.subnet)?, self.prefix_length)
    }

    pub fn gateway(&self) -> Result<Ipv4Addr, LabError> {
        ipam::last_usable_address(&self.subnet, self.prefix_length)
    }

    pub fn netmask(&self) -> Result<Ipv4Addr, LabError> {
        ipam::subnet_mask(self.prefix_length)
    }
}

/// VlanPlan maps VLAN id to its definition; iteration is by ascending id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VlanPlan {
    vlans: BTreeMap<u16, Vlan>,
}

impl VlanPlan {
    pub fn new(vlans: BTreeMap<u16, Vlan>) -> Self {
        Self { vlans }
    }

    pub fn get(&self, id: u16) -> Option<&Vlan> {
        self.vlans.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Vlan)> {
        self.vlans.iter().map(|(id, v)| (*id, v))
    }

    pub fn len(&self) -> usize {
        self.vlans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vlans.is_empty()
    }

    /// Check ids, prefix lengths, alignment, overlap and host address placement
    pub fn validate(&self) -> Result<(), LabError> {
        if self.is_empty() {
            return Err(LabError::InvalidPlan("no VLANs defined".to_string()));
        }

        let mut blocks: Vec<(u16, Subnet)> = Vec::with_capacity(self.vlans.len());
        for (id, vlan) in &self.vlans {
            if !(1..=4094).contains(id) {
                return Err(LabError::InvalidPlan(format!("VLAN id {} outside 1..=4094", id)));
            }
            if vlan.prefix_length > ipam::MAX_LAB_PREFIX {
                return Err(LabError::InvalidSubnet(format!(
                    "VLAN {} prefix /{} leaves fewer than 2 usable hosts",
                    id, vlan.prefix_length
                )));
            }
            let block = vlan.block()?;
            if let Some((other, _)) = blocks.iter().find(|(_, b)| b.overlaps(&block)) {
                return Err(LabError::InvalidPlan(format!(
                    "VLAN {} subnet {} overlaps VLAN {}",
                    id, block, other
                )));
            }

            let gateway = vlan.gateway()?;
            let mut seen = Vec::with_capacity(vlan.host_ips.len());
            for raw in &vlan.host_ips {
                let ip = ipam::parse_ipv4(raw)?;
                if !block.is_usable_host(ip) {
                    return Err(LabError::InvalidPlan(format!(
                        "VLAN {} host address {} is not a usable address of {}",
                        id, ip, block
                    )));
                }
                if ip == gateway {
                    return Err(LabError::InvalidPlan(format!(
                        "VLAN {} host address {} collides with the gateway",
                        id, ip
                    )));
                }
                if seen.contains(&ip) {
                    return Err(LabError::InvalidPlan(format!(
                        "VLAN {} lists host address {} twice",
                        id, ip
                    )));
                }
                seen.push(ip);
            }
            blocks.push((*id, block));
        }
        Ok(())
    }
}

/// One (device, adapter) -> VLAN binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    pub device: String,
    pub adapter: u32,
    pub vlan: u16,
}

impl PortEntry {
    pub fn new(device: &str, adapter: u32, vlan: u16) -> Self {
        Self {
            device: device.to_string(),
            adapter,
            vlan,
        }
    }
}

/// PortAssignment binds device adapters to VLANs, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortAssignment {
    entries: Vec<PortEntry>,
}

impl PortAssignment {
    pub fn new(entries: Vec<PortEntry>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortEntry> {
        self.entries.iter()
    }

    pub fn vlan_for(&self, device: &str, adapter: u32) -> Option<u16> {
        self.entries
            .iter()
            .find(|e| e.device == device && e.adapter == adapter)
            .map(|e| e.vlan)
    }

    /// Entries of one device ordered by adapter
    pub fn for_device(&self, device: &str) -> Vec<&PortEntry> {
        let mut entries: Vec<&PortEntry> = self.entries.iter().filter(|e| e.device == device).collect();
        entries.sort_by_key(|e| e.adapter);
        entries
    }
}
