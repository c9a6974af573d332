use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::LabError;

/// Longest prefix that still leaves two usable host addresses.
pub const MAX_LAB_PREFIX: u8 = 30;

/// Return the netmask for a prefix length as a raw integer.
fn mask_bits(prefix_len: u8) -> Result<u32, LabError> {
    match prefix_len {
        0 => Ok(0),
        1..=32 => Ok(u32::MAX << (32 - u32::from(prefix_len))),
        _ => Err(LabError::InvalidSubnet(format!(
            "prefix length /{} outside 0..=32",
            prefix_len
        ))),
    }
}

/// Parse a dotted-quad IPv4 address.
pub fn parse_ipv4(s: &str) -> Result<Ipv4Addr, LabError> {
    s.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| LabError::InvalidSubnet(format!("'{}' is not a dotted-quad address", s)))
}

/// Dotted-quad netmask for a prefix length, e.g. 26 -> 255.255.255.192
pub fn subnet_mask(prefix_len: u8) -> Result<Ipv4Addr, LabError> {
    mask_bits(prefix_len).map(Ipv4Addr::from)
}

/// Parse "a.b.c.d/len" into (network, broadcast, prefix_len) as integers.
/// The address part must already be the network base.
pub fn parse_cidr(cidr: &str) -> Result<(u32, u32, u8), LabError> {
    let (addr, len) = cidr
        .trim()
        .split_once('/')
        .ok_or_else(|| LabError::InvalidSubnet(format!("'{}' is missing a /prefix", cidr)))?;
    let prefix_len: u8 = len
        .parse()
        .map_err(|_| LabError::InvalidSubnet(format!("'{}' has a non-numeric prefix", cidr)))?;
    let subnet = Subnet::new(parse_ipv4(addr)?, prefix_len)?;
    Ok((
        u32::from(subnet.network),
        u32::from(subnet.broadcast()),
        prefix_len,
    ))
}

/// Address immediately before the broadcast address of the block; this lab
/// uses it as the gateway of every VLAN.
///
/// `subnet_base` may be a bare dotted quad or a CIDR string; with CIDR input the
/// embedded length must agree with `prefix_length`. Blocks of /31 and /32 have
/// no usable host range and are rejected.
pub fn last_usable_address(subnet_base: &str, prefix_length: u8) -> Result<Ipv4Addr, LabError> {
    let base = if subnet_base.contains('/') {
        let (network, _, len) = parse_cidr(subnet_base)?;
        if len != prefix_length {
            return Err(LabError::InvalidSubnet(format!(
                "'{}' disagrees with prefix length /{}",
                subnet_base, prefix_length
            )));
        }
        Ipv4Addr::from(network)
    } else {
        parse_ipv4(subnet_base)?
    };
    Subnet::new(base, prefix_length)?.last_usable()
}

/// An aligned IPv4 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subnet {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl Subnet {
    /// Build a subnet, rejecting prefixes outside 0..=32 and bases with host bits set.
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self, LabError> {
        let mask = mask_bits(prefix_len)?;
        if u32::from(network) & !mask != 0 {
            return Err(LabError::InvalidSubnet(format!(
                "{}/{} has host bits set (network is {})",
                network,
                prefix_len,
                Ipv4Addr::from(u32::from(network) & mask)
            )));
        }
        Ok(Self { network, prefix_len })
    }

    fn mask(&self) -> u32 {
        // prefix_len validated in new()
        mask_bits(self.prefix_len).unwrap_or(u32::MAX)
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !self.mask())
    }

    pub fn last_usable(&self) -> Result<Ipv4Addr, LabError> {
        if self.prefix_len > 30 {
            return Err(LabError::InvalidSubnet(format!(
                "{} has no usable host addresses",
                self
            )));
        }
        Ok(Ipv4Addr::from(u32::from(self.broadcast()) - 1))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == u32::from(self.network)
    }

    /// Whether `addr` is inside the block and neither the network nor broadcast address.
    pub fn is_usable_host(&self, addr: Ipv4Addr) -> bool {
        self.contains(addr) && addr != self.network && addr != self.broadcast()
    }

    pub fn overlaps(&self, other: &Subnet) -> bool {
        self.contains(other.network) || other.contains(self.network)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}
