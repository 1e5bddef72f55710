use std::{
    collections::{BTreeSet, HashMap},
    net::Ipv4Addr,
};

use cidr::{Cidr, Ipv4Cidr};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
#[error("client address pool exhausted")]
pub struct PoolExhausted;

#[derive(Debug, Clone, Copy)]
pub enum AllocMode {
    /// Leased free-list over the subnet, keyed by node.
    Pool,
    /// Last octet from the wall clock, as deployed nodes historically got.
    /// No collision detection.
    Clock,
}

/// Assignable host addresses: the subnet minus network, gateway and
/// broadcast, starting at `.2`.
fn candidates(subnet: Ipv4Cidr) -> impl Iterator<Item = Ipv4Addr> {
    let hosts = (1u64 << (32 - subnet.network_length())).saturating_sub(3);

    subnet.into_iter().addresses().skip(2).take(hosts as usize)
}

pub struct IpPool {
    subnet: Ipv4Cidr,
    leased: HashMap<i64, BTreeSet<Ipv4Addr>>,
}

impl IpPool {
    pub fn new(subnet: Ipv4Cidr) -> Self {
        Self {
            subnet,
            leased: HashMap::new(),
        }
    }

    pub fn lease(&mut self, node: i64) -> Result<Ipv4Addr, PoolExhausted> {
        let taken = self.leased.entry(node).or_default();
        let addr = candidates(self.subnet)
            .find(|a| !taken.contains(a))
            .ok_or(PoolExhausted)?;
        taken.insert(addr);

        Ok(addr)
    }

    pub fn release(&mut self, node: i64, addr: Ipv4Addr) {
        if let Some(taken) = self.leased.get_mut(&node) {
            taken.remove(&addr);
        }
    }

    pub fn forget_node(&mut self, node: i64) {
        self.leased.remove(&node);
    }
}

pub fn clock_address(subnet: &Ipv4Cidr) -> Ipv4Addr {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let mut octets = subnet.first_address().octets();
    octets[3] = 2 + (now % 253) as u8;

    Ipv4Addr::from(octets)
}
