//! Read-only cloud catalog payloads and security rules.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
    pub size_mb: u64,
    pub min_disk_gb: u64,
    pub min_ram_mb: u64,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceAmounts {
    pub vcpu: u32,
    pub ram_mb: u64,
    pub disk_gb: u64,
    pub instances: u32,
    pub networks: u32,
    pub public_ips: u32,
}

impl ResourceAmounts {
    pub fn saturating_sub(&self, other: &ResourceAmounts) -> ResourceAmounts {
        ResourceAmounts {
            vcpu: self.vcpu.saturating_sub(other.vcpu),
            ram_mb: self.ram_mb.saturating_sub(other.ram_mb),
            disk_gb: self.disk_gb.saturating_sub(other.disk_gb),
            instances: self.instances.saturating_sub(other.instances),
            networks: self.networks.saturating_sub(other.networks),
            public_ips: self.public_ips.saturating_sub(other.public_ips),
        }
    }
}

/// A user's quota on one cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub total: ResourceAmounts,
    pub used: ResourceAmounts,
}

impl Quota {
    pub fn available(&self) -> ResourceAmounts {
        self.total.saturating_sub(&self.used)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EtherType {
    IPv4,
    IPv6,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub direction: Direction,
    pub protocol: Protocol,
    pub ether_type: EtherType,
    pub port_from: u16,
    pub port_to: u16,
    pub cidr: String,
}

/// A security rule as installed on a network or public IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRuleInstance {
    pub id: String,
    pub rule: SecurityRule,
}

/// Power/lifecycle operations on a fulfilled compute order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum LifecycleOp {
    Pause,
    Hibernate,
    Stop,
    Resume,
    TakeSnapshot { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_quota_never_underflows() {
        let q = Quota {
            total: ResourceAmounts {
                vcpu: 4,
                ram_mb: 4096,
                ..Default::default()
            },
            used: ResourceAmounts {
                vcpu: 6,
                ram_mb: 1024,
                ..Default::default()
            },
        };
        let a = q.available();
        assert_eq!(a.vcpu, 0);
        assert_eq!(a.ram_mb, 3072);
    }
}
