//! Interface registry and lifecycle.
//!
//! One [`Netstack`] holds every interface state under a single mutex; each
//! [`IfState`] has its own mutex for the fields the link layer mutates. Lock
//! order is always registry first, then interface, in iteration order.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use bitflags::bitflags;
use sockbridge_wire::{IfInfo, IFF_UP};

pub type NicId = u32;

bitflags! {
    /// Feature bits reported by an Ethernet device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceFeatures: u32 {
        const WLAN = 1 << 0;
        const SYNTHETIC = 1 << 1;
        const LOOPBACK = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceInfo {
    pub features: DeviceFeatures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Down,
    Up,
}

/// Hooks into the underlying Ethernet device.
pub trait EthernetDevice: Send + Sync {
    fn info(&self) -> DeviceInfo;
    fn set_client_name(&self, name: &str);
    fn start(&self) -> anyhow::Result<()>;
    fn stop(&self);
    fn link_status(&self) -> LinkStatus;
}

/// How an interface obtains its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpAddressConfig {
    Dhcp,
    StaticIp { addr: Ipv4Addr, prefix_len: u8 },
}

impl Default for IpAddressConfig {
    fn default() -> Self {
        IpAddressConfig::Dhcp
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterfaceConfig {
    /// Interface name; empty picks a generated one from the device features.
    pub name: String,
    pub ip_address_config: IpAddressConfig,
}

#[derive(Debug, Default)]
struct DhcpClient {
    running: bool,
}

#[derive(Debug, Default)]
struct DhcpState {
    client: Option<DhcpClient>,
    enabled: bool,
}

impl DhcpState {
    fn running(&self) -> bool {
        self.client.as_ref().is_some_and(|c| c.running)
    }

    fn set_running(&mut self, running: bool) {
        if let Some(client) = self.client.as_mut() {
            client.running = running;
        }
    }
}

#[derive(Debug)]
struct IfInner {
    name: String,
    addr: Ipv4Addr,
    netmask: Ipv4Addr,
    link_up: bool,
    dhcp: DhcpState,
}

/// Per-interface state.
pub struct IfState {
    nic: NicId,
    features: DeviceFeatures,
    eth: Arc<dyn EthernetDevice>,
    mu: Mutex<IfInner>,
}

impl IfState {
    pub fn nic(&self) -> NicId {
        self.nic
    }

    pub fn features(&self) -> DeviceFeatures {
        self.features
    }

    pub fn name(&self) -> String {
        self.mu.lock().unwrap().name.clone()
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.mu.lock().unwrap().addr
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.mu.lock().unwrap().netmask
    }

    pub fn is_link_up(&self) -> bool {
        self.mu.lock().unwrap().link_up
    }

    pub fn has_dhcp_client(&self) -> bool {
        self.mu.lock().unwrap().dhcp.client.is_some()
    }

    pub fn dhcp_enabled(&self) -> bool {
        self.mu.lock().unwrap().dhcp.enabled
    }

    pub fn dhcp_running(&self) -> bool {
        self.mu.lock().unwrap().dhcp.running()
    }

    /// Bring the link down. The DHCP client stops running; whether it is
    /// enabled is preserved for the next `up`.
    pub fn down(&self) {
        self.eth.stop();
        let mut inner = self.mu.lock().unwrap();
        inner.link_up = false;
        inner.dhcp.set_running(false);
        tracing::debug!(nic = self.nic, "link down");
    }

    /// Bring the link back up; DHCP resumes iff it is enabled.
    pub fn up(&self) {
        if let Err(err) = self.eth.start() {
            tracing::warn!(nic = self.nic, "ethernet device restart failed: {err:#}");
            return;
        }
        let mut inner = self.mu.lock().unwrap();
        inner.link_up = true;
        let resume = inner.dhcp.enabled;
        inner.dhcp.set_running(resume);
        tracing::debug!(nic = self.nic, "link up");
    }

    /// Enable or disable DHCP; a client enabled while the link is up starts
    /// running immediately.
    pub fn set_dhcp_status(&self, enabled: bool) {
        let mut inner = self.mu.lock().unwrap();
        inner.dhcp.enabled = enabled;
        let run = enabled && inner.link_up;
        inner.dhcp.set_running(run);
    }

    /// Apply a static address.
    pub fn set_address(&self, addr: Ipv4Addr, prefix_len: u8) {
        let mut inner = self.mu.lock().unwrap();
        inner.addr = addr;
        inner.netmask = prefix_netmask(prefix_len);
    }
}

fn prefix_netmask(prefix_len: u8) -> Ipv4Addr {
    let prefix = u32::from(prefix_len.min(32));
    let bits = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    Ipv4Addr::from(bits)
}

#[derive(Default)]
struct NetstackInner {
    if_states: BTreeMap<NicId, Arc<IfState>>,
    next_nic: NicId,
}

/// Shared registry of interface states.
pub struct Netstack {
    mu: Mutex<NetstackInner>,
    node_name: String,
}

impl Netstack {
    pub fn new(node_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            mu: Mutex::new(NetstackInner {
                if_states: BTreeMap::new(),
                next_nic: 1,
            }),
            node_name: node_name.into(),
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Register an Ethernet device as a new interface. Starts the device,
    /// then applies the address configuration.
    pub fn add_ethernet(
        &self,
        topo_path: &str,
        config: InterfaceConfig,
        device: Arc<dyn EthernetDevice>,
    ) -> anyhow::Result<Arc<IfState>> {
        let info = device.info();
        let mut registry = self.mu.lock().unwrap();
        let nic = registry.next_nic;
        registry.next_nic += 1;

        let name = if config.name.is_empty() {
            let prefix = if info.features.contains(DeviceFeatures::WLAN) {
                "wlan"
            } else {
                "eth"
            };
            format!("{prefix}{nic}")
        } else {
            config.name
        };

        device.set_client_name(&name);
        device
            .start()
            .with_context(|| format!("starting ethernet device at {topo_path}"))?;
        let link_up = device.link_status() == LinkStatus::Up;

        let ifs = Arc::new(IfState {
            nic,
            features: info.features,
            eth: device,
            mu: Mutex::new(IfInner {
                name: name.clone(),
                addr: Ipv4Addr::UNSPECIFIED,
                netmask: Ipv4Addr::UNSPECIFIED,
                link_up,
                dhcp: DhcpState {
                    client: Some(DhcpClient::default()),
                    enabled: false,
                },
            }),
        });

        match config.ip_address_config {
            IpAddressConfig::Dhcp => {
                let mut inner = ifs.mu.lock().unwrap();
                inner.dhcp.enabled = true;
                inner.dhcp.set_running(link_up);
            }
            IpAddressConfig::StaticIp { addr, prefix_len } => {
                let mut inner = ifs.mu.lock().unwrap();
                inner.addr = addr;
                inner.netmask = prefix_netmask(prefix_len);
            }
        }

        registry.if_states.insert(nic, ifs.clone());
        tracing::info!(nic, name = %name, path = topo_path, "added ethernet interface");
        Ok(ifs)
    }

    pub fn interface(&self, nic: NicId) -> Option<Arc<IfState>> {
        self.mu.lock().unwrap().if_states.get(&nic).cloned()
    }

    /// Snapshot the registry into interface-info records. Loopback is
    /// excluded; indices are one-based in snapshot order; the broadcast
    /// address is `addr | !netmask`.
    pub fn build_if_infos(&self) -> Vec<IfInfo> {
        let registry = self.mu.lock().unwrap();
        let mut out = Vec::new();
        for ifs in registry.if_states.values() {
            let inner = ifs.mu.lock().unwrap();
            if inner.addr == Ipv4Addr::LOCALHOST {
                continue;
            }
            let addr = inner.addr.octets();
            let netmask = inner.netmask.octets();
            let mut broadaddr = [0u8; 4];
            for (i, slot) in broadaddr.iter_mut().enumerate() {
                *slot = addr[i] | !netmask[i];
            }
            out.push(IfInfo {
                name: inner.name.clone(),
                index: out.len() as u16 + 1,
                flags: IFF_UP,
                addr: inner.addr,
                netmask: inner.netmask,
                broadaddr: Ipv4Addr::from(broadaddr),
            });
        }
        out
    }
}
