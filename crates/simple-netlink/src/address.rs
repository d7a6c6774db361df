//! IPv4 address assignment and the per-interface snapshot.

use std::collections::BTreeMap;
use std::net::IpAddr;

use common::{KernelErrorKind, Result};
use ipnet::Ipv4Net;
use tracing::debug;

use crate::transport::{NetlinkSession, NetlinkTransport};
use crate::types::{AddressInfo, InterfaceInfo, format_mac};
use crate::SimpleNetlink;

impl<T: NetlinkTransport> SimpleNetlink<T> {
    /// Add `prefix` to `name` in the current namespace.
    ///
    /// An address that is already present or in use counts as added. The
    /// interface is looked up in the current namespace only.
    pub fn interface_add_ipv4(&mut self, name: &str, prefix: Ipv4Net) -> Result<()> {
        let index = self.get_interface_index(name)?;
        match self.current.add_address(index, prefix) {
            Ok(()) => {
                debug!(interface = name, %prefix, "Added address");
                Ok(())
            }
            Err(e) => match e.kernel_kind() {
                Some(KernelErrorKind::AlreadyExists | KernelErrorKind::InUse) => {
                    debug!(interface = name, %prefix, "Address already present: {}", e);
                    Ok(())
                }
                _ => Err(e),
            },
        }
    }

    /// Remove `prefix` from `name` in the current namespace.
    ///
    /// Removing an address that is not there counts as removed.
    pub fn interface_delete_ipv4(&mut self, name: &str, prefix: Ipv4Net) -> Result<()> {
        let index = self.get_interface_index(name)?;
        match self.current.delete_address(index, prefix) {
            Ok(()) => {
                debug!(interface = name, %prefix, "Deleted address");
                Ok(())
            }
            Err(e) => match e.kernel_kind() {
                Some(
                    KernelErrorKind::AlreadyExists
                    | KernelErrorKind::InUse
                    | KernelErrorKind::NotFound,
                ) => {
                    debug!(interface = name, %prefix, "Address not removable, ignoring: {}", e);
                    Ok(())
                }
                _ => Err(e),
            },
        }
    }

    /// Snapshot of every interface in the current namespace, keyed by name.
    pub fn get_network_interfaces_info(&mut self) -> Result<BTreeMap<String, InterfaceInfo>> {
        let links = self.current.links()?;
        let addresses = self.current.addresses()?;

        let mut by_index: BTreeMap<u32, (Vec<AddressInfo>, Vec<AddressInfo>)> = BTreeMap::new();
        for record in addresses {
            let entry = by_index.entry(record.index).or_default();
            let info = AddressInfo {
                address: record.address,
                prefix_length: record.prefix_len,
            };
            match record.address {
                IpAddr::V4(_) => entry.0.push(info),
                IpAddr::V6(_) => entry.1.push(info),
            }
        }

        Ok(links
            .into_iter()
            .map(|link| {
                let (ipv4, ipv6) = by_index.remove(&link.index).unwrap_or_default();
                let info = InterfaceInfo {
                    index: link.index,
                    link_state: link.state,
                    oper_state: link.oper_state,
                    mac_address: link.mac.as_deref().map(format_mac),
                    mtu: link.mtu,
                    ipv4,
                    ipv6,
                };
                (link.name, info)
            })
            .collect())
    }
}
