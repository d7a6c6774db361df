//! The seam between the manager and the kernel.
//!
//! `NetlinkTransport` owns namespace lifecycle and hands out sessions, each
//! bound to exactly one namespace. `NetlinkSession` is the per-namespace
//! channel for link, address and route requests. Kernel refusals come back as
//! `Error::Kernel` so callers can match on `KernelErrorKind`.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

use common::Result;
use ipnet::Ipv4Net;

use crate::types::{IpvlanMode, LinkState, Namespace, OperState};

/// A link as seen in a namespace dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub index: u32,
    pub name: String,
    /// Administrative state (IFF_UP).
    pub state: LinkState,
    pub oper_state: OperState,
    pub mac: Option<Vec<u8>>,
    pub mtu: u32,
}

/// An address as seen in a namespace dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    pub index: u32,
    pub address: IpAddr,
    pub prefix_len: u8,
}

/// A unicast IPv4 route as seen in a namespace dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub destination: Ipv4Net,
    pub gateway: Option<Ipv4Addr>,
    pub pref_source: Option<Ipv4Addr>,
    pub oif: Option<u32>,
}

/// Kind-specific part of a link creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualLink {
    Vlan { id: u16 },
    Ipvlan { mode: IpvlanMode },
}

/// A request to create a virtual link on top of a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLink {
    pub name: String,
    pub parent_index: u32,
    pub link: VirtualLink,
}

/// Namespace-level operations and session factory.
#[cfg_attr(test, mockall::automock(type Session = MockNetlinkSession;))]
pub trait NetlinkTransport {
    type Session: NetlinkSession;

    /// Names of all named namespaces.
    fn list_namespaces(&self) -> Result<BTreeSet<String>>;

    /// Create a named namespace. Fails with `KernelErrorKind::AlreadyExists`
    /// if it is already there.
    fn create_namespace(&self, name: &str) -> Result<()>;

    /// Remove a named namespace.
    fn remove_namespace(&self, name: &str) -> Result<()>;

    /// Open a session bound to `namespace`.
    fn open(&self, namespace: &Namespace) -> Result<Self::Session>;
}

/// Requests scoped to a single namespace.
#[cfg_attr(test, mockall::automock)]
pub trait NetlinkSession {
    /// The namespace this session is bound to.
    fn namespace(&self) -> &Namespace;

    /// Indices of every link called `name`.
    fn link_lookup(&mut self, name: &str) -> Result<Vec<u32>>;

    fn links(&mut self) -> Result<Vec<LinkRecord>>;

    fn create_link(&mut self, request: &NewLink) -> Result<()>;

    fn set_link_state(&mut self, index: u32, state: LinkState) -> Result<()>;

    /// Hand a link over to another namespace. `Namespace::Root` means the
    /// namespace of PID 1.
    fn move_link(&mut self, index: u32, target: &Namespace) -> Result<()>;

    fn add_address(&mut self, index: u32, prefix: Ipv4Net) -> Result<()>;

    fn delete_address(&mut self, index: u32, prefix: Ipv4Net) -> Result<()>;

    fn addresses(&mut self) -> Result<Vec<AddressRecord>>;

    fn add_route(&mut self, destination: Ipv4Net, gateway: Ipv4Addr) -> Result<()>;

    fn delete_route(&mut self, destination: Ipv4Net, gateway: Ipv4Addr) -> Result<()>;

    /// Unicast IPv4 routes.
    fn routes(&mut self) -> Result<Vec<RouteRecord>>;

    /// Release the underlying channel. Safe to call more than once.
    fn close(&mut self);
}
