//! Namespace, interface and route data types.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::Serialize;

/// A network namespace scope.
///
/// `Root` is the sentinel for "no namespace": the default namespace the
/// process was started in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(into = "Option<String>")]
pub enum Namespace {
    #[default]
    Root,
    Named(String),
}

impl Namespace {
    /// Build a named namespace.
    pub fn named(name: impl Into<String>) -> Self {
        Namespace::Named(name.into())
    }

    /// The namespace name, `None` for the root namespace.
    pub fn name(&self) -> Option<&str> {
        match self {
            Namespace::Root => None,
            Namespace::Named(name) => Some(name),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Namespace::Root)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Root => write!(f, "<root>"),
            Namespace::Named(name) => write!(f, "{}", name),
        }
    }
}

impl From<&str> for Namespace {
    fn from(name: &str) -> Self {
        Namespace::Named(name.to_string())
    }
}

impl From<Option<&str>> for Namespace {
    fn from(name: Option<&str>) -> Self {
        name.map_or(Namespace::Root, Namespace::from)
    }
}

impl From<Option<String>> for Namespace {
    fn from(name: Option<String>) -> Self {
        name.map_or(Namespace::Root, Namespace::Named)
    }
}

impl From<Namespace> for Option<String> {
    fn from(namespace: Namespace) -> Self {
        match namespace {
            Namespace::Root => None,
            Namespace::Named(name) => Some(name),
        }
    }
}

/// Administrative link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Up,
    Down,
}

impl LinkState {
    /// Parse a link-state directive: `down` (any case) means down, anything
    /// else, including an absent directive, means up.
    pub fn from_directive(directive: Option<&str>) -> Self {
        match directive {
            Some(s) if s.eq_ignore_ascii_case("down") => LinkState::Down,
            _ => LinkState::Up,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Up => write!(f, "up"),
            LinkState::Down => write!(f, "down"),
        }
    }
}

/// Operational state as reported by the kernel (RFC 2863).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperState {
    #[default]
    Unknown,
    NotPresent,
    Down,
    LowerLayerDown,
    Testing,
    Dormant,
    Up,
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperState::Unknown => "UNKNOWN",
            OperState::NotPresent => "NOT_PRESENT",
            OperState::Down => "DOWN",
            OperState::LowerLayerDown => "LOWER_LAYER_DOWN",
            OperState::Testing => "TESTING",
            OperState::Dormant => "DORMANT",
            OperState::Up => "UP",
        };
        write!(f, "{}", s)
    }
}

/// IPVLAN operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpvlanMode {
    /// Switched mode: the parent handles ARP/ND for the child.
    #[default]
    L2,
    L3,
    L3s,
}

/// Parameters for an 802.1Q VLAN sub-interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedParams {
    pub parent: String,
    pub vlan_id: u16,
}

/// Parameters for an IPVLAN interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpvlanParams {
    pub parent: String,
    pub mode: IpvlanMode,
}

impl IpvlanParams {
    /// IPVLAN on `parent` in L2 mode.
    pub fn new(parent: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            mode: IpvlanMode::L2,
        }
    }
}

/// Virtual interface kinds this crate can create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceKind {
    Tagged(TaggedParams),
    Ipvlan(IpvlanParams),
}

impl InterfaceKind {
    /// VLAN sub-interface of `parent` tagged with `vlan_id`.
    pub fn tagged(parent: impl Into<String>, vlan_id: u16) -> Self {
        InterfaceKind::Tagged(TaggedParams {
            parent: parent.into(),
            vlan_id,
        })
    }

    /// L2 IPVLAN on `parent`.
    pub fn ipvlan(parent: impl Into<String>) -> Self {
        InterfaceKind::Ipvlan(IpvlanParams::new(parent))
    }

    /// The kind name (`tagged` or `ipvlan`).
    pub fn name(&self) -> &'static str {
        match self {
            InterfaceKind::Tagged(_) => "tagged",
            InterfaceKind::Ipvlan(_) => "ipvlan",
        }
    }

    /// Name of the parent interface.
    pub fn parent(&self) -> &str {
        match self {
            InterfaceKind::Tagged(params) => &params.parent,
            InterfaceKind::Ipvlan(params) => &params.parent,
        }
    }
}

/// Supported kind names, without their parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindName {
    Tagged,
    Ipvlan,
}

impl FromStr for KindName {
    type Err = common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tagged" => Ok(KindName::Tagged),
            "ipvlan" => Ok(KindName::Ipvlan),
            other => Err(common::Error::config(format!(
                "unsupported interface type '{}'",
                other
            ))),
        }
    }
}

/// Where an interface lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceLocation {
    pub namespace: Namespace,
    pub index: u32,
}

impl fmt::Display for InterfaceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.namespace, self.index)
    }
}

/// Desired state of one interface, the input to `ensure_interface_exists`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub name: String,
    /// Virtual kind to create when the interface exists nowhere.
    pub kind: Option<InterfaceKind>,
    /// Target namespace.
    pub namespace: Namespace,
    pub link_state: LinkState,
    pub ipv4: Vec<Ipv4Net>,
}

impl InterfaceSpec {
    /// An interface placed in the root namespace, link up, no addresses.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            namespace: Namespace::Root,
            link_state: LinkState::Up,
            ipv4: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: InterfaceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<Namespace>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_link_state(mut self, state: LinkState) -> Self {
        self.link_state = state;
        self
    }

    pub fn with_ipv4(mut self, prefix: Ipv4Net) -> Self {
        self.ipv4.push(prefix);
        self
    }
}

/// Routes of the current namespace, partitioned by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteTable {
    /// Prefix to gateways.
    #[serde(rename = "static")]
    pub static_routes: BTreeMap<Ipv4Net, Vec<Ipv4Addr>>,
    /// Reserved for routes installed by routing daemons. Never populated.
    pub dynamic: BTreeMap<Ipv4Net, Vec<Ipv4Addr>>,
    /// Prefix to preferred source addresses.
    pub local: BTreeMap<Ipv4Net, Vec<Ipv4Addr>>,
}

impl RouteTable {
    /// Total number of next hops and sources across all buckets.
    pub fn len(&self) -> usize {
        [&self.static_routes, &self.dynamic, &self.local]
            .iter()
            .flat_map(|bucket| bucket.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One address configured on an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressInfo {
    pub address: IpAddr,
    pub prefix_length: u8,
}

/// Read-only snapshot of one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceInfo {
    pub index: u32,
    pub link_state: LinkState,
    pub oper_state: OperState,
    pub mac_address: Option<String>,
    pub mtu: u32,
    pub ipv4: Vec<AddressInfo>,
    pub ipv6: Vec<AddressInfo>,
}

/// Format a hardware address as colon-separated hex.
pub(crate) fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
