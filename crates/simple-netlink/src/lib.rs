//! Network namespace and virtual interface management via rtnetlink.
//!
//! This crate wraps kernel netlink operations behind a stateful handle,
//! [`SimpleNetlink`], that creates and destroys network namespaces, creates
//! VLAN and IPVLAN interfaces, moves interfaces between namespaces, assigns
//! IPv4 addresses and manages static routes. Creation calls are idempotent:
//! kernel "already exists" answers count as success.
//!
//! # Example
//!
//! ```no_run
//! use simple_netlink::{InterfaceKind, InterfaceSpec, SimpleNetlink};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut netlink = SimpleNetlink::new()?;
//!
//! netlink.create_namespace("ns1")?;
//!
//! let spec = InterfaceSpec::new("vlan100")
//!     .with_kind(InterfaceKind::tagged("eth0", 100))
//!     .in_namespace("ns1")
//!     .with_ipv4("10.0.0.1/24".parse()?);
//! let location = netlink.ensure_interface_exists(&spec)?;
//! println!("vlan100 is {}", location);
//!
//! for (name, info) in netlink.get_network_interfaces_info()? {
//!     println!("{}: {:?}", name, info.ipv4);
//! }
//! # Ok(())
//! # }
//! ```

mod address;
pub mod config;
mod interface;
pub mod kernel;
mod messages;
mod namespace;
mod netlink;
mod resolver;
mod route;
pub mod transport;
mod types;

pub use common::{Error, KernelErrorKind, Result};
pub use kernel::{KernelSession, KernelTransport};
pub use transport::{NetlinkSession, NetlinkTransport};
pub use types::{
    AddressInfo, InterfaceInfo, InterfaceKind, InterfaceLocation, InterfaceSpec, IpvlanMode,
    IpvlanParams, KindName, LinkState, Namespace, OperState, RouteTable, TaggedParams,
};

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tracing::debug;

/// Delay after namespace deletion before the name can be reused safely.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Runtime knobs of a [`SimpleNetlink`] handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Blocking sleep after a namespace is deleted.
    pub settle_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// Stateful namespace and interface manager.
///
/// Exactly one session is active at a time; the one it replaced is parked
/// so [`SimpleNetlink::restore_previous_namespace`] can switch back in O(1).
/// Every operation takes `&mut self`: a handle is owned by one caller and
/// needs an external lock to be shared across threads.
pub struct SimpleNetlink<T: NetlinkTransport = KernelTransport> {
    transport: T,
    settings: Settings,
    current: T::Session,
    previous: Option<T::Session>,
}

impl SimpleNetlink<KernelTransport> {
    /// Create a handle bound to the root namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the netlink socket cannot be created.
    pub fn new() -> Result<Self> {
        Self::with_transport(KernelTransport::default(), Settings::default(), &Namespace::Root)
    }

    /// Create a handle bound to `name`, creating the namespace if needed.
    ///
    /// Namespace management requires CAP_SYS_ADMIN and CAP_NET_ADMIN.
    pub fn in_namespace(name: &str) -> Result<Self> {
        Self::with_transport(
            KernelTransport::default(),
            Settings::default(),
            &Namespace::named(name),
        )
    }
}

impl<T: NetlinkTransport> SimpleNetlink<T> {
    /// Create a handle over an arbitrary transport, bound to `namespace`.
    pub fn with_transport(transport: T, settings: Settings, namespace: &Namespace) -> Result<Self> {
        let current = transport.open(&Namespace::Root)?;
        let mut netlink = Self {
            transport,
            settings,
            current,
            previous: None,
        };

        if !namespace.is_root() {
            netlink.set_current_namespace(namespace)?;
            // The root session used for bootstrapping is not history.
            if let Some(mut bootstrap) = netlink.previous.take() {
                bootstrap.close();
            }
        }

        Ok(netlink)
    }

    /// Namespace the active session is bound to.
    pub fn current_namespace(&self) -> &Namespace {
        self.current.namespace()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the following calls in `namespace` until the returned scope is
    /// dropped, then switch back to the session that was active before.
    ///
    /// The scope does not touch the single-slot history used by
    /// [`SimpleNetlink::restore_previous_namespace`].
    pub fn with_namespace(&mut self, namespace: &Namespace) -> Result<NamespaceScope<'_, T>> {
        if let Namespace::Named(name) = namespace {
            if !self.list_namespaces()?.contains(name) {
                self.create_namespace(name)?;
            }
        }

        let session = self.transport.open(namespace)?;
        let saved = std::mem::replace(&mut self.current, session);
        debug!(namespace = %namespace, "Entered namespace scope");
        Ok(NamespaceScope {
            netlink: self,
            saved: Some(saved),
        })
    }
}

impl<T: NetlinkTransport> Drop for SimpleNetlink<T> {
    fn drop(&mut self) {
        self.current.close();
        if let Some(previous) = self.previous.as_mut() {
            previous.close();
        }
    }
}

/// A temporary switch into another namespace. Derefs to the manager.
pub struct NamespaceScope<'a, T: NetlinkTransport> {
    netlink: &'a mut SimpleNetlink<T>,
    saved: Option<T::Session>,
}

impl<T: NetlinkTransport> Deref for NamespaceScope<'_, T> {
    type Target = SimpleNetlink<T>;

    fn deref(&self) -> &Self::Target {
        self.netlink
    }
}

impl<T: NetlinkTransport> DerefMut for NamespaceScope<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.netlink
    }
}

impl<T: NetlinkTransport> Drop for NamespaceScope<'_, T> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            let mut scoped = std::mem::replace(&mut self.netlink.current, saved);
            debug!(namespace = %scoped.namespace(), "Left namespace scope");
            scoped.close();
        }
    }
}
