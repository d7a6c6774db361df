//! An in-memory kernel for exercising the manager without privileges.
//!
//! Namespaces, links, addresses and routes live in a shared table. Failures
//! carry the errno the real kernel answers with, so the manager's idempotency
//! policy is exercised end to end.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::time::Duration;

use ipnet::Ipv4Net;
use simple_netlink::transport::{
    AddressRecord, LinkRecord, NetlinkSession, NetlinkTransport, NewLink, RouteRecord,
};
use simple_netlink::{Error, LinkState, Namespace, OperState, Result, Settings, SimpleNetlink};

#[derive(Debug, Clone)]
struct FakeLink {
    index: u32,
    name: String,
    state: LinkState,
    mtu: u32,
}

/// Who installed a route, the `rtm_protocol` of the real kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOrigin {
    /// Connected route added along with an address.
    Kernel,
    /// Installed by iproute2 without an explicit protocol.
    Boot,
    /// Installed through the manager.
    Static,
}

#[derive(Debug, Clone)]
struct FakeRoute {
    record: RouteRecord,
    origin: RouteOrigin,
}

#[derive(Debug, Default)]
struct FakeNamespace {
    links: Vec<FakeLink>,
    addresses: Vec<(u32, Ipv4Net)>,
    routes: Vec<FakeRoute>,
}

#[derive(Debug)]
struct State {
    namespaces: BTreeMap<Namespace, FakeNamespace>,
    next_index: u32,
    open_sessions: usize,
}

impl State {
    fn namespace_mut(&mut self, namespace: &Namespace, operation: &str) -> Result<&mut FakeNamespace> {
        self.namespaces
            .get_mut(namespace)
            .ok_or_else(|| Error::kernel(libc::ENOENT, operation))
    }

    fn new_link(&mut self, name: &str, state: LinkState) -> FakeLink {
        let index = self.next_index;
        self.next_index += 1;
        FakeLink {
            index,
            name: name.to_string(),
            state,
            mtu: if name == "lo" { 65536 } else { 1500 },
        }
    }
}

/// Shared handle on the fake kernel. Clones see the same state.
#[derive(Debug, Clone)]
pub struct FakeKernel {
    state: Rc<RefCell<State>>,
}

impl FakeKernel {
    /// A root namespace holding `lo` (index 1) and `eth0` (index 2).
    pub fn new() -> Self {
        let mut state = State {
            namespaces: BTreeMap::new(),
            next_index: 1,
            open_sessions: 0,
        };
        let mut root = FakeNamespace::default();
        root.links.push(state.new_link("lo", LinkState::Up));
        root.links.push(state.new_link("eth0", LinkState::Up));
        state.namespaces.insert(Namespace::Root, root);

        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// A manager over this kernel with no settle delay.
    pub fn manager(&self) -> SimpleNetlink<FakeKernel> {
        SimpleNetlink::with_transport(
            self.clone(),
            Settings {
                settle_delay: Duration::ZERO,
            },
            &Namespace::Root,
        )
        .expect("fake kernel always opens root")
    }

    /// Plug a physical interface into `namespace`.
    pub fn add_physical_link(&self, namespace: &Namespace, name: &str) -> u32 {
        let mut state = self.state.borrow_mut();
        let link = state.new_link(name, LinkState::Up);
        let index = link.index;
        state
            .namespaces
            .get_mut(namespace)
            .expect("namespace exists")
            .links
            .push(link);
        index
    }

    /// Install a route behind the manager's back, as `ip route add` would.
    pub fn inject_route(&self, namespace: &Namespace, route: RouteRecord) {
        self.inject_route_from(namespace, route, RouteOrigin::Boot);
    }

    pub fn inject_route_from(&self, namespace: &Namespace, route: RouteRecord, origin: RouteOrigin) {
        self.state
            .borrow_mut()
            .namespaces
            .get_mut(namespace)
            .expect("namespace exists")
            .routes
            .push(FakeRoute {
                record: route,
                origin,
            });
    }

    pub fn link_state(&self, namespace: &Namespace, name: &str) -> Option<LinkState> {
        let state = self.state.borrow();
        state
            .namespaces
            .get(namespace)?
            .links
            .iter()
            .find(|link| link.name == name)
            .map(|link| link.state)
    }

    pub fn addresses_of(&self, namespace: &Namespace, name: &str) -> Vec<Ipv4Net> {
        let state = self.state.borrow();
        let Some(ns) = state.namespaces.get(namespace) else {
            return Vec::new();
        };
        let Some(link) = ns.links.iter().find(|link| link.name == name) else {
            return Vec::new();
        };
        ns.addresses
            .iter()
            .filter(|(index, _)| *index == link.index)
            .map(|(_, prefix)| *prefix)
            .collect()
    }

    pub fn routes_in(&self, namespace: &Namespace) -> Vec<RouteRecord> {
        self.state
            .borrow()
            .namespaces
            .get(namespace)
            .map(|ns| ns.routes.iter().map(|r| r.record.clone()).collect())
            .unwrap_or_default()
    }

    pub fn route_origins(&self, namespace: &Namespace) -> Vec<RouteOrigin> {
        self.state
            .borrow()
            .namespaces
            .get(namespace)
            .map(|ns| ns.routes.iter().map(|r| r.origin).collect())
            .unwrap_or_default()
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.state.borrow().open_sessions
    }
}

impl NetlinkTransport for FakeKernel {
    type Session = FakeSession;

    fn list_namespaces(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .state
            .borrow()
            .namespaces
            .keys()
            .filter_map(|ns| ns.name().map(str::to_string))
            .collect())
    }

    fn create_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let namespace = Namespace::named(name);
        if state.namespaces.contains_key(&namespace) {
            return Err(Error::kernel(libc::EEXIST, format!("create namespace {}", name)));
        }
        let mut ns = FakeNamespace::default();
        ns.links.push(state.new_link("lo", LinkState::Down));
        state.namespaces.insert(namespace, ns);
        Ok(())
    }

    fn remove_namespace(&self, name: &str) -> Result<()> {
        self.state
            .borrow_mut()
            .namespaces
            .remove(&Namespace::named(name))
            .map(|_| ())
            .ok_or_else(|| Error::kernel(libc::ENOENT, format!("remove namespace {}", name)))
    }

    fn open(&self, namespace: &Namespace) -> Result<FakeSession> {
        let mut state = self.state.borrow_mut();
        if !state.namespaces.contains_key(namespace) {
            return Err(Error::kernel(libc::ENOENT, format!("open {}", namespace)));
        }
        state.open_sessions += 1;
        Ok(FakeSession {
            namespace: namespace.clone(),
            state: Rc::clone(&self.state),
            closed: false,
        })
    }
}

pub struct FakeSession {
    namespace: Namespace,
    state: Rc<RefCell<State>>,
    closed: bool,
}

impl FakeSession {
    fn with_ns<R>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut FakeNamespace) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.borrow_mut();
        f(state.namespace_mut(&self.namespace, operation)?)
    }
}

fn no_device(operation: &str) -> Error {
    Error::kernel(libc::ENODEV, operation)
}

impl NetlinkSession for FakeSession {
    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn link_lookup(&mut self, name: &str) -> Result<Vec<u32>> {
        self.with_ns("link lookup", |ns| {
            Ok(ns
                .links
                .iter()
                .filter(|link| link.name == name)
                .map(|link| link.index)
                .collect())
        })
    }

    fn links(&mut self) -> Result<Vec<LinkRecord>> {
        self.with_ns("dump links", |ns| {
            Ok(ns
                .links
                .iter()
                .map(|link| LinkRecord {
                    index: link.index,
                    name: link.name.clone(),
                    state: link.state,
                    oper_state: match link.state {
                        LinkState::Up => OperState::Up,
                        LinkState::Down => OperState::Down,
                    },
                    mac: (link.name != "lo").then(|| {
                        vec![0x02, 0, 0, 0, (link.index >> 8) as u8, link.index as u8]
                    }),
                    mtu: link.mtu,
                })
                .collect())
        })
    }

    fn create_link(&mut self, request: &NewLink) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let mut link = state.new_link(&request.name, LinkState::Down);
        let ns = state.namespace_mut(&self.namespace, "create link")?;
        if ns.links.iter().any(|l| l.name == request.name) {
            return Err(Error::kernel(libc::EEXIST, "create link"));
        }
        let parent = ns
            .links
            .iter()
            .find(|l| l.index == request.parent_index)
            .ok_or_else(|| no_device("create link"))?;
        link.mtu = parent.mtu;
        ns.links.push(link);
        Ok(())
    }

    fn set_link_state(&mut self, index: u32, state: LinkState) -> Result<()> {
        self.with_ns("set link", |ns| {
            let link = ns
                .links
                .iter_mut()
                .find(|l| l.index == index)
                .ok_or_else(|| no_device("set link"))?;
            link.state = state;
            Ok(())
        })
    }

    fn move_link(&mut self, index: u32, target: &Namespace) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let name = state
            .namespace_mut(&self.namespace, "move link")?
            .links
            .iter()
            .find(|l| l.index == index)
            .map(|l| l.name.clone())
            .ok_or_else(|| no_device("move link"))?;
        match state.namespaces.get(target) {
            None => return Err(Error::kernel(libc::ENOENT, "move link")),
            Some(ns) if ns.links.iter().any(|l| l.name == name) => {
                return Err(Error::kernel(libc::EEXIST, "move link"));
            }
            Some(_) => {}
        }

        let source = state.namespace_mut(&self.namespace, "move link")?;
        let position = source
            .links
            .iter()
            .position(|l| l.index == index)
            .ok_or_else(|| no_device("move link"))?;
        let mut link = source.links.remove(position);
        source.addresses.retain(|(i, _)| *i != index);
        source.routes.retain(|r| r.record.oif != Some(index));
        link.state = LinkState::Down;

        state.namespace_mut(target, "move link")?.links.push(link);
        Ok(())
    }

    fn add_address(&mut self, index: u32, prefix: Ipv4Net) -> Result<()> {
        self.with_ns("add address", |ns| {
            if !ns.links.iter().any(|l| l.index == index) {
                return Err(no_device("add address"));
            }
            if ns.addresses.contains(&(index, prefix)) {
                return Err(Error::kernel(libc::EEXIST, "add address"));
            }
            ns.addresses.push((index, prefix));
            ns.routes.push(FakeRoute {
                record: RouteRecord {
                    destination: prefix.trunc(),
                    gateway: None,
                    pref_source: Some(prefix.addr()),
                    oif: Some(index),
                },
                origin: RouteOrigin::Kernel,
            });
            Ok(())
        })
    }

    fn delete_address(&mut self, index: u32, prefix: Ipv4Net) -> Result<()> {
        self.with_ns("delete address", |ns| {
            let position = ns
                .addresses
                .iter()
                .position(|entry| *entry == (index, prefix))
                .ok_or_else(|| Error::kernel(libc::EADDRNOTAVAIL, "delete address"))?;
            ns.addresses.remove(position);
            ns.routes.retain(|r| {
                !(r.origin == RouteOrigin::Kernel
                    && r.record.oif == Some(index)
                    && r.record.pref_source == Some(prefix.addr()))
            });
            Ok(())
        })
    }

    fn addresses(&mut self) -> Result<Vec<AddressRecord>> {
        self.with_ns("dump addresses", |ns| {
            Ok(ns
                .addresses
                .iter()
                .map(|(index, prefix)| AddressRecord {
                    index: *index,
                    address: IpAddr::V4(prefix.addr()),
                    prefix_len: prefix.prefix_len(),
                })
                .collect())
        })
    }

    fn add_route(&mut self, destination: Ipv4Net, gateway: Ipv4Addr) -> Result<()> {
        self.with_ns("add route", |ns| {
            if ns
                .routes
                .iter()
                .any(|r| r.record.destination == destination && r.record.gateway == Some(gateway))
            {
                return Err(Error::kernel(libc::EEXIST, "add route"));
            }
            ns.routes.push(FakeRoute {
                record: RouteRecord {
                    destination,
                    gateway: Some(gateway),
                    pref_source: None,
                    oif: None,
                },
                origin: RouteOrigin::Static,
            });
            Ok(())
        })
    }

    /// Like the kernel, a delete with an unspecified protocol matches a route
    /// of any origin.
    fn delete_route(&mut self, destination: Ipv4Net, gateway: Ipv4Addr) -> Result<()> {
        self.with_ns("delete route", |ns| {
            let position = ns
                .routes
                .iter()
                .position(|r| {
                    r.record.destination == destination && r.record.gateway == Some(gateway)
                })
                .ok_or_else(|| Error::kernel(libc::ESRCH, "delete route"))?;
            ns.routes.remove(position);
            Ok(())
        })
    }

    fn routes(&mut self) -> Result<Vec<RouteRecord>> {
        self.with_ns("dump routes", |ns| {
            Ok(ns.routes.iter().map(|r| r.record.clone()).collect())
        })
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.borrow_mut().open_sessions -= 1;
        }
    }
}
