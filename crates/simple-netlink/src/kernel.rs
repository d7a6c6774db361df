//! Production transport backed by the running kernel.
//!
//! Named namespaces are persisted the way iproute2 does it: an empty file
//! under the netns directory with the namespace bind-mounted on top. Sessions
//! for a named namespace are created by a short-lived thread that joins the
//! namespace, opens the rtnetlink socket and exits; the socket stays bound to
//! the namespace it was created in.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;

use common::{Error, Result};
use ipnet::Ipv4Net;
use netlink_packet_route::RouteNetlinkMessage;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::sched::{CloneFlags, setns, unshare};
use tracing::{debug, info};

use crate::messages::{self, NetnsTarget};
use crate::netlink::{RequestKind, RouteSocket};
use crate::transport::{
    AddressRecord, LinkRecord, NetlinkSession, NetlinkTransport, NewLink, RouteRecord,
};
use crate::types::{LinkState, Namespace};

/// Default directory for named namespaces (iproute2 convention).
pub const DEFAULT_NETNS_DIR: &str = "/var/run/netns";

/// Process whose namespace stands for "no namespace" when moving links.
const ROOT_NAMESPACE_PID: u32 = 1;

const THREAD_NS_PATH: &str = "/proc/thread-self/ns/net";

/// Transport that talks to the kernel through rtnetlink and namespace files.
#[derive(Debug, Clone)]
pub struct KernelTransport {
    netns_dir: PathBuf,
}

impl Default for KernelTransport {
    fn default() -> Self {
        Self::new(DEFAULT_NETNS_DIR)
    }
}

impl KernelTransport {
    pub fn new(netns_dir: impl Into<PathBuf>) -> Self {
        Self {
            netns_dir: netns_dir.into(),
        }
    }

    pub fn netns_dir(&self) -> &Path {
        &self.netns_dir
    }

    fn namespace_path(&self, name: &str) -> PathBuf {
        self.netns_dir.join(name)
    }

    fn open_namespace_file(&self, name: &str) -> Result<File> {
        let path = self.namespace_path(name);
        File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::not_found("namespace", name, self.netns_dir.display()),
            _ => Error::Io(e),
        })
    }

    /// Run `f` on a fresh thread that has joined the namespace behind `file`.
    fn run_in_namespace<T, F>(file: &File, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
    {
        thread::scope(|scope| {
            scope
                .spawn(|| {
                    setns(file, CloneFlags::CLONE_NEWNET)
                        .map_err(|e| Error::other(format!("setns failed: {}", e)))?;
                    f()
                })
                .join()
                .map_err(|_| Error::other("namespace worker thread panicked"))?
        })
    }
}

impl NetlinkTransport for KernelTransport {
    type Session = KernelSession;

    fn list_namespaces(&self) -> Result<BTreeSet<String>> {
        let entries = match fs::read_dir(&self.netns_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.insert(name.to_string());
            }
        }
        Ok(names)
    }

    fn create_namespace(&self, name: &str) -> Result<()> {
        fs::create_dir_all(&self.netns_dir)?;

        let path = self.namespace_path(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::kernel(libc::EEXIST, format!("create namespace {}", name)));
            }
            Err(e) => return Err(Error::Io(e)),
        }

        let result = thread::scope(|scope| {
            scope
                .spawn(|| -> Result<()> {
                    unshare(CloneFlags::CLONE_NEWNET)
                        .map_err(|e| Error::other(format!("unshare failed: {}", e)))?;
                    mount(
                        Some(THREAD_NS_PATH),
                        path.as_path(),
                        None::<&str>,
                        MsFlags::MS_BIND,
                        None::<&str>,
                    )
                    .map_err(|e| Error::other(format!("bind mount of {} failed: {}", name, e)))
                })
                .join()
                .map_err(|_| Error::other("namespace worker thread panicked"))?
        });

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&path) {
                debug!(namespace = name, "Removing {} failed: {}", path.display(), cleanup);
            }
            return Err(e);
        }

        info!(namespace = name, "Created network namespace");
        Ok(())
    }

    fn remove_namespace(&self, name: &str) -> Result<()> {
        let path = self.namespace_path(name);
        if !path.exists() {
            return Err(Error::kernel(libc::ENOENT, format!("remove namespace {}", name)));
        }

        if let Err(e) = umount2(path.as_path(), MntFlags::MNT_DETACH) {
            debug!(namespace = name, "umount failed: {}", e);
        }
        fs::remove_file(&path)?;

        info!(namespace = name, "Removed network namespace");
        Ok(())
    }

    fn open(&self, namespace: &Namespace) -> Result<KernelSession> {
        let socket = match namespace {
            Namespace::Root => RouteSocket::new()?,
            Namespace::Named(name) => {
                let file = self.open_namespace_file(name)?;
                Self::run_in_namespace(&file, RouteSocket::new)?
            }
        };

        debug!(namespace = %namespace, "Opened netlink session");
        Ok(KernelSession {
            namespace: namespace.clone(),
            netns_dir: self.netns_dir.clone(),
            socket: Some(socket),
        })
    }
}

/// rtnetlink session bound to one namespace.
pub struct KernelSession {
    namespace: Namespace,
    netns_dir: PathBuf,
    socket: Option<RouteSocket>,
}

impl KernelSession {
    fn request(
        &mut self,
        message: RouteNetlinkMessage,
        kind: RequestKind,
        operation: &str,
    ) -> Result<Vec<RouteNetlinkMessage>> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| Error::netlink(format!("session for {} is closed", self.namespace)))?;
        socket.request(message, kind, operation)
    }
}

impl NetlinkSession for KernelSession {
    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn link_lookup(&mut self, name: &str) -> Result<Vec<u32>> {
        Ok(self
            .links()?
            .into_iter()
            .filter(|link| link.name == name)
            .map(|link| link.index)
            .collect())
    }

    fn links(&mut self) -> Result<Vec<LinkRecord>> {
        let replies = self.request(messages::get_links(), RequestKind::Dump, "dump links")?;
        Ok(replies
            .iter()
            .filter_map(|reply| match reply {
                RouteNetlinkMessage::NewLink(link) => Some(messages::parse_link(link)),
                _ => None,
            })
            .collect())
    }

    fn create_link(&mut self, request: &NewLink) -> Result<()> {
        let operation = format!("create link {}", request.name);
        self.request(messages::new_link(request), RequestKind::Create, &operation)?;
        Ok(())
    }

    fn set_link_state(&mut self, index: u32, state: LinkState) -> Result<()> {
        let operation = format!("set link {} {}", index, state);
        self.request(
            messages::set_link_state(index, state),
            RequestKind::Change,
            &operation,
        )?;
        Ok(())
    }

    fn move_link(&mut self, index: u32, target: &Namespace) -> Result<()> {
        let operation = format!("move link {} to {}", index, target);
        match target {
            Namespace::Root => {
                self.request(
                    messages::move_link(index, NetnsTarget::Pid(ROOT_NAMESPACE_PID)),
                    RequestKind::Change,
                    &operation,
                )?;
            }
            Namespace::Named(name) => {
                let file = File::open(self.netns_dir.join(name)).map_err(|e| match e.kind() {
                    ErrorKind::NotFound => {
                        Error::not_found("namespace", name, self.netns_dir.display())
                    }
                    _ => Error::Io(e),
                })?;
                self.request(
                    messages::move_link(index, NetnsTarget::Fd(file.as_raw_fd())),
                    RequestKind::Change,
                    &operation,
                )?;
            }
        }
        Ok(())
    }

    fn add_address(&mut self, index: u32, prefix: Ipv4Net) -> Result<()> {
        let operation = format!("add address {} to link {}", prefix, index);
        self.request(
            messages::new_address(index, prefix),
            RequestKind::Create,
            &operation,
        )?;
        Ok(())
    }

    fn delete_address(&mut self, index: u32, prefix: Ipv4Net) -> Result<()> {
        let operation = format!("delete address {} from link {}", prefix, index);
        self.request(
            messages::del_address(index, prefix),
            RequestKind::Change,
            &operation,
        )?;
        Ok(())
    }

    fn addresses(&mut self) -> Result<Vec<AddressRecord>> {
        let replies = self.request(
            messages::get_addresses(),
            RequestKind::Dump,
            "dump addresses",
        )?;
        Ok(replies
            .iter()
            .filter_map(|reply| match reply {
                RouteNetlinkMessage::NewAddress(address) => messages::parse_address(address),
                _ => None,
            })
            .collect())
    }

    fn add_route(&mut self, destination: Ipv4Net, gateway: Ipv4Addr) -> Result<()> {
        let operation = format!("add route {} via {}", destination, gateway);
        self.request(
            messages::new_route(destination, gateway),
            RequestKind::Create,
            &operation,
        )?;
        Ok(())
    }

    fn delete_route(&mut self, destination: Ipv4Net, gateway: Ipv4Addr) -> Result<()> {
        let operation = format!("delete route {} via {}", destination, gateway);
        self.request(
            messages::del_route(destination, gateway),
            RequestKind::Change,
            &operation,
        )?;
        Ok(())
    }

    fn routes(&mut self) -> Result<Vec<RouteRecord>> {
        let replies = self.request(messages::get_routes(), RequestKind::Dump, "dump routes")?;
        Ok(replies
            .iter()
            .filter_map(|reply| match reply {
                RouteNetlinkMessage::NewRoute(route) => messages::parse_route(route),
                _ => None,
            })
            .collect())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!(namespace = %self.namespace, "Closed netlink session");
        }
    }
}
