//! Virtual interface creation, relocation and idempotent upsert.

use common::{Error, Result};
use tracing::{debug, info};

use crate::transport::{NetlinkSession, NetlinkTransport, NewLink, VirtualLink};
use crate::types::{
    InterfaceKind, InterfaceLocation, InterfaceSpec, IpvlanParams, LinkState, Namespace,
    TaggedParams,
};
use crate::SimpleNetlink;

impl<T: NetlinkTransport> SimpleNetlink<T> {
    /// Create the virtual interface described by `spec` and apply its link
    /// state. The handle ends up switched into the interface's namespace.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when `spec.kind` is `None`, and
    /// `Error::NotFound` when the parent interface exists nowhere.
    pub fn create_interface(&mut self, spec: &InterfaceSpec) -> Result<InterfaceLocation> {
        let location = match &spec.kind {
            Some(InterfaceKind::Tagged(params)) => {
                self.create_tagged(&spec.name, params, &spec.namespace)?
            }
            Some(InterfaceKind::Ipvlan(params)) => {
                self.create_ipvlan(&spec.name, params, &spec.namespace)?
            }
            None => {
                return Err(Error::config(format!(
                    "no interface type given for {}",
                    spec.name
                )));
            }
        };

        self.current.set_link_state(location.index, spec.link_state)?;
        info!(
            interface = %spec.name,
            location = %location,
            state = %spec.link_state,
            "Created interface"
        );
        Ok(location)
    }

    /// Set the administrative state of `name` in the current namespace.
    pub fn set_interface_state(&mut self, name: &str, state: LinkState) -> Result<()> {
        let index = self.get_interface_index(name)?;
        self.current.set_link_state(index, state)
    }

    /// Make sure `spec.name` exists in `spec.namespace` with every prefix in
    /// `spec.ipv4` assigned.
    ///
    /// An interface found elsewhere is moved; one found nowhere is created
    /// when `spec.kind` says how. The handle ends up switched into the
    /// interface's namespace.
    pub fn ensure_interface_exists(&mut self, spec: &InterfaceSpec) -> Result<InterfaceLocation> {
        let location = match self.find_interface_in_all_namespaces(&spec.name)? {
            Some(found) if found.namespace == spec.namespace => {
                debug!(interface = %spec.name, location = %found, "Interface already in place");
                self.enter(&found.namespace)?;
                found
            }
            Some(found) => {
                self.enter(&found.namespace)?;
                let location = self.relocate(&spec.name, found.index, &spec.namespace)?;
                self.current.set_link_state(location.index, LinkState::Up)?;
                info!(interface = %spec.name, from = %found, to = %location, "Moved interface");
                location
            }
            None if spec.kind.is_some() => self.create_interface(spec)?,
            None => {
                return Err(Error::not_found(
                    "interface",
                    &spec.name,
                    "any namespace",
                ));
            }
        };

        for prefix in &spec.ipv4 {
            self.interface_add_ipv4(&spec.name, *prefix)?;
        }

        Ok(location)
    }

    fn create_tagged(
        &mut self,
        name: &str,
        params: &TaggedParams,
        target: &Namespace,
    ) -> Result<InterfaceLocation> {
        self.create_virtual(
            name,
            &params.parent,
            VirtualLink::Vlan { id: params.vlan_id },
            target,
        )
    }

    fn create_ipvlan(
        &mut self,
        name: &str,
        params: &IpvlanParams,
        target: &Namespace,
    ) -> Result<InterfaceLocation> {
        self.create_virtual(
            name,
            &params.parent,
            VirtualLink::Ipvlan { mode: params.mode },
            target,
        )
    }

    /// Create `name` next to its parent, then hand it to `target`.
    fn create_virtual(
        &mut self,
        name: &str,
        parent: &str,
        link: VirtualLink,
        target: &Namespace,
    ) -> Result<InterfaceLocation> {
        let parent_location = self
            .find_interface_in_all_namespaces(parent)?
            .ok_or_else(|| Error::not_found("parent interface", parent, "any namespace"))?;
        self.enter(&parent_location.namespace)?;

        self.current.create_link(&NewLink {
            name: name.to_string(),
            parent_index: parent_location.index,
            link,
        })?;
        let index = self.get_interface_index(name)?;
        debug!(
            interface = name,
            parent = parent,
            namespace = %parent_location.namespace,
            index,
            "Created link next to parent"
        );

        if parent_location.namespace == *target {
            return Ok(InterfaceLocation {
                namespace: target.clone(),
                index,
            });
        }
        self.relocate(name, index, target)
    }

    /// Move link `index` (called `name`) from the current namespace into
    /// `target` and follow it there.
    fn relocate(&mut self, name: &str, index: u32, target: &Namespace) -> Result<InterfaceLocation> {
        if let Namespace::Named(ns) = target {
            if !self.list_namespaces()?.contains(ns) {
                self.create_namespace(ns)?;
            }
        }

        self.current.move_link(index, target)?;
        self.set_current_namespace(target)?;
        let index = self.get_interface_index(name)?;
        Ok(InterfaceLocation {
            namespace: target.clone(),
            index,
        })
    }

    /// Switch into `namespace` unless the handle is already there.
    fn enter(&mut self, namespace: &Namespace) -> Result<()> {
        if self.current.namespace() != namespace {
            self.set_current_namespace(namespace)?;
        }
        Ok(())
    }
}
