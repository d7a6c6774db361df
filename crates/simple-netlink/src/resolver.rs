//! Interface lookup by name, within one namespace or across all of them.

use common::{Error, Result};
use tracing::{debug, warn};

use crate::transport::{NetlinkSession, NetlinkTransport};
use crate::types::{InterfaceLocation, Namespace};
use crate::SimpleNetlink;

impl<T: NetlinkTransport> SimpleNetlink<T> {
    /// Index of `name` in the current namespace.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` when no link has that name.
    pub fn get_interface_index(&mut self, name: &str) -> Result<u32> {
        let indices = self.current.link_lookup(name)?;
        match indices.as_slice() {
            [] => Err(Error::not_found(
                "interface",
                name,
                self.current.namespace(),
            )),
            [index] => Ok(*index),
            [first, ..] => {
                warn!(
                    interface = name,
                    matches = indices.len(),
                    "Multiple interfaces share a name, using the first"
                );
                Ok(*first)
            }
        }
    }

    /// Look for `name` in the root namespace, then in every named namespace.
    ///
    /// A hit in the root namespace leaves the current namespace unchanged. A
    /// hit in a named namespace leaves the handle switched into it. Returns
    /// `None` when the interface exists nowhere.
    pub fn find_interface_in_all_namespaces(
        &mut self,
        name: &str,
    ) -> Result<Option<InterfaceLocation>> {
        {
            let mut root = self.with_namespace(&Namespace::Root)?;
            match root.get_interface_index(name) {
                Ok(index) => {
                    debug!(interface = name, index, "Found interface in root namespace");
                    return Ok(Some(InterfaceLocation {
                        namespace: Namespace::Root,
                        index,
                    }));
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        for ns in self.list_namespaces()? {
            let namespace = Namespace::Named(ns);
            self.set_current_namespace(&namespace)?;
            match self.get_interface_index(name) {
                Ok(index) => {
                    debug!(interface = name, namespace = %namespace, index, "Found interface");
                    return Ok(Some(InterfaceLocation { namespace, index }));
                }
                Err(e) if e.is_not_found() => {
                    self.restore_previous_namespace()?;
                }
                Err(e) => {
                    self.restore_previous_namespace()?;
                    return Err(e);
                }
            }
        }

        debug!(interface = name, "Interface not found in any namespace");
        Ok(None)
    }
}
