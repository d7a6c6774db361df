//! Namespace registry: enumerate, create, delete and switch namespaces.

use std::collections::BTreeSet;
use std::thread;

use common::{Error, KernelErrorKind, Result};
use tracing::{debug, info};

use crate::transport::{NetlinkSession, NetlinkTransport};
use crate::types::{LinkState, Namespace};
use crate::SimpleNetlink;

const LOOPBACK: &str = "lo";

impl<T: NetlinkTransport> SimpleNetlink<T> {
    /// Names of every namespace known to the kernel, sorted.
    pub fn list_namespaces(&self) -> Result<BTreeSet<String>> {
        self.transport.list_namespaces()
    }

    /// Alias of [`SimpleNetlink::list_namespaces`].
    pub fn get_namespaces(&self) -> Result<BTreeSet<String>> {
        self.list_namespaces()
    }

    /// Create a namespace and bring its loopback up.
    ///
    /// Creating a namespace that already exists is a no-op. The active
    /// session is left untouched.
    pub fn create_namespace(&mut self, name: &str) -> Result<()> {
        match self.transport.create_namespace(name) {
            Ok(()) => {}
            Err(e) if e.kernel_kind() == Some(KernelErrorKind::AlreadyExists) => {
                debug!(namespace = name, "Namespace already exists");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let namespace = Namespace::named(name);
        let mut session = self.transport.open(&namespace)?;
        let result = bring_loopback_up(&mut session, &namespace);
        session.close();
        result?;

        info!(namespace = name, "Namespace ready");
        Ok(())
    }

    /// Switch the active session to `namespace`.
    ///
    /// `Namespace::Root` closes the active session and opens one in the root
    /// namespace. A named namespace that does not exist yet is created first;
    /// the session it replaces is parked as the previous one.
    pub fn set_current_namespace(&mut self, namespace: &Namespace) -> Result<bool> {
        match namespace {
            Namespace::Root => {
                self.current.close();
                self.current = self.transport.open(&Namespace::Root)?;
            }
            Namespace::Named(name) => {
                if !self.list_namespaces()?.contains(name) {
                    self.create_namespace(name)?;
                }
                let session = self.transport.open(namespace)?;
                let parked = std::mem::replace(&mut self.current, session);
                if let Some(mut stale) = self.previous.replace(parked) {
                    stale.close();
                }
            }
        }

        debug!(namespace = %namespace, "Switched current namespace");
        Ok(true)
    }

    /// Swap the active and the parked session.
    ///
    /// Returns `false` when nothing is parked. Calling it twice in a row
    /// toggles between the same two namespaces.
    pub fn restore_previous_namespace(&mut self) -> Result<bool> {
        match self.previous.as_mut() {
            Some(previous) => {
                std::mem::swap(&mut self.current, previous);
                debug!(namespace = %self.current.namespace(), "Restored previous namespace");
                Ok(true)
            }
            None => {
                debug!("No previous namespace to restore");
                Ok(false)
            }
        }
    }

    /// Delete a namespace. Unknown names are ignored.
    ///
    /// If the deleted namespace was the current one, the handle falls back to
    /// the root namespace. Blocks for the settle delay afterwards so the name
    /// can be created again right away.
    pub fn delete_namespace(&mut self, name: &str) -> Result<()> {
        if !self.list_namespaces()?.contains(name) {
            info!(namespace = name, "Namespace does not exist, ignoring");
            return Ok(());
        }

        match self.transport.remove_namespace(name) {
            Ok(()) => {}
            Err(e) if e.kernel_kind() == Some(KernelErrorKind::NotFound) => {
                debug!(namespace = name, "Namespace vanished before removal");
            }
            Err(e) => return Err(e),
        }

        if self.current.namespace().name() == Some(name) {
            self.set_current_namespace(&Namespace::Root)?;
        }
        if self
            .previous
            .as_ref()
            .is_some_and(|previous| previous.namespace().name() == Some(name))
        {
            if let Some(mut stale) = self.previous.take() {
                stale.close();
            }
        }

        if !self.settings.settle_delay.is_zero() {
            thread::sleep(self.settings.settle_delay);
        }
        info!(namespace = name, "Deleted namespace");
        Ok(())
    }
}

fn bring_loopback_up<S: NetlinkSession>(session: &mut S, namespace: &Namespace) -> Result<()> {
    let index = session
        .link_lookup(LOOPBACK)?
        .first()
        .copied()
        .ok_or_else(|| Error::not_found("interface", LOOPBACK, namespace))?;
    session.set_link_state(index, LinkState::Up)
}
