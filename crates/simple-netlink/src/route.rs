//! Static route management and route table reporting.

use std::net::Ipv4Addr;

use common::{Error, KernelErrorKind, Result};
use ipnet::Ipv4Net;
use tracing::{debug, info};

use crate::transport::{NetlinkSession, NetlinkTransport, RouteRecord};
use crate::types::RouteTable;
use crate::SimpleNetlink;

impl<T: NetlinkTransport> SimpleNetlink<T> {
    /// Unicast IPv4 routes of the current namespace, partitioned by kind.
    ///
    /// A route with a gateway is static, a route with a preferred source is
    /// local. The `dynamic` bucket is reserved for routes learned from a
    /// routing daemon and is always empty.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnclassifiedRoute` if any route has neither a gateway
    /// nor a preferred source. The table is never returned partially.
    pub fn get_routes(&mut self) -> Result<RouteTable> {
        let mut table = RouteTable::default();
        for route in self.current.routes()? {
            classify(&mut table, route)?;
        }
        Ok(table)
    }

    /// Add a route to `destination` via `nexthop`. An existing route counts
    /// as added.
    pub fn add_route(&mut self, destination: Ipv4Net, nexthop: Ipv4Addr) -> Result<()> {
        match self.current.add_route(destination, nexthop) {
            Ok(()) => {
                info!(%destination, %nexthop, namespace = %self.current.namespace(), "Added route");
                Ok(())
            }
            Err(e) if e.kernel_kind() == Some(KernelErrorKind::AlreadyExists) => {
                debug!(%destination, %nexthop, "Route already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the route to `destination` via `nexthop`. A missing route
    /// counts as deleted.
    pub fn delete_route(&mut self, destination: Ipv4Net, nexthop: Ipv4Addr) -> Result<()> {
        match self.current.delete_route(destination, nexthop) {
            Ok(()) => {
                info!(%destination, %nexthop, namespace = %self.current.namespace(), "Deleted route");
                Ok(())
            }
            Err(e) if e.kernel_kind() == Some(KernelErrorKind::NotFound) => {
                debug!(%destination, %nexthop, "Route does not exist, ignoring");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn classify(table: &mut RouteTable, route: RouteRecord) -> Result<()> {
    match route {
        RouteRecord {
            destination,
            gateway: Some(gateway),
            ..
        } => table.static_routes.entry(destination).or_default().push(gateway),
        RouteRecord {
            destination,
            pref_source: Some(source),
            ..
        } => table.local.entry(destination).or_default().push(source),
        RouteRecord {
            destination, oif, ..
        } => {
            return Err(Error::UnclassifiedRoute(format!(
                "{} (oif {:?}) has neither gateway nor preferred source",
                destination, oif
            )));
        }
    }
    Ok(())
}
