//! Netlink communication layer for rtnetlink.
//!
//! This module provides a blocking `NETLINK_ROUTE` socket that sends one
//! request at a time and collects the kernel's reply, whether that is a
//! single acknowledgement or a multi-part dump.

use bytes::BytesMut;
use common::{Error, Result};
use netlink_packet_core::{
    NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REQUEST, NetlinkMessage,
    NetlinkPayload,
};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use tracing::{debug, trace};

/// Kind of request, which decides the netlink header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Enumerate objects (NLM_F_DUMP).
    Dump,
    /// Create an object, failing if it already exists.
    Create,
    /// Modify or delete an object.
    Change,
}

impl RequestKind {
    fn flags(self) -> u16 {
        match self {
            RequestKind::Dump => NLM_F_REQUEST | NLM_F_DUMP,
            RequestKind::Create => NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
            RequestKind::Change => NLM_F_REQUEST | NLM_F_ACK,
        }
    }
}

/// Netlink socket wrapper for rtnetlink requests.
pub struct RouteSocket {
    socket: Socket,
    sequence: u32,
}

impl RouteSocket {
    /// Create a new rtnetlink socket in the calling thread's network namespace.
    pub fn new() -> Result<Self> {
        debug!("Creating rtnetlink socket");

        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| Error::netlink(format!("Failed to create netlink socket: {}", e)))?;

        socket
            .bind_auto()
            .map_err(|e| Error::netlink(format!("Failed to bind netlink socket: {}", e)))?;

        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink(format!("Failed to connect netlink socket: {}", e)))?;

        Ok(Self {
            socket,
            sequence: 0,
        })
    }

    /// Get the next sequence number.
    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Send a request and collect every inner message of the reply.
    ///
    /// `operation` names the request in kernel error reports.
    pub fn request(
        &mut self,
        message: RouteNetlinkMessage,
        kind: RequestKind,
        operation: &str,
    ) -> Result<Vec<RouteNetlinkMessage>> {
        let mut nlmsg = NetlinkMessage::from(message);
        nlmsg.header.flags = kind.flags();
        nlmsg.header.sequence_number = self.next_sequence();
        nlmsg.finalize();

        let sequence = nlmsg.header.sequence_number;
        self.send_message(&nlmsg)?;
        self.receive_reply(sequence, operation)
    }

    /// Send a netlink message.
    fn send_message(&mut self, message: &NetlinkMessage<RouteNetlinkMessage>) -> Result<()> {
        let mut buf = BytesMut::zeroed(message.buffer_len());
        message.serialize(&mut buf[..]);

        trace!("Sending netlink message: {:?}", message);

        let sent = self
            .socket
            .send(&buf[..], 0)
            .map_err(|e| Error::netlink(format!("Failed to send netlink message: {}", e)))?;
        if sent != buf.len() {
            return Err(Error::netlink(format!(
                "Short netlink send: {} of {} bytes",
                sent,
                buf.len()
            )));
        }

        Ok(())
    }

    /// Read until the kernel acknowledges, reports an error or ends a dump.
    fn receive_reply(
        &mut self,
        sequence: u32,
        operation: &str,
    ) -> Result<Vec<RouteNetlinkMessage>> {
        let mut replies = Vec::new();

        loop {
            let (buf, _) = self
                .socket
                .recv_from_full()
                .map_err(|e| Error::netlink(format!("Failed to receive netlink message: {}", e)))?;

            let mut view = &buf[..];
            while !view.is_empty() {
                let message = NetlinkMessage::<RouteNetlinkMessage>::deserialize(view)
                    .map_err(|e| Error::netlink(format!("Failed to parse netlink message: {}", e)))?;
                let len = message.header.length as usize;
                if len == 0 || len > view.len() {
                    return Err(Error::netlink("Malformed netlink message length"));
                }
                view = &view[len..];

                if message.header.sequence_number != sequence {
                    trace!(
                        "Skipping netlink message with sequence {} (want {})",
                        message.header.sequence_number, sequence
                    );
                    continue;
                }

                trace!("Received netlink message: {:?}", message);

                match message.payload {
                    NetlinkPayload::InnerMessage(inner) => replies.push(inner),
                    NetlinkPayload::Done(_) => return Ok(replies),
                    NetlinkPayload::Error(err) => {
                        return match err.code {
                            None => Ok(replies),
                            Some(code) => Err(Error::kernel(-code.get(), operation)),
                        };
                    }
                    _ => {}
                }
            }
        }
    }
}

impl Drop for RouteSocket {
    fn drop(&mut self) {
        // Socket will be closed automatically
        trace!("Closing rtnetlink socket");
    }
}
