//! rtnetlink request construction and reply parsing.
//!
//! Requests are built from the plain types in `transport` and replies are
//! flattened back into `LinkRecord`, `AddressRecord` and `RouteRecord`.

use std::net::{IpAddr, Ipv4Addr};
use std::os::fd::RawFd;

use ipnet::Ipv4Net;
use netlink_packet_route::{
    AddressFamily, RouteNetlinkMessage,
    address::{AddressAttribute, AddressMessage, AddressScope},
    link::{
        InfoData, InfoIpVlan, InfoKind, InfoVlan, IpVlanMode, LinkAttribute, LinkFlags, LinkInfo,
        LinkMessage, State,
    },
    route::{
        RouteAddress, RouteAttribute, RouteHeader, RouteMessage, RouteProtocol, RouteScope,
        RouteType,
    },
};

use crate::transport::{AddressRecord, LinkRecord, NewLink, RouteRecord, VirtualLink};
use crate::types::{IpvlanMode, LinkState, OperState};

/// Where a link should be moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetnsTarget {
    /// A namespace file descriptor that stays open until the ack arrives.
    Fd(RawFd),
    /// The namespace of a process.
    Pid(u32),
}

/// Dump every link.
pub fn get_links() -> RouteNetlinkMessage {
    RouteNetlinkMessage::GetLink(LinkMessage::default())
}

/// Dump every address, both families.
pub fn get_addresses() -> RouteNetlinkMessage {
    RouteNetlinkMessage::GetAddress(AddressMessage::default())
}

/// Dump IPv4 routes.
pub fn get_routes() -> RouteNetlinkMessage {
    let mut message = RouteMessage::default();
    message.header.address_family = AddressFamily::Inet;
    RouteNetlinkMessage::GetRoute(message)
}

/// Create a VLAN or IPVLAN link on top of its parent.
pub fn new_link(request: &NewLink) -> RouteNetlinkMessage {
    let (kind, data) = match request.link {
        VirtualLink::Vlan { id } => (InfoKind::Vlan, InfoData::Vlan(vec![InfoVlan::Id(id)])),
        VirtualLink::Ipvlan { mode } => (
            InfoKind::IpVlan,
            InfoData::IpVlan(vec![InfoIpVlan::Mode(ipvlan_mode(mode))]),
        ),
    };

    let mut message = LinkMessage::default();
    message.attributes = vec![
        LinkAttribute::IfName(request.name.clone()),
        LinkAttribute::Link(request.parent_index),
        LinkAttribute::LinkInfo(vec![LinkInfo::Kind(kind), LinkInfo::Data(data)]),
    ];
    RouteNetlinkMessage::NewLink(message)
}

fn ipvlan_mode(mode: IpvlanMode) -> IpVlanMode {
    match mode {
        IpvlanMode::L2 => IpVlanMode::L2,
        IpvlanMode::L3 => IpVlanMode::L3,
        IpvlanMode::L3s => IpVlanMode::L3S,
    }
}

/// Flip IFF_UP on a link.
pub fn set_link_state(index: u32, state: LinkState) -> RouteNetlinkMessage {
    let mut message = LinkMessage::default();
    message.header.index = index;
    message.header.change_mask = LinkFlags::Up;
    if state == LinkState::Up {
        message.header.flags = LinkFlags::Up;
    }
    RouteNetlinkMessage::SetLink(message)
}

/// Move a link into another namespace.
pub fn move_link(index: u32, target: NetnsTarget) -> RouteNetlinkMessage {
    let mut message = LinkMessage::default();
    message.header.index = index;
    message.attributes = vec![match target {
        NetnsTarget::Fd(fd) => LinkAttribute::NetNsFd(fd),
        NetnsTarget::Pid(pid) => LinkAttribute::NetNsPid(pid),
    }];
    RouteNetlinkMessage::SetLink(message)
}

fn address_message(index: u32, prefix: Ipv4Net) -> AddressMessage {
    let mut message = AddressMessage::default();
    message.header.family = AddressFamily::Inet;
    message.header.prefix_len = prefix.prefix_len();
    message.header.scope = AddressScope::Universe;
    message.header.index = index;
    let address = IpAddr::V4(prefix.addr());
    message.attributes = vec![
        AddressAttribute::Local(address),
        AddressAttribute::Address(address),
    ];
    message
}

pub fn new_address(index: u32, prefix: Ipv4Net) -> RouteNetlinkMessage {
    RouteNetlinkMessage::NewAddress(address_message(index, prefix))
}

pub fn del_address(index: u32, prefix: Ipv4Net) -> RouteNetlinkMessage {
    RouteNetlinkMessage::DelAddress(address_message(index, prefix))
}

/// Route request keyed on destination, gateway and the main table.
fn route_message(destination: Ipv4Net, gateway: Ipv4Addr) -> RouteMessage {
    let destination = destination.trunc();
    let mut message = RouteMessage::default();
    message.header.address_family = AddressFamily::Inet;
    message.header.destination_prefix_length = destination.prefix_len();
    message.header.table = RouteHeader::RT_TABLE_MAIN;
    if destination.prefix_len() > 0 {
        message
            .attributes
            .push(RouteAttribute::Destination(RouteAddress::Inet(destination.network())));
    }
    message
        .attributes
        .push(RouteAttribute::Gateway(RouteAddress::Inet(gateway)));
    message
}

pub fn new_route(destination: Ipv4Net, gateway: Ipv4Addr) -> RouteNetlinkMessage {
    let mut message = route_message(destination, gateway);
    message.header.protocol = RouteProtocol::Static;
    message.header.scope = RouteScope::Universe;
    message.header.kind = RouteType::Unicast;
    RouteNetlinkMessage::NewRoute(message)
}

/// Delete a route whatever installed it. The kernel only compares protocol
/// and type when they are non-zero, so both stay unspecified.
pub fn del_route(destination: Ipv4Net, gateway: Ipv4Addr) -> RouteNetlinkMessage {
    let mut message = route_message(destination, gateway);
    message.header.protocol = RouteProtocol::Unspec;
    message.header.scope = RouteScope::NoWhere;
    message.header.kind = RouteType::Unspec;
    RouteNetlinkMessage::DelRoute(message)
}

/// Flatten a link dump reply.
pub fn parse_link(message: &LinkMessage) -> LinkRecord {
    let mut record = LinkRecord {
        index: message.header.index,
        name: String::new(),
        state: if message.header.flags.contains(LinkFlags::Up) {
            LinkState::Up
        } else {
            LinkState::Down
        },
        oper_state: OperState::Unknown,
        mac: None,
        mtu: 0,
    };

    for attr in &message.attributes {
        match attr {
            LinkAttribute::IfName(name) => record.name = name.clone(),
            LinkAttribute::Mtu(mtu) => record.mtu = *mtu,
            LinkAttribute::Address(mac) if !mac.is_empty() => record.mac = Some(mac.clone()),
            LinkAttribute::OperState(state) => record.oper_state = oper_state(state),
            _ => {}
        }
    }

    record
}

fn oper_state(state: &State) -> OperState {
    match state {
        State::NotPresent => OperState::NotPresent,
        State::Down => OperState::Down,
        State::LowerLayerDown => OperState::LowerLayerDown,
        State::Testing => OperState::Testing,
        State::Dormant => OperState::Dormant,
        State::Up => OperState::Up,
        _ => OperState::Unknown,
    }
}

/// Flatten an address dump reply. Prefers IFA_LOCAL over IFA_ADDRESS, which
/// differ only on point-to-point links.
pub fn parse_address(message: &AddressMessage) -> Option<AddressRecord> {
    let mut local = None;
    let mut address = None;
    for attr in &message.attributes {
        match attr {
            AddressAttribute::Local(ip) => local = Some(*ip),
            AddressAttribute::Address(ip) => address = Some(*ip),
            _ => {}
        }
    }

    local.or(address).map(|address| AddressRecord {
        index: message.header.index,
        address,
        prefix_len: message.header.prefix_len,
    })
}

/// Flatten a route dump reply. Returns `None` for anything but unicast IPv4.
pub fn parse_route(message: &RouteMessage) -> Option<RouteRecord> {
    if message.header.address_family != AddressFamily::Inet
        || message.header.kind != RouteType::Unicast
    {
        return None;
    }

    let mut destination = Ipv4Addr::UNSPECIFIED;
    let mut gateway = None;
    let mut pref_source = None;
    let mut oif = None;
    for attr in &message.attributes {
        match attr {
            RouteAttribute::Destination(RouteAddress::Inet(ip)) => destination = *ip,
            RouteAttribute::Gateway(RouteAddress::Inet(ip)) => gateway = Some(*ip),
            RouteAttribute::PrefSource(RouteAddress::Inet(ip)) => pref_source = Some(*ip),
            RouteAttribute::Oif(index) => oif = Some(*index),
            _ => {}
        }
    }

    let destination = Ipv4Net::new(destination, message.header.destination_prefix_length).ok()?;
    Some(RouteRecord {
        destination,
        gateway,
        pref_source,
        oif,
    })
}
