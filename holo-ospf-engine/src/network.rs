//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use derive_new::new;
use serde::Serialize;
use smallvec::SmallVec;

use crate::packet::Packet;

// AllSPFRouters multicast group.
pub const ALL_SPF_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 5);
// AllDRouters multicast group.
pub const ALL_DR_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 6);
// TTL used on every non-virtual interface.
pub const OSPF_TTL: u8 = 1;
// TTL used on virtual links, whose packets are routed through the transit
// area.
pub const VIRTUAL_LINK_TTL: u8 = 32;

// Transport collaborator. Owns packet encoding, checksums and transmission.
pub trait Transport {
    fn send_packet(
        &self,
        packet: &Packet,
        dst: Ipv4Addr,
        ifindex: u32,
        ttl: u8,
    );
}

#[derive(Clone, Debug, Eq, PartialEq, new, Serialize)]
pub struct SendDestination {
    pub ifindex: u32,
    pub addrs: SmallVec<[Ipv4Addr; 4]>,
    pub ttl: u8,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum MulticastAddr {
    AllSpfRtrs,
    AllDrRtrs,
}

// ===== impl MulticastAddr =====

impl MulticastAddr {
    pub fn addr(&self) -> Ipv4Addr {
        match self {
            MulticastAddr::AllSpfRtrs => ALL_SPF_RTRS,
            MulticastAddr::AllDrRtrs => ALL_DR_RTRS,
        }
    }
}

// ===== global functions =====

// Returns whether the given destination address is one of the OSPF multicast
// groups.
pub(crate) fn is_multicast_dst(addr: Ipv4Addr) -> bool {
    addr == ALL_SPF_RTRS || addr == ALL_DR_RTRS
}
