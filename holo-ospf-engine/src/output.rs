//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use smallvec::smallvec;

use crate::area::Area;
use crate::collections::{Arena, NeighborIndex};
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb::{self, LsaEntry};
use crate::neighbor::{LastSentDbDesc, Neighbor, nsm};
use crate::network::{MulticastAddr, SendDestination};
use crate::packet::lsa::{Lsa, LsaHdr, LsaScope};
use crate::packet::{
    DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate, Packet,
    PacketHdr, PacketType,
};

// ===== Hello Packets =====

pub(crate) fn send_hello(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    dsts: &[Ipv4Addr],
) {
    if dsts.is_empty() {
        return;
    }

    let network_mask = if iface.is_virtual_link() {
        Ipv4Addr::UNSPECIFIED
    } else {
        iface.config.addr.mask()
    };

    // Generate Hello packet.
    let packet = Packet::Hello(Hello {
        hdr: packet_hdr(PacketType::Hello, iface, area, instance),
        network_mask,
        hello_interval: iface.config.hello_interval,
        options: area.options(),
        priority: iface.config.priority,
        dead_interval: iface.config.dead_interval,
        dr: iface.state.dr,
        bdr: iface.state.bdr,
        neighbors: iface.state.hello_nbrs.clone(),
    });

    let dst =
        SendDestination::new(iface.ifindex(), dsts.into(), iface.ttl());
    iface.send_packet(instance, &packet, &dst);
}

// ===== Database Description Packets =====

pub(crate) fn send_dbdesc(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    let dst = send_dest_nbr(nbr, iface);

    // Calculate maximum packet size.
    let max_size = max_payload_size(iface, DbDesc::BASE_LENGTH);

    // Append as many LSA headers as possible while on the Exchange state,
    // at least one per packet so that the exchange always progresses.
    let mut total = 0;
    let mut lsa_hdrs = vec![];
    if !nbr.dd_flags.contains(DbDescFlags::I) {
        while lsa_hdrs.is_empty() || total + LSA_HDR_LENGTH <= max_size {
            match nbr.lists.db_summary.pop_first() {
                Some((_, lsa_hdr)) => {
                    total += LSA_HDR_LENGTH;
                    lsa_hdrs.push(lsa_hdr);
                }
                None => break,
            }
        }
    }

    // Clear the M-bit if there's no more data to send.
    if !nbr.dd_flags.contains(DbDescFlags::I)
        && nbr.lists.db_summary.is_empty()
    {
        nbr.dd_flags.remove(DbDescFlags::M);
    }

    // Generate Database Description packet.
    let packet = Packet::DbDesc(DbDesc {
        hdr: packet_hdr(PacketType::DbDesc, iface, area, instance),
        mtu: if iface.is_virtual_link() {
            0
        } else {
            iface.config.mtu
        },
        options: area.options(),
        dd_flags: nbr.dd_flags,
        dd_seq_no: nbr.dd_seq_no,
        lsa_hdrs,
    });

    // Send packet, keeping a copy for retransmission.
    iface.send_packet(instance, &packet, &dst);
    nbr.last_sent_dbdesc = Some(LastSentDbDesc { packet, dst });

    // Start retransmission interval in two cases:
    // * The router is master
    // * When sending the initial database description packet
    if nbr.dd_flags.intersects(DbDescFlags::MS | DbDescFlags::I) {
        nbr.rxmt_dbdesc_start(iface, area, instance);
    }
}

pub(crate) fn rxmt_dbdesc(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) {
    if let Some(last) = &nbr.last_sent_dbdesc {
        iface.send_packet(instance, &last.packet, &last.dst);
    }
}

// ===== LS Request Packets =====

pub(crate) fn send_lsreq(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    // Calculate maximum packet size.
    let max_size = max_payload_size(iface, 0);
    let entry_length = usize::from(LsRequest::ENTRY_LENGTH);

    // Move as many entries as fit in a single packet to the pending list,
    // keeping at least one pending.
    let pending = &mut nbr.lists.ls_request_pending;
    let mut total = pending.len() * entry_length;
    while pending.is_empty() || total + entry_length <= max_size {
        match nbr.lists.ls_request.pop_first() {
            Some((lsa_key, lsa_hdr)) => {
                pending.insert(lsa_key, lsa_hdr);
                total += entry_length;
            }
            None => break,
        }
    }

    rxmt_lsreq(nbr, iface, area, instance);

    // Start retransmission interval.
    nbr.rxmt_lsreq_start(iface, area, instance);
}

pub(crate) fn rxmt_lsreq(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    let dst = send_dest_nbr(nbr, iface);

    // Generate Link State Request packet.
    let packet = Packet::LsRequest(LsRequest {
        hdr: packet_hdr(PacketType::LsRequest, iface, area, instance),
        entries: nbr.lists.ls_request_pending.keys().copied().collect(),
    });
    iface.send_packet(instance, &packet, &dst);
}

// ===== LS Update Packets =====

// Sends the LSAs enqueued for transmission on the interface or, when a
// neighbor is given, the ones enqueued for that neighbor only.
pub(crate) fn send_lsupd(
    nbr_idx: Option<NeighborIndex>,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &mut Arena<Neighbor>,
) {
    // Get list of LSAs enqueued for transmission, and their destination.
    let (ls_update_list, dst) = match nbr_idx {
        Some(nbr_idx) => {
            let nbr = &mut neighbors[nbr_idx];
            let dst = send_dest_direct(nbr, iface);
            let list = std::mem::take(&mut nbr.lists.ls_update);

            // Keep track of the LSAs sent directly to this neighbor.
            for lsa_key in list.keys() {
                nbr.lists.ls_transmitted.insert(*lsa_key, 0);
            }
            (list, dst)
        }
        None => {
            let dst = send_dest_iface(iface, neighbors);
            (std::mem::take(&mut iface.state.ls_update_list), dst)
        }
    };

    send_lsas(ls_update_list.into_values(), iface, area, instance, &dst);
}

// Retransmits the LSAs that haven't been acknowledged by the neighbor yet.
pub(crate) fn rxmt_lsupd(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let dst = send_dest_nbr(nbr, iface);

    // Calculate maximum packet size.
    let max_size = max_payload_size(iface, LsUpdate::BASE_LENGTH);

    // Resolve the LSAs through the LSDB. Only a single packet is sent per
    // retransmission interval.
    let mut total = 0;
    let mut lsas = vec![];
    for lsa_key in nbr.lists.ls_rxmt.keys() {
        let lsdb = match lsa_key.lsa_type.scope() {
            LsaScope::Area => &area.state.lsdb,
            LsaScope::As => &instance.state.lsdb,
            LsaScope::Unknown => continue,
        };
        let Some((_, lse)) = lsdb.get(lsa_entries, lsa_key) else {
            continue;
        };

        let length = usize::from(lse.data.hdr.length);
        if !lsas.is_empty() && total + length > max_size {
            break;
        }
        total += length;
        lsas.push(lsa_age_on_tx(&lse.data, iface));
    }
    if lsas.is_empty() {
        return;
    }

    let packet = Packet::LsUpdate(LsUpdate {
        hdr: packet_hdr(PacketType::LsUpdate, iface, area, instance),
        lsas,
    });
    iface.send_packet(instance, &packet, &dst);
}

// ===== LS Ack Packets =====

pub(crate) fn send_lsack_direct(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_hdr: &LsaHdr,
) {
    let dst = send_dest_direct(nbr, iface);

    // Generate Link State Ack packet.
    let packet = Packet::LsAck(LsAck {
        hdr: packet_hdr(PacketType::LsAck, iface, area, instance),
        lsa_hdrs: vec![*lsa_hdr],
    });
    iface.send_packet(instance, &packet, &dst);
}

pub(crate) fn send_lsack_delayed(
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &Arena<Neighbor>,
) {
    let dst = send_dest_iface(iface, neighbors);

    // Calculate maximum packet size.
    let max_size = max_payload_size(iface, 0);

    // Send as many LS Acks as necessary.
    while !iface.state.ls_ack_list.is_empty() {
        // Append as many LSA headers as possible in a single packet, at least
        // one per packet.
        let mut total = 0;
        let mut lsa_hdrs = vec![];
        while lsa_hdrs.is_empty() || total + LSA_HDR_LENGTH <= max_size {
            match iface.state.ls_ack_list.pop_first() {
                Some((_, lsa_hdr)) => {
                    total += LSA_HDR_LENGTH;
                    lsa_hdrs.push(lsa_hdr);
                }
                None => break,
            }
        }

        let packet = Packet::LsAck(LsAck {
            hdr: packet_hdr(PacketType::LsAck, iface, area, instance),
            lsa_hdrs,
        });
        iface.send_packet(instance, &packet, &dst);
    }
}

// ===== helper functions =====

const LSA_HDR_LENGTH: usize = LsaHdr::LENGTH as usize;

// Returns the room left for the body of a packet sent on the interface once
// the OSPF header and the fixed part of the packet are accounted for.
fn max_payload_size(iface: &Interface, base_length: u16) -> usize {
    usize::from(iface.max_packet_size())
        .saturating_sub(usize::from(Packet::HDR_LENGTH))
        .saturating_sub(usize::from(base_length))
}

fn packet_hdr(
    pkt_type: PacketType,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) -> PacketHdr {
    PacketHdr {
        pkt_type,
        router_id: instance.state.router_id,
        area_id: area.area_id,
        auth: iface.auth_data(instance),
    }
}

// Sends the given LSAs in as many LS Update packets as necessary.
fn send_lsas(
    lsas: impl Iterator<Item = Lsa>,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    dst: &SendDestination,
) {
    let max_size = max_payload_size(iface, LsUpdate::BASE_LENGTH);

    let mut total = 0;
    let mut batch = vec![];
    let mut flush = |batch: &mut Vec<Lsa>| {
        let packet = Packet::LsUpdate(LsUpdate {
            hdr: packet_hdr(PacketType::LsUpdate, iface, area, instance),
            lsas: std::mem::take(batch),
        });
        iface.send_packet(instance, &packet, dst);
    };
    for lsa in lsas {
        // If a single LSA is bigger than the maximum packet size, there's
        // nothing we can do other than relying on IP-level fragmentation.
        let length = usize::from(lsa.hdr.length);
        if !batch.is_empty() && total + length > max_size {
            flush(&mut batch);
            total = 0;
        }
        total += length;
        batch.push(lsa_age_on_tx(&lsa, iface));
    }
    if !batch.is_empty() {
        flush(&mut batch);
    }
}

// Returns a copy of the LSA with its age incremented by InfTransDelay.
fn lsa_age_on_tx(lsa: &Lsa, iface: &Interface) -> Lsa {
    let mut lsa = lsa.clone();
    lsa.hdr.age = std::cmp::min(
        lsa.hdr.age.saturating_add(iface.config.transmit_delay),
        lsdb::LSA_MAX_AGE,
    );
    lsa
}

// Returns the destination used to send a packet directly to the given
// neighbor as part of the database exchange or retransmissions.
fn send_dest_nbr(nbr: &Neighbor, iface: &Interface) -> SendDestination {
    let addr = if iface.config.if_type == InterfaceType::PointToPoint {
        MulticastAddr::AllSpfRtrs.addr()
    } else {
        nbr.src
    };
    SendDestination::new(iface.ifindex(), smallvec![addr], iface.ttl())
}

// Returns the destination of direct LS Acks and of LS Updates that answer
// an older LSA instance. Broadcast networks address them according to the
// router's role on the network.
fn send_dest_direct(nbr: &Neighbor, iface: &Interface) -> SendDestination {
    let addr = match iface.config.if_type {
        InterfaceType::PointToPoint => MulticastAddr::AllSpfRtrs.addr(),
        InterfaceType::Broadcast => role_multicast_addr(iface),
        InterfaceType::NonBroadcast
        | InterfaceType::PointToMultipoint
        | InterfaceType::VirtualLink => nbr.src,
    };
    SendDestination::new(iface.ifindex(), smallvec![addr], iface.ttl())
}

// Returns a destination used to send a packet to all adjacent neighbors
// associated with the given interface.
fn send_dest_iface(
    iface: &Interface,
    neighbors: &Arena<Neighbor>,
) -> SendDestination {
    let addrs = match iface.config.if_type {
        InterfaceType::Broadcast => smallvec![role_multicast_addr(iface)],
        InterfaceType::PointToPoint => {
            smallvec![MulticastAddr::AllSpfRtrs.addr()]
        }
        InterfaceType::NonBroadcast
        | InterfaceType::PointToMultipoint
        | InterfaceType::VirtualLink => {
            // On non-broadcast networks, separate LS Update and delayed LS Ack
            // packets must be sent, as unicasts, to each adjacent neighbor.
            iface
                .state
                .neighbors
                .iter(neighbors)
                .filter(|nbr| nbr.state >= nsm::State::Exchange)
                .map(|nbr| nbr.src)
                .collect()
        }
    };
    SendDestination::new(iface.ifindex(), addrs, iface.ttl())
}

// The DR and BDR reach every router on the network through AllSPFRouters.
// Other routers only talk to the DR and BDR, through AllDRouters.
fn role_multicast_addr(iface: &Interface) -> Ipv4Addr {
    if matches!(iface.state.ism_state, ism::State::Dr | ism::State::Backup) {
        MulticastAddr::AllSpfRtrs.addr()
    } else {
        MulticastAddr::AllDrRtrs.addr()
    }
}
