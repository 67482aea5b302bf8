//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::net::Ipv4Addr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::collections::{
    AreaId, AreaIndex, Arena, InterfaceId, InterfaceIndex, LsaEntryId,
    LsdbId, NeighborId, NeighborIndex, lsdb_get, lsdb_index, lsdb_index_mut,
};
use crate::config::{AuthCfg, StaticNbrCfg};
use crate::debug::{
    Debug, LsaDiscardReason, LsaFlushReason, SeqNoMismatchReason,
};
use crate::error::{AuthError, Error, InterfaceCfgError};
use crate::flood::flood;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb::{self, LsaEntry, LsaEntryFlags, LsaOriginateEvent};
use crate::neighbor::{LastDbDesc, Neighbor, nsm};
use crate::output;
use crate::packet::lsa::{Lsa, LsaBody, LsaHdr, LsaKey, LsaScope};
use crate::packet::{
    AuthData, DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate,
    Options, Packet, PacketHdr, PacketType,
};

// Outcome of the acknowledgment policy applied to a received LSA.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AckDecision {
    // Header added to the interface's delayed acknowledgment list.
    Delayed,
    // LS Ack sent right away to the neighbor.
    Direct,
    // The LSA was flooded back out the receiving interface.
    SuppressedFloodedBack,
    NotRequired,
}

// Properties of a received LSA that drive the acknowledgment decision.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AckFlags {
    pub flooded_back: bool,
    // More recent than the database copy, or no database copy existed.
    pub newer: bool,
    // Same instance as the database copy.
    pub duplicate: bool,
    // The duplicate was found on the neighbor's retransmission list.
    pub implied_ack: bool,
    // MaxAge LSA without a database copy, received while no neighbor was
    // in the Exchange or Loading states.
    pub maxage_no_instance: bool,
}

// Kind of packet being retransmitted to a neighbor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RxmtPacketType {
    DbDesc,
    LsRequest,
    LsUpdate,
}

// ===== Acknowledgment policy =====

// Decides how a received LSA should be acknowledged (RFC 2328, Section
// 13.5).
pub fn ack_decision(
    flags: AckFlags,
    ism_state: ism::State,
    from_dr: bool,
) -> AckDecision {
    if flags.flooded_back {
        return AckDecision::SuppressedFloodedBack;
    }

    let delayed = if ism_state == ism::State::Backup {
        (flags.newer && from_dr) || (flags.duplicate && flags.implied_ack)
    } else {
        flags.newer
    };
    let direct = (flags.duplicate && !flags.implied_ack)
        || flags.maxage_no_instance;

    if delayed {
        AckDecision::Delayed
    } else if direct {
        AckDecision::Direct
    } else {
        AckDecision::NotRequired
    }
}

// ===== Interface FSM event =====

pub(crate) fn process_ism_event(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    event: ism::Event,
) -> Result<(), Error> {
    // Lookup area and interface.
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) =
        area.interfaces.get_mut_by_id(&mut arenas.interfaces, iface_id)?;

    // Configured NBMA neighbors are created once the interface comes up.
    if event == ism::Event::InterfaceUp
        && iface.config.if_type == InterfaceType::NonBroadcast
    {
        for snbr in iface.config.static_nbrs.clone() {
            nbma_static_nbr_create(iface, &mut arenas.neighbors, &snbr);
        }
    }

    // Invoke FSM event.
    iface.fsm(
        area,
        instance,
        &mut arenas.neighbors,
        &arenas.lsa_entries,
        event,
    );

    Ok(())
}

// ===== Neighbor FSM event =====

pub(crate) fn process_nsm_event(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    event: nsm::Event,
) -> Result<(), Error> {
    // Lookup area, interface and neighbor.
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) =
        area.interfaces.get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let (nbr_idx, nbr) = iface
        .state
        .neighbors
        .get_mut_by_id(&mut arenas.neighbors, nbr_id)?;

    // Invoke FSM event.
    nbr.fsm(iface, area, instance, &arenas.lsa_entries, event);

    // Delete neighbor that transitioned to the Down state, unless it's a
    // configured NBMA neighbor.
    if nbr.state == nsm::State::Down
        && !(iface.config.if_type == InterfaceType::NonBroadcast
            && iface
                .config
                .static_nbrs
                .iter()
                .any(|snbr| snbr.addr == nbr.src))
    {
        iface.state.neighbors.delete(&mut arenas.neighbors, nbr_idx);
    }

    Ok(())
}

// ===== Network packet receipt =====

pub(crate) fn process_packet(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    ifindex: u32,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    packet: Packet,
) -> Result<(), Error> {
    // Lookup area and interface.
    let (area_idx, iface_idx) =
        packet_iface_lookup(arenas, ifindex, src, packet.hdr())?;
    let area = &arenas.areas[area_idx];
    let iface = &mut arenas.interfaces[iface_idx];

    // Ignore packets received on inoperational or passive interfaces.
    if iface.is_down() || iface.config.passive {
        return Ok(());
    }

    // Ignore packets sent by ourselves.
    if src == iface.src_addr() {
        return Ok(());
    }

    // Check packet's source and destination addresses.
    iface.validate_packet_dst(dst)?;
    iface.validate_packet_src(src)?;

    // Check packet authentication.
    let router_id = packet.hdr().router_id;
    validate_auth(iface, &packet.hdr().auth)
        .map_err(|error| Error::PacketAuthError(src, error))?;
    if let AuthData::Cryptographic { seqno, .. } = packet.hdr().auth
        && let Some((_, nbr)) =
            iface.get_neighbor(src, router_id, &mut arenas.neighbors)
    {
        if let Some(nbr_seqno) = nbr.auth_seqno
            && seqno < nbr_seqno
        {
            return Err(Error::PacketAuthError(
                src,
                AuthError::DecreasingSeqno(seqno),
            ));
        }
        nbr.auth_seqno = Some(seqno);
    }

    Debug::PacketRx(iface, &src, &dst, &packet).log();

    match packet {
        Packet::Hello(hello) => process_packet_hello(
            iface,
            area,
            instance,
            &mut arenas.neighbors,
            &arenas.lsa_entries,
            src,
            hello,
        ),
        packet => {
            // Non-Hello packets are only accepted from known neighbors.
            let (nbr_idx, nbr) = iface
                .get_neighbor(src, router_id, &mut arenas.neighbors)
                .ok_or(Error::UnknownNeighbor(src, router_id))?;

            match packet {
                Packet::Hello(_) => unreachable!(),
                Packet::DbDesc(dbdesc) => process_packet_dbdesc(
                    nbr,
                    iface,
                    area,
                    instance,
                    &arenas.lsa_entries,
                    src,
                    dbdesc,
                ),
                Packet::LsRequest(ls_req) => process_packet_lsreq(
                    nbr,
                    iface,
                    area,
                    instance,
                    &arenas.lsa_entries,
                    ls_req,
                ),
                Packet::LsUpdate(ls_upd) => process_packet_lsupd(
                    nbr_idx, iface_idx, area_idx, instance, arenas, ls_upd,
                ),
                Packet::LsAck(ls_ack) => process_packet_lsack(nbr, ls_ack),
            }
        }
    }
}

// ===== Hello packet =====

fn process_packet_hello(
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &mut Arena<Neighbor>,
    lsa_entries: &Arena<LsaEntry>,
    src: Ipv4Addr,
    hello: Hello,
) -> Result<(), Error> {
    let router_id = hello.hdr.router_id;

    // Perform all the required sanity checks.
    hello_sanity_checks(iface, area, instance, &hello).map_err(|error| {
        Error::InterfaceCfgError(
            iface.name.clone(),
            src,
            PacketType::Hello,
            error,
        )
    })?;

    // Find or create new neighbor.
    let (nbr_idx, nbr) = match iface.get_neighbor(src, router_id, neighbors) {
        Some(value) => value,
        None => {
            let (nbr_idx, nbr) =
                iface.state.neighbors.insert(neighbors, router_id, src);
            nbr.priority = hello.priority;
            if iface.is_broadcast_or_nbma() {
                nbr.dr = hello.dr;
                nbr.bdr = hello.bdr;
            }
            (nbr_idx, nbr)
        }
    };

    // Neighbors identified by Router ID can change their addresses.
    if nbr.src != src {
        iface.state.neighbors.update_src(nbr_idx, nbr, src);
    }

    // Trigger the HelloReceived event.
    nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::HelloRcvd);

    // Check whether this router appears in the neighbor's Hello packet.
    if hello.neighbors.contains(&instance.state.router_id) {
        nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::TwoWayRcvd);
    } else {
        nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::OneWayRcvd);
        if iface.is_broadcast_or_nbma() {
            nbr.priority = hello.priority;
            nbr.dr = hello.dr;
            nbr.bdr = hello.bdr;
        }
        return Ok(());
    }

    if !iface.is_broadcast_or_nbma() {
        return Ok(());
    }

    // Examine the Router Priority field.
    if hello.priority != nbr.priority {
        nbr.priority = hello.priority;
        instance.tx.ism_event(area.id, iface.id, ism::Event::NbrChange);
    }

    // Examine the Designated Router and Backup Designated Router fields.
    if iface.state.ism_state == ism::State::Waiting
        && ((hello.dr == Some(nbr.src) && hello.bdr.is_none())
            || hello.bdr == Some(nbr.src))
    {
        instance.tx.ism_event(area.id, iface.id, ism::Event::BackupSeen);
    }
    let declares_dr = |dr: Option<Ipv4Addr>| dr == Some(nbr.src);
    if declares_dr(hello.dr) != declares_dr(nbr.dr) {
        instance.tx.ism_event(area.id, iface.id, ism::Event::NbrChange);
    }
    if declares_dr(hello.bdr) != declares_dr(nbr.bdr) {
        instance.tx.ism_event(area.id, iface.id, ism::Event::NbrChange);
    }
    nbr.dr = hello.dr;
    nbr.bdr = hello.bdr;

    Ok(())
}

fn hello_sanity_checks(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    hello: &Hello,
) -> Result<(), InterfaceCfgError> {
    iface.validate_hello(hello)?;

    // The E-bit must match the area's ExternalRoutingCapability.
    let e_bit = hello.options.contains(Options::E);
    if e_bit != area.external_routing_capability() {
        return Err(InterfaceCfgError::ExternalRoutingCapabilityMismatch(
            e_bit,
        ));
    }

    if hello.hdr.router_id == instance.state.router_id {
        return Err(InterfaceCfgError::DuplicateRouterId(
            hello.hdr.router_id,
        ));
    }

    Ok(())
}

// ===== Database Description packet =====

fn process_packet_dbdesc(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
    src: Ipv4Addr,
    dbdesc: DbDesc,
) -> Result<(), Error> {
    // MTU mismatch check.
    if !iface.is_virtual_link() && dbdesc.mtu > iface.config.mtu {
        return Err(Error::InterfaceCfgError(
            iface.name.clone(),
            src,
            PacketType::DbDesc,
            InterfaceCfgError::MtuMismatch(dbdesc.mtu),
        ));
    }

    let is_dup =
        nbr.dbdesc_is_dup(dbdesc.options, dbdesc.dd_flags, dbdesc.dd_seq_no);
    let seqno_mismatch = |nbr: &mut Neighbor,
                              iface: &mut Interface,
                              reason: SeqNoMismatchReason| {
        nbr.fsm(
            iface,
            area,
            instance,
            lsa_entries,
            nsm::Event::SeqNoMismatch(reason),
        );
    };

    match nbr.state {
        nsm::State::Down | nsm::State::Attempt | nsm::State::TwoWay => {
            return Err(Error::DbDescReject(nbr.router_id, nbr.state));
        }
        nsm::State::Init | nsm::State::ExStart => {
            if nbr.state == nsm::State::Init {
                nbr.fsm(
                    iface,
                    area,
                    instance,
                    lsa_entries,
                    nsm::Event::TwoWayRcvd,
                );
                if nbr.state != nsm::State::ExStart {
                    return Ok(());
                }
            }

            // Master/slave negotiation.
            let router_id = instance.state.router_id;
            let init_flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
            if dbdesc.dd_flags.contains(init_flags)
                && dbdesc.lsa_hdrs.is_empty()
                && dbdesc.hdr.router_id > router_id
            {
                // This router is the slave.
                nbr.dd_flags.remove(DbDescFlags::MS);
                nbr.dd_seq_no = dbdesc.dd_seq_no;
            } else if !dbdesc
                .dd_flags
                .intersects(DbDescFlags::I | DbDescFlags::MS)
                && dbdesc.dd_seq_no == nbr.dd_seq_no
                && dbdesc.hdr.router_id < router_id
            {
                // This router is the master.
            } else {
                return Ok(());
            }

            nbr.options = Some(dbdesc.options);
            nbr.fsm(
                iface,
                area,
                instance,
                lsa_entries,
                nsm::Event::NegotiationDone,
            );
        }
        nsm::State::Exchange => {
            if is_dup {
                // The slave retransmits its last packet; the master just
                // discards the duplicate.
                if !nbr.is_master() {
                    output::rxmt_dbdesc(nbr, iface, instance);
                }
                return Ok(());
            }

            let (last_options, last_flags) = match &nbr.last_rcvd_dbdesc {
                Some(last) => (Some(last.options), Some(last.dd_flags)),
                None => (None, None),
            };
            let ms_changed = last_flags.is_some_and(|flags| {
                flags.contains(DbDescFlags::MS)
                    != dbdesc.dd_flags.contains(DbDescFlags::MS)
            });
            if dbdesc.dd_flags.contains(DbDescFlags::I) || ms_changed {
                seqno_mismatch(
                    nbr,
                    iface,
                    SeqNoMismatchReason::InconsistentFlags,
                );
                return Ok(());
            }

            let options_changed = last_options
                .or(nbr.options)
                .is_some_and(|options| options != dbdesc.options);
            if options_changed {
                seqno_mismatch(
                    nbr,
                    iface,
                    SeqNoMismatchReason::InconsistentOptions,
                );
                return Ok(());
            }

            let expected_seq_no = if nbr.is_master() {
                nbr.dd_seq_no
            } else {
                nbr.dd_seq_no.wrapping_add(1)
            };
            if dbdesc.dd_seq_no != expected_seq_no {
                seqno_mismatch(
                    nbr,
                    iface,
                    SeqNoMismatchReason::InconsistentSeqNo,
                );
                return Ok(());
            }
        }
        nsm::State::Loading | nsm::State::Full => {
            if is_dup {
                if !nbr.is_master() {
                    output::rxmt_dbdesc(nbr, iface, instance);
                }
            } else {
                seqno_mismatch(
                    nbr,
                    iface,
                    SeqNoMismatchReason::UnexpectedDbDesc,
                );
            }
            return Ok(());
        }
    }

    // The packet was accepted as the next in sequence.
    nbr.rxmt_dbdesc_stop();

    for lsa_hdr in &dbdesc.lsa_hdrs {
        // Reject LSA types this interface can't carry.
        if !iface.lsa_type_is_valid(area, lsa_hdr.lsa_type) {
            seqno_mismatch(nbr, iface, SeqNoMismatchReason::InvalidLsaType);
            return Ok(());
        }
        let lsa_key = lsa_hdr.key();

        // Drop summary list entries the neighbor already has an equal or
        // more recent copy of (RFC 5243).
        if let Some(summ_hdr) = nbr.lists.db_summary.get(&lsa_key)
            && lsdb::lsa_compare(summ_hdr, lsa_hdr) != Ordering::Greater
        {
            nbr.lists.db_summary.remove(&lsa_key);
        }

        // Request the LSA if it's missing or the local copy is older.
        let lsdb = match lsa_hdr.lsa_type.scope() {
            LsaScope::Area => &area.state.lsdb,
            LsaScope::As => &instance.state.lsdb,
            LsaScope::Unknown => continue,
        };
        if let Some((_, lse)) = lsdb.get(lsa_entries, &lsa_key)
            && lsdb::lsa_compare(&lse.data.hdr, lsa_hdr) != Ordering::Less
        {
            continue;
        }
        nbr.lists.ls_request.insert(lsa_key, *lsa_hdr);
    }

    // Start sending LS Requests while the exchange goes on.
    if !nbr.lists.ls_request.is_empty()
        && nbr.lists.ls_request_pending.is_empty()
    {
        output::send_lsreq(nbr, iface, area, instance);
    }

    let more = dbdesc.dd_flags.contains(DbDescFlags::M);
    let mut exchange_done = false;
    if nbr.is_master() {
        nbr.dd_seq_no = nbr.dd_seq_no.wrapping_add(1);
        if !more && !nbr.dd_flags.contains(DbDescFlags::M) {
            exchange_done = true;
        } else {
            output::send_dbdesc(nbr, iface, area, instance);
        }
    } else {
        nbr.dd_seq_no = dbdesc.dd_seq_no;
        output::send_dbdesc(nbr, iface, area, instance);
        if !more && !nbr.dd_flags.contains(DbDescFlags::M) {
            exchange_done = true;
        }
    }

    // Save last received Database Description packet.
    nbr.last_rcvd_dbdesc = Some(LastDbDesc {
        options: dbdesc.options,
        dd_flags: dbdesc.dd_flags,
        dd_seq_no: dbdesc.dd_seq_no,
    });

    if exchange_done {
        nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::ExchangeDone);

        // The slave keeps its last packet around for a while to answer
        // retransmissions from the master.
        if !nbr.is_master() {
            nbr.dbdesc_free_timer_start(iface, area, instance);
        }
    }

    Ok(())
}

// ===== Link State Request packet =====

fn process_packet_lsreq(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
    ls_req: LsRequest,
) -> Result<(), Error> {
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    for lsa_key in &ls_req.entries {
        let lsdb = match lsa_key.lsa_type.scope() {
            LsaScope::Area => &area.state.lsdb,
            LsaScope::As => &instance.state.lsdb,
            LsaScope::Unknown => {
                nbr.fsm(
                    iface,
                    area,
                    instance,
                    lsa_entries,
                    nsm::Event::BadLsReq,
                );
                return Ok(());
            }
        };

        match lsdb.get(lsa_entries, lsa_key) {
            Some((_, lse)) => {
                nbr.lists.ls_update.insert(*lsa_key, lse.data.clone());
            }
            None => {
                nbr.fsm(
                    iface,
                    area,
                    instance,
                    lsa_entries,
                    nsm::Event::BadLsReq,
                );
                return Ok(());
            }
        }
    }

    if !nbr.lists.ls_update.is_empty() {
        instance.tx.send_lsupd(area.id, iface.id, Some(nbr.id));
    }

    Ok(())
}

// ===== Link State Update packet =====

fn process_packet_lsupd(
    nbr_idx: NeighborIndex,
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    ls_upd: LsUpdate,
) -> Result<(), Error> {
    let nbr = &arenas.neighbors[nbr_idx];
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    // Process LSAs in a fixed type order so that the LSAs describing the
    // topology are installed before the ones that depend on them.
    for lsa in ls_upd
        .lsas
        .into_iter()
        .sorted_by_key(|lsa| lsa.hdr.lsa_type.processing_order())
    {
        let stop = process_packet_lsupd_lsa(
            nbr_idx, iface_idx, area_idx, instance, arenas, lsa,
        );
        if stop {
            break;
        }
    }

    Ok(())
}

// Processes a single LSA received in a Link State Update packet (RFC 2328,
// Section 13).
//
// Returns whether processing of the remaining LSAs should stop.
fn process_packet_lsupd_lsa(
    nbr_idx: NeighborIndex,
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsa: Lsa,
) -> bool {
    let nbr = &arenas.neighbors[nbr_idx];
    let iface = &arenas.interfaces[iface_idx];
    let area = &arenas.areas[area_idx];
    let nbr_router_id = nbr.router_id;
    let area_id = area.id;
    let iface_id = iface.id;

    // (1) Validate the LSA's checksum.
    if !lsdb::lsa_checksum_is_valid(&lsa) {
        let reason = LsaDiscardReason::InvalidChecksum;
        Debug::LsaDiscard(nbr_router_id, &lsa.hdr, reason).log();
        return false;
    }

    // (2) Examine the LSA's type.
    let lsa_type = lsa.hdr.lsa_type;
    let Some(lsdb_idx) = lsdb::lsdb_get_by_lsa_type(area_idx, lsa_type)
    else {
        let reason = LsaDiscardReason::UnknownType;
        Debug::LsaDiscard(nbr_router_id, &lsa.hdr, reason).log();
        return false;
    };
    if matches!(lsa.body, LsaBody::Unknown(_)) {
        let reason = LsaDiscardReason::UnknownType;
        Debug::LsaDiscard(nbr_router_id, &lsa.hdr, reason).log();
        return false;
    }

    // (3) AS-external-LSAs aren't accepted in stub areas.
    if !lsdb::lsa_type_is_valid(Some(area.config.area_type), lsa_type) {
        let reason = LsaDiscardReason::StubArea;
        Debug::LsaDiscard(nbr_router_id, &lsa.hdr, reason).log();
        return false;
    }
    if !iface.lsa_type_is_valid(area, lsa_type) {
        return false;
    }

    // (4) Find the instance of this LSA currently contained in the
    // database.
    let lsa_key = lsa.hdr.key();
    let (lsdb_id, lsdb) =
        lsdb_index(&instance.state.lsdb, &arenas.areas, lsdb_idx);
    let lse = lsdb.get(&arenas.lsa_entries, &lsa_key).map(|(_, lse)| lse);
    let db_hdr = lse.map(|lse| lse.data.hdr);
    let min_arrival = lse.is_some_and(lsdb::lsa_min_arrival_check);
    let lsa_cmp =
        db_hdr.map(|db_hdr| lsdb::lsa_compare(&lsa.hdr, &db_hdr));

    // (5) A MaxAge LSA without a database copy is acknowledged and
    // discarded as long as no database exchange is in progress.
    let exchange_in_progress = arenas.neighbors.iter().any(|(_, nbr)| {
        matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading)
    });
    if lsa.hdr.is_maxage() && db_hdr.is_none() && !exchange_in_progress {
        let flags = AckFlags {
            maxage_no_instance: true,
            ..Default::default()
        };
        lsa_ack(
            nbr_idx, iface_idx, area_idx, instance, arenas, &lsa.hdr, flags,
        );
        return false;
    }

    // (6) The received LSA is new or more recent than the database copy.
    if matches!(lsa_cmp, None | Some(Ordering::Greater)) {
        // (6.a) Enforce MinLSArrival.
        if min_arrival {
            Debug::LsaMinArrivalDiscard(nbr_router_id, &lsa.hdr).log();
            return false;
        }

        // (6.b) Immediately flood the new LSA.
        let flooded_back = flood(
            instance,
            &arenas.areas,
            &mut arenas.interfaces,
            &mut arenas.neighbors,
            lsdb_idx,
            &lsa,
            Some((iface_idx, nbr_idx)),
        );

        // (6.c-d) Install the new LSA, removing the old instance from all
        // retransmission lists.
        let lsa_hdr = lsa.hdr;
        let (lse_idx, _) = lsdb::install(instance, arenas, lsdb_idx, lsa);
        let lse = &mut arenas.lsa_entries[lse_idx];
        lse.flags.insert(LsaEntryFlags::RECEIVED);
        let lse_id = lse.id;
        let self_originated =
            lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED);

        // (6.e) Possibly acknowledge the receipt of the LSA.
        let flags = AckFlags {
            flooded_back,
            newer: true,
            ..Default::default()
        };
        lsa_ack(
            nbr_idx, iface_idx, area_idx, instance, arenas, &lsa_hdr, flags,
        );

        // (6.f) Self-originated LSAs are either updated or flushed.
        if self_originated {
            Debug::LsaSelfOriginated(nbr_router_id, &lsa_hdr).log();
            if db_hdr.is_none() {
                instance.tx.lsa_flush(
                    lsdb_id,
                    lse_id,
                    LsaFlushReason::PrematureAging,
                );
            } else {
                let event = LsaOriginateEvent::SelfOriginatedLsaRcvd {
                    lsdb_id,
                    lse_id,
                };
                instance.tx.lsa_orig_event(event);
            }
        }

        return false;
    }

    // (7) An instance of the LSA is on the neighbor's request list: the
    // database exchange went wrong.
    let nbr = &mut arenas.neighbors[nbr_idx];
    if nbr.lists.ls_request.contains_key(&lsa_key)
        || nbr.lists.ls_request_pending.contains_key(&lsa_key)
    {
        let iface = &mut arenas.interfaces[iface_idx];
        let area = &arenas.areas[area_idx];
        nbr.fsm(
            iface,
            area,
            instance,
            &arenas.lsa_entries,
            nsm::Event::BadLsReq,
        );
        return true;
    }

    // (8) The received LSA is the same instance as the database copy.
    if lsa_cmp == Some(Ordering::Equal) {
        // Treat it as an implied acknowledgment if it was being
        // retransmitted to this neighbor.
        let implied_ack = nbr.lists.ls_rxmt.remove(&lsa_key).is_some();
        if implied_ack {
            nbr.rxmt_lsupd_stop_check();
        }

        let flags = AckFlags {
            duplicate: true,
            implied_ack,
            ..Default::default()
        };
        lsa_ack(
            nbr_idx, iface_idx, area_idx, instance, arenas, &lsa.hdr, flags,
        );
        return false;
    }

    // (9) The database copy is more recent.
    if let Some(db_hdr) = db_hdr
        && db_hdr.is_maxage()
        && db_hdr.is_max_seq_no()
    {
        // Wait for the wrapping flush to complete.
        return false;
    }
    if nbr.lists.ls_transmitted.contains_key(&lsa_key)
        || nbr.lists.ls_update.contains_key(&lsa_key)
    {
        Debug::LsaMinArrivalDiscard(nbr_router_id, &lsa.hdr).log();
        return false;
    }

    // Send the database copy back to the neighbor.
    let (_, lsdb) = lsdb_index(&instance.state.lsdb, &arenas.areas, lsdb_idx);
    if let Some((_, lse)) = lsdb.get(&arenas.lsa_entries, &lsa_key) {
        nbr.lists.ls_update.insert(lsa_key, lse.data.clone());
        instance.tx.send_lsupd(area_id, iface_id, Some(nbr.id));
    }

    false
}

// Applies the acknowledgment policy to a received LSA.
fn lsa_ack(
    nbr_idx: NeighborIndex,
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsa_hdr: &LsaHdr,
    flags: AckFlags,
) -> AckDecision {
    let nbr = &arenas.neighbors[nbr_idx];
    let iface = &mut arenas.interfaces[iface_idx];
    let area = &arenas.areas[area_idx];

    let from_dr = iface.state.dr == Some(nbr.src);
    let decision = ack_decision(flags, iface.state.ism_state, from_dr);
    Debug::LsaAckDecision(nbr.router_id, lsa_hdr, &decision).log();

    match decision {
        AckDecision::Delayed => {
            iface.enqueue_delayed_ack(area, instance, lsa_hdr);
        }
        AckDecision::Direct => {
            output::send_lsack_direct(nbr, iface, area, instance, lsa_hdr);
        }
        AckDecision::SuppressedFloodedBack | AckDecision::NotRequired => {}
    }

    decision
}

// ===== Link State Acknowledgment packet =====

fn process_packet_lsack(
    nbr: &mut Neighbor,
    ls_ack: LsAck,
) -> Result<(), Error> {
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    for lsa_hdr in &ls_ack.lsa_hdrs {
        let lsa_key = lsa_hdr.key();
        let Some(rxmt_hdr) = nbr.lists.ls_rxmt.get(&lsa_key) else {
            continue;
        };

        if lsdb::lsa_compare(rxmt_hdr, lsa_hdr) == Ordering::Equal {
            nbr.lists.ls_rxmt.remove(&lsa_key);
            nbr.rxmt_lsupd_stop_check();
        } else {
            Debug::QuestionableAck(nbr.router_id, lsa_hdr).log();
        }
    }

    Ok(())
}

// ===== Interface timers =====

pub(crate) fn process_hello_interval(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
) -> Result<(), Error> {
    let (_, area) = arenas.areas.get_by_id(area_id)?;
    let (_, iface) = area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;

    output::send_hello(iface, area, instance, &iface.hello_dsts());

    Ok(())
}

pub(crate) fn process_nbma_poll_interval(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    addr: Ipv4Addr,
) -> Result<(), Error> {
    let (_, area) = arenas.areas.get_by_id(area_id)?;
    let (_, iface) = area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;

    output::send_hello(iface, area, instance, &[addr]);

    Ok(())
}

pub(crate) fn process_delayed_ack_timeout(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
) -> Result<(), Error> {
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) =
        area.interfaces.get_mut_by_id(&mut arenas.interfaces, iface_id)?;

    iface.state.tasks.ls_delayed_ack = None;
    output::send_lsack_delayed(iface, area, instance, &arenas.neighbors);

    Ok(())
}

// ===== Neighbor timers =====

pub(crate) fn process_packet_rxmt(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    packet_type: RxmtPacketType,
) -> Result<(), Error> {
    let (_, area) = arenas.areas.get_by_id(area_id)?;
    let (_, iface) = area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;
    let (_, nbr) = iface.state.neighbors.get_by_id(&arenas.neighbors, nbr_id)?;

    match packet_type {
        RxmtPacketType::DbDesc => output::rxmt_dbdesc(nbr, iface, instance),
        RxmtPacketType::LsRequest => {
            output::rxmt_lsreq(nbr, iface, area, instance)
        }
        RxmtPacketType::LsUpdate => output::rxmt_lsupd(
            nbr,
            iface,
            area,
            instance,
            &arenas.lsa_entries,
        ),
    }

    Ok(())
}

pub(crate) fn process_dbdesc_free(
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
) -> Result<(), Error> {
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) =
        area.interfaces.get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let (_, nbr) = iface
        .state
        .neighbors
        .get_mut_by_id(&mut arenas.neighbors, nbr_id)?;

    nbr.tasks.dbdesc_free_timer = None;
    nbr.last_rcvd_dbdesc = None;
    nbr.last_sent_dbdesc = None;

    Ok(())
}

// ===== Deferred LS Update transmission =====

pub(crate) fn process_send_lsupd(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: Option<NeighborId>,
) -> Result<(), Error> {
    let (_, area) = arenas.areas.get_mut_by_id(area_id)?;
    let (_, iface) =
        area.interfaces.get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let nbr_idx = match nbr_id {
        Some(nbr_id) => {
            let (nbr_idx, _) =
                iface.state.neighbors.get_by_id(&arenas.neighbors, nbr_id)?;
            Some(nbr_idx)
        }
        None => None,
    };

    output::send_lsupd(nbr_idx, iface, area, instance, &mut arenas.neighbors);

    Ok(())
}

// ===== LSA origination and flushing =====

pub(crate) fn process_lsa_orig_event(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    event: LsaOriginateEvent,
) -> Result<(), Error> {
    lsdb::lsa_orig_event(instance, arenas, event)
}

pub(crate) fn process_lsa_orig_check(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    options: Options,
    lsa_id: Ipv4Addr,
    lsa_body: LsaBody,
) -> Result<(), Error> {
    let (lsdb_idx, _) =
        lsdb_get(&instance.state.lsdb, &arenas.areas, lsdb_id)?;
    lsdb::originate_check(
        instance, arenas, lsdb_idx, options, lsa_id, lsa_body,
    );

    Ok(())
}

pub(crate) fn process_lsa_orig_delayed_timer(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lsa_key: LsaKey,
) -> Result<(), Error> {
    let (lsdb_idx, _) =
        lsdb_get(&instance.state.lsdb, &arenas.areas, lsdb_id)?;
    let (_, lsdb) =
        lsdb_index_mut(&mut instance.state.lsdb, &mut arenas.areas, lsdb_idx);

    if let Some(ldo) = lsdb.delayed_orig.remove(&lsa_key) {
        lsdb::originate(instance, arenas, lsdb_idx, ldo.data);
    }

    Ok(())
}

pub(crate) fn process_lsa_flush(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
    reason: LsaFlushReason,
) -> Result<(), Error> {
    let (lsdb_idx, lsdb) =
        lsdb_get(&instance.state.lsdb, &arenas.areas, lsdb_id)?;
    let (lse_idx, _) = lsdb.get_by_id(&arenas.lsa_entries, lse_id)?;

    lsdb::flush(instance, arenas, lsdb_idx, lse_idx, reason);

    Ok(())
}

pub(crate) fn process_age_tick(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    lsdb::age_tick(instance, arenas);
}

// ===== helper functions =====

// Finds the interface a packet was received on.
//
// Packets addressed to the backbone but received on a non-backbone
// interface belong to the virtual link whose far end sent them.
fn packet_iface_lookup(
    arenas: &InstanceArenas,
    ifindex: u32,
    src: Ipv4Addr,
    hdr: &PacketHdr,
) -> Result<(AreaIndex, InterfaceIndex), Error> {
    let (area_idx, iface_idx) = arenas
        .areas
        .indexes()
        .find_map(|area_idx| {
            let area = &arenas.areas[area_idx];
            area.interfaces
                .get_by_ifindex(&arenas.interfaces, ifindex)
                .map(|(iface_idx, _)| (area_idx, iface_idx))
        })
        .ok_or(Error::UnknownInterface(ifindex))?;
    let area = &arenas.areas[area_idx];

    if hdr.area_id == area.area_id {
        return Ok((area_idx, iface_idx));
    }

    if hdr.area_id == Ipv4Addr::UNSPECIFIED
        && let Some((backbone_idx, backbone)) = arenas.areas.backbone()
        && let Some(vlink_idx) = backbone.interfaces.indexes().find(|idx| {
            arenas.interfaces[*idx].vlink.as_ref().is_some_and(|vlink| {
                vlink.transit_area_id == area.area_id
                    && vlink.router_id == hdr.router_id
            })
        })
    {
        return Ok((backbone_idx, vlink_idx));
    }

    let iface = &arenas.interfaces[iface_idx];
    Err(Error::InterfaceCfgError(
        iface.name.clone(),
        src,
        hdr.pkt_type,
        InterfaceCfgError::AreaIdMismatch(hdr.area_id, area.area_id),
    ))
}

fn validate_auth(iface: &Interface, auth: &AuthData) -> Result<(), AuthError> {
    match (&iface.config.auth, auth) {
        (AuthCfg::Null, AuthData::Null) => Ok(()),
        (AuthCfg::Simple { key }, AuthData::Simple(rcvd_key)) => {
            if key != rcvd_key {
                return Err(AuthError::KeyMismatch);
            }
            Ok(())
        }
        (
            AuthCfg::Cryptographic { key_id, .. },
            AuthData::Cryptographic {
                key_id: rcvd_key_id,
                ..
            },
        ) => {
            if key_id != rcvd_key_id {
                return Err(AuthError::KeyIdMismatch(*rcvd_key_id));
            }
            Ok(())
        }
        _ => Err(AuthError::TypeMismatch),
    }
}

fn nbma_static_nbr_create(
    iface: &mut Interface,
    neighbors: &mut Arena<Neighbor>,
    snbr: &StaticNbrCfg,
) {
    if iface
        .state
        .neighbors
        .get_by_addr(neighbors, snbr.addr)
        .is_some()
    {
        return;
    }

    // The neighbor's Router ID is learned from its first Hello packet.
    let (_, nbr) =
        iface.state.neighbors.insert(neighbors, snbr.addr, snbr.addr);
    nbr.priority = snbr.priority;
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> AckFlags {
        AckFlags::default()
    }

    #[test]
    fn ack_flooded_back() {
        let flags = AckFlags {
            flooded_back: true,
            newer: true,
            ..flags()
        };
        for state in [ism::State::Backup, ism::State::DrOther] {
            assert_eq!(
                ack_decision(flags, state, true),
                AckDecision::SuppressedFloodedBack
            );
        }
    }

    #[test]
    fn ack_newer() {
        let flags = AckFlags {
            newer: true,
            ..flags()
        };
        assert_eq!(
            ack_decision(flags, ism::State::DrOther, false),
            AckDecision::Delayed
        );
        assert_eq!(
            ack_decision(flags, ism::State::Backup, true),
            AckDecision::Delayed
        );
        assert_eq!(
            ack_decision(flags, ism::State::Backup, false),
            AckDecision::NotRequired
        );
    }

    #[test]
    fn ack_duplicate() {
        let implied = AckFlags {
            duplicate: true,
            implied_ack: true,
            ..flags()
        };
        let not_implied = AckFlags {
            duplicate: true,
            ..flags()
        };
        assert_eq!(
            ack_decision(implied, ism::State::Backup, false),
            AckDecision::Delayed
        );
        assert_eq!(
            ack_decision(implied, ism::State::PointToPoint, false),
            AckDecision::NotRequired
        );
        assert_eq!(
            ack_decision(not_implied, ism::State::Backup, true),
            AckDecision::Direct
        );
        assert_eq!(
            ack_decision(not_implied, ism::State::DrOther, false),
            AckDecision::Direct
        );
    }

    #[test]
    fn ack_maxage_no_instance() {
        let flags = AckFlags {
            maxage_no_instance: true,
            ..flags()
        };
        assert_eq!(
            ack_decision(flags, ism::State::Dr, false),
            AckDecision::Direct
        );
    }
}
