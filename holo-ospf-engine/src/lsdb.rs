//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::btree_map;
use std::net::Ipv4Addr;
use std::time::Duration;

use bitflags::bitflags;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::area::{Area, AreaType};
use crate::collections::{
    AreaId, AreaIndex, Arena, InterfaceId, LsaEntryId, LsaEntryIndex, LsdbId,
    LsdbIndex, lsdb_get, lsdb_index, lsdb_index_mut,
};
use crate::config::{ExternalMetricType, ExternalRouteCfg};
use crate::debug::{Debug, LsaFlushReason};
use crate::error::Error;
use crate::flood::flood;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::{Interface, InterfaceType, ism};
use crate::neighbor::nsm;
use crate::packet::Options;
use crate::packet::lsa::{
    Lsa, LsaAsExternal, LsaAsExternalFlags, LsaBody, LsaHdr, LsaKey,
    LsaNetwork, LsaRouter, LsaRouterFlags, LsaRouterLink, LsaRouterLinkType,
    LsaScope, LsaSummary, LsaType, LsaTypeCode,
};
use crate::route::Nexthops;
use crate::tasks;

// Architectural Constants.
pub const LSA_REFRESH_TIME: u16 = 1800;
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_MAX_AGE_DIFF: u16 = 900;
pub const LSA_INFINITY: u32 = 0x00ffffff;
pub const LSA_INIT_SEQ_NO: u32 = 0x80000001;
pub const LSA_MAX_SEQ_NO: u32 = 0x7fffffff;
pub const LSA_RESERVED_SEQ_NO: u32 = 0x80000000;
pub const LSA_MIN_INTERVAL: u16 = 5;
pub const LSA_MIN_ARRIVAL: u16 = 1;

#[derive(Debug)]
pub struct LsaEntry {
    // LSA ID.
    pub id: LsaEntryId,
    // LSA data.
    pub data: Lsa,
    // Seconds elapsed since this instance was installed.
    pub install_time: u16,
    // LSA entry flags.
    pub flags: LsaEntryFlags,
    // Routing calculation data.
    pub spf: LsaSpfData,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct LsaEntryFlags: u8 {
        const RECEIVED = 0x01;
        const SELF_ORIGINATED = 0x02;
    }
}

// Scratch data written by the routing table calculation. Only meaningful for
// router and network LSAs that were reached during the last SPF run.
#[derive(Clone, Debug, Default)]
pub struct LsaSpfData {
    pub distance: Option<u32>,
    pub parent: Option<LsaKey>,
    pub nexthops: Nexthops,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub enum LsaOriginateEvent {
    AreaStart {
        area_id: AreaId,
    },
    InterfaceStateChange {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    InterfaceDrChange {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    NeighborToFromFull {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    VirtualLinkChange,
    SelfOriginatedLsaRcvd {
        lsdb_id: LsdbId,
        lse_id: LsaEntryId,
    },
}

#[derive(Debug)]
pub struct LsaDelayedOrig {
    pub data: Lsa,
    pub timeout: tasks::TimeoutTask,
}

// ===== impl LsaEntry =====

impl LsaEntry {
    pub(crate) fn new(id: LsaEntryId, data: Lsa) -> LsaEntry {
        LsaEntry {
            id,
            data,
            install_time: 0,
            flags: Default::default(),
            spf: Default::default(),
        }
    }
}

// ===== global functions =====

// Compares which LSA is more recent according to the rules specified in Section
// 13.1 of RFC 2328.
//
// Returns:
// - Ordering::Greater when `a` is more recent
// - Ordering::Less when `b` is more recent
// - Ordering::Equal when the two LSAs are considered to be identical
pub fn lsa_compare(a: &LsaHdr, b: &LsaHdr) -> Ordering {
    let a_seq_no = a.seq_no as i32;
    let b_seq_no = b.seq_no as i32;
    let cmp = a_seq_no.cmp(&b_seq_no);
    if cmp != Ordering::Equal {
        return cmp;
    }

    let cmp = a.cksum.cmp(&b.cksum);
    if cmp != Ordering::Equal {
        return cmp;
    }

    if a.is_maxage() && !b.is_maxage() {
        return Ordering::Greater;
    } else if !a.is_maxage() && b.is_maxage() {
        return Ordering::Less;
    }

    if a.age.abs_diff(b.age) > LSA_MAX_AGE_DIFF {
        return b.age.cmp(&a.age);
    }

    Ordering::Equal
}

// Compares two LSAs according to the rules specified in Section 13.2 of RFC
// 2328. Its purpose is to determine if the contents of the LSAs are identical.
pub(crate) fn lsa_same_contents(a: &Lsa, b: &Lsa) -> bool {
    if a.hdr.options != b.hdr.options {
        return false;
    }

    if a.hdr.is_maxage() ^ b.hdr.is_maxage() {
        return false;
    }

    if a.hdr.length != b.hdr.length {
        return false;
    }

    a.body == b.body
}

// LSA checksum validation hook.
//
// Packets are decoded by the transport, which owns the checksum algorithm.
// Every LSA that reaches the engine is accepted.
pub(crate) fn lsa_checksum_is_valid(_lsa: &Lsa) -> bool {
    true
}

// Checks if the provided area can accept the given LSA type.
pub(crate) fn lsa_type_is_valid(
    area_type: Option<AreaType>,
    lsa_type: LsaType,
) -> bool {
    // Reject LSAs of unknown type.
    if lsa_type.type_code().is_none() {
        return false;
    }

    // AS-external-LSAs aren't flooded into stub areas.
    if let Some(area_type) = area_type
        && area_type == AreaType::Stub
        && lsa_type.type_code() == Some(LsaTypeCode::AsExternal)
    {
        return false;
    }

    true
}

// Checks whether the LSA is self-originated.
pub(crate) fn lsa_is_self_originated(
    lsa: &Lsa,
    router_id: Ipv4Addr,
    interfaces: &Arena<Interface>,
) -> bool {
    // 1) The LSA's Advertising Router is equal to the router's own Router
    // ID.
    if lsa.hdr.adv_rtr == router_id {
        return true;
    }

    // 2) The LSA is a network-LSA and its Link State ID is equal to one of
    // the router's own IP interface addresses.
    if lsa.hdr.lsa_type.type_code() == Some(LsaTypeCode::Network)
        && interfaces
            .iter()
            .filter(|(_, iface)| !iface.is_virtual_link())
            .any(|(_, iface)| lsa.hdr.lsa_id == iface.config.addr.ip())
    {
        return true;
    }

    false
}

// Returns the LSDB that holds LSAs of the given type.
pub(crate) fn lsdb_get_by_lsa_type(
    area_idx: AreaIndex,
    lsa_type: LsaType,
) -> Option<LsdbIndex> {
    match lsa_type.scope() {
        LsaScope::Area => Some(LsdbIndex::Area(area_idx)),
        LsaScope::As => Some(LsdbIndex::As),
        LsaScope::Unknown => None,
    }
}

// Checks if the given LSA was received via flooding less than MinLSArrival
// seconds ago.
pub(crate) fn lsa_min_arrival_check(lse: &LsaEntry) -> bool {
    lse.flags.contains(LsaEntryFlags::RECEIVED)
        && lse.install_time < LSA_MIN_ARRIVAL
}

// Checks if the given LSA was originated less than MinLSInterval seconds ago.
fn lsa_min_orig_interval_check(lse: &LsaEntry) -> bool {
    !lse.flags.contains(LsaEntryFlags::RECEIVED)
        && lse.install_time < LSA_MIN_INTERVAL
}

// Installs the provided LSA to the specified LSDB.
//
// Returns the index of the new LSA entry and whether the routing table needs
// to be recalculated.
pub(crate) fn install(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa: Lsa,
) -> (LsaEntryIndex, bool) {
    Debug::LsaInstall(&lsa.hdr).log();

    // Remove old instance (if any) from all neighbors' Link state
    // retransmission lists.
    rxmt_lists_remove(arenas, lsdb_idx, &lsa.hdr);

    // Add LSA entry to LSDB, replacing the old instance.
    let (_, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        lsdb_idx,
    );
    let (lse_idx, old_lse) = lsdb.insert(&mut arenas.lsa_entries, lsa);
    let lse = &mut arenas.lsa_entries[lse_idx];

    // Check if the LSA is self-originated and mark it as such.
    if lsa_is_self_originated(
        &lse.data,
        instance.state.router_id,
        &arenas.interfaces,
    ) {
        lse.flags.insert(LsaEntryFlags::SELF_ORIGINATED);
    }

    // RFC 2328 - Section 13.2:
    // "The contents of the new LSA should be compared to the old instance, if
    // present. If there is no difference, there is no need to recalculate the
    // routing table".
    //
    // Additionally, do not recalculate the routing table in the following
    // cases:
    // * The type of the new LSA is unknown
    // * The new LSA is a self-originated summary
    let mut content_change = true;
    if let Some(old_lse) = &old_lse
        && lsa_same_contents(&old_lse.data, &lse.data)
    {
        content_change = false;
    }
    let self_orig_summary = lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
        && matches!(
            lse.data.hdr.lsa_type.type_code(),
            Some(LsaTypeCode::SummaryNetwork | LsaTypeCode::SummaryRouter)
        );
    let route_recalc =
        content_change
        && !matches!(lse.data.body, LsaBody::Unknown(_))
        && !self_orig_summary;

    // Keep track of self-originated Network-LSAs in the corresponding
    // interface structures. This is necessary to allow flushing those LSAs
    // later, since the DR status might change.
    let hdr = lse.data.hdr;
    if hdr.lsa_type.type_code() == Some(LsaTypeCode::Network)
        && hdr.adv_rtr == instance.state.router_id
        && let LsdbIndex::Area(area_idx) = lsdb_idx
    {
        let area = &arenas.areas[area_idx];
        if let Some(iface_idx) = area.interfaces.indexes().find(|iface_idx| {
            let iface = &arenas.interfaces[*iface_idx];
            !iface.is_virtual_link() && iface.config.addr.ip() == hdr.lsa_id
        }) {
            let iface = &mut arenas.interfaces[iface_idx];
            iface.state.network_lsa_self =
                (!hdr.is_maxage()).then_some(hdr.key());
        }
    }

    // Schedule SPF run if necessary.
    if route_recalc {
        instance.state.spf_pending = true;
    }

    (lse_idx, route_recalc)
}

// Originates the provided LSA.
pub(crate) fn originate(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa: Lsa,
) {
    let (_, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        lsdb_idx,
    );

    // When an attempt is made to increment the sequence number past the
    // maximum value of MaxSequenceNumber, the current instance of the LSA
    // must first be flushed from the routing domain. This is done by
    // prematurely aging the LSA and reflooding it. As soon as this flood
    // has been acknowledged by all adjacent neighbors, a new instance can
    // be originated with sequence number of InitialSequenceNumber.
    let lsa_key = lsa.hdr.key();
    if let Some((old_lse_idx, _)) = lsdb.get(&arenas.lsa_entries, &lsa_key)
        && lsa.hdr.seq_no == LSA_RESERVED_SEQ_NO
    {
        // Record LSA that will be originated later and then flush the
        // existing instance.
        lsdb.seqno_wrapping.insert(lsa_key, lsa);
        let reason = LsaFlushReason::PrematureAging;
        flush(instance, arenas, lsdb_idx, old_lse_idx, reason);
        return;
    }

    Debug::LsaOriginate(&lsa.hdr).log();

    let (lse_idx, _) = install(instance, arenas, lsdb_idx, lsa);
    let lsa = arenas.lsa_entries[lse_idx].data.clone();
    flood(
        instance,
        &arenas.areas,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        lsdb_idx,
        &lsa,
        None,
    );
}

// Attempts to originate the provided LSA, but only if it passes a few checks.
pub(crate) fn originate_check(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    options: Options,
    lsa_id: Ipv4Addr,
    lsa_body: LsaBody,
) {
    let (lsdb_id, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        lsdb_idx,
    );
    let adv_rtr = instance.state.router_id;
    let lsa_key = LsaKey::new(lsa_body.lsa_type(), adv_rtr, lsa_id);

    // Get next sequence number.
    let seq_no = lsdb
        .get(&arenas.lsa_entries, &lsa_key)
        .map(|(_, old_lse)| old_lse.data.hdr.seq_no.wrapping_add(1))
        .unwrap_or(LSA_INIT_SEQ_NO);

    // Make new LSA.
    let lsa = Lsa::new(0, options, lsa_id, adv_rtr, seq_no, lsa_body);

    // Check if an instance of this LSA already exists in the LSDB.
    if let Some((_, old_lse)) = lsdb.get(&arenas.lsa_entries, &lsa_key) {
        // If an LSA with identical contents already exists in the LSDB, skip
        // originating a new one (as per section 12.4 of RFC 2328).
        //
        // However, if the database copy was received through flooding, proceed
        // to originate a new instance with an updated sequence number.
        if lsa_same_contents(&old_lse.data, &lsa)
            && !old_lse.flags.contains(LsaEntryFlags::RECEIVED)
        {
            // Cancel any pending origination with different contents.
            lsdb.delayed_orig.remove(&lsa_key);
            return;
        }

        // Perform the MinLSInterval check.
        if lsdb.delayed_orig.contains_key(&lsa_key)
            || lsa_min_orig_interval_check(old_lse)
        {
            Debug::LsaOriginateMinInterval(&lsa.hdr).log();

            match lsdb.delayed_orig.entry(lsa_key) {
                btree_map::Entry::Occupied(mut o) => {
                    // Update the LSA that will be originated, but keep the
                    // current timeout.
                    let ldo = o.get_mut();
                    ldo.data = lsa;
                }
                btree_map::Entry::Vacant(v) => {
                    // Start timer to postpone originating the LSA.
                    let remaining = LSA_MIN_INTERVAL
                        .saturating_sub(old_lse.install_time);
                    let timeout = tasks::lsa_orig_delayed_timer(
                        instance.sched,
                        lsdb_id,
                        lsa_key,
                        Duration::from_secs(remaining.into()),
                    );
                    v.insert(LsaDelayedOrig { data: lsa, timeout });
                }
            }
            return;
        }
    }

    // Effectively originate the LSA.
    originate(instance, arenas, lsdb_idx, lsa);
}

// Flushes LSA from the LSDB.
pub(crate) fn flush(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lse_idx: LsaEntryIndex,
    reason: LsaFlushReason,
) {
    // Do not flush the same LSA more than once.
    let lse = &arenas.lsa_entries[lse_idx];
    if lse.data.hdr.is_maxage() {
        return;
    }

    Debug::LsaFlush(&lse.data.hdr, reason).log();

    // Set the LSA age to MaxAge.
    let mut lsa = lse.data.clone();
    lsa.set_maxage();
    let lsa_key = lsa.key();

    // Install updated LSA to clear rxmt lists and rerun route calculations.
    let (lse_idx, _) = install(instance, arenas, lsdb_idx, lsa);

    // Reflood updated LSA.
    let lsa = arenas.lsa_entries[lse_idx].data.clone();
    flood(
        instance,
        &arenas.areas,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        lsdb_idx,
        &lsa,
        None,
    );

    // Remove pending LSA origination, if any.
    let (_, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        lsdb_idx,
    );
    lsdb.delayed_orig.remove(&lsa_key);
}

// Originates a new instance of a self-originated LSA, keeping its contents.
pub(crate) fn refresh(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lse_idx: LsaEntryIndex,
) {
    let lse = &arenas.lsa_entries[lse_idx];

    Debug::LsaRefresh(&lse.data.hdr).log();

    let lsa = Lsa::new(
        0,
        lse.data.hdr.options,
        lse.data.hdr.lsa_id,
        lse.data.hdr.adv_rtr,
        lse.data.hdr.seq_no.wrapping_add(1),
        lse.data.body.clone(),
    );
    originate(instance, arenas, lsdb_idx, lsa);
}

// Ages all LSDBs by one second.
//
// Self-originated LSAs are refreshed every LSRefreshTime seconds, LSAs that
// reach MaxAge are reflooded, and MaxAge LSAs that are no longer needed are
// removed from the database.
pub(crate) fn age_tick(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    let lsdb_idxs = arenas
        .areas
        .indexes()
        .map(LsdbIndex::Area)
        .chain(std::iter::once(LsdbIndex::As))
        .collect::<Vec<_>>();

    // Increment the age of all LSAs.
    let mut refresh_list = vec![];
    let mut expiry_list = vec![];
    for lsdb_idx in lsdb_idxs.iter().copied() {
        let (_, lsdb) =
            lsdb_index(&instance.state.lsdb, &arenas.areas, lsdb_idx);
        for lse_idx in lsdb.indexes() {
            let lse = &mut arenas.lsa_entries[lse_idx];
            lse.install_time = lse.install_time.saturating_add(1);
            if lse.data.hdr.is_maxage() {
                continue;
            }
            if lse.data.hdr.age + 1 >= LSA_MAX_AGE {
                expiry_list.push((lsdb_idx, lse_idx));
                continue;
            }
            lse.data.hdr.age += 1;

            if lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
                && !lse.flags.contains(LsaEntryFlags::RECEIVED)
                && lse.data.hdr.age >= LSA_REFRESH_TIME
            {
                refresh_list.push((lsdb_idx, lse_idx));
            }
        }
    }

    // Refresh self-originated LSAs.
    for (lsdb_idx, lse_idx) in refresh_list {
        refresh(instance, arenas, lsdb_idx, lse_idx);
    }

    // Reflood LSAs that have just reached MaxAge.
    for (lsdb_idx, lse_idx) in expiry_list {
        if arenas.lsa_entries.get(lse_idx).is_some() {
            let reason = LsaFlushReason::Expiry;
            flush(instance, arenas, lsdb_idx, lse_idx, reason);
        }
    }

    // Age the neighbors' lists of recently transmitted LSAs.
    for (_, nbr) in arenas.neighbors.iter_mut() {
        nbr.lists.ls_transmitted.retain(|_, age| {
            *age += 1;
            *age < LSA_MIN_ARRIVAL
        });
    }

    // Remove MaxAge LSAs that are no longer needed.
    for lsdb_idx in lsdb_idxs {
        maxage_sweep(instance, arenas, lsdb_idx);
    }
}

// ===== LSA origination =====

// (Re)originates or flushes the LSAs affected by the given event.
pub(crate) fn lsa_orig_event(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    event: LsaOriginateEvent,
) -> Result<(), Error> {
    match event {
        LsaOriginateEvent::AreaStart { area_id } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            lsa_orig_router(area, instance, arenas);
        }
        LsaOriginateEvent::InterfaceStateChange { .. }
        | LsaOriginateEvent::VirtualLinkChange => {
            // (Re)originate Router-LSA in all areas since the ABR status
            // might have changed.
            for area in arenas.areas.iter() {
                lsa_orig_router(area, instance, arenas);
            }
        }
        LsaOriginateEvent::InterfaceDrChange { area_id, iface_id }
        | LsaOriginateEvent::NeighborToFromFull { area_id, iface_id } => {
            // Adjacencies over virtual links also change the V-bit of the
            // transit area's Router-LSA.
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            let (_, iface) =
                area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;
            if iface.is_virtual_link() {
                for area in arenas.areas.iter() {
                    lsa_orig_router(area, instance, arenas);
                }
                return Ok(());
            }

            // (Re)originate Router-LSA.
            lsa_orig_router(area, instance, arenas);

            // (Re)originate or flush Network-LSA.
            if iface.state.ism_state == ism::State::Dr
                && iface
                    .state
                    .neighbors
                    .iter(&arenas.neighbors)
                    .any(|nbr| nbr.state == nsm::State::Full)
            {
                lsa_orig_network(iface, area, instance, arenas);
            } else {
                lsa_flush_network(iface, area, instance, arenas);
            }
        }
        LsaOriginateEvent::SelfOriginatedLsaRcvd { lsdb_id, lse_id } => {
            // Check if the received self-originated LSA needs to be
            // reoriginated or flushed.
            process_self_originated_lsa(instance, arenas, lsdb_id, lse_id)?;
        }
    }

    Ok(())
}

// (Re)originates the AS-external-LSA of the given external route.
pub(crate) fn lsa_orig_external(
    instance: &InstanceUpView<'_>,
    route: &ExternalRouteCfg,
) {
    let mut flags = LsaAsExternalFlags::empty();
    if route.metric_type == ExternalMetricType::Type2 {
        flags.insert(LsaAsExternalFlags::E);
    }
    let lsa_body = LsaBody::AsExternal(LsaAsExternal::new(
        route.prefix.mask(),
        flags,
        route.metric,
        route.fwd_addr,
        route.tag,
    ));
    instance.tx.lsa_orig_check(
        LsdbId::As,
        Options::E,
        route.prefix.network(),
        lsa_body,
    );
}

// Flushes the AS-external-LSA of the given external route, if any.
pub(crate) fn lsa_flush_external(
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
    prefix: Ipv4Network,
) {
    let lsa_key = LsaKey::new(
        LsaTypeCode::AsExternal.into(),
        instance.state.router_id,
        prefix.network(),
    );
    if let Some((_, lse)) = instance.state.lsdb.get(lsa_entries, &lsa_key) {
        instance.tx.lsa_flush(
            LsdbId::As,
            lse.id,
            LsaFlushReason::PrematureAging,
        );
    }
}

fn lsa_orig_router(
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let lsdb_id = LsdbId::Area(area.id);

    // Router-LSA's flags.
    let mut flags = LsaRouterFlags::empty();
    if arenas.areas.is_abr(&arenas.interfaces) {
        flags.insert(LsaRouterFlags::B);
    }
    if !instance.config.external_routes.is_empty()
        && area.external_routing_capability()
    {
        flags.insert(LsaRouterFlags::E);
    }
    if virtual_link_transit_check(area, arenas) {
        flags.insert(LsaRouterFlags::V);
    }

    // Router-LSA's links.
    let mut links = vec![];
    for iface in area
        .interfaces
        .iter(&arenas.interfaces)
        // Skip interfaces in the "Down" state.
        .filter(|iface| !iface.is_down())
    {
        let addr = iface.config.addr;

        // Add a host link to interfaces in the Loopback state.
        if iface.state.ism_state == ism::State::Loopback {
            links.push(LsaRouterLink::new(
                LsaRouterLinkType::StubNetwork,
                addr.ip(),
                Ipv4Addr::BROADCAST,
                0,
            ));
            continue;
        }

        let stub_link = LsaRouterLink::new(
            LsaRouterLinkType::StubNetwork,
            addr.network(),
            addr.mask(),
            iface.config.cost,
        );

        // Passive interfaces don't form adjacencies.
        if iface.config.passive {
            links.push(stub_link);
            continue;
        }

        match iface.config.if_type {
            InterfaceType::PointToPoint | InterfaceType::PointToMultipoint => {
                // Add a Type-1 link (p2p) for each fully adjacent neighbor.
                links.extend(
                    iface
                        .state
                        .neighbors
                        .iter(&arenas.neighbors)
                        .filter(|nbr| nbr.state == nsm::State::Full)
                        .map(|nbr| {
                            LsaRouterLink::new(
                                LsaRouterLinkType::PointToPoint,
                                nbr.router_id,
                                addr.ip(),
                                iface.config.cost,
                            )
                        }),
                );
                links.push(stub_link);
            }
            InterfaceType::Broadcast | InterfaceType::NonBroadcast => {
                let dr_full = iface.state.dr.is_some_and(|dr| {
                    if iface.state.ism_state == ism::State::Dr {
                        iface
                            .state
                            .neighbors
                            .iter(&arenas.neighbors)
                            .any(|nbr| nbr.state == nsm::State::Full)
                    } else {
                        iface
                            .state
                            .neighbors
                            .get_by_addr(&arenas.neighbors, dr)
                            .is_some_and(|(_, nbr)| {
                                nbr.state == nsm::State::Full
                            })
                    }
                });
                match iface.state.dr {
                    // Add a Type-2 (transit) link.
                    Some(dr)
                        if dr_full
                            && iface.state.ism_state != ism::State::Waiting =>
                    {
                        links.push(LsaRouterLink::new(
                            LsaRouterLinkType::TransitNetwork,
                            dr,
                            addr.ip(),
                            iface.config.cost,
                        ));
                    }
                    _ => links.push(stub_link),
                }
            }
            InterfaceType::VirtualLink => {
                // Add a Type-4 link for fully adjacent virtual links.
                let Some(path) =
                    iface.vlink.as_ref().and_then(|vlink| vlink.path.as_ref())
                else {
                    continue;
                };
                links.extend(
                    iface
                        .state
                        .neighbors
                        .iter(&arenas.neighbors)
                        .filter(|nbr| nbr.state == nsm::State::Full)
                        .map(|nbr| {
                            LsaRouterLink::new(
                                LsaRouterLinkType::VirtualLink,
                                nbr.router_id,
                                path.src,
                                path.cost,
                            )
                        }),
                );
            }
        }
    }

    // Add host routes.
    links.extend(area.config.host_routes.iter().map(|host| {
        LsaRouterLink::new(
            LsaRouterLinkType::StubNetwork,
            host.addr,
            Ipv4Addr::BROADCAST,
            host.cost,
        )
    }));

    // (Re)originate Router-LSA.
    let lsa_body = LsaBody::Router(LsaRouter { flags, links });
    instance.tx.lsa_orig_check(
        lsdb_id,
        area.options(),
        instance.state.router_id,
        lsa_body,
    );
}

fn lsa_orig_network(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let lsdb_id = LsdbId::Area(area.id);

    // The Link State ID for a network-LSA is the IP interface address of the
    // Designated Router.
    let lsa_id = iface.config.addr.ip();
    let mask = iface.config.addr.mask();

    // Network-LSA's attached routers.
    let myself = instance.state.router_id;
    let nbrs = iface
        .state
        .neighbors
        .iter(&arenas.neighbors)
        .filter(|nbr| nbr.state == nsm::State::Full)
        .map(|nbr| nbr.router_id);
    let attached_rtrs = std::iter::once(myself).chain(nbrs).collect();

    // (Re)originate Network-LSA.
    let lsa_body = LsaBody::Network(LsaNetwork::new(mask, attached_rtrs));
    instance
        .tx
        .lsa_orig_check(lsdb_id, area.options(), lsa_id, lsa_body);
}

fn lsa_flush_network(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    if let Some(lsa_key) = &iface.state.network_lsa_self
        && let Some((_, lse)) =
            area.state.lsdb.get(&arenas.lsa_entries, lsa_key)
    {
        instance.tx.lsa_flush(
            LsdbId::Area(area.id),
            lse.id,
            LsaFlushReason::PrematureAging,
        );
    }
}

fn process_self_originated_lsa(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
) -> Result<(), Error> {
    // Lookup LSDB and LSA entry.
    let (lsdb_idx, lsdb) =
        lsdb_get(&instance.state.lsdb, &arenas.areas, lsdb_id)?;
    let (_, lse) = lsdb.get_by_id(&arenas.lsa_entries, lse_id)?;
    let hdr = lse.data.hdr;
    let area = lsdb_idx.into_area().ok().map(|idx| &arenas.areas[idx]);

    // Check whether the LSA should still be advertised.
    let flush = match (hdr.lsa_type.type_code(), area) {
        (Some(LsaTypeCode::Router), Some(area)) => {
            lsa_orig_router(area, instance, arenas);
            false
        }
        (Some(LsaTypeCode::Network), Some(area)) => {
            // Check if the router is still the DR for the network.
            match area
                .interfaces
                .iter(&arenas.interfaces)
                .filter(|iface| !iface.is_virtual_link())
                .find(|iface| iface.config.addr.ip() == hdr.lsa_id)
                .filter(|iface| iface.state.ism_state == ism::State::Dr)
                .filter(|_| hdr.adv_rtr == instance.state.router_id)
            {
                Some(iface) => {
                    lsa_orig_network(iface, area, instance, arenas);
                    false
                }
                None => true,
            }
        }
        (Some(LsaTypeCode::SummaryNetwork), Some(area)) => {
            match area
                .state
                .net_summaries
                .iter()
                .find(|(_, (lsa_id, _))| *lsa_id == hdr.lsa_id)
                .filter(|_| hdr.adv_rtr == instance.state.router_id)
            {
                Some((prefix, (lsa_id, summary))) => {
                    let lsa_body = LsaBody::SummaryNetwork(LsaSummary::new(
                        prefix.mask(),
                        summary.metric,
                    ));
                    instance.tx.lsa_orig_check(
                        lsdb_id,
                        area.options(),
                        *lsa_id,
                        lsa_body,
                    );
                    false
                }
                None => true,
            }
        }
        (Some(LsaTypeCode::SummaryRouter), Some(area)) => {
            match area
                .state
                .rtr_summaries
                .get(&hdr.lsa_id)
                .filter(|_| hdr.adv_rtr == instance.state.router_id)
            {
                Some((lsa_id, summary)) => {
                    let lsa_body = LsaBody::SummaryRouter(LsaSummary::new(
                        Ipv4Addr::UNSPECIFIED,
                        summary.metric,
                    ));
                    instance.tx.lsa_orig_check(
                        lsdb_id,
                        summary.options,
                        *lsa_id,
                        lsa_body,
                    );
                    false
                }
                None => true,
            }
        }
        (Some(LsaTypeCode::AsExternal), None) => {
            match instance
                .config
                .external_routes
                .iter()
                .find(|route| route.prefix.network() == hdr.lsa_id)
                .filter(|_| hdr.adv_rtr == instance.state.router_id)
            {
                Some(route) => {
                    lsa_orig_external(instance, route);
                    false
                }
                None => true,
            }
        }
        _ => true,
    };

    if flush {
        instance
            .tx
            .lsa_flush(lsdb_id, lse_id, LsaFlushReason::PrematureAging);
    }

    Ok(())
}

// Checks whether the router is the endpoint of a fully adjacent virtual link
// that uses the given area as its transit area.
fn virtual_link_transit_check(
    area: &Area,
    arenas: &InstanceArenas,
) -> bool {
    if area.is_backbone() {
        return false;
    }

    arenas
        .areas
        .backbone()
        .into_iter()
        .flat_map(|(_, backbone)| backbone.interfaces.iter(&arenas.interfaces))
        .filter(|iface| {
            iface.vlink.as_ref().is_some_and(|vlink| {
                vlink.transit_area_id == area.area_id
            })
        })
        .any(|iface| {
            iface
                .state
                .neighbors
                .iter(&arenas.neighbors)
                .any(|nbr| nbr.state == nsm::State::Full)
        })
}

// ===== helper functions =====

// Removes MaxAge LSAs that are no longer contained on any neighbor's Link state
// retransmission list.
fn maxage_sweep(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
) {
    // Skip discarding MaxAge LSAs if any of the router's neighbors are in
    // states Exchange or Loading.
    if arenas.neighbors.iter().any(|(_, nbr)| {
        matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading)
    }) {
        return;
    }

    let (_, lsdb) = lsdb_index(&instance.state.lsdb, &arenas.areas, lsdb_idx);
    let lse_idxs = lsdb
        .iter(&arenas.lsa_entries)
        .filter(|(_, lse)| lse.data.hdr.is_maxage())
        .filter(|(_, lse)| {
            let lsa_key = lse.data.hdr.key();
            !arenas
                .neighbors
                .iter()
                .any(|(_, nbr)| nbr.lists.ls_rxmt.contains_key(&lsa_key))
        })
        .map(|(lse_idx, _)| lse_idx)
        .collect::<Vec<_>>();

    for lse_idx in lse_idxs {
        let (_, lsdb) = lsdb_index_mut(
            &mut instance.state.lsdb,
            &mut arenas.areas,
            lsdb_idx,
        );
        let lsa_key = arenas.lsa_entries[lse_idx].data.hdr.key();

        Debug::LsaPurge(&arenas.lsa_entries[lse_idx].data.hdr).log();

        // Delete or originate new instance of the LSA depending whether it's
        // wrapping its sequence number.
        if let Some(lsa) = lsdb.seqno_wrapping.remove(&lsa_key) {
            let lsa = Lsa::new(
                0,
                lsa.hdr.options,
                lsa.hdr.lsa_id,
                lsa.hdr.adv_rtr,
                LSA_INIT_SEQ_NO,
                lsa.body,
            );
            lsdb.delete(&mut arenas.lsa_entries, lse_idx);
            originate(instance, arenas, lsdb_idx, lsa);
        } else {
            lsdb.delete(&mut arenas.lsa_entries, lse_idx);
        }
        instance.state.spf_pending = true;
    }
}

// Removes old instance of the given LSA from all neighbors' Link state
// retransmission lists.
fn rxmt_lists_remove(
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa_hdr: &LsaHdr,
) {
    let lsa_key = lsa_hdr.key();
    for area_idx in arenas.areas.indexes() {
        let area = &arenas.areas[area_idx];

        // Filter by LSA area.
        if let LsdbIndex::Area(lsdb_area_idx) = lsdb_idx
            && area_idx != lsdb_area_idx
        {
            continue;
        }

        for iface_idx in area.interfaces.indexes() {
            let iface = &arenas.interfaces[iface_idx];

            // Iterate over all neighbors from this interface.
            for nbr_idx in iface.state.neighbors.indexes() {
                let nbr = &mut arenas.neighbors[nbr_idx];

                // Remove LSA from rxmt list as long as it's an older version.
                if let btree_map::Entry::Occupied(o) =
                    nbr.lists.ls_rxmt.entry(lsa_key)
                    && lsa_compare(o.get(), lsa_hdr) == Ordering::Less
                {
                    o.remove();
                    nbr.rxmt_lsupd_stop_check();
                }
            }
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::packet::lsa::LsaRouter;

    fn hdr(seq_no: u32, cksum: u16, age: u16) -> LsaHdr {
        LsaHdr {
            age,
            options: Options::E,
            lsa_type: LsaTypeCode::Router.into(),
            lsa_id: Ipv4Addr::new(1, 1, 1, 1),
            adv_rtr: Ipv4Addr::new(1, 1, 1, 1),
            seq_no,
            cksum,
            length: 24,
        }
    }

    #[test]
    fn compare_seq_no_is_signed() {
        let a = hdr(LSA_INIT_SEQ_NO, 0, 0);
        let b = hdr(LSA_INIT_SEQ_NO + 1, 0, 0);
        assert_eq!(lsa_compare(&a, &b), Ordering::Less);

        let a = hdr(LSA_MAX_SEQ_NO, 0, 0);
        let b = hdr(LSA_INIT_SEQ_NO, 0, 0);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn compare_cksum_then_maxage() {
        let a = hdr(5, 10, 100);
        let b = hdr(5, 20, 100);
        assert_eq!(lsa_compare(&a, &b), Ordering::Less);

        let a = hdr(5, 10, LSA_MAX_AGE);
        let b = hdr(5, 10, 100);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
        assert_eq!(lsa_compare(&b, &a), Ordering::Less);
    }

    #[test]
    fn compare_age_difference() {
        // Younger wins when ages differ by more than MaxAgeDiff.
        let a = hdr(5, 10, 10);
        let b = hdr(5, 10, 10 + LSA_MAX_AGE_DIFF + 1);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);

        let a = hdr(5, 10, 10);
        let b = hdr(5, 10, 10 + LSA_MAX_AGE_DIFF);
        assert_eq!(lsa_compare(&a, &b), Ordering::Equal);
    }

    #[test]
    fn compare_is_a_total_order() {
        let hdrs = [
            hdr(3, 0, 0),
            hdr(3, 0, 1000),
            hdr(3, 0, 2000),
            hdr(3, 0, LSA_MAX_AGE),
            hdr(3, 1, 0),
            hdr(4, 0, 0),
            hdr(LSA_INIT_SEQ_NO, 0, 0),
            hdr(LSA_MAX_SEQ_NO, 0, 3000),
        ];
        for a in &hdrs {
            for b in &hdrs {
                assert_eq!(lsa_compare(a, b), lsa_compare(b, a).reverse());
                for c in &hdrs {
                    if lsa_compare(a, b) == Ordering::Greater
                        && lsa_compare(b, c) == Ordering::Greater
                    {
                        assert_eq!(lsa_compare(a, c), Ordering::Greater);
                    }
                }
            }
        }
    }

    #[test]
    fn same_contents() {
        let body = LsaBody::Router(LsaRouter::default());
        let rid = Ipv4Addr::new(1, 1, 1, 1);
        let a = Lsa::new(0, Options::E, rid, rid, 5, body.clone());
        let mut b = Lsa::new(300, Options::E, rid, rid, 6, body.clone());
        assert!(lsa_same_contents(&a, &b));

        b.set_maxage();
        assert!(!lsa_same_contents(&a, &b));

        let c = Lsa::new(0, Options::empty(), rid, rid, 5, body);
        assert!(!lsa_same_contents(&a, &c));
    }

    #[test]
    fn lsa_type_validity() {
        let external = LsaTypeCode::AsExternal.into();
        assert!(lsa_type_is_valid(Some(AreaType::Normal), external));
        assert!(!lsa_type_is_valid(Some(AreaType::Stub), external));
        assert!(lsa_type_is_valid(None, external));
        assert!(!lsa_type_is_valid(None, LsaType(11)));
    }
}
