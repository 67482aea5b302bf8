//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;

use crate::area::Area;
use crate::collections::{
    Areas, Arena, InterfaceIndex, LsdbIndex, NeighborIndex,
};
use crate::instance::InstanceUpView;
use crate::interface::{Interface, ism};
use crate::lsdb;
use crate::neighbor::{Neighbor, nsm};
use crate::packet::lsa::Lsa;

// ===== global functions =====

// Floods the given LSA out the eligible interfaces (RFC 2328, Section 13.3).
//
// `src` identifies the interface and neighbor the LSA was received from, if
// any. Returns whether the LSA was flooded back out the receiving interface.
pub(crate) fn flood(
    instance: &InstanceUpView<'_>,
    areas: &Areas,
    interfaces: &mut Arena<Interface>,
    neighbors: &mut Arena<Neighbor>,
    lsdb_idx: LsdbIndex,
    lsa: &Lsa,
    src: Option<(InterfaceIndex, NeighborIndex)>,
) -> bool {
    match lsdb_idx {
        LsdbIndex::Area(area_idx) => {
            let area = &areas[area_idx];
            flood_area(area, instance, interfaces, neighbors, lsa, src)
        }
        LsdbIndex::As => {
            flood_as(instance, areas, interfaces, neighbors, lsa, src)
        }
    }
}

// ===== helper functions =====

fn flood_interface(
    iface_idx: InterfaceIndex,
    area: &Area,
    instance: &InstanceUpView<'_>,
    interfaces: &mut Arena<Interface>,
    neighbors: &mut Arena<Neighbor>,
    lsa: &Lsa,
    src: Option<(InterfaceIndex, NeighborIndex)>,
) -> bool {
    let iface = &mut interfaces[iface_idx];
    let lsa_key = lsa.hdr.key();

    // AS-external-LSAs never cross virtual links.
    if !iface.lsa_type_is_valid(area, lsa.hdr.lsa_type) {
        return false;
    }

    // 1) Each of the neighbors attached to this interface are examined.
    let mut rxmt_added = false;
    for nbr_idx in iface.state.neighbors.indexes().collect::<Vec<_>>() {
        let nbr = &mut neighbors[nbr_idx];

        // 1.a) Skip neighbors in a lesser state than Exchange.
        if nbr.state < nsm::State::Exchange {
            continue;
        }

        // 1.b) Handle adjacencies that are not full.
        if nbr.state != nsm::State::Full {
            // Examine the Link state request list associated with this
            // adjacency.
            let req_hdr = nbr
                .lists
                .ls_request
                .get(&lsa_key)
                .or_else(|| nbr.lists.ls_request_pending.get(&lsa_key))
                .copied();
            if let Some(req_hdr) = req_hdr {
                let cmp = lsdb::lsa_compare(&lsa.hdr, &req_hdr);
                if cmp == Ordering::Less {
                    continue;
                }

                // Delete the LSA from the Link state request list.
                nbr.lists.ls_request.remove(&lsa_key);
                nbr.lists.ls_request_pending.remove(&lsa_key);

                // Check if the neighbor can transition to Full.
                nbr.loading_done_check(iface, area, instance);

                // Examine the next neighbor if the two copies are the same
                // instance.
                if cmp == Ordering::Equal {
                    continue;
                }
            }
        }

        // 1.c) If the new LSA was received from this neighbor, examine the
        // next neighbor.
        if let Some((_, nbr_src_idx)) = src
            && nbr_src_idx == nbr_idx
        {
            continue;
        }

        // 1.d) Add LSA to the neighbor's rxmt list, replacing any older
        // instance.
        nbr.lists.ls_rxmt.insert(lsa_key, lsa.hdr);
        nbr.rxmt_lsupd_start_check(iface, area, instance);
        rxmt_added = true;
    }

    // 2) If in the previous step, the LSA was NOT added to any of the Link
    // state retransmission lists, there is no need to flood the LSA out the
    // interface and the next interface should be examined.
    if !rxmt_added {
        return false;
    }

    let mut flooded_back = false;
    if let Some((iface_src_idx, nbr_src_idx)) = src
        && iface_src_idx == iface_idx
    {
        let nbr_src_addr = neighbors[nbr_src_idx].src;

        // 3) If the new LSA was received on this interface, and it was
        // received from either the DR or the BDR, chances are that all the
        // neighbors have received the LSA already.
        if iface.state.dr == Some(nbr_src_addr)
            || iface.state.bdr == Some(nbr_src_addr)
        {
            return false;
        }

        // 4) If the new LSA was received on this interface, and the
        // interface state is BDR, examine the next interface.
        if iface.state.ism_state == ism::State::Backup {
            return false;
        }

        flooded_back = true;
    }

    // 5) Flood the LSA out the interface. The transmission is deferred so
    // that more LSAs can be grouped into the same packet.
    iface.enqueue_ls_update(area, instance, lsa.clone());

    flooded_back
}

fn flood_area(
    area: &Area,
    instance: &InstanceUpView<'_>,
    interfaces: &mut Arena<Interface>,
    neighbors: &mut Arena<Neighbor>,
    lsa: &Lsa,
    src: Option<(InterfaceIndex, NeighborIndex)>,
) -> bool {
    let mut flooded_back = false;
    for iface_idx in area.interfaces.indexes() {
        flooded_back |= flood_interface(
            iface_idx, area, instance, interfaces, neighbors, lsa, src,
        );
    }

    flooded_back
}

fn flood_as(
    instance: &InstanceUpView<'_>,
    areas: &Areas,
    interfaces: &mut Arena<Interface>,
    neighbors: &mut Arena<Neighbor>,
    lsa: &Lsa,
    src: Option<(InterfaceIndex, NeighborIndex)>,
) -> bool {
    let mut flooded_back = false;
    for area in areas
        .iter()
        // AS-external-LSAs aren't flooded into stub areas.
        .filter(|area| {
            lsdb::lsa_type_is_valid(
                Some(area.config.area_type),
                lsa.hdr.lsa_type,
            )
        })
    {
        flooded_back |=
            flood_area(area, instance, interfaces, neighbors, lsa, src);
    }

    flooded_back
}
