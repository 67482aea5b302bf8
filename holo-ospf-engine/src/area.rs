//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::collections::{
    AreaId, AreaIndex, Areas, Arena, Interfaces, Lsdb, LsdbId,
};
use crate::config::{AreaCfg, RangeCfg};
use crate::debug::{Debug, LsaFlushReason};
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::lsdb::{LSA_INFINITY, LsaEntry, LsaEntryFlags};
use crate::packet::Options;
use crate::packet::lsa::{
    LsaBody, LsaKey, LsaRouterFlags, LsaSummary, LsaType, LsaTypeCode,
};
use crate::route::{
    Nexthops, PathType, RouteNetFlags, RouteRtr, SummaryNet, SummaryNetFlags,
    SummaryRtr,
};
use crate::spf::{Vertex, VertexId};

// OSPF area.
#[derive(Debug)]
pub struct Area {
    // ID.
    pub id: AreaId,
    // Area ID.
    pub area_id: Ipv4Addr,
    // Area configuration data.
    pub config: AreaCfg,
    // Area state data.
    pub state: AreaState,
    // Area ranges.
    pub ranges: BTreeMap<Ipv4Network, Range>,
    // Area interfaces.
    pub interfaces: Interfaces,
}

// OSPF area state.
#[derive(Debug, Default)]
pub struct AreaState {
    // LSDB of area-scope LSAs.
    pub lsdb: Lsdb,
    // Indicates whether the area can carry data traffic that neither
    // originates nor terminates in the area itself.
    pub transit_capability: bool,
    // Shortest-path tree.
    pub spt: BTreeMap<VertexId, Vertex>,
    // Table of all routers in the area.
    pub routers: BTreeMap<Ipv4Addr, RouteRtr>,
    // Table of summaries originated into this area, along with their LSA IDs.
    pub net_summaries: BTreeMap<Ipv4Network, (Ipv4Addr, SummaryNet)>,
    pub rtr_summaries: BTreeMap<Ipv4Addr, (Ipv4Addr, SummaryRtr)>,
}

// OSPF area type.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AreaType {
    #[default]
    Normal,
    Stub,
}

// OSPF area range.
#[derive(Debug)]
pub struct Range {
    pub config: RangeCfg,
    // Cost of the most expensive component network (`None` when the range
    // is inactive).
    pub cost: Option<u32>,
}

// Outcome of the allocation of a Link State ID for a summary-LSA (RFC 2328,
// Appendix E).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LsaIdAllocation {
    // The prefix can be advertised using the given Link State ID.
    Assigned(Ipv4Addr),
    // The prefix takes over the Link State ID of an existing, more specific
    // summary, which must be reoriginated using a new Link State ID.
    Relocate {
        lsa_id: Ipv4Addr,
        existing: Ipv4Network,
        existing_lsa_id: Ipv4Addr,
    },
    // No Link State ID is available for the prefix.
    Exhausted,
}

// ===== impl Area =====

impl Area {
    // Create new area.
    pub(crate) fn new(id: AreaId, config: AreaCfg) -> Area {
        let ranges = config
            .ranges
            .iter()
            .map(|range| {
                let range = Range {
                    config: range.clone(),
                    cost: None,
                };
                (range.config.prefix, range)
            })
            .collect();

        Area {
            id,
            area_id: config.area_id,
            config,
            state: Default::default(),
            ranges,
            interfaces: Default::default(),
        }
    }

    // Returns whether this area is active.
    //
    // An area is active as long as it contains at least one operational
    // interface.
    pub fn is_active(&self, interfaces: &Arena<Interface>) -> bool {
        self.interfaces
            .iter(interfaces)
            .any(|iface| !iface.is_down())
    }

    // Returns whether this is the backbone area.
    pub fn is_backbone(&self) -> bool {
        self.area_id == Ipv4Addr::UNSPECIFIED
    }

    // Returns whether AS-external-LSAs are flooded into this area.
    pub fn external_routing_capability(&self) -> bool {
        self.config.area_type == AreaType::Normal
    }

    // Returns the options used in packets sent and LSAs originated in this
    // area.
    pub(crate) fn options(&self) -> Options {
        match self.config.area_type {
            AreaType::Normal => Options::E,
            AreaType::Stub => Options::empty(),
        }
    }

    // Returns the number of ABR routers in this area.
    pub fn abr_count(&self) -> usize {
        self.state
            .routers
            .values()
            .filter(|router| router.path_type == PathType::IntraArea)
            .filter(|router| router.flags.contains(LsaRouterFlags::B))
            .count()
    }

    // Returns the number of ASBR routers in this area.
    pub fn asbr_count(&self) -> usize {
        self.state
            .routers
            .values()
            .filter(|router| router.path_type == PathType::IntraArea)
            .filter(|router| router.flags.contains(LsaRouterFlags::E))
            .count()
    }
}

// ===== global functions =====

// Chooses the Link State ID of a summary-LSA, so that distinct prefixes
// sharing the same network address don't collide (RFC 2328, Appendix E).
//
// `assigned` maps the Link State IDs already in use to their prefixes.
pub fn summary_lsa_id_alloc(
    prefix: Ipv4Network,
    assigned: &BTreeMap<Ipv4Addr, Ipv4Network>,
) -> LsaIdAllocation {
    let base = prefix.network();
    let Some(existing) = assigned.get(&base).copied() else {
        return LsaIdAllocation::Assigned(base);
    };
    if existing == prefix {
        return LsaIdAllocation::Assigned(base);
    }

    if prefix.prefix() > existing.prefix() {
        // The new prefix is more specific: advertise it with all its host
        // bits set.
        let lsa_id = prefix.broadcast();
        if prefix.prefix() == 32 || assigned.contains_key(&lsa_id) {
            return LsaIdAllocation::Exhausted;
        }
        LsaIdAllocation::Assigned(lsa_id)
    } else if prefix.prefix() < existing.prefix() {
        // The new prefix is less specific: it takes over the network address
        // and the existing one moves to its host-bits-set address.
        let existing_lsa_id = existing.broadcast();
        if existing.prefix() == 32
            || existing_lsa_id == base
            || assigned.contains_key(&existing_lsa_id)
        {
            return LsaIdAllocation::Exhausted;
        }
        LsaIdAllocation::Relocate {
            lsa_id: base,
            existing,
            existing_lsa_id,
        }
    } else {
        LsaIdAllocation::Exhausted
    }
}

// Updates the summary-LSAs originated into every area.
pub(crate) fn update_summary_lsas(
    instance: &mut InstanceUpView<'_>,
    areas: &mut Areas,
    interfaces: &Arena<Interface>,
    lsa_entries: &Arena<LsaEntry>,
) {
    // Check ABR status.
    let is_abr = areas.is_abr(interfaces);

    // Clear the summarized flag from all routes.
    for route in instance.state.rib.values_mut() {
        route.flags.remove(RouteNetFlags::SUMMARIZED);
    }

    // Check which routes should be summarized and which area ranges are
    // active.
    for area in areas.iter_mut() {
        update_net_ranges(area, is_abr, instance);
    }

    // Proceed to originate and/or flush summary LSAs as required.
    for area_idx in areas.indexes().collect::<Vec<_>>() {
        update_net_summary_lsas(area_idx, is_abr, instance, areas, lsa_entries);
        update_rtr_summary_lsas(area_idx, is_abr, instance, areas, lsa_entries);
    }
}

// ===== helper functions =====

fn update_net_ranges(
    area: &mut Area,
    is_abr: bool,
    instance: &mut InstanceUpView<'_>,
) {
    // Reset area ranges.
    for range in area.ranges.values_mut() {
        range.cost = None;
    }

    // Area ranges are only checked when the router is an ABR.
    if !is_abr {
        return;
    }

    for (prefix, route) in instance
        .state
        .rib
        .iter_mut()
        // Select intra-area routes from this area.
        .filter(|(_, route)| route.path_type == PathType::IntraArea)
        .filter(|(_, route)| route.area_id == Some(area.area_id))
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
    {
        // Check if the network is contained in any explicitly configured
        // address range.
        if let Some((_, range)) = area
            .ranges
            .iter_mut()
            .find(|(range_prefix, _)| range_prefix.is_supernet_of(*prefix))
        {
            route.flags.insert(RouteNetFlags::SUMMARIZED);

            // Update range's cost.
            range.cost = Some(match range.cost {
                Some(cost) => cost.max(route.metric),
                None => route.metric,
            });
        }
    }
}

fn update_net_summary_lsas(
    area_idx: AreaIndex,
    is_abr: bool,
    instance: &InstanceUpView<'_>,
    areas: &mut Areas,
    lsa_entries: &Arena<LsaEntry>,
) {
    // Compute summary routes.
    let area = &areas[area_idx];
    let new_summaries = compute_net_summaries(is_abr, area, instance, areas);

    // Save the old table of summary routes.
    let area = &mut areas[area_idx];
    let old_summaries = std::mem::take(&mut area.state.net_summaries);

    // Summaries that remain valid keep their Link State IDs.
    let mut lsa_ids = old_summaries
        .iter()
        .filter(|(prefix, _)| new_summaries.contains_key(prefix))
        .map(|(prefix, (lsa_id, _))| (*prefix, *lsa_id))
        .collect::<BTreeMap<_, _>>();
    let mut assigned = lsa_ids
        .iter()
        .map(|(prefix, lsa_id)| (*lsa_id, *prefix))
        .collect::<BTreeMap<_, _>>();

    // Allocate Link State IDs for the new summaries.
    for prefix in new_summaries.keys() {
        if lsa_ids.contains_key(prefix) {
            continue;
        }

        match summary_lsa_id_alloc(*prefix, &assigned) {
            LsaIdAllocation::Assigned(lsa_id) => {
                assigned.insert(lsa_id, *prefix);
                lsa_ids.insert(*prefix, lsa_id);
            }
            LsaIdAllocation::Relocate {
                lsa_id,
                existing,
                existing_lsa_id,
            } => {
                assigned.insert(existing_lsa_id, existing);
                lsa_ids.insert(existing, existing_lsa_id);
                assigned.insert(lsa_id, *prefix);
                lsa_ids.insert(*prefix, lsa_id);
            }
            LsaIdAllocation::Exhausted => {
                Debug::SummaryLsaIdExhausted(prefix).log();
            }
        }
    }

    // (Re)originate the required Summary-LSAs.
    let lsdb_id = LsdbId::Area(area.id);
    let options = area.options();
    for (prefix, new_summary) in new_summaries {
        let Some(lsa_id) = lsa_ids.get(&prefix).copied() else {
            continue;
        };

        // Skip reoriginating summaries that haven't changed.
        if let Some((old_lsa_id, old_summary)) = old_summaries.get(&prefix)
            && *old_lsa_id == lsa_id
            && *old_summary == new_summary
        {
            area.state.net_summaries.insert(prefix, (lsa_id, new_summary));
            continue;
        }

        let lsa_body = LsaBody::SummaryNetwork(LsaSummary::new(
            prefix.mask(),
            new_summary.metric,
        ));
        instance
            .tx
            .lsa_orig_check(lsdb_id, options, lsa_id, lsa_body);
        area.state.net_summaries.insert(prefix, (lsa_id, new_summary));
    }

    // Flush old summaries whose Link State IDs are no longer in use.
    let lsa_type = LsaTypeCode::SummaryNetwork.into();
    let lsa_ids = old_summaries
        .into_values()
        .map(|(lsa_id, _)| lsa_id)
        .filter(|lsa_id| !assigned.contains_key(lsa_id))
        .collect::<Vec<_>>();
    let valid = assigned.keys().copied().collect::<Vec<_>>();
    flush_summary_lsas(lsa_type, lsa_ids, &valid, area, instance, lsa_entries);
}

fn update_rtr_summary_lsas(
    area_idx: AreaIndex,
    is_abr: bool,
    instance: &InstanceUpView<'_>,
    areas: &mut Areas,
    lsa_entries: &Arena<LsaEntry>,
) {
    // Compute summary routes.
    let area = &areas[area_idx];
    let new_summaries = compute_rtr_summaries(is_abr, area, areas);

    // Save the old table of summary routes.
    let area = &mut areas[area_idx];
    let mut old_summaries = std::mem::take(&mut area.state.rtr_summaries);

    // (Re)originate the required Summary-LSAs. The Link State ID of an ASBR
    // summary is always the ASBR's Router ID.
    let lsdb_id = LsdbId::Area(area.id);
    for (router_id, new_summary) in new_summaries {
        if old_summaries
            .remove(&router_id)
            .is_none_or(|(_, old_summary)| old_summary != new_summary)
        {
            let lsa_body = LsaBody::SummaryRouter(LsaSummary::new(
                Ipv4Addr::UNSPECIFIED,
                new_summary.metric,
            ));
            instance.tx.lsa_orig_check(
                lsdb_id,
                new_summary.options,
                router_id,
                lsa_body,
            );
        }
        area.state
            .rtr_summaries
            .insert(router_id, (router_id, new_summary));
    }

    // Flush old summaries that are no longer valid.
    let lsa_type = LsaTypeCode::SummaryRouter.into();
    let lsa_ids = old_summaries
        .into_values()
        .map(|(lsa_id, _)| lsa_id)
        .collect::<Vec<_>>();
    let valid = area.state.rtr_summaries.keys().copied().collect::<Vec<_>>();
    flush_summary_lsas(lsa_type, lsa_ids, &valid, area, instance, lsa_entries);
}

fn compute_net_summaries(
    is_abr: bool,
    area: &Area,
    instance: &InstanceUpView<'_>,
    areas: &Areas,
) -> BTreeMap<Ipv4Network, SummaryNet> {
    let mut summaries = BTreeMap::new();

    // Only ABRs should originate summaries.
    if !is_abr {
        return summaries;
    }

    // Add regular summaries and ranges.
    summaries.extend(compute_net_regular_summaries(area, instance));
    summaries.extend(compute_net_range_summaries(area, areas));

    // Add default route for stub areas.
    if area.config.area_type == AreaType::Stub {
        let prefix = default_prefix();
        let default_summary = SummaryNet {
            metric: area.config.stub_default_cost,
            flags: SummaryNetFlags::empty(),
        };
        summaries.insert(prefix, default_summary);
    }

    summaries
}

fn compute_net_regular_summaries<'a>(
    area: &'a Area,
    instance: &'a InstanceUpView<'_>,
) -> impl Iterator<Item = (Ipv4Network, SummaryNet)> + 'a {
    instance
        .state
        .rib
        .iter()
        // AS external routes are never advertised in summary-LSAs.
        .filter(|(_, route)| {
            !matches!(
                route.path_type,
                PathType::Type1External | PathType::Type2External
            )
        })
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
        // Skip route if it's associated with the area itself.
        .filter(|(_, route)| route.area_id != Some(area.area_id))
        // Only intra-area routes are advertised into the backbone.
        .filter(|(_, route)| {
            route.path_type == PathType::IntraArea || !area.is_backbone()
        })
        // Check if the nexthops associated with this route belong to
        // the area. This is the logical equivalent of a Distance Vector
        // protocol's split horizon logic.
        .filter(|(_, route)| !nexthops_area_check(&route.nexthops, area))
        // Check if the network is not contained in any explicitly
        // configured address range.
        .filter(|(_, route)| {
            // The backbone's configured ranges should be ignored when
            // originating summary-LSAs into transit areas.
            if route.area_id == Some(Ipv4Addr::UNSPECIFIED)
                && area.state.transit_capability
            {
                true
            } else {
                !route.flags.contains(RouteNetFlags::SUMMARIZED)
            }
        })
        // Map to summary route.
        .map(|(prefix, route)| {
            let mut flags = SummaryNetFlags::empty();
            if route.flags.contains(RouteNetFlags::CONNECTED) {
                flags.insert(SummaryNetFlags::CONNECTED);
            }

            let summary = SummaryNet {
                metric: route.metric,
                flags,
            };
            (*prefix, summary)
        })
}

fn compute_net_range_summaries<'a>(
    area: &'a Area,
    areas: &'a Areas,
) -> impl Iterator<Item = (Ipv4Network, SummaryNet)> + 'a {
    areas
        .iter()
        // Check all other areas.
        .filter(|other_area| other_area.area_id != area.area_id)
        // The backbone's configured ranges should be ignored when
        // originating summary-LSAs into transit areas.
        .filter(|other_area| {
            !(other_area.is_backbone() && area.state.transit_capability)
        })
        .flat_map(|other_area| {
            // Check the other area's configured ranges.
            other_area
                .ranges
                .iter()
                // Skip ranges whose advertisement isn't enabled.
                .filter(|(_, range)| range.config.advertise)
                // Skip inactive ranges and map to summary route.
                .filter_map(|(range_prefix, range)| {
                    let cost = range.cost?;
                    let summary = SummaryNet {
                        metric: range.config.cost.unwrap_or(cost),
                        flags: SummaryNetFlags::empty(),
                    };
                    Some((*range_prefix, summary))
                })
        })
}

fn compute_rtr_summaries(
    is_abr: bool,
    area: &Area,
    areas: &Areas,
) -> BTreeMap<Ipv4Addr, SummaryRtr> {
    // Check conditions in which no router summaries should be generated.
    if !is_abr || area.config.area_type != AreaType::Normal {
        return BTreeMap::new();
    }

    let mut summaries = BTreeMap::new();
    for (router_id, route) in areas
        .iter()
        // Check the routing table from all other areas.
        .filter(|area_src| area_src.id != area.id)
        .flat_map(|area_src| area_src.state.routers.iter())
        // Only ASBR routes are advertised in summary-LSAs.
        .filter(|(_, route)| route.flags.contains(LsaRouterFlags::E))
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
        // Only intra-area routes are advertised into the backbone.
        .filter(|(_, route)| {
            route.path_type == PathType::IntraArea || !area.is_backbone()
        })
        // Check if the nexthops associated with this route belong to
        // the area. This is the logical equivalent of a Distance Vector
        // protocol's split horizon logic.
        .filter(|(_, route)| !nexthops_area_check(&route.nexthops, area))
    {
        // Advertise the least cost path when the ASBR is reachable through
        // multiple areas.
        let summary = SummaryRtr {
            options: route.options,
            metric: route.metric,
        };
        summaries
            .entry(*router_id)
            .and_modify(|curr: &mut SummaryRtr| {
                if summary.metric < curr.metric {
                    *curr = summary.clone();
                }
            })
            .or_insert(summary);
    }

    summaries
}

fn default_prefix() -> Ipv4Network {
    // Can't fail: a zero-length mask is always valid.
    Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0)
        .unwrap_or_else(|_| Ipv4Network::from(Ipv4Addr::UNSPECIFIED))
}

fn nexthops_area_check(nexthops: &Nexthops, area: &Area) -> bool {
    nexthops.values().any(|nexthop| {
        area.interfaces
            .indexes()
            .any(|iface_idx| nexthop.iface_idx == iface_idx)
    })
}

fn flush_summary_lsas(
    lsa_type: LsaType,
    lsa_ids: Vec<Ipv4Addr>,
    valid: &[Ipv4Addr],
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let lsdb_id = LsdbId::Area(area.id);
    let adv_rtr = instance.state.router_id;

    // Flush previously originated summaries that are no longer valid.
    for lsa_id in lsa_ids {
        let lsa_key = LsaKey::new(lsa_type, adv_rtr, lsa_id);
        if let Some((_, lse)) = area.state.lsdb.get(lsa_entries, &lsa_key) {
            instance.tx.lsa_flush(
                lsdb_id,
                lse.id,
                LsaFlushReason::PrematureAging,
            );
        }
    }

    // Flush received self-originated summaries that are no longer valid.
    for (_, lse) in area
        .state
        .lsdb
        .iter_by_type_advrtr(lsa_entries, lsa_type, adv_rtr)
        .filter(|(_, lse)| lse.flags.contains(LsaEntryFlags::RECEIVED))
        .filter(|(_, lse)| !valid.contains(&lse.data.hdr.lsa_id))
    {
        instance.tx.lsa_flush(
            lsdb_id,
            lse.id,
            LsaFlushReason::PrematureAging,
        );
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn lsa_id_free_base() {
        let assigned = BTreeMap::new();
        assert_eq!(
            summary_lsa_id_alloc(net("10.0.0.0/8"), &assigned),
            LsaIdAllocation::Assigned(Ipv4Addr::new(10, 0, 0, 0))
        );
    }

    #[test]
    fn lsa_id_more_specific_takes_host_bits() {
        let mut assigned = BTreeMap::new();
        assigned.insert(Ipv4Addr::new(10, 0, 0, 0), net("10.0.0.0/8"));
        assert_eq!(
            summary_lsa_id_alloc(net("10.0.0.0/16"), &assigned),
            LsaIdAllocation::Assigned(Ipv4Addr::new(10, 0, 255, 255))
        );
    }

    #[test]
    fn lsa_id_less_specific_relocates_existing() {
        let mut assigned = BTreeMap::new();
        assigned.insert(Ipv4Addr::new(10, 0, 0, 0), net("10.0.0.0/16"));
        assert_eq!(
            summary_lsa_id_alloc(net("10.0.0.0/8"), &assigned),
            LsaIdAllocation::Relocate {
                lsa_id: Ipv4Addr::new(10, 0, 0, 0),
                existing: net("10.0.0.0/16"),
                existing_lsa_id: Ipv4Addr::new(10, 0, 255, 255),
            }
        );
    }

    #[test]
    fn lsa_id_same_prefix_keeps_base() {
        let mut assigned = BTreeMap::new();
        assigned.insert(Ipv4Addr::new(10, 0, 0, 0), net("10.0.0.0/16"));
        assert_eq!(
            summary_lsa_id_alloc(net("10.0.0.0/16"), &assigned),
            LsaIdAllocation::Assigned(Ipv4Addr::new(10, 0, 0, 0))
        );
    }

    #[test]
    fn lsa_id_exhausted() {
        // Host routes can't move to a different address.
        let mut assigned = BTreeMap::new();
        assigned.insert(Ipv4Addr::new(10, 0, 0, 0), net("10.0.0.0/24"));
        assert_eq!(
            summary_lsa_id_alloc(net("10.0.0.0/32"), &assigned),
            LsaIdAllocation::Exhausted
        );

        // The host-bits-set address is already taken.
        let mut assigned = BTreeMap::new();
        assigned.insert(Ipv4Addr::new(10, 0, 0, 0), net("10.0.0.0/8"));
        assigned.insert(Ipv4Addr::new(10, 0, 255, 255), net("10.0.255.255/32"));
        assert_eq!(
            summary_lsa_id_alloc(net("10.0.0.0/16"), &assigned),
            LsaIdAllocation::Exhausted
        );
    }
}
