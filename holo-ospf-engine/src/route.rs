//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, btree_map};
use std::net::Ipv4Addr;

use bitflags::bitflags;
use derive_new::new;
use ipnetwork::Ipv4Network;

use crate::area::Area;
use crate::collections::{Areas, Arena, InterfaceIndex, Lsdb};
use crate::debug::Debug;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::lsdb::{LSA_INFINITY, LsaEntry};
use crate::packet::Options;
use crate::packet::lsa::{
    LsaAsExternalFlags, LsaKey, LsaRouterFlags, LsaTypeCode, lsa_prefix,
};
use crate::spf;

// Network routing table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteNet {
    pub area_id: Option<Ipv4Addr>,
    pub origin: Option<LsaKey>,
    pub path_type: PathType,
    pub metric: u32,
    pub type2_metric: Option<u32>,
    pub tag: Option<u32>,
    pub nexthops: Nexthops,
    pub flags: RouteNetFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteNetFlags: u8 {
        const CONNECTED = 0x01;
        const INSTALLED = 0x02;
        const SUMMARIZED = 0x04;
    }
}

// Router routing table entry (area border and AS boundary routers).
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct RouteRtr {
    pub area_id: Ipv4Addr,
    pub path_type: PathType,
    pub options: Options,
    pub flags: LsaRouterFlags,
    pub metric: u32,
    pub nexthops: Nexthops,
}

// Locally originated inter-area "network" route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SummaryNet {
    pub metric: u32,
    pub flags: SummaryNetFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct SummaryNetFlags: u8 {
        const CONNECTED = 0x01;
    }
}

// Locally originated inter-area "router" route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SummaryRtr {
    pub options: Options,
    pub metric: u32,
}

// OSPF path types in decreasing order of preference.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum PathType {
    IntraArea,
    InterArea,
    Type1External,
    Type2External,
}

// Route nexthop key.
#[derive(Clone, Copy, Debug, Eq, new, Ord, PartialEq, PartialOrd)]
pub struct NexthopKey {
    // Nexthop interface.
    pub iface_idx: InterfaceIndex,
    // Nexthop address (`None` for connected routes).
    pub addr: Option<Ipv4Addr>,
}

// Route nexthop.
#[derive(Clone, Copy, Debug, Eq, new, PartialEq)]
pub struct Nexthop {
    // Nexthop interface.
    pub iface_idx: InterfaceIndex,
    // Nexthop interface ifindex.
    pub ifindex: u32,
    // Nexthop address (`None` for connected routes).
    pub addr: Option<Ipv4Addr>,
    // Router-ID of the remote neighbor (`None` for connected routes).
    pub nbr_router_id: Option<Ipv4Addr>,
}

// Ordered list of nexthops.
pub type Nexthops = BTreeMap<NexthopKey, Nexthop>;

// Change in the network routing table, as seen by the forwarding plane.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RouteChange {
    Add(Ipv4Network, RouteNet),
    Update(Ipv4Network, RouteNet),
    Delete(Ipv4Network),
}

// ===== impl RouteNet =====

impl RouteNet {
    // Returns the metric used to compare routes of the same path type.
    pub fn metric(&self) -> u32 {
        match self.path_type {
            PathType::IntraArea
            | PathType::InterArea
            | PathType::Type1External => self.metric,
            PathType::Type2External => self.type2_metric.unwrap_or(self.metric),
        }
    }
}

// ===== impl RouteChange =====

impl RouteChange {
    pub fn prefix(&self) -> &Ipv4Network {
        match self {
            RouteChange::Add(prefix, _)
            | RouteChange::Update(prefix, _)
            | RouteChange::Delete(prefix) => prefix,
        }
    }
}

// ===== global functions =====

// Updates the entire OSPF routing table.
//
// Returns the list of changes relative to the previous routing table.
pub(crate) fn update_rib_full(
    instance: &mut InstanceUpView<'_>,
    areas: &mut Areas,
    interfaces: &Arena<Interface>,
    lsa_entries: &Arena<LsaEntry>,
) -> Vec<RouteChange> {
    let mut rib = BTreeMap::new();
    let old_rib = std::mem::take(&mut instance.state.rib);
    let max_paths = instance.config.max_paths;

    // Compute intra-area routes.
    for area in areas.iter() {
        update_rib_intra_area(&mut rib, area, max_paths);
    }

    // Compute inter-area routes.
    let active_areas = areas.active_count(interfaces);
    for area in areas.iter_mut() {
        // If the router has active attachments to multiple areas, only backbone
        // summary-LSAs are examined.
        if active_areas > 1 && !area.is_backbone() {
            continue;
        }

        update_rib_inter_area_networks(&mut rib, area, instance, lsa_entries);
        update_rib_inter_area_routers(area, instance, lsa_entries);
    }

    // Examine transit areas' summary-LSAs.
    if active_areas > 1
        && areas
            .backbone()
            .is_some_and(|(_, area)| area.is_active(interfaces))
    {
        for area in areas
            .iter()
            .filter(|area| !area.is_backbone())
            .filter(|area| area.state.transit_capability)
        {
            update_rib_transit_area(&mut rib, area, instance, lsa_entries);
        }
    }

    // Compute external routes.
    update_rib_external(&mut rib, instance, areas, lsa_entries);

    // Compute the differences to the previous routing table.
    let changes = rib_diff(&mut rib, old_rib);

    // Save updated RIB.
    instance.state.rib = rib;

    changes
}

// Installs the given route, replacing or merging with any existing entry for
// the same destination.
pub(crate) fn route_update(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    prefix: Ipv4Network,
    route: RouteNet,
    max_paths: u16,
) {
    let route = match rib.entry(prefix) {
        btree_map::Entry::Occupied(o) => {
            let curr_route = o.into_mut();

            match route_compare(&route, curr_route) {
                Ordering::Less => {
                    // Overwrite the current routing table entry.
                    *curr_route = route;
                }
                Ordering::Equal => {
                    // Merge nexthops.
                    curr_route.nexthops.extend(route.nexthops);
                }
                Ordering::Greater => {
                    // Ignore less preferred route.
                }
            }

            curr_route
        }
        btree_map::Entry::Vacant(v) => v.insert(route),
    };

    // Honor configured maximum number of ECMP paths.
    if route.nexthops.len() > max_paths as usize {
        route.nexthops = std::mem::take(&mut route.nexthops)
            .into_iter()
            .take(max_paths as usize)
            .collect();
    }
}

// Compares two routes to the same destination.
//
// Ordering::Less means `a` is preferred.
pub(crate) fn route_compare(a: &RouteNet, b: &RouteNet) -> Ordering {
    let cmp = a.path_type.cmp(&b.path_type);
    if cmp != Ordering::Equal {
        return cmp;
    }

    match a.path_type {
        PathType::IntraArea | PathType::InterArea | PathType::Type1External => {
            a.metric.cmp(&b.metric)
        }
        PathType::Type2External => {
            let cmp = a.type2_metric.cmp(&b.type2_metric);
            if cmp != Ordering::Equal {
                return cmp;
            }

            a.metric.cmp(&b.metric)
        }
    }
}

// ===== helper functions =====

// Computes intra-area routes.
fn update_rib_intra_area(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    area: &Area,
    max_paths: u16,
) {
    // Iterate over all stub networks and their corresponding vertices.
    for stub in spf::intra_area_networks(area) {
        // Calculate stub metric.
        let metric = stub.vertex.distance.saturating_add(stub.metric.into());

        // Compare this distance to the current best cost to the stub network.
        // If the calculated distance is larger, go on to examine the next stub
        // network link in the LSA.
        if let Some(best_route) = rib.get(&stub.prefix)
            && metric > best_route.metric
        {
            continue;
        }

        // If the newly added vertex is a transit network and the routing table
        // entry already exists, multiple vertices have mapped to the same IP
        // network. The current routing table entry should be overwritten if
        // and only if the newly found path is just as short and the current
        // routing table entry's Link State Origin has a smaller Link State ID
        // than the newly added vertex' LSA.
        let origin = stub.origin;
        if !stub.vertex.is_router()
            && let btree_map::Entry::Occupied(o) = rib.entry(stub.prefix)
        {
            let curr_route = o.get();
            let curr_origin_id = curr_route.origin.map(|origin| origin.lsa_id);
            if metric > curr_route.metric
                || curr_origin_id.is_some_and(|id| origin.lsa_id < id)
            {
                continue;
            }
            o.remove();
        }

        // Create new intra-area route.
        let mut flags = RouteNetFlags::empty();
        if stub.vertex.hops == 0 {
            flags.insert(RouteNetFlags::CONNECTED);
        }
        let new_route = RouteNet {
            area_id: Some(area.area_id),
            path_type: PathType::IntraArea,
            origin: Some(origin),
            metric,
            type2_metric: None,
            tag: None,
            nexthops: stub.vertex.nexthops.clone(),
            flags,
        };

        // Try to add or update stub route in the RIB.
        route_update(rib, stub.prefix, new_route, max_paths);
    }
}

// Computes inter-area "network" routes.
fn update_rib_inter_area_networks(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
) {
    // Examine all Type-3 Summary LSAs.
    let router_id = instance.state.router_id;
    for lsa in summary_networks(&area.state.lsdb, lsa_entries)
        // Filter out unreachable LSAs.
        .filter(|lsa| lsa.metric < LSA_INFINITY)
        // Filter out LSAs originated by the calculating router itself.
        .filter(|lsa| lsa.adv_rtr != router_id)
    {
        // Look up the routing table entry for BR having Area A as its
        // associated area.
        let Some(route_br) = area
            .state
            .routers
            .get(&lsa.adv_rtr)
            .filter(|route| route.path_type == PathType::IntraArea)
            .filter(|route| route.flags.contains(LsaRouterFlags::B))
        else {
            // If no such entry exists for router BR, do nothing with this
            // LSA and consider the next in the list.
            Debug::SpfNetworkUnreachableAbr(&lsa.prefix, lsa.adv_rtr).log();
            continue;
        };

        // The inter-area path cost is the distance to BR plus the cost
        // specified in the LSA.
        let metric = route_br.metric + lsa.metric;

        // Create new inter-area route.
        let new_route = RouteNet {
            area_id: Some(area.area_id),
            path_type: PathType::InterArea,
            origin: Some(lsa.origin),
            metric,
            type2_metric: None,
            tag: None,
            nexthops: route_br.nexthops.clone(),
            flags: RouteNetFlags::empty(),
        };

        // Intra-area paths are always preferred.
        if rib
            .get(&lsa.prefix)
            .is_some_and(|route| route.path_type == PathType::IntraArea)
        {
            continue;
        }

        // Try to add or update summary route in the RIB.
        route_update(rib, lsa.prefix, new_route, instance.config.max_paths);
    }
}

// Computes inter-area "router" routes.
fn update_rib_inter_area_routers(
    area: &mut Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
) {
    // Examine all Type-4 Summary LSAs.
    let router_id = instance.state.router_id;
    let mut new_routes = vec![];
    for lsa in summary_routers(&area.state.lsdb, lsa_entries)
        // Filter out unreachable LSAs.
        .filter(|lsa| lsa.metric < LSA_INFINITY)
        // Filter out LSAs originated by the calculating router itself.
        .filter(|lsa| lsa.adv_rtr != router_id)
        .filter(|lsa| lsa.router_id != router_id)
    {
        // Look up the routing table entry for BR having Area A as its
        // associated area.
        let Some(route_br) = area
            .state
            .routers
            .get(&lsa.adv_rtr)
            .filter(|route| route.path_type == PathType::IntraArea)
            .filter(|route| route.flags.contains(LsaRouterFlags::B))
        else {
            Debug::SpfRouterUnreachableAbr(&lsa.router_id, lsa.adv_rtr).log();
            continue;
        };

        // The inter-area path cost is the distance to BR plus the cost
        // specified in the LSA.
        let metric = route_br.metric + lsa.metric;
        let new_route = RouteRtr::new(
            area.area_id,
            PathType::InterArea,
            lsa.options,
            LsaRouterFlags::E,
            metric,
            route_br.nexthops.clone(),
        );
        new_routes.push((lsa.router_id, new_route));
    }

    for (router_id, new_route) in new_routes {
        match area.state.routers.entry(router_id) {
            btree_map::Entry::Occupied(mut o) => {
                let curr_route = o.get_mut();
                if curr_route.path_type == PathType::IntraArea {
                    continue;
                }
                match new_route.metric.cmp(&curr_route.metric) {
                    Ordering::Less => *curr_route = new_route,
                    Ordering::Equal => {
                        curr_route.nexthops.extend(new_route.nexthops)
                    }
                    Ordering::Greater => (),
                }
            }
            btree_map::Entry::Vacant(v) => {
                v.insert(new_route);
            }
        }
    }
}

// Examines the summary-LSAs of a transit area, looking for better paths than
// the ones found through the backbone.
fn update_rib_transit_area(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let router_id = instance.state.router_id;
    for lsa in summary_networks(&area.state.lsdb, lsa_entries)
        .filter(|lsa| lsa.metric < LSA_INFINITY)
        .filter(|lsa| lsa.adv_rtr != router_id)
    {
        // Only routes associated with the backbone can be improved.
        let Some(route) = rib.get_mut(&lsa.prefix).filter(|route| {
            matches!(route.path_type, PathType::IntraArea | PathType::InterArea)
                && route.area_id == Some(Ipv4Addr::UNSPECIFIED)
        }) else {
            continue;
        };

        // Look up the routing table entry for the advertising router, in the
        // transit area.
        let Some(route_br) = area
            .state
            .routers
            .get(&lsa.adv_rtr)
            .filter(|route_br| route_br.path_type == PathType::IntraArea)
        else {
            continue;
        };

        let metric = route_br.metric + lsa.metric;
        match metric.cmp(&route.metric) {
            Ordering::Less => {
                route.metric = metric;
                route.nexthops = route_br.nexthops.clone();
            }
            Ordering::Equal => {
                route.nexthops.extend(route_br.nexthops.clone());
            }
            Ordering::Greater => (),
        }
    }
}

// Computes AS external routes.
fn update_rib_external(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    instance: &InstanceUpView<'_>,
    areas: &Areas,
    lsa_entries: &Arena<LsaEntry>,
) {
    // Examine all AS-external-LSAs.
    let router_id = instance.state.router_id;
    for lsa in external_networks(&instance.state.lsdb, lsa_entries)
        // Filter out unreachable LSAs.
        .filter(|lsa| lsa.metric < LSA_INFINITY)
        // Filter out LSAs originated by the calculating router itself.
        .filter(|lsa| lsa.adv_rtr != router_id)
    {
        // Look up the routing table entries (potentially one per attached area)
        // for the AS boundary router (ASBR) that originated the LSA.
        let asbr_routes = areas
            .iter()
            .filter_map(|area| {
                area.state
                    .routers
                    .get(&lsa.adv_rtr)
                    .filter(|route| route.flags.contains(LsaRouterFlags::E))
            })
            .collect::<Vec<_>>();
        let rfc1583_compatibility = instance.config.rfc1583_compatibility;
        let Some(route_asbr) =
            asbr_route_select(asbr_routes, rfc1583_compatibility)
        else {
            // If no entries exist for router ASBR, do nothing with this LSA
            // and consider the next in the list.
            Debug::SpfUnreachableAsbr(&lsa.prefix, lsa.adv_rtr).log();
            continue;
        };

        // Intra-area and inter-area paths are always preferred over AS
        // external paths.
        if rib.get(&lsa.prefix).is_some_and(|route| {
            matches!(route.path_type, PathType::IntraArea | PathType::InterArea)
        }) {
            continue;
        }

        // Get path type and metric.
        let (path_type, metric, type2_metric) = match lsa.e_bit {
            true => {
                (PathType::Type2External, route_asbr.metric, Some(lsa.metric))
            }
            false => (
                PathType::Type1External,
                route_asbr.metric + lsa.metric,
                None,
            ),
        };

        // Create new external route.
        let new_route = RouteNet {
            area_id: None,
            path_type,
            origin: Some(lsa.origin),
            metric,
            type2_metric,
            tag: Some(lsa.tag),
            nexthops: route_asbr.nexthops.clone(),
            flags: RouteNetFlags::empty(),
        };

        // Try to add or update external route in the RIB.
        route_update(rib, lsa.prefix, new_route, instance.config.max_paths);
    }
}

// Selects the preferred routing table entry for an ASBR among the entries
// found in each attached area.
fn asbr_route_select(
    mut asbr_routes: Vec<&RouteRtr>,
    rfc1583_compatibility: bool,
) -> Option<&RouteRtr> {
    // Unless RFC 1583 compatibility is enabled, intra-area paths using
    // non-backbone areas are always the most preferred.
    if !rfc1583_compatibility {
        let asbr_routes_pruned = asbr_routes
            .iter()
            .copied()
            .filter(|route| {
                route.path_type == PathType::IntraArea
                    && route.area_id != Ipv4Addr::UNSPECIFIED
            })
            .collect::<Vec<_>>();
        if !asbr_routes_pruned.is_empty() {
            asbr_routes = asbr_routes_pruned;
        }
    }

    // Select the routing table entry with the least cost; when there are
    // multiple least cost routing table entries the entry whose associated
    // area has the largest OSPF Area ID is chosen.
    asbr_routes.into_iter().reduce(|best, route| {
        match route.metric.cmp(&best.metric) {
            Ordering::Less => route,
            Ordering::Equal => {
                if route.area_id > best.area_id {
                    route
                } else {
                    best
                }
            }
            Ordering::Greater => best,
        }
    })
}

// Computes the differences between the new routing table and the old one.
fn rib_diff(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    mut old_rib: BTreeMap<Ipv4Network, RouteNet>,
) -> Vec<RouteChange> {
    let mut changes = vec![];

    // Install new routes or routes that have changed.
    for (prefix, route) in rib.iter_mut() {
        let old_route = old_rib.remove(prefix);

        // Skip reinstalling the route if it hasn't changed.
        if let Some(old_route) = &old_route
            && old_route.path_type == route.path_type
            && old_route.metric() == route.metric()
            && old_route.tag == route.tag
            && old_route.nexthops == route.nexthops
        {
            if old_route.flags.contains(RouteNetFlags::INSTALLED) {
                route.flags.insert(RouteNetFlags::INSTALLED);
            }
            continue;
        }

        // Connected routes aren't installed, and routes with no nexthops are
        // removed from the forwarding plane.
        let installable = !route.flags.contains(RouteNetFlags::CONNECTED)
            && !route.nexthops.is_empty();
        let was_installed = old_route
            .as_ref()
            .is_some_and(|old| old.flags.contains(RouteNetFlags::INSTALLED));
        if installable {
            Debug::RouteInstall(prefix, route).log();
            route.flags.insert(RouteNetFlags::INSTALLED);
            if was_installed {
                changes.push(RouteChange::Update(*prefix, route.clone()));
            } else {
                changes.push(RouteChange::Add(*prefix, route.clone()));
            }
        } else if was_installed {
            Debug::RouteUninstall(prefix).log();
            changes.push(RouteChange::Delete(*prefix));
        }
    }

    // Uninstall routes that are no longer available.
    for (prefix, _) in old_rib
        .into_iter()
        .filter(|(_, route)| route.flags.contains(RouteNetFlags::INSTALLED))
    {
        Debug::RouteUninstall(&prefix).log();
        changes.push(RouteChange::Delete(prefix));
    }

    changes
}

// ===== LSDB views used by the routing calculation =====

struct SummaryNetworkLsa {
    origin: LsaKey,
    adv_rtr: Ipv4Addr,
    prefix: Ipv4Network,
    metric: u32,
}

struct SummaryRouterLsa {
    adv_rtr: Ipv4Addr,
    router_id: Ipv4Addr,
    options: Options,
    metric: u32,
}

struct ExternalNetworkLsa {
    origin: LsaKey,
    adv_rtr: Ipv4Addr,
    e_bit: bool,
    prefix: Ipv4Network,
    metric: u32,
    tag: u32,
}

fn summary_networks<'a>(
    lsdb: &'a Lsdb,
    lsa_entries: &'a Arena<LsaEntry>,
) -> impl Iterator<Item = SummaryNetworkLsa> + 'a {
    lsdb.iter_by_type(lsa_entries, LsaTypeCode::SummaryNetwork.into())
        .map(|(_, lse)| &lse.data)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .filter_map(|lsa| {
            let lsa_body = lsa.body.as_summary_network()?;
            let prefix = lsa_prefix(lsa.hdr.lsa_id, lsa_body.mask)?;
            Some(SummaryNetworkLsa {
                origin: lsa.hdr.key(),
                adv_rtr: lsa.hdr.adv_rtr,
                prefix,
                metric: lsa_body.metric,
            })
        })
}

fn summary_routers<'a>(
    lsdb: &'a Lsdb,
    lsa_entries: &'a Arena<LsaEntry>,
) -> impl Iterator<Item = SummaryRouterLsa> + 'a {
    lsdb.iter_by_type(lsa_entries, LsaTypeCode::SummaryRouter.into())
        .map(|(_, lse)| &lse.data)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .filter_map(|lsa| {
            let lsa_body = lsa.body.as_summary_router()?;
            Some(SummaryRouterLsa {
                adv_rtr: lsa.hdr.adv_rtr,
                router_id: lsa.hdr.lsa_id,
                options: lsa.hdr.options,
                metric: lsa_body.metric,
            })
        })
}

fn external_networks<'a>(
    lsdb: &'a Lsdb,
    lsa_entries: &'a Arena<LsaEntry>,
) -> impl Iterator<Item = ExternalNetworkLsa> + 'a {
    lsdb.iter_by_type(lsa_entries, LsaTypeCode::AsExternal.into())
        .map(|(_, lse)| &lse.data)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .filter_map(|lsa| {
            let lsa_body = lsa.body.as_as_external()?;
            let prefix = lsa_prefix(lsa.hdr.lsa_id, lsa_body.mask)?;
            Some(ExternalNetworkLsa {
                origin: lsa.hdr.key(),
                adv_rtr: lsa.hdr.adv_rtr,
                e_bit: lsa_body.flags.contains(LsaAsExternalFlags::E),
                prefix,
                metric: lsa_body.metric,
                tag: lsa_body.tag,
            })
        })
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn iface_idx_none() -> InterfaceIndex {
        InterfaceIndex::from_raw_parts(usize::MAX, u64::MAX)
    }

    fn route(path_type: PathType, metric: u32, t2: Option<u32>) -> RouteNet {
        RouteNet {
            area_id: None,
            origin: None,
            path_type,
            metric,
            type2_metric: t2,
            tag: None,
            nexthops: Default::default(),
            flags: Default::default(),
        }
    }

    fn rtr(area_id: Ipv4Addr, path_type: PathType, metric: u32) -> RouteRtr {
        RouteRtr::new(
            area_id,
            path_type,
            Options::E,
            LsaRouterFlags::E,
            metric,
            Default::default(),
        )
    }

    #[test]
    fn path_type_preference() {
        let intra = route(PathType::IntraArea, 100, None);
        let inter = route(PathType::InterArea, 1, None);
        assert_eq!(route_compare(&intra, &inter), Ordering::Less);

        let ext1 = route(PathType::Type1External, 500, None);
        let ext2 = route(PathType::Type2External, 1, Some(1));
        assert_eq!(route_compare(&ext1, &ext2), Ordering::Less);
    }

    #[test]
    fn type2_metric_tie_break() {
        let a = route(PathType::Type2External, 30, Some(20));
        let b = route(PathType::Type2External, 10, Some(20));
        let c = route(PathType::Type2External, 10, Some(10));
        assert_eq!(route_compare(&a, &b), Ordering::Greater);
        assert_eq!(route_compare(&b, &c), Ordering::Greater);
    }

    #[test]
    fn asbr_pruning() {
        let backbone = rtr(Ipv4Addr::UNSPECIFIED, PathType::IntraArea, 5);
        let area1 = rtr(Ipv4Addr::new(0, 0, 0, 1), PathType::IntraArea, 50);
        let area2 = rtr(Ipv4Addr::new(0, 0, 0, 2), PathType::IntraArea, 50);

        // Non-backbone intra-area paths win, ties go to the largest area ID.
        let best = asbr_route_select(vec![&backbone, &area1, &area2], false);
        assert_eq!(best, Some(&area2));

        // With RFC 1583 compatibility only the cost matters.
        let best = asbr_route_select(vec![&backbone, &area1, &area2], true);
        assert_eq!(best, Some(&backbone));
    }

    #[test]
    fn diff_add_update_delete() {
        let prefix1: Ipv4Network = "10.0.1.0/24".parse().unwrap();
        let prefix2: Ipv4Network = "10.0.2.0/24".parse().unwrap();
        let nexthop = Nexthop::new(
            iface_idx_none(),
            1,
            Some(Ipv4Addr::new(10, 0, 0, 2)),
            Some(Ipv4Addr::new(2, 2, 2, 2)),
        );
        let mut nexthops = Nexthops::new();
        let nexthop_key = NexthopKey::new(nexthop.iface_idx, nexthop.addr);
        nexthops.insert(nexthop_key, nexthop);

        let mut r1 = route(PathType::IntraArea, 10, None);
        r1.nexthops = nexthops.clone();
        let mut rib = BTreeMap::new();
        rib.insert(prefix1, r1.clone());
        let changes = rib_diff(&mut rib, BTreeMap::new());
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], RouteChange::Add(p, _) if p == prefix1));

        // A metric change is reported as an update.
        let old_rib = rib.clone();
        let mut rib = BTreeMap::new();
        let mut r1b = r1.clone();
        r1b.metric = 20;
        rib.insert(prefix1, r1b);
        let mut r2 = route(PathType::IntraArea, 10, None);
        r2.nexthops = nexthops;
        rib.insert(prefix2, r2);
        let changes = rib_diff(&mut rib, old_rib);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].prefix(), &prefix1);
        assert!(matches!(changes[0], RouteChange::Update(..)));
        assert_eq!(changes[1].prefix(), &prefix2);
        assert!(matches!(changes[1], RouteChange::Add(..)));

        let old_rib = rib.clone();
        let changes = rib_diff(&mut BTreeMap::new(), old_rib);
        assert_eq!(
            changes,
            vec![RouteChange::Delete(prefix1), RouteChange::Delete(prefix2)]
        );
    }
}
