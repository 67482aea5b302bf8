//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

use crate::area::{self, Area};
use crate::collections::{AreaIndex, Arena};
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::{Interface, VirtualLinkPath, ism};
use crate::lsdb::{LsaEntry, LsaOriginateEvent, LsaSpfData};
use crate::packet::Options;
use crate::packet::lsa::{
    Lsa, LsaKey, LsaRouterFlags, LsaRouterLink, LsaRouterLinkType,
    LsaTypeCode, lsa_prefix,
};
use crate::route::{
    self, Nexthop, NexthopKey, Nexthops, PathType, RouteChange, RouteRtr,
};

// Shortest-path tree vertex identifier.
//
// Network vertices sort first, so that transit networks are added to the tree
// before routers at the same distance.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum VertexId {
    Network { dr_addr: Ipv4Addr },
    Router { router_id: Ipv4Addr },
}

// LSA describing a vertex.
#[derive(Clone, Debug)]
pub enum VertexLsa {
    Network(Lsa),
    Router(Lsa),
}

#[derive(Debug)]
pub struct Vertex {
    pub id: VertexId,
    pub lsa: VertexLsa,
    pub distance: u32,
    pub hops: u16,
    pub parent: Option<VertexId>,
    pub nexthops: Nexthops,
}

// Link between two vertices.
struct SpfLink<'a> {
    parent_link: Option<&'a LsaRouterLink>,
    id: VertexId,
    lsa: VertexLsa,
    cost: u16,
}

// Network reachable through a vertex of the shortest-path tree.
#[derive(Debug)]
pub struct SpfIntraAreaNetwork<'a> {
    pub vertex: &'a Vertex,
    pub prefix: Ipv4Network,
    pub metric: u16,
    pub origin: LsaKey,
}

// ===== impl VertexId =====

impl VertexId {
    fn new_root(router_id: Ipv4Addr) -> VertexId {
        VertexId::Router { router_id }
    }
}

// ===== impl VertexLsa =====

impl VertexLsa {
    pub fn lsa(&self) -> &Lsa {
        match self {
            VertexLsa::Network(lsa) | VertexLsa::Router(lsa) => lsa,
        }
    }

    pub fn is_router(&self) -> bool {
        matches!(self, VertexLsa::Router(_))
    }

    fn router_id(&self) -> Ipv4Addr {
        self.lsa().hdr.adv_rtr
    }

    fn router_options(&self) -> Options {
        self.lsa().hdr.options
    }

    fn router_flags(&self) -> LsaRouterFlags {
        match self {
            VertexLsa::Router(lsa) => lsa
                .body
                .as_router()
                .map(|lsa_body| lsa_body.flags)
                .unwrap_or_default(),
            VertexLsa::Network(_) => LsaRouterFlags::empty(),
        }
    }

    fn router_v_bit(&self) -> bool {
        self.router_flags().contains(LsaRouterFlags::V)
    }
}

// ===== impl Vertex =====

impl Vertex {
    fn new(
        id: VertexId,
        lsa: VertexLsa,
        distance: u32,
        hops: u16,
        parent: Option<VertexId>,
    ) -> Vertex {
        Vertex {
            id,
            lsa,
            distance,
            hops,
            parent,
            nexthops: Default::default(),
        }
    }

    pub fn is_router(&self) -> bool {
        self.lsa.is_router()
    }
}

// ===== global functions =====

// Recomputes the shortest-path trees of all areas, the routing table and the
// summary LSAs that depend on it.
//
// Returns the routing table changes.
pub(crate) fn compute_spf(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) -> Vec<RouteChange> {
    Debug::SpfStart.log();
    instance.state.spf_pending = false;

    // Virtual links depend on the shortest-path trees of their transit areas,
    // so the backbone goes last.
    let (backbone, others): (Vec<AreaIndex>, Vec<AreaIndex>) =
        arenas.areas.indexes().partition(|area_idx| {
            arenas.areas[*area_idx].is_backbone()
        });
    for area_idx in others {
        let area = &mut arenas.areas[area_idx];
        run_area(
            area,
            instance,
            &arenas.interfaces,
            &mut arenas.lsa_entries,
        );
    }
    update_virtual_links(instance, arenas);
    for area_idx in backbone {
        let area = &mut arenas.areas[area_idx];
        run_area(
            area,
            instance,
            &arenas.interfaces,
            &mut arenas.lsa_entries,
        );
    }

    // Update routing table.
    let changes = route::update_rib_full(
        instance,
        &mut arenas.areas,
        &arenas.interfaces,
        &arenas.lsa_entries,
    );

    // Update summary LSAs.
    area::update_summary_lsas(
        instance,
        &mut arenas.areas,
        &arenas.interfaces,
        &arenas.lsa_entries,
    );

    changes
}

// Returns the networks reachable through the shortest-path tree of the
// provided area.
pub(crate) fn intra_area_networks(
    area: &Area,
) -> Vec<SpfIntraAreaNetwork<'_>> {
    let mut stubs = vec![];

    for vertex in area.state.spt.values() {
        match &vertex.lsa {
            VertexLsa::Network(lsa) => {
                let Some(lsa_body) = lsa.body.as_network() else {
                    continue;
                };
                let Some(prefix) = lsa_prefix(lsa.hdr.lsa_id, lsa_body.mask)
                else {
                    continue;
                };
                stubs.push(SpfIntraAreaNetwork {
                    vertex,
                    prefix,
                    metric: 0,
                    origin: lsa.hdr.key(),
                });
            }
            VertexLsa::Router(lsa) => {
                let Some(lsa_body) = lsa.body.as_router() else {
                    continue;
                };
                stubs.extend(
                    lsa_body
                        .links
                        .iter()
                        .filter(|link| {
                            link.link_type == LsaRouterLinkType::StubNetwork
                        })
                        .filter_map(|link| {
                            let prefix =
                                lsa_prefix(link.link_id, link.link_data)?;
                            Some(SpfIntraAreaNetwork {
                                vertex,
                                prefix,
                                metric: link.metric,
                                origin: lsa.hdr.key(),
                            })
                        }),
                );
            }
        }
    }

    stubs
}

// ===== helper functions =====

// Runs SPF in the provided area.
fn run_area(
    area: &mut Area,
    instance: &InstanceUpView<'_>,
    interfaces: &Arena<Interface>,
    lsa_entries: &mut Arena<LsaEntry>,
) {
    area.state.transit_capability = false;
    area.state.spt.clear();
    area.state.routers.clear();

    // Clear the routing calculation data of the previous run.
    let lse_idxs = area.state.lsdb.indexes().collect::<Vec<_>>();
    for lse_idx in &lse_idxs {
        lsa_entries[*lse_idx].spf = Default::default();
    }

    // Get root vertex.
    let root_vid = VertexId::new_root(instance.state.router_id);
    let Some(root_vlsa) = vertex_lsa_find(root_vid, area, lsa_entries) else {
        if area.is_active(interfaces) {
            Error::SpfRootNotFound(area.area_id).log();
        }
        return;
    };
    let root_v = Vertex::new(root_vid, root_vlsa, 0, 0, None);

    // Initialize SPT and candidate list.
    let mut spt = BTreeMap::new();
    let mut cand_list = BTreeMap::new();
    cand_list.insert((root_v.distance, root_v.id), root_v);

    // Main SPF loop.
    while let Some(((_, vertex_id), vertex)) = cand_list.pop_first() {
        // Add vertex to SPT.
        spt.insert(vertex.id, vertex);
        let Some(vertex) = spt.get(&vertex_id) else {
            continue;
        };

        if vertex.lsa.is_router() {
            // Add "router" routing table entry.
            let route = RouteRtr::new(
                area.area_id,
                PathType::IntraArea,
                vertex.lsa.router_options(),
                vertex.lsa.router_flags(),
                vertex.distance,
                vertex.nexthops.clone(),
            );
            area.state.routers.insert(vertex.lsa.router_id(), route);

            // Set TransitCapability.
            if vertex.lsa.router_v_bit() {
                area.state.transit_capability = true;
            }
        }

        // Iterate over all links described by the vertex's LSA.
        for link in vertex_lsa_links(&vertex.lsa, area, lsa_entries) {
            // Check if the LSAs are mutually linked.
            if !vertex_lsa_links(&link.lsa, area, lsa_entries)
                .iter()
                .any(|back_link| back_link.id == vertex.id)
            {
                continue;
            }

            // Check if the link's vertex is already on the shortest-path tree.
            if spt.contains_key(&link.id) {
                continue;
            }

            // Calculate distance to the link's vertex.
            let distance = vertex.distance.saturating_add(link.cost.into());

            // Increment number of hops to the root.
            let mut hops = vertex.hops;
            if link.lsa.is_router() {
                hops = hops.saturating_add(1);
            }

            // Check if this vertex is already present on the candidate list.
            if let Some((cand_key, cand_v)) = cand_list
                .iter_mut()
                .find(|(_, cand_v)| cand_v.id == link.id)
            {
                match distance.cmp(&cand_v.distance) {
                    Ordering::Less => {
                        // Remove vertex since its key has changed. It will be
                        // re-added with the correct key below.
                        let cand_key = *cand_key;
                        cand_list.remove(&cand_key);
                    }
                    Ordering::Equal => {}
                    Ordering::Greater => {
                        // Ignore higher cost path.
                        continue;
                    }
                }
            }
            let cand_v =
                cand_list.entry((distance, link.id)).or_insert_with(|| {
                    Vertex::new(
                        link.id,
                        link.lsa.clone(),
                        distance,
                        hops,
                        Some(vertex.id),
                    )
                });

            // Update vertex's nexthops.
            match calc_nexthops(
                area,
                vertex,
                link.parent_link,
                link.id,
                &cand_v.lsa,
                interfaces,
            ) {
                Some(nexthops) => cand_v.nexthops.extend(nexthops),
                None => {
                    // The destination is still reachable through the other
                    // parents, if any.
                }
            }
        }
    }

    // Record the routing calculation data in the LSA entries.
    for vertex in spt.values() {
        let lsa_key = vertex.lsa.lsa().hdr.key();
        let Some((lse_idx, _)) = area.state.lsdb.get(lsa_entries, &lsa_key)
        else {
            continue;
        };
        let parent = vertex
            .parent
            .and_then(|parent| spt.get(&parent))
            .map(|parent| parent.lsa.lsa().hdr.key());
        lsa_entries[lse_idx].spf = LsaSpfData {
            distance: Some(vertex.distance),
            parent,
            nexthops: vertex.nexthops.clone(),
        };
    }

    // Update area's SPT.
    area.state.spt = spt;
}

// Finds the LSA describing the given vertex.
fn vertex_lsa_find(
    id: VertexId,
    area: &Area,
    lsa_entries: &Arena<LsaEntry>,
) -> Option<VertexLsa> {
    match id {
        VertexId::Network { dr_addr } => {
            // SPF needs to find a Network-LSA knowing only its LS-ID but not
            // its advertising router.
            area.state
                .lsdb
                .iter_by_type(lsa_entries, LsaTypeCode::Network.into())
                .map(|(_, lse)| &lse.data)
                .find(|lsa| lsa.hdr.lsa_id == dr_addr)
                .filter(|lsa| !lsa.hdr.is_maxage())
                .map(|lsa| VertexLsa::Network(lsa.clone()))
        }
        VertexId::Router { router_id } => {
            let lsa_key =
                LsaKey::new(LsaTypeCode::Router.into(), router_id, router_id);
            area.state
                .lsdb
                .get(lsa_entries, &lsa_key)
                .filter(|(_, lse)| !lse.data.hdr.is_maxage())
                .map(|(_, lse)| VertexLsa::Router(lse.data.clone()))
        }
    }
}

// Returns the links described by the given vertex's LSA.
fn vertex_lsa_links<'a>(
    vertex_lsa: &'a VertexLsa,
    area: &Area,
    lsa_entries: &Arena<LsaEntry>,
) -> Vec<SpfLink<'a>> {
    match vertex_lsa {
        VertexLsa::Network(lsa) => {
            let Some(lsa_body) = lsa.body.as_network() else {
                return vec![];
            };
            lsa_body
                .attached_rtrs
                .iter()
                .filter_map(|router_id| {
                    let link_vid = VertexId::Router {
                        router_id: *router_id,
                    };
                    vertex_lsa_find(link_vid, area, lsa_entries).map(
                        |link_vlsa| SpfLink {
                            parent_link: None,
                            id: link_vid,
                            lsa: link_vlsa,
                            cost: 0,
                        },
                    )
                })
                .collect()
        }
        VertexLsa::Router(lsa) => {
            let Some(lsa_body) = lsa.body.as_router() else {
                return vec![];
            };
            lsa_body
                .links
                .iter()
                .filter_map(|link| match link.link_type {
                    LsaRouterLinkType::PointToPoint => {
                        let link_vid = VertexId::Router {
                            router_id: link.link_id,
                        };
                        Some((link, link_vid))
                    }
                    LsaRouterLinkType::TransitNetwork => {
                        let link_vid = VertexId::Network {
                            dr_addr: link.link_id,
                        };
                        Some((link, link_vid))
                    }
                    LsaRouterLinkType::VirtualLink if area.is_backbone() => {
                        let link_vid = VertexId::Router {
                            router_id: link.link_id,
                        };
                        Some((link, link_vid))
                    }
                    LsaRouterLinkType::StubNetwork
                    | LsaRouterLinkType::VirtualLink => None,
                })
                .filter_map(|(link, link_vid)| {
                    vertex_lsa_find(link_vid, area, lsa_entries).map(
                        |link_vlsa| SpfLink {
                            parent_link: Some(link),
                            id: link_vid,
                            lsa: link_vlsa,
                            cost: link.metric,
                        },
                    )
                })
                .collect()
        }
    }
}

// Computes the set of nexthops that should be used to reach the given
// destination.
fn calc_nexthops(
    area: &Area,
    parent: &Vertex,
    parent_link: Option<&LsaRouterLink>,
    dest_id: VertexId,
    dest_lsa: &VertexLsa,
    interfaces: &Arena<Interface>,
) -> Option<Nexthops> {
    // If there is at least one intervening router in the current shortest
    // path between the destination and the root, the destination simply
    // inherits the set of next hops from the parent.
    if parent.hops != 0 {
        return Some(parent.nexthops.clone());
    }

    let mut nexthops = Nexthops::new();
    match &parent.lsa {
        // The parent vertex is the root.
        VertexLsa::Router(_) => {
            let parent_link = parent_link?;

            // Destinations reached through a virtual link use the nexthops
            // computed in the transit area.
            if parent_link.link_type == LsaRouterLinkType::VirtualLink {
                let VertexId::Router { router_id } = dest_id else {
                    return None;
                };
                let path = area
                    .interfaces
                    .iter(interfaces)
                    .filter_map(|iface| iface.vlink.as_ref())
                    .filter(|vlink| vlink.router_id == router_id)
                    .find_map(|vlink| vlink.path.as_ref())?;
                return Some(path.nexthops.clone());
            }

            // The outgoing interface in this case is simply the OSPF
            // interface connecting to the destination network/router.
            let parent_link_addr = parent_link.link_data;
            let (iface_idx, iface) = area
                .interfaces
                .indexes()
                .map(|iface_idx| (iface_idx, &interfaces[iface_idx]))
                .find(|(_, iface)| {
                    !iface.is_virtual_link()
                        && iface.config.addr.ip() == parent_link_addr
                })?;
            let ifindex = iface.config.ifindex;

            match dest_lsa {
                VertexLsa::Router(dest_lsa) => {
                    // The destination is a directly connected router. Its
                    // address is found in the link of its router-LSA that
                    // belongs to the same subnet.
                    let dest_body = dest_lsa.body.as_router()?;
                    let nbr_router_id = dest_lsa.hdr.adv_rtr;
                    nexthops.extend(
                        dest_body
                            .links
                            .iter()
                            .filter(|link| {
                                link.link_type
                                    != LsaRouterLinkType::StubNetwork
                            })
                            .filter(|link| {
                                iface.config.addr.contains(link.link_data)
                            })
                            .map(|link| {
                                let addr = Some(link.link_data);
                                (
                                    NexthopKey::new(iface_idx, addr),
                                    Nexthop::new(
                                        iface_idx,
                                        ifindex,
                                        addr,
                                        Some(nbr_router_id),
                                    ),
                                )
                            }),
                    );
                }
                VertexLsa::Network(_) => {
                    // The destination is a directly connected network.
                    nexthops.insert(
                        NexthopKey::new(iface_idx, None),
                        Nexthop::new(iface_idx, ifindex, None, None),
                    );
                }
            }
        }
        // The parent vertex is a network that directly connects the
        // calculating router to the destination router.
        VertexLsa::Network(parent_lsa) => {
            // The list of next hops is then determined by examining the
            // destination's router-LSA. For each link in the router-LSA that
            // points back to the parent network, the link's Link Data field
            // provides the IP address of a next hop router.
            let parent_body = parent_lsa.body.as_network()?;
            let parent_network =
                lsa_prefix(parent_lsa.hdr.lsa_id, parent_body.mask)?;
            let VertexLsa::Router(dest_lsa) = dest_lsa else {
                return None;
            };
            let dest_link = dest_lsa
                .body
                .as_router()?
                .links
                .iter()
                .filter(|link| {
                    link.link_type == LsaRouterLinkType::TransitNetwork
                })
                .find(|link| parent_network.contains(link.link_data))?;

            // Inherit outgoing interface from the parent network.
            let parent_nexthop = parent.nexthops.values().next()?;
            let iface_idx = parent_nexthop.iface_idx;
            let ifindex = parent_nexthop.ifindex;

            // Add nexthop.
            let nbr_router_id = dest_lsa.hdr.adv_rtr;
            let addr = Some(dest_link.link_data);
            nexthops.insert(
                NexthopKey::new(iface_idx, addr),
                Nexthop::new(iface_idx, ifindex, addr, Some(nbr_router_id)),
            );
        }
    }

    (!nexthops.is_empty()).then_some(nexthops)
}

// Brings virtual links up or down according to the reachability of their
// endpoints through the transit areas.
fn update_virtual_links(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    let Some((_, backbone)) = arenas.areas.backbone() else {
        return;
    };
    let backbone_id = backbone.id;

    for iface_idx in backbone.interfaces.indexes() {
        let iface = &arenas.interfaces[iface_idx];
        let Some(vlink) = &iface.vlink else {
            continue;
        };

        // Compute the path to the virtual link endpoint.
        let path = arenas
            .areas
            .get_by_area_id(vlink.transit_area_id)
            .and_then(|(_, transit_area)| {
                virtual_link_path(
                    transit_area,
                    vlink.router_id,
                    &arenas.interfaces,
                )
            });

        let iface = &mut arenas.interfaces[iface_idx];
        let Some(vlink) = &mut iface.vlink else {
            continue;
        };
        let old_cost = vlink.path.as_ref().map(|path| path.cost);
        let new_cost = path.as_ref().map(|path| path.cost);
        vlink.path = path;

        match (old_cost, new_cost) {
            (None, Some(cost)) => {
                Debug::VirtualLinkUp(&iface.name, cost).log();
                instance.tx.ism_event(
                    backbone_id,
                    iface.id,
                    ism::Event::InterfaceUp,
                );
            }
            (Some(_), None) => {
                Debug::VirtualLinkDown(&iface.name).log();
                instance.tx.ism_event(
                    backbone_id,
                    iface.id,
                    ism::Event::InterfaceDown,
                );
            }
            (Some(old_cost), Some(new_cost)) if old_cost != new_cost => {
                instance
                    .tx
                    .lsa_orig_event(LsaOriginateEvent::VirtualLinkChange);
            }
            _ => (),
        }
    }
}

// Computes the path to a virtual link endpoint through its transit area.
fn virtual_link_path(
    transit_area: &Area,
    router_id: Ipv4Addr,
    interfaces: &Arena<Interface>,
) -> Option<VirtualLinkPath> {
    let vertex = transit_area.state.spt.get(&VertexId::Router { router_id })?;
    let nexthop = vertex.nexthops.values().next()?;
    let src_iface = &interfaces[nexthop.iface_idx];

    // The endpoint's address is the one it uses on the link toward its parent
    // vertex.
    let dest_body = vertex.lsa.lsa().body.as_router()?;
    let dst = dest_body
        .links
        .iter()
        .find(|link| match (vertex.parent, link.link_type) {
            (
                Some(VertexId::Network { dr_addr }),
                LsaRouterLinkType::TransitNetwork,
            ) => link.link_id == dr_addr,
            (
                Some(VertexId::Router { router_id }),
                LsaRouterLinkType::PointToPoint,
            ) => link.link_id == router_id,
            _ => false,
        })
        .or_else(|| {
            dest_body.links.iter().find(|link| {
                matches!(
                    link.link_type,
                    LsaRouterLinkType::PointToPoint
                        | LsaRouterLinkType::TransitNetwork
                )
            })
        })?
        .link_data;

    Some(VirtualLinkPath {
        cost: u16::try_from(vertex.distance).unwrap_or(u16::MAX),
        src: src_iface.config.addr.ip(),
        dst,
        ifindex: nexthop.ifindex,
        nexthops: vertex.nexthops.clone(),
    })
}
