//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use enum_as_inner::EnumAsInner;
use generational_arena::Index;
use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::config::{AreaCfg, InterfaceCfg};
use crate::error::Error;
use crate::interface::Interface;
use crate::lsdb::{LsaDelayedOrig, LsaEntry};
use crate::neighbor::Neighbor;
use crate::packet::lsa::{Lsa, LsaKey, LsaType};

pub type ObjectId = u32;

pub type AreaId = ObjectId;
pub type AreaIndex = Index;
pub type InterfaceId = ObjectId;
pub type InterfaceIndex = Index;
pub type NeighborId = ObjectId;
pub type NeighborIndex = Index;
pub type LsaEntryId = ObjectId;
pub type LsaEntryIndex = Index;

#[derive(Debug)]
pub struct Arena<T>(generational_arena::Arena<T>);

#[derive(Debug, Default)]
pub struct Areas {
    arena: Arena<Area>,
    id_tree: HashMap<AreaId, AreaIndex>,
    area_id_tree: BTreeMap<Ipv4Addr, AreaIndex>,
    next_id: AreaId,
}

#[derive(Debug, Default)]
pub struct Interfaces {
    id_tree: HashMap<InterfaceId, InterfaceIndex>,
    name_tree: BTreeMap<String, InterfaceIndex>,
    ifindex_tree: HashMap<u32, InterfaceIndex>,
    next_id: InterfaceId,
}

#[derive(Debug, Default)]
pub struct Neighbors {
    id_tree: HashMap<NeighborId, NeighborIndex>,
    router_id_tree: BTreeMap<Ipv4Addr, NeighborIndex>,
    addr_tree: BTreeMap<Ipv4Addr, NeighborIndex>,
    next_id: NeighborId,
}

#[derive(Debug, Default)]
pub struct Lsdb {
    id_tree: HashMap<LsaEntryId, LsaEntryIndex>,
    tree: BTreeMap<LsaType, BTreeMap<LsaKey, LsaEntryIndex>>,
    // LSAs whose origination was delayed due to the MinLSInterval check.
    pub delayed_orig: BTreeMap<LsaKey, LsaDelayedOrig>,
    // Self-originated LSAs being flushed because their sequence number
    // reached the maximum. They're originated again, starting from the
    // initial sequence number, once the flushed instance is purged.
    pub seqno_wrapping: BTreeMap<LsaKey, Lsa>,
    next_id: LsaEntryId,
}

// LSDB ID.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsdbId {
    Area(AreaId),
    As,
}

// LSDB Index.
#[derive(Clone, Copy, Debug, EnumAsInner, Eq, PartialEq)]
pub enum LsdbIndex {
    Area(AreaIndex),
    As,
}

// ===== impl Arena =====

impl<T> Arena<T> {
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.0.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (Index, &mut T)> {
        self.0.iter_mut()
    }

    pub(crate) fn get(&self, index: Index) -> Option<&T> {
        self.0.get(index)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Arena<T> {
        Arena(Default::default())
    }
}

impl<T> std::ops::Index<Index> for Arena<T> {
    type Output = T;

    fn index(&self, index: Index) -> &Self::Output {
        &self.0[index]
    }
}

impl<T> std::ops::IndexMut<Index> for Arena<T> {
    fn index_mut(&mut self, index: Index) -> &mut Self::Output {
        &mut self.0[index]
    }
}

// ===== impl Areas =====

impl Areas {
    pub(crate) fn insert(&mut self, config: AreaCfg) -> (AreaIndex, &mut Area) {
        // Create and insert area into the arena.
        self.next_id += 1;
        let area = Area::new(self.next_id, config);
        let area_idx = self.arena.0.insert(area);

        // Link area to different collections.
        let area = &mut self.arena[area_idx];
        self.id_tree.insert(area.id, area_idx);
        self.area_id_tree.insert(area.area_id, area_idx);

        (area_idx, area)
    }

    // Returns a reference to the area corresponding to the given ID.
    pub(crate) fn get_by_id(
        &self,
        id: AreaId,
    ) -> Result<(AreaIndex, &Area), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|area_idx| (area_idx, &self.arena[area_idx]))
            .filter(|(_, area)| area.id == id)
            .ok_or(Error::AreaIdNotFound(id))
    }

    // Returns a mutable reference to the area corresponding to the given ID.
    pub(crate) fn get_mut_by_id(
        &mut self,
        id: AreaId,
    ) -> Result<(AreaIndex, &mut Area), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |area_idx| (area_idx, &mut self.arena[area_idx]))
            .filter(|(_, area)| area.id == id)
            .ok_or(Error::AreaIdNotFound(id))
    }

    // Returns a reference to the area corresponding to the given area ID.
    pub(crate) fn get_by_area_id(
        &self,
        area_id: Ipv4Addr,
    ) -> Option<(AreaIndex, &Area)> {
        self.area_id_tree
            .get(&area_id)
            .copied()
            .map(|area_idx| (area_idx, &self.arena[area_idx]))
    }

    // Returns a reference to the backbone area, if configured.
    pub(crate) fn backbone(&self) -> Option<(AreaIndex, &Area)> {
        self.get_by_area_id(Ipv4Addr::UNSPECIFIED)
    }

    // Returns an iterator visiting all areas.
    //
    // Areas are ordered by their area IDs.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Area> {
        self.area_id_tree
            .values()
            .map(|area_idx| &self.arena[*area_idx])
    }

    // Returns an iterator visiting all areas with mutable references.
    //
    // Order of iteration is not defined.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &'_ mut Area> {
        self.arena.0.iter_mut().map(|(_, area)| area)
    }

    // Returns an iterator over all area indexes.
    //
    // Areas are ordered by their area IDs.
    pub(crate) fn indexes(&self) -> impl Iterator<Item = AreaIndex> + '_ {
        self.area_id_tree.values().copied()
    }

    // Returns whether we're an area border router.
    pub(crate) fn is_abr(&self, interfaces: &Arena<Interface>) -> bool {
        self.active_count(interfaces) > 1
    }

    // Returns the number of active areas.
    pub(crate) fn active_count(&self, interfaces: &Arena<Interface>) -> usize {
        self.iter()
            .filter(|area| area.is_active(interfaces))
            .count()
    }
}

impl std::ops::Index<AreaIndex> for Areas {
    type Output = Area;

    fn index(&self, index: AreaIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<AreaIndex> for Areas {
    fn index_mut(&mut self, index: AreaIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== impl Interfaces =====

impl Interfaces {
    pub(crate) fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<Interface>,
        config: InterfaceCfg,
    ) -> (InterfaceIndex, &'a mut Interface) {
        // Create and insert interface into the arena.
        self.next_id += 1;
        let iface = Interface::new(self.next_id, config);
        let iface_idx = arena.0.insert(iface);

        // Link interface to different collections.
        let iface = &mut arena[iface_idx];
        self.id_tree.insert(iface.id, iface_idx);
        self.name_tree.insert(iface.name.clone(), iface_idx);
        if !iface.is_virtual_link() {
            self.ifindex_tree.insert(iface.config.ifindex, iface_idx);
        }

        (iface_idx, iface)
    }

    // Returns a reference to the interface corresponding to the given ID.
    pub(crate) fn get_by_id<'a>(
        &self,
        arena: &'a Arena<Interface>,
        id: InterfaceId,
    ) -> Result<(InterfaceIndex, &'a Interface), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|iface_idx| (iface_idx, &arena[iface_idx]))
            .filter(|(_, iface)| iface.id == id)
            .ok_or(Error::InterfaceIdNotFound(id))
    }

    // Returns a mutable reference to the interface corresponding to the given
    // ID.
    pub(crate) fn get_mut_by_id<'a>(
        &mut self,
        arena: &'a mut Arena<Interface>,
        id: InterfaceId,
    ) -> Result<(InterfaceIndex, &'a mut Interface), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |iface_idx| (iface_idx, &mut arena[iface_idx]))
            .filter(|(_, iface)| iface.id == id)
            .ok_or(Error::InterfaceIdNotFound(id))
    }

    // Returns a reference to the interface corresponding to the given name.
    pub(crate) fn get_by_name<'a>(
        &self,
        arena: &'a Arena<Interface>,
        ifname: &str,
    ) -> Option<(InterfaceIndex, &'a Interface)> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(|iface_idx| (iface_idx, &arena[iface_idx]))
    }

    // Returns a reference to the interface corresponding to the given ifindex.
    pub(crate) fn get_by_ifindex<'a>(
        &self,
        arena: &'a Arena<Interface>,
        ifindex: u32,
    ) -> Option<(InterfaceIndex, &'a Interface)> {
        self.ifindex_tree
            .get(&ifindex)
            .copied()
            .map(|iface_idx| (iface_idx, &arena[iface_idx]))
    }

    // Returns an iterator visiting all interfaces.
    //
    // Interfaces are ordered by their names.
    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<Interface>,
    ) -> impl Iterator<Item = &'a Interface> + 'a {
        self.name_tree.values().map(|iface_idx| &arena[*iface_idx])
    }

    // Returns an iterator over all interface indexes.
    //
    // Interfaces are ordered by their names.
    pub(crate) fn indexes(&self) -> impl Iterator<Item = InterfaceIndex> + '_ {
        self.name_tree.values().copied()
    }
}

// ===== impl Neighbors =====

impl Neighbors {
    pub(crate) fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        router_id: Ipv4Addr,
        src: Ipv4Addr,
    ) -> (NeighborIndex, &'a mut Neighbor) {
        // Create and insert neighbor into the arena.
        self.next_id += 1;
        let nbr = Neighbor::new(self.next_id, router_id, src);
        let nbr_idx = arena.0.insert(nbr);

        // Link neighbor to different collections.
        let nbr = &mut arena[nbr_idx];
        self.id_tree.insert(nbr.id, nbr_idx);
        self.router_id_tree.insert(nbr.router_id, nbr_idx);
        self.addr_tree.insert(nbr.src, nbr_idx);

        (nbr_idx, nbr)
    }

    pub(crate) fn delete(
        &mut self,
        arena: &mut Arena<Neighbor>,
        nbr_idx: NeighborIndex,
    ) {
        let nbr = &mut arena[nbr_idx];

        // Unlink neighbor from different collections.
        self.id_tree.remove(&nbr.id);
        self.router_id_tree.remove(&nbr.router_id);
        self.addr_tree.remove(&nbr.src);

        // Remove neighbor from the arena.
        arena.0.remove(nbr_idx);
    }

    // Updates the Router ID of a neighbor learned through static
    // configuration, once its first Hello arrives.
    pub(crate) fn update_router_id(
        &mut self,
        nbr_idx: NeighborIndex,
        nbr: &mut Neighbor,
        router_id: Ipv4Addr,
    ) {
        self.router_id_tree.remove(&nbr.router_id);
        nbr.router_id = router_id;
        self.router_id_tree.insert(nbr.router_id, nbr_idx);
    }

    pub(crate) fn update_src(
        &mut self,
        nbr_idx: NeighborIndex,
        nbr: &mut Neighbor,
        src: Ipv4Addr,
    ) {
        self.addr_tree.remove(&nbr.src);
        nbr.src = src;
        self.addr_tree.insert(nbr.src, nbr_idx);
    }

    // Returns a reference to the neighbor corresponding to the given ID.
    pub(crate) fn get_by_id<'a>(
        &self,
        arena: &'a Arena<Neighbor>,
        id: NeighborId,
    ) -> Result<(NeighborIndex, &'a Neighbor), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|nbr_idx| (nbr_idx, &arena[nbr_idx]))
            .filter(|(_, nbr)| nbr.id == id)
            .ok_or(Error::NeighborIdNotFound(id))
    }

    // Returns a mutable reference to the neighbor corresponding to the given
    // ID.
    pub(crate) fn get_mut_by_id<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        id: NeighborId,
    ) -> Result<(NeighborIndex, &'a mut Neighbor), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut arena[nbr_idx]))
            .filter(|(_, nbr)| nbr.id == id)
            .ok_or(Error::NeighborIdNotFound(id))
    }

    // Returns a reference to the neighbor corresponding to the given Router ID.
    pub(crate) fn get_by_router_id<'a>(
        &self,
        arena: &'a Arena<Neighbor>,
        router_id: Ipv4Addr,
    ) -> Option<(NeighborIndex, &'a Neighbor)> {
        self.router_id_tree
            .get(&router_id)
            .copied()
            .map(|nbr_idx| (nbr_idx, &arena[nbr_idx]))
    }

    // Returns a reference to the neighbor corresponding to the given source
    // address.
    pub(crate) fn get_by_addr<'a>(
        &self,
        arena: &'a Arena<Neighbor>,
        addr: Ipv4Addr,
    ) -> Option<(NeighborIndex, &'a Neighbor)> {
        self.addr_tree
            .get(&addr)
            .copied()
            .map(|nbr_idx| (nbr_idx, &arena[nbr_idx]))
    }

    // Returns an iterator visiting all neighbors.
    //
    // Neighbors are ordered by their Router IDs.
    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<Neighbor>,
    ) -> impl Iterator<Item = &'a Neighbor> + 'a {
        self.router_id_tree.values().map(|nbr_idx| &arena[*nbr_idx])
    }

    // Returns an iterator over all neighbor indexes.
    //
    // Neighbors are ordered by their Router IDs.
    pub(crate) fn indexes(&self) -> impl Iterator<Item = NeighborIndex> + '_ {
        self.router_id_tree.values().copied()
    }

    // Returns the number of neighbors.
    pub(crate) fn count(&self) -> usize {
        self.router_id_tree.len()
    }
}

// ===== impl Lsdb =====

impl Lsdb {
    // Inserts an LSA, replacing the previous instance with the same key (if
    // any). The replaced entry is returned to the caller.
    pub(crate) fn insert(
        &mut self,
        arena: &mut Arena<LsaEntry>,
        lsa: Lsa,
    ) -> (LsaEntryIndex, Option<LsaEntry>) {
        let key = lsa.hdr.key();

        // Remove the old instance.
        let old = self
            .tree
            .get(&key.lsa_type)
            .and_then(|lsdb_type| lsdb_type.get(&key))
            .copied()
            .and_then(|lse_idx| self.delete(arena, lse_idx));

        // Create and insert LSA into the arena.
        self.next_id += 1;
        let lse = LsaEntry::new(self.next_id, lsa);
        let lse_idx = arena.0.insert(lse);

        // Link LSA to different collections.
        self.id_tree.insert(self.next_id, lse_idx);
        self.tree
            .entry(key.lsa_type)
            .or_default()
            .insert(key, lse_idx);

        (lse_idx, old)
    }

    pub(crate) fn delete(
        &mut self,
        arena: &mut Arena<LsaEntry>,
        lse_idx: LsaEntryIndex,
    ) -> Option<LsaEntry> {
        let lse = arena.0.remove(lse_idx)?;
        let key = lse.data.hdr.key();

        // Unlink LSA from different collections.
        self.id_tree.remove(&lse.id);
        if let Some(lsdb_type) = self.tree.get_mut(&key.lsa_type) {
            lsdb_type.remove(&key);
            if lsdb_type.is_empty() {
                self.tree.remove(&key.lsa_type);
            }
        }

        Some(lse)
    }

    // Returns a reference to the LSA corresponding to the given ID.
    pub(crate) fn get_by_id<'a>(
        &self,
        arena: &'a Arena<LsaEntry>,
        id: LsaEntryId,
    ) -> Result<(LsaEntryIndex, &'a LsaEntry), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|lse_idx| (lse_idx, &arena[lse_idx]))
            .filter(|(_, lse)| lse.id == id)
            .ok_or(Error::LsaEntryIdNotFound(id))
    }

    // Returns a reference to the LSA corresponding to the given LSA key.
    pub(crate) fn get<'a>(
        &self,
        arena: &'a Arena<LsaEntry>,
        key: &LsaKey,
    ) -> Option<(LsaEntryIndex, &'a LsaEntry)> {
        self.tree
            .get(&key.lsa_type)
            .and_then(|lsdb_type| lsdb_type.get(key).copied())
            .map(move |lse_idx| (lse_idx, &arena[lse_idx]))
    }

    // Returns an iterator visiting all LSAs.
    //
    // LSAs are ordered by their keys.
    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        self.tree.values().flat_map(|lsdb_type| {
            lsdb_type
                .values()
                .map(|lse_idx| (*lse_idx, &arena[*lse_idx]))
        })
    }

    // Returns an iterator visiting all LSAs of the given type.
    //
    // LSAs are ordered by their keys.
    pub(crate) fn iter_by_type<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
        lsa_type: LsaType,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        self.tree.get(&lsa_type).into_iter().flat_map(|lsdb_type| {
            lsdb_type
                .values()
                .map(|lse_idx| (*lse_idx, &arena[*lse_idx]))
        })
    }

    // Returns an iterator visiting all LSAs of the given type and advertising
    // router.
    //
    // LSAs are ordered by their keys.
    pub(crate) fn iter_by_type_advrtr<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
        lsa_type: LsaType,
        adv_rtr: Ipv4Addr,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        let begin = LsaKey::new(lsa_type, adv_rtr, Ipv4Addr::UNSPECIFIED);
        let end = LsaKey::new(lsa_type, adv_rtr, Ipv4Addr::BROADCAST);
        self.tree
            .get(&lsa_type)
            .into_iter()
            .flat_map(move |lsdb_type| lsdb_type.range(begin..=end))
            .map(|(_, lse_idx)| (*lse_idx, &arena[*lse_idx]))
    }

    // Returns an iterator over all LSA indexes.
    //
    // LSAs are ordered by their keys.
    pub(crate) fn indexes(&self) -> impl Iterator<Item = LsaEntryIndex> + '_ {
        self.tree
            .values()
            .flat_map(|lsdb_type| lsdb_type.values().copied())
    }

    pub(crate) fn lsa_count(&self) -> usize {
        self.id_tree.len()
    }
}

// ===== global functions =====

pub(crate) fn lsdb_get<'a>(
    instance_lsdb: &'a Lsdb,
    areas: &'a Areas,
    lsdb_id: LsdbId,
) -> Result<(LsdbIndex, &'a Lsdb), Error> {
    match lsdb_id {
        LsdbId::Area(area_id) => {
            let (area_idx, area) = areas.get_by_id(area_id)?;
            Ok((LsdbIndex::Area(area_idx), &area.state.lsdb))
        }
        LsdbId::As => Ok((LsdbIndex::As, instance_lsdb)),
    }
}

pub(crate) fn lsdb_index<'a>(
    instance_lsdb: &'a Lsdb,
    areas: &'a Areas,
    lsdb_idx: LsdbIndex,
) -> (LsdbId, &'a Lsdb) {
    match lsdb_idx {
        LsdbIndex::Area(area_idx) => {
            let area = &areas[area_idx];
            (LsdbId::Area(area.id), &area.state.lsdb)
        }
        LsdbIndex::As => (LsdbId::As, instance_lsdb),
    }
}

pub(crate) fn lsdb_index_mut<'a>(
    instance_lsdb: &'a mut Lsdb,
    areas: &'a mut Areas,
    lsdb_idx: LsdbIndex,
) -> (LsdbId, &'a mut Lsdb) {
    match lsdb_idx {
        LsdbIndex::Area(area_idx) => {
            let area = &mut areas[area_idx];
            (LsdbId::Area(area.id), &mut area.state.lsdb)
        }
        LsdbIndex::As => (LsdbId::As, instance_lsdb),
    }
}
