//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;

use ism::{Action, Event, State};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

use crate::area::Area;
use crate::collections::{Arena, InterfaceId, NeighborIndex, Neighbors};
use crate::config::{AuthCfg, InterfaceCfg};
use crate::debug::{Debug, InterfaceInactiveReason};
use crate::error::{Error, InterfaceCfgError};
use crate::instance::InstanceUpView;
use crate::lsdb::{self, LsaEntry, LsaOriginateEvent};
use crate::neighbor::{Neighbor, nsm};
use crate::network::{MulticastAddr, SendDestination};
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey, LsaType, LsaTypeCode};
use crate::packet::{AuthData, Hello, Packet};
use crate::route::Nexthops;
use crate::tasks::{self, IntervalTask, TimeoutTask};
use crate::{network, output};

// Size of the IPv4 header that precedes every OSPF packet.
const IPV4_HDR_LENGTH: u16 = 20;

#[derive(Debug)]
pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    pub config: InterfaceCfg,
    pub state: InterfaceState,
    // Virtual link endpoint (virtual links only).
    pub vlink: Option<VirtualLink>,
}

#[derive(Debug, Default)]
pub struct InterfaceState {
    // ISM state.
    pub ism_state: State,
    // Designated Router and Backup Designated Router, identified by their
    // interface addresses.
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    // List of neighbors attached to this interface.
    pub neighbors: Neighbors,
    // Router IDs listed in the Hello packets sent on this interface.
    pub hello_nbrs: BTreeSet<Ipv4Addr>,
    // LSAs enqueued for transmission in LS Update packets.
    pub ls_update_list: BTreeMap<LsaKey, Lsa>,
    // LSA headers enqueued for transmission in delayed LS Ack packets.
    pub ls_ack_list: BTreeMap<LsaKey, LsaHdr>,
    // The network-LSA originated for this interface, if any.
    pub network_lsa_self: Option<LsaKey>,
    // Tasks.
    pub tasks: InterfaceTasks,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    // Hello Tx interval task.
    pub hello_interval: Option<IntervalTask>,
    // Hello Tx interval tasks for dead NBMA neighbors.
    pub nbma_poll_interval: HashMap<Ipv4Addr, IntervalTask>,
    // ISM WaitTimer task.
    pub wait_timer: Option<TimeoutTask>,
    // Delayed LS Ack timeout task.
    pub ls_delayed_ack: Option<TimeoutTask>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    PointToPoint,
    Broadcast,
    NonBroadcast,
    PointToMultipoint,
    VirtualLink,
}

#[derive(Debug)]
pub struct VirtualLink {
    pub transit_area_id: Ipv4Addr,
    pub router_id: Ipv4Addr,
    // Path through the transit area (`None` while the endpoint is
    // unreachable).
    pub path: Option<VirtualLinkPath>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VirtualLinkPath {
    pub cost: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub ifindex: u32,
    pub nexthops: Nexthops,
}

// Router taking part in the DR election.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DrCandidate {
    pub router_id: Ipv4Addr,
    pub addr: Ipv4Addr,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub priority: u8,
}

// Interface state machine.
pub mod ism {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Loopback,
        Waiting,
        PointToPoint,
        DrOther,
        Backup,
        Dr,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        InterfaceUp,
        WaitTimer,
        BackupSeen,
        NbrChange,
        LoopInd,
        UnloopInd,
        InterfaceDown,
    }

    // Side effect of a state transition. `Start` and `ElectDr` also decide
    // the new state.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum Action {
        Start,
        ElectDr,
        Stop,
    }

    // Computes the outcome of an ISM event (RFC 2328, Section 9.3).
    //
    // Returns `None` if the event isn't expected in the current state.
    pub fn transition(
        state: State,
        event: Event,
    ) -> Option<(Option<State>, Option<Action>)> {
        let outcome = match (state, event) {
            (State::Down, Event::InterfaceUp) => (None, Some(Action::Start)),
            (State::Waiting, Event::BackupSeen | Event::WaitTimer) => {
                (None, Some(Action::ElectDr))
            }
            (State::DrOther | State::Backup | State::Dr, Event::NbrChange) => {
                (None, Some(Action::ElectDr))
            }
            // Neighbor changes are irrelevant until the DR election takes
            // place, and on networks that don't elect one.
            (
                State::Down
                | State::Loopback
                | State::Waiting
                | State::PointToPoint,
                Event::NbrChange,
            ) => (None, None),
            (_, Event::InterfaceDown) => {
                (Some(State::Down), Some(Action::Stop))
            }
            (_, Event::LoopInd) => (Some(State::Loopback), Some(Action::Stop)),
            (State::Loopback, Event::UnloopInd) => (Some(State::Down), None),
            _ => return None,
        };

        Some(outcome)
    }
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(id: InterfaceId, config: InterfaceCfg) -> Interface {
        Debug::InterfaceCreate(&config.name).log();

        Interface {
            id,
            name: config.name.clone(),
            config,
            state: Default::default(),
            vlink: None,
        }
    }

    pub(crate) fn fsm(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        lsa_entries: &Arena<LsaEntry>,
        event: Event,
    ) {
        Debug::IsmEvent(&self.state.ism_state, &event).log();

        let Some((new_state, action)) =
            ism::transition(self.state.ism_state, event)
        else {
            Error::IsmUnexpectedEvent(self.state.ism_state, event).log();
            return;
        };

        let new_state = match action {
            Some(Action::Start) => Some(self.start(area, instance, neighbors)),
            Some(Action::ElectDr) => {
                Some(self.dr_election(area, instance, neighbors))
            }
            Some(Action::Stop) => {
                let reason = if event == Event::LoopInd {
                    InterfaceInactiveReason::LoopedBack
                } else if self.is_virtual_link() {
                    InterfaceInactiveReason::VirtualLinkUnreachable
                } else {
                    InterfaceInactiveReason::AdminDown
                };
                self.stop(area, instance, neighbors, lsa_entries, reason);
                new_state
            }
            None => new_state,
        };

        // Check for FSM state change.
        if let Some(new_state) = new_state
            && new_state != self.state.ism_state
        {
            self.fsm_state_change(area, instance, new_state);
        }
    }

    fn fsm_state_change(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        new_state: State,
    ) {
        // (Re)originate LSAs that might have been affected.
        instance
            .tx
            .lsa_orig_event(LsaOriginateEvent::InterfaceStateChange {
                area_id: area.id,
                iface_id: self.id,
            });
        if self.state.ism_state == State::Dr {
            instance
                .tx
                .lsa_orig_event(LsaOriginateEvent::InterfaceDrChange {
                    area_id: area.id,
                    iface_id: self.id,
                });
        }

        Debug::IsmTransition(&self.state.ism_state, &new_state).log();
        self.state.ism_state = new_state;
    }

    fn start(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &Arena<Neighbor>,
    ) -> State {
        Debug::InterfaceStart(&self.name).log();

        // Passive interfaces neither send nor receive protocol packets.
        if !self.config.passive {
            output::send_hello(self, area, instance, &self.hello_dsts());
            self.hello_interval_start(area, instance);
        }

        let new_state = match self.config.if_type {
            InterfaceType::PointToPoint
            | InterfaceType::PointToMultipoint
            | InterfaceType::VirtualLink => State::PointToPoint,
            InterfaceType::Broadcast | InterfaceType::NonBroadcast => {
                if self.config.priority == 0 {
                    State::DrOther
                } else {
                    State::Waiting
                }
            }
        };

        if new_state == State::Waiting {
            // Start wait timer.
            let task = tasks::iface_wait_timer(
                instance.sched,
                area.id,
                self.id,
                self.config.dead_interval,
            );
            self.state.tasks.wait_timer = Some(task);

            // Generate the neighbor event Start for each configured neighbor
            // that is eligible to become Designated Router.
            if self.config.if_type == InterfaceType::NonBroadcast {
                self.nbma_start(area, instance, neighbors, |priority| {
                    priority != 0
                });
            }
        }

        new_state
    }

    fn stop(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        lsa_entries: &Arena<LsaEntry>,
        reason: InterfaceInactiveReason,
    ) {
        if self.is_down() {
            return;
        }

        Debug::InterfaceStop(&self.name, reason).log();

        // Kill all neighbors.
        let event = match reason {
            InterfaceInactiveReason::VirtualLinkUnreachable => {
                nsm::Event::LinkDown
            }
            _ => nsm::Event::Kill,
        };
        for nbr_idx in self.state.neighbors.indexes().collect::<Vec<_>>() {
            let nbr = &mut neighbors[nbr_idx];
            nbr.fsm(self, area, instance, lsa_entries, event);
            self.state.neighbors.delete(neighbors, nbr_idx);
        }

        // Reset interface state. The self-originated network-LSA is kept
        // track of so that it can be flushed.
        self.state.dr = None;
        self.state.bdr = None;
        self.state.neighbors = Default::default();
        self.state.hello_nbrs = Default::default();
        self.state.ls_update_list = Default::default();
        self.state.ls_ack_list = Default::default();
        self.state.tasks = Default::default();
    }

    // Runs the Designated Router election (RFC 2328, Section 9.4).
    //
    // Returns the new interface state.
    fn dr_election(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &Arena<Neighbor>,
    ) -> State {
        let router_id = instance.state.router_id;
        let addr = self.src_addr();

        // Step 1: note the current values for the network's Designated Router
        // and Backup Designated Router.
        let old_dr = self.state.dr;
        let old_bdr = self.state.bdr;

        // Steps 2 and 3: calculate the new BDR and DR.
        let candidates = self.dr_eligible_routers(router_id, neighbors);
        let mut new_bdr = calc_bdr(&candidates);
        let mut new_dr = calc_dr(&candidates, new_bdr);
        self.state.dr = new_dr;
        self.state.bdr = new_bdr;

        // Step 4: if the router is the new DR/BDR or no longer the DR/BDR,
        // repeat steps 2 and 3.
        if (new_dr == Some(addr) || old_dr == Some(addr)) && new_dr != old_dr
            || (new_bdr == Some(addr) || old_bdr == Some(addr))
                && new_bdr != old_bdr
        {
            let candidates = self.dr_eligible_routers(router_id, neighbors);
            new_bdr = calc_bdr(&candidates);
            new_dr = calc_dr(&candidates, new_bdr);
            self.state.dr = new_dr;
            self.state.bdr = new_bdr;
        }

        // Step 5: set the interface state accordingly.
        Debug::IsmDrElection(old_dr, new_dr, old_bdr, new_bdr).log();
        let next_state = if new_dr == Some(addr) {
            State::Dr
        } else if new_bdr == Some(addr) {
            State::Backup
        } else {
            State::DrOther
        };

        // Step 6: on NBMA networks, a router that has just become DR or BDR
        // must start sending Hello packets to the neighbors that aren't
        // eligible to become DR.
        if self.config.if_type == InterfaceType::NonBroadcast
            && matches!(next_state, State::Dr | State::Backup)
        {
            self.nbma_start(area, instance, neighbors, |priority| {
                priority == 0
            });
        }

        // Step 7: if the DR or BDR changed, invoke the AdjOk? event on all
        // neighbors whose state is at least 2-Way.
        if new_dr != old_dr || new_bdr != old_bdr {
            for nbr in self
                .state
                .neighbors
                .iter(neighbors)
                .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            {
                instance.tx.nsm_event(
                    area.id,
                    self.id,
                    nbr.id,
                    nsm::Event::AdjOk,
                );
            }
        }

        // If the DR changed, reoriginate LSAs that might have been affected.
        if new_dr != old_dr {
            instance
                .tx
                .lsa_orig_event(LsaOriginateEvent::InterfaceDrChange {
                    area_id: area.id,
                    iface_id: self.id,
                });
        }

        next_state
    }

    fn dr_eligible_routers(
        &self,
        router_id: Ipv4Addr,
        neighbors: &Arena<Neighbor>,
    ) -> Vec<DrCandidate> {
        let myself = (self.config.priority != 0).then_some(DrCandidate {
            router_id,
            addr: self.src_addr(),
            dr: self.state.dr,
            bdr: self.state.bdr,
            priority: self.config.priority,
        });

        let nbrs = self
            .state
            .neighbors
            .iter(neighbors)
            .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            .filter(|nbr| nbr.priority != 0)
            .map(|nbr| DrCandidate {
                router_id: nbr.router_id,
                addr: nbr.src,
                dr: nbr.dr,
                bdr: nbr.bdr,
                priority: nbr.priority,
            });

        myself.into_iter().chain(nbrs).collect()
    }

    // Generates the neighbor event Start for the configured NBMA neighbors
    // whose priority satisfies the given predicate.
    fn nbma_start(
        &self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &Arena<Neighbor>,
        priority_filter: impl Fn(u8) -> bool,
    ) {
        for nbr in self
            .config
            .static_nbrs
            .iter()
            .filter(|snbr| priority_filter(snbr.priority))
            .filter_map(|snbr| {
                self.state.neighbors.get_by_addr(neighbors, snbr.addr)
            })
            .map(|(_, nbr)| nbr)
            .filter(|nbr| nbr.state == nsm::State::Down)
        {
            instance
                .tx
                .nsm_event(area.id, self.id, nbr.id, nsm::Event::Start);
        }
    }

    // Returns whether an adjacency should be established with the given
    // neighbor (RFC 2328, Section 10.4).
    pub(crate) fn need_adjacency(&self, nbr: &Neighbor) -> bool {
        match self.config.if_type {
            InterfaceType::PointToPoint
            | InterfaceType::PointToMultipoint
            | InterfaceType::VirtualLink => true,
            InterfaceType::Broadcast | InterfaceType::NonBroadcast => {
                matches!(self.state.ism_state, State::Dr | State::Backup)
                    || self.state.dr == Some(nbr.src)
                    || self.state.bdr == Some(nbr.src)
            }
        }
    }

    // Checks whether LSAs of the given type can be exchanged over this
    // interface.
    pub(crate) fn lsa_type_is_valid(
        &self,
        area: &Area,
        lsa_type: LsaType,
    ) -> bool {
        // AS-external-LSAs are never flooded over virtual links.
        if self.is_virtual_link()
            && lsa_type.type_code() == Some(LsaTypeCode::AsExternal)
        {
            return false;
        }

        lsdb::lsa_type_is_valid(Some(area.config.area_type), lsa_type)
    }

    pub(crate) fn enqueue_ls_update(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        lsa: Lsa,
    ) {
        let was_empty = self.state.ls_update_list.is_empty();
        self.state.ls_update_list.insert(lsa.hdr.key(), lsa);

        // Schedule transmission of the LS Update list.
        if was_empty {
            instance.tx.send_lsupd(area.id, self.id, None);
        }
    }

    pub(crate) fn enqueue_delayed_ack(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        lsa_hdr: &LsaHdr,
    ) {
        self.state.ls_ack_list.insert(lsa_hdr.key(), *lsa_hdr);

        // Start delayed LS Ack timeout if necessary.
        if !self
            .state
            .tasks
            .ls_delayed_ack
            .as_ref()
            .is_some_and(|task| task.is_pending())
        {
            let task = tasks::iface_delayed_ack_timer(
                instance.sched,
                area.id,
                self.id,
                self.config.ack_delay,
            );
            self.state.tasks.ls_delayed_ack = Some(task);
        }
    }

    pub(crate) fn hello_interval_start(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        let task = tasks::iface_hello_interval(
            instance.sched,
            area.id,
            self.id,
            self.config.hello_interval,
        );
        self.state.tasks.hello_interval = Some(task);
    }

    pub(crate) fn nbma_poll_interval_start(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        addr: Ipv4Addr,
    ) {
        let task = tasks::iface_poll_interval(
            instance.sched,
            area.id,
            self.id,
            addr,
            self.config.poll_interval,
        );
        self.state.tasks.nbma_poll_interval.insert(addr, task);
    }

    pub(crate) fn nbma_poll_interval_stop(&mut self, addr: Ipv4Addr) {
        self.state.tasks.nbma_poll_interval.remove(&addr);
    }

    // Returns the destinations of periodic Hello packets.
    pub(crate) fn hello_dsts(&self) -> SmallVec<[Ipv4Addr; 4]> {
        match self.config.if_type {
            InterfaceType::PointToPoint | InterfaceType::Broadcast => {
                smallvec![MulticastAddr::AllSpfRtrs.addr()]
            }
            InterfaceType::VirtualLink => self
                .vlink
                .as_ref()
                .and_then(|vlink| vlink.path.as_ref())
                .map(|path| path.dst)
                .into_iter()
                .collect(),
            InterfaceType::NonBroadcast | InterfaceType::PointToMultipoint => {
                // Dead neighbors are polled at a reduced rate instead.
                self.config
                    .static_nbrs
                    .iter()
                    .map(|snbr| snbr.addr)
                    .filter(|addr| {
                        !self.state.tasks.nbma_poll_interval.contains_key(addr)
                    })
                    .collect()
            }
        }
    }

    // Returns the source address of packets sent on this interface.
    pub(crate) fn src_addr(&self) -> Ipv4Addr {
        match &self.vlink {
            Some(vlink) => vlink
                .path
                .as_ref()
                .map(|path| path.src)
                .unwrap_or(Ipv4Addr::UNSPECIFIED),
            None => self.config.addr.ip(),
        }
    }

    // Returns the ifindex of the physical interface packets are sent through.
    pub(crate) fn ifindex(&self) -> u32 {
        match &self.vlink {
            Some(vlink) => vlink
                .path
                .as_ref()
                .map(|path| path.ifindex)
                .unwrap_or_default(),
            None => self.config.ifindex,
        }
    }

    pub(crate) fn ttl(&self) -> u8 {
        if self.is_virtual_link() {
            network::VIRTUAL_LINK_TTL
        } else {
            network::OSPF_TTL
        }
    }

    pub(crate) fn max_packet_size(&self) -> u16 {
        self.config.mtu.saturating_sub(IPV4_HDR_LENGTH)
    }

    // Returns the authentication data carried by packets sent on this
    // interface.
    pub(crate) fn auth_data(&self, instance: &InstanceUpView<'_>) -> AuthData {
        match &self.config.auth {
            AuthCfg::Null => AuthData::Null,
            AuthCfg::Simple { key } => AuthData::Simple(key.clone()),
            AuthCfg::Cryptographic { key_id, .. } => {
                // Non-decreasing sequence number derived from the clock.
                let seqno = u32::try_from(instance.sched.now().as_secs())
                    .unwrap_or(u32::MAX);
                AuthData::Cryptographic {
                    key_id: *key_id,
                    seqno,
                }
            }
        }
    }

    pub(crate) fn send_packet(
        &self,
        instance: &InstanceUpView<'_>,
        packet: &Packet,
        dst: &SendDestination,
    ) {
        for addr in &dst.addrs {
            Debug::PacketTx(dst.ifindex, addr, packet).log();
            instance
                .transport
                .send_packet(packet, *addr, dst.ifindex, dst.ttl);
        }
    }

    pub(crate) fn validate_packet_dst(
        &self,
        dst: Ipv4Addr,
    ) -> Result<(), Error> {
        // Accept only unicast packets on virtual links.
        if self.is_virtual_link() {
            if dst.is_multicast() {
                return Err(Error::InvalidDstAddr(dst));
            }
            return Ok(());
        }

        // Check if the destination matches the interface address or
        // AllSPFRouters.
        if dst == self.config.addr.ip()
            || dst == MulticastAddr::AllSpfRtrs.addr()
        {
            return Ok(());
        }

        // Packets whose IP destination is AllDRouters should only be accepted
        // if the state of the receiving interface is DR or Backup.
        if dst == MulticastAddr::AllDrRtrs.addr() && self.is_dr_or_backup() {
            return Ok(());
        }

        Err(Error::InvalidDstAddr(dst))
    }

    pub(crate) fn validate_packet_src(
        &self,
        src: Ipv4Addr,
    ) -> Result<(), Error> {
        if src.is_unspecified()
            || src.is_multicast()
            || src.is_broadcast()
            || src.is_loopback()
        {
            return Err(Error::InvalidSrcAddr(src));
        }

        // The packet's IP source address is required to be on the same
        // network as the receiving interface.
        if !matches!(
            self.config.if_type,
            InterfaceType::PointToPoint | InterfaceType::VirtualLink
        ) && !self.config.addr.contains(src)
        {
            return Err(Error::InvalidSrcAddr(src));
        }

        Ok(())
    }

    // Checks the interface parameters advertised in a received Hello
    // (RFC 2328, Section 10.5).
    pub(crate) fn validate_hello(
        &self,
        hello: &Hello,
    ) -> Result<(), InterfaceCfgError> {
        // The Network Mask is only checked on multi-access networks.
        if !matches!(
            self.config.if_type,
            InterfaceType::PointToPoint | InterfaceType::VirtualLink
        ) {
            let mask = self.config.addr.mask();
            if hello.network_mask != mask {
                return Err(InterfaceCfgError::HelloMaskMismatch(
                    hello.network_mask,
                    mask,
                ));
            }
        }

        if hello.hello_interval != self.config.hello_interval {
            return Err(InterfaceCfgError::HelloIntervalMismatch(
                hello.hello_interval,
                self.config.hello_interval,
            ));
        }

        if hello.dead_interval != self.config.dead_interval {
            return Err(InterfaceCfgError::DeadIntervalMismatch(
                hello.dead_interval,
                self.config.dead_interval,
            ));
        }

        Ok(())
    }

    // Identifies the neighbor that sent a packet.
    //
    // On point-to-point networks and virtual links neighbors are identified
    // by their Router IDs, and on all other networks by their addresses.
    pub(crate) fn get_neighbor<'a>(
        &mut self,
        src: Ipv4Addr,
        router_id: Ipv4Addr,
        neighbors: &'a mut Arena<Neighbor>,
    ) -> Option<(NeighborIndex, &'a mut Neighbor)> {
        match self.config.if_type {
            InterfaceType::PointToPoint | InterfaceType::VirtualLink => {
                let (nbr_idx, _) = self
                    .state
                    .neighbors
                    .get_by_router_id(neighbors, router_id)?;
                Some((nbr_idx, &mut neighbors[nbr_idx]))
            }
            InterfaceType::Broadcast
            | InterfaceType::NonBroadcast
            | InterfaceType::PointToMultipoint => {
                let (nbr_idx, _) =
                    self.state.neighbors.get_by_addr(neighbors, src)?;
                let nbr = &mut neighbors[nbr_idx];

                // Update the neighbor's Router ID before returning it.
                if nbr.router_id != router_id {
                    if self.state.hello_nbrs.remove(&nbr.router_id) {
                        self.state.hello_nbrs.insert(router_id);
                    }
                    self.state
                        .neighbors
                        .update_router_id(nbr_idx, nbr, router_id);
                }
                Some((nbr_idx, nbr))
            }
        }
    }

    pub(crate) fn is_down(&self) -> bool {
        self.state.ism_state == State::Down
    }

    pub(crate) fn is_virtual_link(&self) -> bool {
        self.config.if_type == InterfaceType::VirtualLink
    }

    pub(crate) fn is_broadcast_or_nbma(&self) -> bool {
        matches!(
            self.config.if_type,
            InterfaceType::Broadcast | InterfaceType::NonBroadcast
        )
    }

    pub(crate) fn is_dr_or_backup(&self) -> bool {
        matches!(self.state.ism_state, State::Dr | State::Backup)
    }
}

// ===== helper functions =====

// Step 2 of the DR election: calculates the new Backup Designated Router.
fn calc_bdr(candidates: &[DrCandidate]) -> Option<Ipv4Addr> {
    let eligible = || {
        candidates
            .iter()
            .filter(|rtr| rtr.dr != Some(rtr.addr))
    };

    eligible()
        .filter(|rtr| rtr.bdr == Some(rtr.addr))
        .max_by_key(|rtr| (rtr.priority, rtr.router_id))
        .or_else(|| eligible().max_by_key(|rtr| (rtr.priority, rtr.router_id)))
        .map(|rtr| rtr.addr)
}

// Step 3 of the DR election: calculates the new Designated Router.
fn calc_dr(
    candidates: &[DrCandidate],
    new_bdr: Option<Ipv4Addr>,
) -> Option<Ipv4Addr> {
    candidates
        .iter()
        .filter(|rtr| rtr.dr == Some(rtr.addr))
        .max_by_key(|rtr| (rtr.priority, rtr.router_id))
        .map(|rtr| rtr.addr)
        .or(new_bdr)
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use const_addrs::ip4;

    use super::*;

    fn candidate(
        router_id: Ipv4Addr,
        addr: Ipv4Addr,
        priority: u8,
        dr: Option<Ipv4Addr>,
        bdr: Option<Ipv4Addr>,
    ) -> DrCandidate {
        DrCandidate {
            router_id,
            addr,
            dr,
            bdr,
            priority,
        }
    }

    #[test]
    fn interface_up() {
        assert_eq!(
            ism::transition(State::Down, Event::InterfaceUp),
            Some((None, Some(Action::Start)))
        );
        assert_eq!(ism::transition(State::Waiting, Event::InterfaceUp), None);
    }

    #[test]
    fn dr_election_events() {
        for event in [Event::BackupSeen, Event::WaitTimer] {
            assert_eq!(
                ism::transition(State::Waiting, event),
                Some((None, Some(Action::ElectDr)))
            );
        }
        for state in [State::DrOther, State::Backup, State::Dr] {
            assert_eq!(
                ism::transition(state, Event::NbrChange),
                Some((None, Some(Action::ElectDr)))
            );
        }
        assert_eq!(
            ism::transition(State::Waiting, Event::NbrChange),
            Some((None, None))
        );
        assert_eq!(ism::transition(State::Dr, Event::WaitTimer), None);
    }

    #[test]
    fn interface_down_and_loop() {
        for state in [State::Waiting, State::PointToPoint, State::Dr] {
            assert_eq!(
                ism::transition(state, Event::InterfaceDown),
                Some((Some(State::Down), Some(Action::Stop)))
            );
            assert_eq!(
                ism::transition(state, Event::LoopInd),
                Some((Some(State::Loopback), Some(Action::Stop)))
            );
        }
        assert_eq!(
            ism::transition(State::Loopback, Event::UnloopInd),
            Some((Some(State::Down), None))
        );
        assert_eq!(ism::transition(State::Down, Event::UnloopInd), None);
    }

    #[test]
    fn election_from_scratch() {
        // Nobody declares itself DR or BDR: the router with the highest
        // Router ID becomes BDR, and then DR since no DR was declared.
        let candidates = [
            candidate(ip4!("1.1.1.1"), ip4!("10.0.0.1"), 1, None, None),
            candidate(ip4!("2.2.2.2"), ip4!("10.0.0.2"), 1, None, None),
        ];
        let bdr = calc_bdr(&candidates);
        assert_eq!(bdr, Some(ip4!("10.0.0.2")));
        assert_eq!(calc_dr(&candidates, bdr), bdr);

        // Priority takes precedence over the Router ID.
        let candidates = [
            candidate(ip4!("1.1.1.1"), ip4!("10.0.0.1"), 5, None, None),
            candidate(ip4!("2.2.2.2"), ip4!("10.0.0.2"), 1, None, None),
        ];
        assert_eq!(calc_bdr(&candidates), Some(ip4!("10.0.0.1")));
    }

    #[test]
    fn election_keeps_existing_dr() {
        let dr = Some(ip4!("10.0.0.1"));
        let candidates = [
            candidate(ip4!("1.1.1.1"), ip4!("10.0.0.1"), 1, dr, None),
            candidate(ip4!("2.2.2.2"), ip4!("10.0.0.2"), 1, dr, None),
            candidate(ip4!("9.9.9.9"), ip4!("10.0.0.9"), 1, dr, None),
        ];
        let bdr = calc_bdr(&candidates);
        assert_eq!(bdr, Some(ip4!("10.0.0.9")));
        assert_eq!(calc_dr(&candidates, bdr), dr);
    }
}
