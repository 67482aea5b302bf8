//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::Cell;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::{Span, debug_span};

use crate::area::Area;
use crate::collections::{
    Areas, Arena, InterfaceIndex, Lsdb, LsdbIndex, NeighborIndex,
};
use crate::config::{ExternalRouteCfg, InstanceCfg};
use crate::debug::Debug;
use crate::error::Error;
use crate::events::{self, RxmtPacketType};
use crate::flood::flood;
use crate::interface::{Interface, VirtualLink, ism};
use crate::lsdb::{self, LsaEntry};
use crate::neighbor::{Neighbor, nsm};
use crate::network::Transport;
use crate::packet::Packet;
use crate::packet::lsa::{Lsa, LsaKey, LsaType};
use crate::route::{RouteChange, RouteNet};
use crate::tasks::messages::{ProtocolInputMsg, ProtocolInputTx};
use crate::tasks::{
    self, IntervalTask, Scheduler, SchedulerHandle, TimerEvent, TimerId,
};

// OSPFv2 routing instance.
//
// All processing happens synchronously in response to packet arrivals and
// timer expirations reported by the host environment.
pub struct Instance {
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance state data.
    pub state: InstanceState,
    // Instance arenas.
    pub arenas: InstanceArenas,
    // Deferred protocol events.
    tx: ProtocolInputTx,
    // Scheduling collaborator.
    sched: SchedulerHandle,
    // Packet transmission collaborator.
    transport: Box<dyn Transport>,
}

#[derive(Debug)]
pub struct InstanceState {
    // Router ID.
    pub router_id: Ipv4Addr,
    // AS-scope LSDB.
    pub lsdb: Lsdb,
    // Routing table.
    pub rib: BTreeMap<Ipv4Network, RouteNet>,
    // Whether the routing table needs to be recomputed.
    pub spf_pending: bool,
    // Next Database Description sequence number.
    pub dd_seq_no: Cell<u32>,
    // LSA aging task.
    pub age_tick: Option<IntervalTask>,
}

#[derive(Debug, Default)]
pub struct InstanceArenas {
    pub areas: Areas,
    pub interfaces: Arena<Interface>,
    pub neighbors: Arena<Neighbor>,
    pub lsa_entries: Arena<LsaEntry>,
}

pub struct InstanceUpView<'a> {
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState,
    pub tx: &'a ProtocolInputTx,
    pub sched: &'a SchedulerHandle,
    pub transport: &'a dyn Transport,
}

// ===== impl Instance =====

impl Instance {
    // Creates a new instance from the given configuration.
    pub fn new(
        config: InstanceCfg,
        scheduler: Box<dyn Scheduler>,
        transport: Box<dyn Transport>,
    ) -> Result<Instance, Error> {
        config.validate()?;
        Debug::InstanceCreate.log();

        let mut arenas = InstanceArenas::default();
        for area_cfg in &config.areas {
            let (_, area) = arenas.areas.insert(area_cfg.clone());
            for iface_cfg in &area_cfg.interfaces {
                area.interfaces
                    .insert(&mut arenas.interfaces, iface_cfg.clone());
            }
        }

        // Virtual links belong to the backbone area.
        if let Some((backbone_idx, _)) = arenas.areas.backbone() {
            let area = &mut arenas.areas[backbone_idx];
            for vlink_cfg in &config.virtual_links {
                let (_, iface) = area
                    .interfaces
                    .insert(&mut arenas.interfaces, vlink_cfg.iface_cfg());
                iface.vlink = Some(VirtualLink {
                    transit_area_id: vlink_cfg.transit_area_id,
                    router_id: vlink_cfg.router_id,
                    path: None,
                });
            }
        }

        let state = InstanceState {
            router_id: config.router_id,
            lsdb: Default::default(),
            rib: Default::default(),
            spf_pending: false,
            dd_seq_no: Cell::new(config.dd_seq_seed),
            age_tick: None,
        };

        Ok(Instance {
            config,
            state,
            arenas,
            tx: Default::default(),
            sched: SchedulerHandle::new(scheduler),
            transport,
        })
    }

    // Brings up all configured interfaces and starts the LSA aging task.
    pub fn start(&mut self) {
        let _span = self.span().entered();
        Debug::InstanceStart.log();

        let (mut instance, arenas) = self.as_up();
        for area in arenas.areas.iter() {
            // Virtual links come up once their endpoints become reachable.
            for iface in area
                .interfaces
                .iter(&arenas.interfaces)
                .filter(|iface| !iface.is_virtual_link())
            {
                instance
                    .tx
                    .ism_event(area.id, iface.id, ism::Event::InterfaceUp);
            }
            instance.tx.lsa_orig_event(lsdb::LsaOriginateEvent::AreaStart {
                area_id: area.id,
            });
        }
        for route in &instance.config.external_routes {
            lsdb::lsa_orig_external(&instance, route);
        }
        instance.state.age_tick =
            Some(tasks::age_tick_interval(instance.sched));

        self.process_pending();
    }

    // Processes a packet received on the given interface.
    pub fn process_packet(
        &mut self,
        ifindex: u32,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        packet: Packet,
    ) {
        let _span = self.span().entered();

        let (mut instance, arenas) = self.as_up();
        if let Err(error) = events::process_packet(
            &mut instance,
            arenas,
            ifindex,
            src,
            dst,
            packet,
        ) {
            error.log();
        }

        self.process_pending();
    }

    // Processes the expiration of a previously scheduled timer.
    //
    // Expirations of timers that were cancelled in the meantime are ignored.
    pub fn timer_expired(&mut self, timer_id: TimerId) {
        let _span = self.span().entered();

        if !self.sched.expire(timer_id) {
            return;
        }

        let (mut instance, arenas) = self.as_up();
        if let Err(error) =
            process_timer_event(&mut instance, arenas, timer_id.event)
        {
            error.log();
        }

        self.process_pending();
    }

    // Installs the provided LSA in the LSDB it belongs to, recomputing the
    // routing table when the change affects it.
    //
    // Returns whether the routing table needed to be recomputed.
    pub fn install_lsa(
        &mut self,
        lsa: Lsa,
        area_id: Ipv4Addr,
    ) -> Result<bool, Error> {
        let _span = self.span().entered();

        let lsdb_idx = self.lsdb_idx(lsa.hdr.lsa_type, area_id)?;
        let (mut instance, arenas) = self.as_up();
        let (_, route_recalc) =
            lsdb::install(&mut instance, arenas, lsdb_idx, lsa);

        self.process_pending();
        Ok(route_recalc)
    }

    // Looks up an LSA in the LSDB corresponding to its type.
    pub fn find_lsa(
        &self,
        lsa_type: LsaType,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        area_id: Ipv4Addr,
    ) -> Option<&Lsa> {
        let lsdb_idx = self.lsdb_idx(lsa_type, area_id).ok()?;
        let lsdb = match lsdb_idx {
            LsdbIndex::Area(area_idx) => {
                &self.arenas.areas[area_idx].state.lsdb
            }
            LsdbIndex::As => &self.state.lsdb,
        };
        let lsa_key = LsaKey::new(lsa_type, adv_rtr, lsa_id);
        lsdb.get(&self.arenas.lsa_entries, &lsa_key)
            .map(|(_, lse)| &lse.data)
    }

    // Ages all LSDBs by one second.
    pub fn age_database(&mut self) {
        let _span = self.span().entered();

        let (mut instance, arenas) = self.as_up();
        events::process_age_tick(&mut instance, arenas);

        self.process_pending();
    }

    // Floods the provided LSA.
    //
    // The optional interface and neighbor identify where the LSA was
    // received from. Returns whether the LSA was flooded back out the
    // receiving interface.
    pub fn flood_lsa(
        &mut self,
        lsa: &Lsa,
        area_id: Ipv4Addr,
        ifname: Option<&str>,
        nbr_router_id: Option<Ipv4Addr>,
    ) -> Result<bool, Error> {
        let _span = self.span().entered();

        let lsdb_idx = self.lsdb_idx(lsa.hdr.lsa_type, area_id)?;
        let src = self.flood_src(area_id, ifname, nbr_router_id);
        let (instance, arenas) = self.as_up();
        let flooded_back = flood(
            &instance,
            &arenas.areas,
            &mut arenas.interfaces,
            &mut arenas.neighbors,
            lsdb_idx,
            lsa,
            src,
        );

        self.process_pending();
        Ok(flooded_back)
    }

    // Recomputes the routing table.
    //
    // Returns the changes relative to the previous routing table.
    pub fn rebuild_routing_table(&mut self) -> Vec<RouteChange> {
        let _span = self.span().entered();

        let (mut instance, arenas) = self.as_up();
        let changes = crate::spf::compute_spf(&mut instance, arenas);

        self.process_pending();
        changes
    }

    // Brings the given interface up.
    pub fn interface_up(&mut self, ifname: &str) -> Result<(), Error> {
        self.interface_event(ifname, ism::Event::InterfaceUp)
    }

    // Brings the given interface down.
    pub fn interface_down(&mut self, ifname: &str) -> Result<(), Error> {
        self.interface_event(ifname, ism::Event::InterfaceDown)
    }

    // Signals that the given interface is looped back.
    pub fn interface_loop(&mut self, ifname: &str) -> Result<(), Error> {
        self.interface_event(ifname, ism::Event::LoopInd)
    }

    // Signals that the given interface is no longer looped back.
    pub fn interface_unloop(&mut self, ifname: &str) -> Result<(), Error> {
        self.interface_event(ifname, ism::Event::UnloopInd)
    }

    // Adds or updates an external route, (re)originating its
    // AS-external-LSA.
    pub fn update_external_route(&mut self, route: ExternalRouteCfg) {
        let _span = self.span().entered();

        let was_asbr = !self.config.external_routes.is_empty();
        self.config
            .external_routes
            .retain(|old| old.prefix != route.prefix);
        self.config.external_routes.push(route.clone());

        let (instance, _) = self.as_up();
        lsdb::lsa_orig_external(&instance, &route);
        if !was_asbr {
            self.asbr_status_change();
        }

        self.process_pending();
    }

    // Removes an external route, flushing its AS-external-LSA.
    pub fn remove_external_route(&mut self, prefix: Ipv4Network) {
        let _span = self.span().entered();

        let count = self.config.external_routes.len();
        self.config
            .external_routes
            .retain(|route| route.prefix != prefix);
        if self.config.external_routes.len() == count {
            return;
        }

        let (instance, arenas) = self.as_up();
        lsdb::lsa_flush_external(&instance, &arenas.lsa_entries, prefix);
        if self.config.external_routes.is_empty() {
            self.asbr_status_change();
        }

        self.process_pending();
    }

    // Returns the routing table.
    pub fn routing_table(&self) -> &BTreeMap<Ipv4Network, RouteNet> {
        &self.state.rib
    }

    // Returns the routing table entry of the given destination.
    pub fn route(&self, prefix: &Ipv4Network) -> Option<&RouteNet> {
        self.state.rib.get(prefix)
    }

    // Returns the longest-prefix match for the given address.
    pub fn lookup(
        &self,
        addr: Ipv4Addr,
    ) -> Option<(&Ipv4Network, &RouteNet)> {
        self.state
            .rib
            .iter()
            .filter(|(prefix, _)| prefix.contains(addr))
            .max_by_key(|(prefix, _)| prefix.prefix())
    }

    // Returns the area with the given area ID.
    pub fn area(&self, area_id: Ipv4Addr) -> Option<&Area> {
        self.arenas
            .areas
            .get_by_area_id(area_id)
            .map(|(_, area)| area)
    }

    // Returns the interface with the given name.
    pub fn interface(&self, ifname: &str) -> Option<&Interface> {
        self.arenas.areas.iter().find_map(|area| {
            area.interfaces
                .get_by_name(&self.arenas.interfaces, ifname)
                .map(|(_, iface)| iface)
        })
    }

    // Returns the neighbor with the given Router ID attached to the given
    // interface.
    pub fn neighbor(
        &self,
        ifname: &str,
        router_id: Ipv4Addr,
    ) -> Option<&Neighbor> {
        let iface = self.interface(ifname)?;
        iface
            .state
            .neighbors
            .get_by_router_id(&self.arenas.neighbors, router_id)
            .map(|(_, nbr)| nbr)
    }

    pub(crate) fn as_up(
        &mut self,
    ) -> (InstanceUpView<'_>, &mut InstanceArenas) {
        let instance = InstanceUpView {
            config: &self.config,
            state: &mut self.state,
            tx: &self.tx,
            sched: &self.sched,
            transport: self.transport.as_ref(),
        };
        (instance, &mut self.arenas)
    }

    fn span(&self) -> Span {
        debug_span!("ospf-instance", router_id = %self.state.router_id)
    }

    fn interface_event(
        &mut self,
        ifname: &str,
        event: ism::Event,
    ) -> Result<(), Error> {
        let _span = self.span().entered();

        let (area_id, iface_id) = self
            .arenas
            .areas
            .iter()
            .find_map(|area| {
                area.interfaces
                    .get_by_name(&self.arenas.interfaces, ifname)
                    .map(|(_, iface)| (area.id, iface.id))
            })
            .ok_or_else(|| {
                Error::InvalidConfig(format!("unknown interface {ifname}"))
            })?;
        self.tx.ism_event(area_id, iface_id, event);

        self.process_pending();
        Ok(())
    }

    // Reoriginates the Router-LSAs after a change in the AS boundary router
    // status.
    fn asbr_status_change(&self) {
        for area in self.arenas.areas.iter() {
            self.tx.lsa_orig_event(lsdb::LsaOriginateEvent::AreaStart {
                area_id: area.id,
            });
        }
    }

    fn lsdb_idx(
        &self,
        lsa_type: LsaType,
        area_id: Ipv4Addr,
    ) -> Result<LsdbIndex, Error> {
        let (area_idx, _) = self
            .arenas
            .areas
            .get_by_area_id(area_id)
            .ok_or(Error::AreaNotFound(area_id))?;
        lsdb::lsdb_get_by_lsa_type(area_idx, lsa_type)
            .ok_or(Error::LsaUnknownType(lsa_type))
    }

    fn flood_src(
        &self,
        area_id: Ipv4Addr,
        ifname: Option<&str>,
        nbr_router_id: Option<Ipv4Addr>,
    ) -> Option<(InterfaceIndex, NeighborIndex)> {
        let (_, area) = self.arenas.areas.get_by_area_id(area_id)?;
        let (iface_idx, iface) = area
            .interfaces
            .get_by_name(&self.arenas.interfaces, ifname?)?;
        let (nbr_idx, _) = iface
            .state
            .neighbors
            .get_by_router_id(&self.arenas.neighbors, nbr_router_id?)?;
        Some((iface_idx, nbr_idx))
    }

    // Processes all deferred protocol events, then recomputes the routing
    // table if necessary.
    fn process_pending(&mut self) {
        loop {
            while let Some(msg) = self.tx.recv() {
                let (mut instance, arenas) = self.as_up();
                if let Err(error) =
                    process_protocol_msg(&mut instance, arenas, msg)
                {
                    error.log();
                }
            }

            if !self.state.spf_pending {
                break;
            }
            let (mut instance, arenas) = self.as_up();
            crate::spf::compute_spf(&mut instance, arenas);
        }
    }
}

// ===== helper functions =====

fn process_protocol_msg(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    msg: ProtocolInputMsg,
) -> Result<(), Error> {
    match msg {
        // Interface FSM event.
        ProtocolInputMsg::IsmEvent(msg) => events::process_ism_event(
            instance,
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.event,
        ),
        // Neighbor FSM event.
        ProtocolInputMsg::NsmEvent(msg) => events::process_nsm_event(
            instance,
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.nbr_id,
            msg.event,
        ),
        // Enqueued LSAs ready to be sent.
        ProtocolInputMsg::SendLsUpdate(msg) => events::process_send_lsupd(
            instance,
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.nbr_id,
        ),
        // LSA origination event.
        ProtocolInputMsg::LsaOrigEvent(msg) => {
            events::process_lsa_orig_event(instance, arenas, msg.event)
        }
        // LSA origination check.
        ProtocolInputMsg::LsaOrigCheck(msg) => events::process_lsa_orig_check(
            instance,
            arenas,
            msg.lsdb_id,
            msg.options,
            msg.lsa_id,
            msg.lsa_body,
        ),
        // LSA flush request.
        ProtocolInputMsg::LsaFlush(msg) => events::process_lsa_flush(
            instance,
            arenas,
            msg.lsdb_id,
            msg.lse_id,
            msg.reason,
        ),
    }
}

fn process_timer_event(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    event: TimerEvent,
) -> Result<(), Error> {
    match event {
        TimerEvent::IfaceHello { area_id, iface_id } => {
            events::process_hello_interval(instance, arenas, area_id, iface_id)
        }
        TimerEvent::IfaceWait { area_id, iface_id } => {
            events::process_ism_event(
                instance,
                arenas,
                area_id,
                iface_id,
                ism::Event::WaitTimer,
            )
        }
        TimerEvent::IfaceDelayedAck { area_id, iface_id } => {
            events::process_delayed_ack_timeout(
                instance, arenas, area_id, iface_id,
            )
        }
        TimerEvent::IfacePoll {
            area_id,
            iface_id,
            addr,
        } => events::process_nbma_poll_interval(
            instance, arenas, area_id, iface_id, addr,
        ),
        TimerEvent::NbrInactivity {
            area_id,
            iface_id,
            nbr_id,
        } => events::process_nsm_event(
            instance,
            arenas,
            area_id,
            iface_id,
            nbr_id,
            nsm::Event::InactivityTimer,
        ),
        TimerEvent::NbrRxmtDbDesc {
            area_id,
            iface_id,
            nbr_id,
        } => events::process_packet_rxmt(
            instance,
            arenas,
            area_id,
            iface_id,
            nbr_id,
            RxmtPacketType::DbDesc,
        ),
        TimerEvent::NbrRxmtLsRequest {
            area_id,
            iface_id,
            nbr_id,
        } => events::process_packet_rxmt(
            instance,
            arenas,
            area_id,
            iface_id,
            nbr_id,
            RxmtPacketType::LsRequest,
        ),
        TimerEvent::NbrRxmtLsUpdate {
            area_id,
            iface_id,
            nbr_id,
        } => events::process_packet_rxmt(
            instance,
            arenas,
            area_id,
            iface_id,
            nbr_id,
            RxmtPacketType::LsUpdate,
        ),
        TimerEvent::NbrDbDescFree {
            area_id,
            iface_id,
            nbr_id,
        } => events::process_dbdesc_free(arenas, area_id, iface_id, nbr_id),
        TimerEvent::LsaOrigDelayed { lsdb_id, lsa_key } => {
            events::process_lsa_orig_delayed_timer(
                instance, arenas, lsdb_id, lsa_key,
            )
        }
        TimerEvent::AgeTick => {
            events::process_age_tick(instance, arenas);
            Ok(())
        }
    }
}
