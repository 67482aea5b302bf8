//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use nsm::{Action, Event, State};

use crate::area::Area;
use crate::collections::{Arena, NeighborId};
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb::{LsaEntry, LsaOriginateEvent};
use crate::network::SendDestination;
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{DbDescFlags, Options, Packet};
use crate::tasks::{IntervalTask, TimeoutTask, TimerEvent};
use crate::{output, tasks};

#[derive(Debug)]
pub struct Neighbor {
    pub id: NeighborId,
    pub router_id: Ipv4Addr,
    pub src: Ipv4Addr,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub priority: u8,
    pub state: State,

    pub options: Option<Options>,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub last_rcvd_dbdesc: Option<LastDbDesc>,
    pub last_sent_dbdesc: Option<LastSentDbDesc>,
    pub auth_seqno: Option<u32>,

    pub lists: NeighborLsaLists,
    pub tasks: NeighborTasks,
}

#[derive(Debug)]
pub struct LastDbDesc {
    pub options: Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
}

// Last Database Description packet sent, kept for retransmission.
#[derive(Debug)]
pub struct LastSentDbDesc {
    pub packet: Packet,
    pub dst: SendDestination,
}

// Per-adjacency LSA lists.
//
// Only the retransmission list and the LS Update queue need LSA contents.
// The retransmission list keeps the header of the instance that is awaiting
// acknowledgment; the instance itself is resolved through the LSDB when it's
// time to retransmit.
#[derive(Debug, Default)]
pub struct NeighborLsaLists {
    // LSAs enqueued for transmission in LS Update packets.
    pub ls_update: BTreeMap<LsaKey, Lsa>,
    // LSAs waiting to be acknowledged.
    pub ls_rxmt: BTreeMap<LsaKey, LsaHdr>,
    // LSA headers enqueued for transmission in Database Description packets.
    pub db_summary: BTreeMap<LsaKey, LsaHdr>,
    // LSAs that need to be received from this neighbor.
    pub ls_request: BTreeMap<LsaKey, LsaHdr>,
    // LSAs that were requested but not received yet.
    pub ls_request_pending: BTreeMap<LsaKey, LsaHdr>,
    // LSAs recently sent back to this neighbor in direct LS Updates, along
    // with the seconds elapsed since then.
    pub ls_transmitted: BTreeMap<LsaKey, u16>,
}

#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub inactivity_timer: Option<TimeoutTask>,
    pub dbdesc_free_timer: Option<TimeoutTask>,
    rxmt_dbdesc: Option<IntervalTask>,
    rxmt_lsreq: Option<IntervalTask>,
    rxmt_lsupd: Option<IntervalTask>,
}

// Neighbor state machine.
pub mod nsm {
    use serde::{Deserialize, Serialize};
    use smallvec::{SmallVec, smallvec};

    use crate::debug::SeqNoMismatchReason;

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Attempt,
        Init,
        TwoWay,
        ExStart,
        Exchange,
        Loading,
        Full,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        HelloRcvd,
        Start,
        TwoWayRcvd,
        NegotiationDone,
        ExchangeDone,
        BadLsReq,
        LoadingDone,
        AdjOk,
        SeqNoMismatch(SeqNoMismatchReason),
        OneWayRcvd,
        Kill,
        InactivityTimer,
        LinkDown,
    }

    // Side effects of a state transition, executed in order.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum Action {
        RestartInactivityTimer,
        StopInactivityTimer,
        SendHello,
        StartExchange,
        BuildSummaryList,
        ResetAdjacency,
    }

    pub type Actions = SmallVec<[Action; 4]>;

    // Computes the outcome of an NSM event (RFC 2328, Section 10.3).
    //
    // `adj_needed` tells whether an adjacency should be established with the
    // neighbor, and `requests_pending` whether its Link state request list
    // is non-empty.
    //
    // Returns `None` if the event isn't expected in the current state.
    // Otherwise returns the new state (if any) and the actions to execute.
    pub fn transition(
        state: State,
        event: Event,
        adj_needed: bool,
        requests_pending: bool,
    ) -> Option<(Option<State>, Actions)> {
        let outcome = match (state, event) {
            (State::Down, Event::Start) => (
                Some(State::Attempt),
                smallvec![Action::SendHello, Action::RestartInactivityTimer],
            ),
            (State::Attempt | State::Down, Event::HelloRcvd) => (
                Some(State::Init),
                smallvec![Action::RestartInactivityTimer],
            ),
            (
                State::Init
                | State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::HelloRcvd,
            ) => (None, smallvec![Action::RestartInactivityTimer]),
            (State::Init, Event::TwoWayRcvd) => {
                if adj_needed {
                    (Some(State::ExStart), smallvec![Action::StartExchange])
                } else {
                    (Some(State::TwoWay), smallvec![])
                }
            }
            (State::TwoWay, Event::AdjOk) => {
                if adj_needed {
                    (Some(State::ExStart), smallvec![Action::StartExchange])
                } else {
                    (None, smallvec![])
                }
            }
            (State::ExStart, Event::NegotiationDone) => (
                Some(State::Exchange),
                smallvec![Action::BuildSummaryList],
            ),
            (State::Exchange, Event::ExchangeDone) => {
                if requests_pending {
                    (Some(State::Loading), smallvec![])
                } else {
                    (Some(State::Full), smallvec![])
                }
            }
            (State::Loading, Event::LoadingDone) => {
                (Some(State::Full), smallvec![])
            }
            (
                State::ExStart | State::Exchange | State::Loading | State::Full,
                Event::AdjOk,
            ) => {
                if adj_needed {
                    (None, smallvec![])
                } else {
                    (Some(State::TwoWay), smallvec![Action::ResetAdjacency])
                }
            }
            (
                State::Exchange | State::Loading | State::Full,
                Event::SeqNoMismatch(_) | Event::BadLsReq,
            ) => (
                Some(State::ExStart),
                smallvec![Action::ResetAdjacency, Action::StartExchange],
            ),
            (_, Event::Kill | Event::LinkDown | Event::InactivityTimer) => (
                Some(State::Down),
                smallvec![Action::ResetAdjacency, Action::StopInactivityTimer],
            ),
            (
                State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::OneWayRcvd,
            ) => (Some(State::Init), smallvec![Action::ResetAdjacency]),
            (
                State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::TwoWayRcvd,
            )
            | (State::Init, Event::OneWayRcvd) => (None, smallvec![]),
            _ => return None,
        };

        Some(outcome)
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub(crate) fn new(
        id: NeighborId,
        router_id: Ipv4Addr,
        src: Ipv4Addr,
    ) -> Neighbor {
        Debug::NeighborCreate(router_id).log();

        Neighbor {
            id,
            router_id,
            src,
            dr: None,
            bdr: None,
            priority: 0,
            state: State::Down,
            options: None,
            dd_flags: DbDescFlags::empty(),
            dd_seq_no: 0,
            last_rcvd_dbdesc: None,
            last_sent_dbdesc: None,
            auth_seqno: None,
            lists: Default::default(),
            tasks: Default::default(),
        }
    }

    pub(crate) fn fsm(
        &mut self,
        iface: &mut Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        lsa_entries: &Arena<LsaEntry>,
        event: Event,
    ) {
        Debug::NsmEvent(self.router_id, &self.state, &event).log();
        if let Event::SeqNoMismatch(reason) = event {
            Debug::NsmSeqNoMismatch(self.router_id, &self.state, reason).log();
        }

        let adj_needed = iface.need_adjacency(self);
        let requests_pending = !self.lists.ls_request.is_empty()
            || !self.lists.ls_request_pending.is_empty();
        let Some((new_state, actions)) =
            nsm::transition(self.state, event, adj_needed, requests_pending)
        else {
            Error::NsmUnexpectedEvent(self.router_id, self.state, event).log();
            return;
        };

        for action in actions {
            match action {
                Action::RestartInactivityTimer => {
                    self.inactivity_timer_start(iface, area, instance);
                }
                Action::StopInactivityTimer => {
                    self.tasks.inactivity_timer = None;
                }
                Action::SendHello => {
                    output::send_hello(iface, area, instance, &[self.src]);
                }
                Action::StartExchange => {
                    self.start_exchange(iface, area, instance);
                }
                Action::BuildSummaryList => {
                    self.build_summary_list(iface, area, instance, lsa_entries);
                }
                Action::ResetAdjacency => {
                    self.reset_adjacency();
                }
            }
        }

        // Check for FSM state change.
        if let Some(new_state) = new_state
            && new_state != self.state
        {
            self.fsm_state_change(iface, area, instance, event, new_state);
        }
    }

    fn fsm_state_change(
        &mut self,
        iface: &mut Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        event: Event,
        new_state: State,
    ) {
        // Keep track of the neighbors listed in our Hello packets.
        if new_state >= State::Init {
            iface.state.hello_nbrs.insert(self.router_id);
        } else {
            iface.state.hello_nbrs.remove(&self.router_id);
        }

        // Check for bidirectional communication change.
        if (new_state >= State::TwoWay && self.state < State::TwoWay
            || new_state < State::TwoWay && self.state >= State::TwoWay)
            && iface.is_broadcast_or_nbma()
        {
            // Trigger the NeighborChange event on broadcast/NBMA networks.
            instance
                .tx
                .ism_event(area.id, iface.id, ism::Event::NbrChange);
        }

        // Check if the neighbor changed to/from the FULL state.
        if new_state == State::Full || self.state == State::Full {
            // (Re)originate LSAs that might have been affected.
            instance
                .tx
                .lsa_orig_event(LsaOriginateEvent::NeighborToFromFull {
                    area_id: area.id,
                    iface_id: iface.id,
                });
        }

        // Hello packets are still sent to dead NBMA neighbors, but at the
        // reduced rate PollInterval.
        if iface.config.if_type == InterfaceType::NonBroadcast {
            if new_state == State::Down && event == Event::InactivityTimer {
                if iface
                    .config
                    .static_nbrs
                    .iter()
                    .any(|snbr| snbr.addr == self.src)
                {
                    iface.nbma_poll_interval_start(area, instance, self.src);
                }
            } else if self.state == State::Down {
                iface.nbma_poll_interval_stop(self.src);
            }
        }

        // Effectively transition to the new FSM state.
        Debug::NsmTransition(self.router_id, &self.state, &new_state).log();
        self.state = new_state;
    }

    // Starts negotiating the master/slave relationship and the initial DD
    // sequence number.
    fn start_exchange(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        let dd_seq_no = instance.state.dd_seq_no.get();
        instance.state.dd_seq_no.set(dd_seq_no.wrapping_add(1));
        self.dd_seq_no = dd_seq_no;
        self.dd_flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
        output::send_dbdesc(self, iface, area, instance);
    }

    // Lists the contents of the entire LSDB in the Database summary list.
    //
    // MaxAge LSAs go straight to the Link state retransmission list instead.
    fn build_summary_list(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        lsa_entries: &Arena<LsaEntry>,
    ) {
        for lse in area
            .state
            .lsdb
            .iter(lsa_entries)
            .chain(instance.state.lsdb.iter(lsa_entries))
            .map(|(_, lse)| lse)
            .filter(|lse| iface.lsa_type_is_valid(area, lse.data.hdr.lsa_type))
        {
            let lsa_key = lse.data.hdr.key();
            if lse.data.hdr.is_maxage() {
                self.lists.ls_rxmt.insert(lsa_key, lse.data.hdr);
                self.rxmt_lsupd_start_check(iface, area, instance);
            } else {
                self.lists.db_summary.insert(lsa_key, lse.data.hdr);
            }
        }

        self.dd_flags.remove(DbDescFlags::I);
    }

    pub(crate) fn loading_done_check(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        // Check if all pending LSA requests were received.
        if self.lists.ls_request_pending.is_empty() {
            self.rxmt_lsreq_stop();

            // Check if there are new LSAs to request.
            if !self.lists.ls_request.is_empty() {
                output::send_lsreq(self, iface, area, instance);
            } else if self.state == State::Loading {
                // Database loading has completed.
                instance.tx.nsm_event(
                    area.id,
                    iface.id,
                    self.id,
                    Event::LoadingDone,
                );
            }
        }
    }

    fn reset_adjacency(&mut self) {
        self.options = None;
        self.last_rcvd_dbdesc = None;
        self.last_sent_dbdesc = None;
        self.lists = Default::default();
        self.tasks.dbdesc_free_timer = None;
        self.tasks.rxmt_dbdesc = None;
        self.tasks.rxmt_lsreq = None;
        self.tasks.rxmt_lsupd = None;
    }

    // Checks whether the given Database Description packet is a duplicate of
    // the last one received.
    pub(crate) fn dbdesc_is_dup(
        &self,
        options: Options,
        dd_flags: DbDescFlags,
        dd_seq_no: u32,
    ) -> bool {
        self.last_rcvd_dbdesc.as_ref().is_some_and(|last| {
            last.options == options
                && last.dd_flags == dd_flags
                && last.dd_seq_no == dd_seq_no
        })
    }

    pub(crate) fn is_master(&self) -> bool {
        self.dd_flags.contains(DbDescFlags::MS)
    }

    fn inactivity_timer_start(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        let task = tasks::nbr_inactivity_timer(
            instance.sched,
            area.id,
            iface.id,
            self.id,
            iface.config.dead_interval,
        );
        self.tasks.inactivity_timer = Some(task);
    }

    pub(crate) fn dbdesc_free_timer_start(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        let task = tasks::nbr_dbdesc_free_timer(
            instance.sched,
            area.id,
            iface.id,
            self.id,
            iface.config.dead_interval,
        );
        self.tasks.dbdesc_free_timer = Some(task);
    }

    pub(crate) fn rxmt_dbdesc_start(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        let event = TimerEvent::NbrRxmtDbDesc {
            area_id: area.id,
            iface_id: iface.id,
            nbr_id: self.id,
        };
        let task = tasks::nbr_rxmt_interval(
            instance.sched,
            event,
            iface.config.retransmit_interval,
        );
        self.tasks.rxmt_dbdesc = Some(task);
    }

    pub(crate) fn rxmt_dbdesc_stop(&mut self) {
        self.tasks.rxmt_dbdesc = None;
    }

    pub(crate) fn rxmt_lsreq_start(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        let event = TimerEvent::NbrRxmtLsRequest {
            area_id: area.id,
            iface_id: iface.id,
            nbr_id: self.id,
        };
        let task = tasks::nbr_rxmt_interval(
            instance.sched,
            event,
            iface.config.retransmit_interval,
        );
        self.tasks.rxmt_lsreq = Some(task);
    }

    fn rxmt_lsreq_stop(&mut self) {
        self.tasks.rxmt_lsreq = None;
    }

    pub(crate) fn rxmt_lsupd_start_check(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        if !self.lists.ls_rxmt.is_empty() && self.tasks.rxmt_lsupd.is_none() {
            let event = TimerEvent::NbrRxmtLsUpdate {
                area_id: area.id,
                iface_id: iface.id,
                nbr_id: self.id,
            };
            let task = tasks::nbr_rxmt_interval(
                instance.sched,
                event,
                iface.config.retransmit_interval,
            );
            self.tasks.rxmt_lsupd = Some(task);
        }
    }

    pub(crate) fn rxmt_lsupd_stop_check(&mut self) {
        if self.lists.ls_rxmt.is_empty() && self.tasks.rxmt_lsupd.is_some() {
            self.tasks.rxmt_lsupd = None;
        }
    }

    // Whether the LS Update retransmission timer is running.
    pub fn rxmt_lsupd_is_active(&self) -> bool {
        self.tasks.rxmt_lsupd.is_some()
    }
}

impl Drop for Neighbor {
    fn drop(&mut self) {
        Debug::NeighborDelete(self.router_id).log();
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::SeqNoMismatchReason;

    fn run(
        state: State,
        event: Event,
        adj_needed: bool,
        requests_pending: bool,
    ) -> Option<(Option<State>, Vec<Action>)> {
        nsm::transition(state, event, adj_needed, requests_pending)
            .map(|(new_state, actions)| (new_state, actions.to_vec()))
    }

    #[test]
    fn hello_received() {
        assert_eq!(
            run(State::Down, Event::HelloRcvd, false, false),
            Some((Some(State::Init), vec![Action::RestartInactivityTimer]))
        );
        assert_eq!(
            run(State::Full, Event::HelloRcvd, true, false),
            Some((None, vec![Action::RestartInactivityTimer]))
        );
    }

    #[test]
    fn nbma_start() {
        assert_eq!(
            run(State::Down, Event::Start, false, false),
            Some((
                Some(State::Attempt),
                vec![Action::SendHello, Action::RestartInactivityTimer]
            ))
        );
        assert_eq!(run(State::Init, Event::Start, false, false), None);
    }

    #[test]
    fn two_way_received() {
        assert_eq!(
            run(State::Init, Event::TwoWayRcvd, true, false),
            Some((Some(State::ExStart), vec![Action::StartExchange]))
        );
        assert_eq!(
            run(State::Init, Event::TwoWayRcvd, false, false),
            Some((Some(State::TwoWay), vec![]))
        );
        assert_eq!(
            run(State::Full, Event::TwoWayRcvd, true, false),
            Some((None, vec![]))
        );
    }

    #[test]
    fn exchange_done() {
        assert_eq!(
            run(State::Exchange, Event::ExchangeDone, true, true),
            Some((Some(State::Loading), vec![]))
        );
        assert_eq!(
            run(State::Exchange, Event::ExchangeDone, true, false),
            Some((Some(State::Full), vec![]))
        );
        assert_eq!(run(State::Loading, Event::ExchangeDone, true, false), None);
    }

    #[test]
    fn adj_ok() {
        assert_eq!(
            run(State::TwoWay, Event::AdjOk, true, false),
            Some((Some(State::ExStart), vec![Action::StartExchange]))
        );
        assert_eq!(
            run(State::TwoWay, Event::AdjOk, false, false),
            Some((None, vec![]))
        );
        assert_eq!(
            run(State::Full, Event::AdjOk, false, false),
            Some((Some(State::TwoWay), vec![Action::ResetAdjacency]))
        );
        assert_eq!(
            run(State::Full, Event::AdjOk, true, false),
            Some((None, vec![]))
        );
    }

    #[test]
    fn bad_ls_req_restarts_exchange() {
        let expected = Some((
            Some(State::ExStart),
            vec![Action::ResetAdjacency, Action::StartExchange],
        ));
        for state in [State::Exchange, State::Loading, State::Full] {
            assert_eq!(run(state, Event::BadLsReq, true, false), expected);
            let event =
                Event::SeqNoMismatch(SeqNoMismatchReason::InconsistentSeqNo);
            assert_eq!(run(state, event, true, false), expected);
        }
        assert_eq!(run(State::ExStart, Event::BadLsReq, true, false), None);
    }

    #[test]
    fn neighbor_down() {
        for event in [Event::Kill, Event::LinkDown, Event::InactivityTimer] {
            for state in [State::Attempt, State::Init, State::Full] {
                assert_eq!(
                    run(state, event, true, true),
                    Some((
                        Some(State::Down),
                        vec![
                            Action::ResetAdjacency,
                            Action::StopInactivityTimer
                        ]
                    ))
                );
            }
        }
    }

    #[test]
    fn one_way_received() {
        assert_eq!(
            run(State::Loading, Event::OneWayRcvd, true, true),
            Some((Some(State::Init), vec![Action::ResetAdjacency]))
        );
        assert_eq!(
            run(State::Init, Event::OneWayRcvd, true, true),
            Some((None, vec![]))
        );
        assert_eq!(run(State::Down, Event::OneWayRcvd, true, true), None);
    }
}
