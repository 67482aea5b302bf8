//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collections::{AreaId, InterfaceId, LsdbId, NeighborId};
use crate::packet::lsa::LsaKey;

//
// Engine timers.
//
// The engine never sleeps. Every wake-up it needs is requested from the
// scheduling collaborator, which later hands the same `TimerId` back through
// `Instance::timer_expired`:
//
//                                    +--------------+
//                                    |  scheduler   |
//                                    +--------------+
//                          schedule_at | ^ timer_expired
//                               cancel | |
//                                      V |
//                                    +--------------+
//              iface_hello (Nx) ---> |              |
//               iface_wait (Nx) ---> |              |
//        iface_delayed_ack (Nx) ---> |              |
//               iface_poll (Nx) ---> |              |
//                                    |              |
//           nbr_inactivity (Nx) ---> |   instance   |
//                 nbr_rxmt (Nx) ---> |              |
//          nbr_dbdesc_free (Nx) ---> |              |
//                                    |              |
//         lsa_orig_delayed (Nx) ---> |              |
//                 age_tick (1x) ---> |              |
//                                    +--------------+
//

pub mod messages {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;

    use serde::{Deserialize, Serialize};

    use crate::collections::{
        AreaId, InterfaceId, LsaEntryId, LsdbId, NeighborId,
    };
    use crate::debug::LsaFlushReason;
    use crate::interface::ism;
    use crate::lsdb::LsaOriginateEvent;
    use crate::neighbor::nsm;
    use crate::packet::Options;
    use crate::packet::lsa::LsaBody;

    // Deferred protocol events.
    //
    // State machines and the routing table calculation can't always act on
    // the events they generate while the instance is borrowed. Those events
    // are queued here and processed in FIFO order before control returns to
    // the caller.
    #[derive(Debug, Default)]
    pub struct ProtocolInputTx {
        queue: RefCell<VecDeque<ProtocolInputMsg>>,
    }

    #[derive(Debug, Deserialize, Serialize)]
    pub enum ProtocolInputMsg {
        IsmEvent(IsmEventMsg),
        NsmEvent(NsmEventMsg),
        SendLsUpdate(SendLsUpdateMsg),
        LsaOrigEvent(LsaOrigEventMsg),
        LsaOrigCheck(LsaOrigCheckMsg),
        LsaFlush(LsaFlushMsg),
    }

    #[derive(Debug, Deserialize, Serialize)]
    pub struct IsmEventMsg {
        pub area_id: AreaId,
        pub iface_id: InterfaceId,
        pub event: ism::Event,
    }

    #[derive(Debug, Deserialize, Serialize)]
    pub struct NsmEventMsg {
        pub area_id: AreaId,
        pub iface_id: InterfaceId,
        pub nbr_id: NeighborId,
        pub event: nsm::Event,
    }

    #[derive(Debug, Deserialize, Serialize)]
    pub struct SendLsUpdateMsg {
        pub area_id: AreaId,
        pub iface_id: InterfaceId,
        pub nbr_id: Option<NeighborId>,
    }

    #[derive(Debug, Deserialize, Serialize)]
    pub struct LsaOrigEventMsg {
        pub event: LsaOriginateEvent,
    }

    #[derive(Debug, Deserialize, Serialize)]
    pub struct LsaOrigCheckMsg {
        pub lsdb_id: LsdbId,
        pub options: Options,
        pub lsa_id: Ipv4Addr,
        pub lsa_body: LsaBody,
    }

    #[derive(Debug, Deserialize, Serialize)]
    pub struct LsaFlushMsg {
        pub lsdb_id: LsdbId,
        pub lse_id: LsaEntryId,
        pub reason: LsaFlushReason,
    }

    // ===== impl ProtocolInputTx =====

    impl ProtocolInputTx {
        pub(crate) fn ism_event(
            &self,
            area_id: AreaId,
            iface_id: InterfaceId,
            event: ism::Event,
        ) {
            self.push(ProtocolInputMsg::IsmEvent(IsmEventMsg {
                area_id,
                iface_id,
                event,
            }));
        }

        pub(crate) fn nsm_event(
            &self,
            area_id: AreaId,
            iface_id: InterfaceId,
            nbr_id: NeighborId,
            event: nsm::Event,
        ) {
            self.push(ProtocolInputMsg::NsmEvent(NsmEventMsg {
                area_id,
                iface_id,
                nbr_id,
                event,
            }));
        }

        pub(crate) fn send_lsupd(
            &self,
            area_id: AreaId,
            iface_id: InterfaceId,
            nbr_id: Option<NeighborId>,
        ) {
            self.push(ProtocolInputMsg::SendLsUpdate(SendLsUpdateMsg {
                area_id,
                iface_id,
                nbr_id,
            }));
        }

        pub(crate) fn lsa_orig_event(&self, event: LsaOriginateEvent) {
            self.push(ProtocolInputMsg::LsaOrigEvent(LsaOrigEventMsg {
                event,
            }));
        }

        pub(crate) fn lsa_orig_check(
            &self,
            lsdb_id: LsdbId,
            options: Options,
            lsa_id: Ipv4Addr,
            lsa_body: LsaBody,
        ) {
            self.push(ProtocolInputMsg::LsaOrigCheck(LsaOrigCheckMsg {
                lsdb_id,
                options,
                lsa_id,
                lsa_body,
            }));
        }

        pub(crate) fn lsa_flush(
            &self,
            lsdb_id: LsdbId,
            lse_id: LsaEntryId,
            reason: LsaFlushReason,
        ) {
            self.push(ProtocolInputMsg::LsaFlush(LsaFlushMsg {
                lsdb_id,
                lse_id,
                reason,
            }));
        }

        // Dequeues the oldest pending message.
        pub(crate) fn recv(&self) -> Option<ProtocolInputMsg> {
            self.queue.borrow_mut().pop_front()
        }

        pub(crate) fn is_empty(&self) -> bool {
            self.queue.borrow().is_empty()
        }

        fn push(&self, msg: ProtocolInputMsg) {
            self.queue.borrow_mut().push_back(msg);
        }
    }
}

// Scheduling collaborator.
//
// Time is measured from an arbitrary epoch chosen by the scheduler.
pub trait Scheduler {
    // Current time.
    fn now(&self) -> Duration;

    // Requests a wake-up at the given time.
    fn schedule_at(&self, time: Duration, timer_id: TimerId);

    // Cancels a previously requested wake-up. Unknown IDs are ignored.
    fn cancel(&self, timer_id: TimerId);
}

// Timer identifier.
//
// The sequence number is unique per armed timer, so a stale expiration
// (e.g. one that raced with a cancellation) is never mistaken for the
// current one.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct TimerId {
    pub seqno: u64,
    pub event: TimerEvent,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum TimerEvent {
    IfaceHello {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    IfaceWait {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    IfaceDelayedAck {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    IfacePoll {
        area_id: AreaId,
        iface_id: InterfaceId,
        addr: Ipv4Addr,
    },
    NbrInactivity {
        area_id: AreaId,
        iface_id: InterfaceId,
        nbr_id: NeighborId,
    },
    NbrRxmtDbDesc {
        area_id: AreaId,
        iface_id: InterfaceId,
        nbr_id: NeighborId,
    },
    NbrRxmtLsRequest {
        area_id: AreaId,
        iface_id: InterfaceId,
        nbr_id: NeighborId,
    },
    NbrRxmtLsUpdate {
        area_id: AreaId,
        iface_id: InterfaceId,
        nbr_id: NeighborId,
    },
    NbrDbDescFree {
        area_id: AreaId,
        iface_id: InterfaceId,
        nbr_id: NeighborId,
    },
    LsaOrigDelayed {
        lsdb_id: LsdbId,
        lsa_key: LsaKey,
    },
    AgeTick,
}

// Shared handle to the scheduling collaborator.
//
// Keeps track of the armed timers, so that expirations can be matched
// against live timer tasks.
#[derive(Clone)]
pub struct SchedulerHandle(Rc<SchedulerInner>);

struct SchedulerInner {
    scheduler: Box<dyn Scheduler>,
    next_seqno: Cell<u64>,
    // Armed timers, mapped to their re-arm interval (interval tasks only).
    armed: RefCell<BTreeMap<u64, Option<Duration>>>,
}

// One-shot timer. Cancelled when dropped.
#[derive(Debug)]
pub struct TimeoutTask {
    handle: SchedulerHandle,
    timer_id: TimerId,
}

// Periodic timer. Cancelled when dropped.
#[derive(Debug)]
pub struct IntervalTask {
    handle: SchedulerHandle,
    timer_id: TimerId,
}

// ===== impl SchedulerHandle =====

impl SchedulerHandle {
    pub(crate) fn new(scheduler: Box<dyn Scheduler>) -> SchedulerHandle {
        SchedulerHandle(Rc::new(SchedulerInner {
            scheduler,
            next_seqno: Cell::new(0),
            armed: Default::default(),
        }))
    }

    pub(crate) fn now(&self) -> Duration {
        self.0.scheduler.now()
    }

    fn arm(
        &self,
        event: TimerEvent,
        timeout: Duration,
        interval: bool,
    ) -> TimerId {
        let seqno = self.0.next_seqno.get() + 1;
        self.0.next_seqno.set(seqno);
        let timer_id = TimerId { seqno, event };
        self.0
            .armed
            .borrow_mut()
            .insert(seqno, interval.then_some(timeout));
        self.0.scheduler.schedule_at(self.now() + timeout, timer_id);
        timer_id
    }

    fn disarm(&self, timer_id: TimerId) {
        if self.0.armed.borrow_mut().remove(&timer_id.seqno).is_some() {
            self.0.scheduler.cancel(timer_id);
        }
    }

    // Accounts for a timer expiration reported by the scheduler.
    //
    // Returns false if the timer is no longer armed. Interval timers are
    // re-armed under the same ID.
    pub(crate) fn expire(&self, timer_id: TimerId) -> bool {
        let mut armed = self.0.armed.borrow_mut();
        match armed.get(&timer_id.seqno).copied() {
            None => false,
            Some(Some(interval)) => {
                drop(armed);
                self.0
                    .scheduler
                    .schedule_at(self.now() + interval, timer_id);
                true
            }
            Some(None) => {
                armed.remove(&timer_id.seqno);
                true
            }
        }
    }

    // Returns whether the given timer is still armed.
    pub(crate) fn is_armed(&self, timer_id: &TimerId) -> bool {
        self.0.armed.borrow().contains_key(&timer_id.seqno)
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("armed", &self.0.armed.borrow().len())
            .finish()
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    pub(crate) fn new(
        handle: &SchedulerHandle,
        timeout: Duration,
        event: TimerEvent,
    ) -> TimeoutTask {
        let timer_id = handle.arm(event, timeout, false);
        TimeoutTask {
            handle: handle.clone(),
            timer_id,
        }
    }

    // Whether the timer hasn't fired yet.
    pub(crate) fn is_pending(&self) -> bool {
        self.handle.is_armed(&self.timer_id)
    }
}

impl Drop for TimeoutTask {
    fn drop(&mut self) {
        self.handle.disarm(self.timer_id);
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    pub(crate) fn new(
        handle: &SchedulerHandle,
        interval: Duration,
        event: TimerEvent,
    ) -> IntervalTask {
        let timer_id = handle.arm(event, interval, true);
        IntervalTask {
            handle: handle.clone(),
            timer_id,
        }
    }
}

impl Drop for IntervalTask {
    fn drop(&mut self) {
        self.handle.disarm(self.timer_id);
    }
}

// ===== global functions =====

pub(crate) fn iface_hello_interval(
    handle: &SchedulerHandle,
    area_id: AreaId,
    iface_id: InterfaceId,
    interval: u16,
) -> IntervalTask {
    IntervalTask::new(
        handle,
        Duration::from_secs(interval.into()),
        TimerEvent::IfaceHello { area_id, iface_id },
    )
}

pub(crate) fn iface_wait_timer(
    handle: &SchedulerHandle,
    area_id: AreaId,
    iface_id: InterfaceId,
    dead_interval: u32,
) -> TimeoutTask {
    TimeoutTask::new(
        handle,
        Duration::from_secs(dead_interval.into()),
        TimerEvent::IfaceWait { area_id, iface_id },
    )
}

pub(crate) fn iface_delayed_ack_timer(
    handle: &SchedulerHandle,
    area_id: AreaId,
    iface_id: InterfaceId,
    ack_delay: u16,
) -> TimeoutTask {
    TimeoutTask::new(
        handle,
        Duration::from_secs(ack_delay.into()),
        TimerEvent::IfaceDelayedAck { area_id, iface_id },
    )
}

pub(crate) fn iface_poll_interval(
    handle: &SchedulerHandle,
    area_id: AreaId,
    iface_id: InterfaceId,
    addr: Ipv4Addr,
    poll_interval: u16,
) -> IntervalTask {
    IntervalTask::new(
        handle,
        Duration::from_secs(poll_interval.into()),
        TimerEvent::IfacePoll {
            area_id,
            iface_id,
            addr,
        },
    )
}

pub(crate) fn nbr_inactivity_timer(
    handle: &SchedulerHandle,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    dead_interval: u32,
) -> TimeoutTask {
    TimeoutTask::new(
        handle,
        Duration::from_secs(dead_interval.into()),
        TimerEvent::NbrInactivity {
            area_id,
            iface_id,
            nbr_id,
        },
    )
}

pub(crate) fn nbr_rxmt_interval(
    handle: &SchedulerHandle,
    event: TimerEvent,
    rxmt_interval: u16,
) -> IntervalTask {
    IntervalTask::new(handle, Duration::from_secs(rxmt_interval.into()), event)
}

pub(crate) fn nbr_dbdesc_free_timer(
    handle: &SchedulerHandle,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    dead_interval: u32,
) -> TimeoutTask {
    TimeoutTask::new(
        handle,
        Duration::from_secs(dead_interval.into()),
        TimerEvent::NbrDbDescFree {
            area_id,
            iface_id,
            nbr_id,
        },
    )
}

pub(crate) fn lsa_orig_delayed_timer(
    handle: &SchedulerHandle,
    lsdb_id: LsdbId,
    lsa_key: LsaKey,
    timeout: Duration,
) -> TimeoutTask {
    TimeoutTask::new(
        handle,
        timeout,
        TimerEvent::LsaOrigDelayed { lsdb_id, lsa_key },
    )
}

pub(crate) fn age_tick_interval(handle: &SchedulerHandle) -> IntervalTask {
    IntervalTask::new(handle, Duration::from_secs(1), TimerEvent::AgeTick)
}
