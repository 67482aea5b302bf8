//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use crate::events::AckDecision;
use crate::interface::{Interface, ism};
use crate::neighbor::nsm;
use crate::packet::Packet;
use crate::packet::lsa::LsaHdr;
use crate::route::RouteNet;

// OSPF debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instances
    InstanceCreate,
    InstanceStart,
    // Interfaces
    InterfaceCreate(&'a str),
    InterfaceStart(&'a str),
    InterfaceStop(&'a str, InterfaceInactiveReason),
    IsmEvent(&'a ism::State, &'a ism::Event),
    IsmTransition(&'a ism::State, &'a ism::State),
    IsmDrElection(
        Option<Ipv4Addr>,
        Option<Ipv4Addr>,
        Option<Ipv4Addr>,
        Option<Ipv4Addr>,
    ),
    // Neighbors
    NeighborCreate(Ipv4Addr),
    NeighborDelete(Ipv4Addr),
    NsmEvent(Ipv4Addr, &'a nsm::State, &'a nsm::Event),
    NsmTransition(Ipv4Addr, &'a nsm::State, &'a nsm::State),
    NsmSeqNoMismatch(Ipv4Addr, &'a nsm::State, SeqNoMismatchReason),
    // Network
    PacketRx(&'a Interface, &'a Ipv4Addr, &'a Ipv4Addr, &'a Packet),
    PacketTx(u32, &'a Ipv4Addr, &'a Packet),
    PacketRxIgnore(Ipv4Addr, &'a nsm::State),
    // Flooding
    QuestionableAck(Ipv4Addr, &'a LsaHdr),
    LsaDiscard(Ipv4Addr, &'a LsaHdr, LsaDiscardReason),
    LsaMinArrivalDiscard(Ipv4Addr, &'a LsaHdr),
    LsaSelfOriginated(Ipv4Addr, &'a LsaHdr),
    LsaAckDecision(Ipv4Addr, &'a LsaHdr, &'a AckDecision),
    // LSDB maintenance
    LsaInstall(&'a LsaHdr),
    LsaOriginate(&'a LsaHdr),
    LsaOriginateMinInterval(&'a LsaHdr),
    LsaFlush(&'a LsaHdr, LsaFlushReason),
    LsaRefresh(&'a LsaHdr),
    LsaPurge(&'a LsaHdr),
    SummaryLsaIdExhausted(&'a Ipv4Network),
    // SPF
    SpfStart,
    SpfNetworkUnreachableAbr(&'a Ipv4Network, Ipv4Addr),
    SpfRouterUnreachableAbr(&'a Ipv4Addr, Ipv4Addr),
    SpfUnreachableAsbr(&'a Ipv4Network, Ipv4Addr),
    VirtualLinkUp(&'a str, u16),
    VirtualLinkDown(&'a str),
    // Routing table
    RouteInstall(&'a Ipv4Network, &'a RouteNet),
    RouteUninstall(&'a Ipv4Network),
}

// Reason why OSPF is inactive on an interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InterfaceInactiveReason {
    AdminDown,
    LoopedBack,
    VirtualLinkUnreachable,
}

// Reason why a SeqNoMismatch event was generated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SeqNoMismatchReason {
    InconsistentFlags,
    InconsistentOptions,
    InconsistentSeqNo,
    UnexpectedDbDesc,
    InvalidLsaType,
}

// Reason why a received LSA was skipped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaDiscardReason {
    InvalidChecksum,
    UnknownType,
    StubArea,
}

// Reason why an LSA is being flushed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaFlushReason {
    Expiry,
    PrematureAging,
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceCreate | Debug::InstanceStart | Debug::SpfStart => {
                // Parent span(s): ospf-instance
                debug!("{}", self);
            }
            Debug::InterfaceCreate(name) | Debug::InterfaceStart(name) => {
                // Parent span(s): ospf-instance
                debug_span!("interface", %name).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::InterfaceStop(name, reason) => {
                // Parent span(s): ospf-instance
                debug_span!("interface", %name).in_scope(|| {
                    debug!(%reason, "{}", self);
                })
            }
            Debug::IsmEvent(state, event) => {
                // Parent span(s): ospf-instance:interface
                debug_span!("fsm").in_scope(|| {
                    debug!(?state, ?event, "{}", self);
                })
            }
            Debug::IsmTransition(old_state, new_state) => {
                // Parent span(s): ospf-instance:interface
                debug_span!("fsm").in_scope(|| {
                    debug!(?old_state, ?new_state, "{}", self);
                })
            }
            Debug::IsmDrElection(old_dr, new_dr, old_bdr, new_bdr) => {
                // Parent span(s): ospf-instance:interface
                debug_span!("fsm").in_scope(|| {
                    debug!(?old_dr, ?new_dr, ?old_bdr, ?new_bdr, "{}", self);
                })
            }
            Debug::NeighborCreate(router_id)
            | Debug::NeighborDelete(router_id) => {
                // Parent span(s): ospf-instance
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::NsmEvent(router_id, state, event) => {
                // Parent span(s): ospf-instance
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?state, ?event, "{}", self);
                    })
                })
            }
            Debug::NsmTransition(router_id, old_state, new_state) => {
                // Parent span(s): ospf-instance
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    })
                })
            }
            Debug::NsmSeqNoMismatch(router_id, state, reason) => {
                // Parent span(s): ospf-instance
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?state, %reason, "{}", self);
                })
            }
            Debug::PacketRx(iface, src, dst, packet) => {
                // Parent span(s): ospf-instance
                debug_span!("network").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data =
                            serde_json::to_string(&packet).unwrap_or_default();
                        debug!(
                            interface = %iface.name, %src, %dst, %data,
                            "{}", self
                        );
                    })
                })
            }
            Debug::PacketTx(ifindex, addr, packet) => {
                // Parent span(s): ospf-instance
                debug_span!("network").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data =
                            serde_json::to_string(&packet).unwrap_or_default();
                        debug!(%ifindex, %addr, %data, "{}", self);
                    })
                })
            }
            Debug::PacketRxIgnore(router_id, state) => {
                // Parent span(s): ospf-instance
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?state, "{}", self);
                })
            }
            Debug::QuestionableAck(router_id, lsa_hdr)
            | Debug::LsaMinArrivalDiscard(router_id, lsa_hdr)
            | Debug::LsaSelfOriginated(router_id, lsa_hdr) => {
                // Parent span(s): ospf-instance
                debug_span!("flooding").in_scope(|| {
                    debug_span!("neighbor", %router_id).in_scope(|| {
                        debug!(?lsa_hdr, "{}", self);
                    })
                })
            }
            Debug::LsaDiscard(router_id, lsa_hdr, reason) => {
                // Parent span(s): ospf-instance
                debug_span!("flooding").in_scope(|| {
                    debug_span!("neighbor", %router_id).in_scope(|| {
                        debug!(?lsa_hdr, %reason, "{}", self);
                    })
                })
            }
            Debug::LsaAckDecision(router_id, lsa_hdr, decision) => {
                // Parent span(s): ospf-instance
                debug_span!("flooding").in_scope(|| {
                    debug_span!("neighbor", %router_id).in_scope(|| {
                        debug!(?lsa_hdr, ?decision, "{}", self);
                    })
                })
            }
            Debug::LsaInstall(lsa_hdr)
            | Debug::LsaOriginate(lsa_hdr)
            | Debug::LsaOriginateMinInterval(lsa_hdr)
            | Debug::LsaRefresh(lsa_hdr)
            | Debug::LsaPurge(lsa_hdr) => {
                // Parent span(s): ospf-instance
                debug_span!("lsdb").in_scope(|| {
                    debug!(?lsa_hdr, "{}", self);
                })
            }
            Debug::LsaFlush(lsa_hdr, reason) => {
                // Parent span(s): ospf-instance
                debug_span!("lsdb").in_scope(|| {
                    debug!(?lsa_hdr, %reason, "{}", self);
                })
            }
            Debug::SummaryLsaIdExhausted(prefix) => {
                // Parent span(s): ospf-instance
                debug_span!("lsdb").in_scope(|| {
                    debug!(%prefix, "{}", self);
                })
            }
            Debug::SpfNetworkUnreachableAbr(destination, abr) => {
                // Parent span(s): ospf-instance
                debug_span!("spf").in_scope(|| {
                    debug!(%destination, %abr, "{}", self);
                })
            }
            Debug::SpfRouterUnreachableAbr(router_id, abr) => {
                // Parent span(s): ospf-instance
                debug_span!("spf").in_scope(|| {
                    debug!(%router_id, %abr, "{}", self);
                })
            }
            Debug::SpfUnreachableAsbr(destination, asbr) => {
                // Parent span(s): ospf-instance
                debug_span!("spf").in_scope(|| {
                    debug!(%destination, %asbr, "{}", self);
                })
            }
            Debug::VirtualLinkUp(name, cost) => {
                // Parent span(s): ospf-instance
                debug_span!("spf").in_scope(|| {
                    debug!(%name, %cost, "{}", self);
                })
            }
            Debug::VirtualLinkDown(name) => {
                // Parent span(s): ospf-instance
                debug_span!("spf").in_scope(|| {
                    debug!(%name, "{}", self);
                })
            }
            Debug::RouteInstall(prefix, route) => {
                // Parent span(s): ospf-instance
                debug_span!("spf").in_scope(|| {
                    debug!(
                        %prefix,
                        path_type = ?route.path_type,
                        metric = %route.metric,
                        "{}", self
                    );
                })
            }
            Debug::RouteUninstall(prefix) => {
                // Parent span(s): ospf-instance
                debug_span!("spf").in_scope(|| {
                    debug!(%prefix, "{}", self);
                })
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceCreate => {
                write!(f, "instance created")
            }
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InterfaceCreate(..) => {
                write!(f, "interface created")
            }
            Debug::InterfaceStart(..) => {
                write!(f, "starting interface")
            }
            Debug::InterfaceStop(..) => {
                write!(f, "stopping interface")
            }
            Debug::IsmEvent(..) | Debug::NsmEvent(..) => {
                write!(f, "event")
            }
            Debug::IsmTransition(..) | Debug::NsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::IsmDrElection(..) => {
                write!(f, "DR election")
            }
            Debug::NeighborCreate(..) => {
                write!(f, "neighbor created")
            }
            Debug::NeighborDelete(..) => {
                write!(f, "neighbor deleted")
            }
            Debug::NsmSeqNoMismatch(..) => {
                write!(f, "database exchange sequence mismatch")
            }
            Debug::PacketRx(..) | Debug::PacketTx(..) => {
                write!(f, "packet")
            }
            Debug::PacketRxIgnore(..) => {
                write!(
                    f,
                    "ignoring packet received from a non-adjacent neighbor"
                )
            }
            Debug::QuestionableAck(..) => {
                write!(f, "received questionable ack")
            }
            Debug::LsaDiscard(..) => {
                write!(f, "discarding LSA")
            }
            Debug::LsaMinArrivalDiscard(..) => {
                write!(f, "discarding LSA due to the MinLSArrival check")
            }
            Debug::LsaSelfOriginated(..) => {
                write!(f, "received self-originated LSA")
            }
            Debug::LsaAckDecision(..) => {
                write!(f, "acknowledgment decision")
            }
            Debug::LsaInstall(..) => {
                write!(f, "installing LSA")
            }
            Debug::LsaOriginate(..) => {
                write!(f, "originating LSA")
            }
            Debug::LsaOriginateMinInterval(..) => {
                write!(
                    f,
                    "postponing LSA origination due to the MinLSInterval check"
                )
            }
            Debug::LsaFlush(..) => {
                write!(f, "flushing LSA")
            }
            Debug::LsaRefresh(..) => {
                write!(f, "refreshing LSA")
            }
            Debug::LsaPurge(..) => {
                write!(f, "removing MaxAge LSA from the database")
            }
            Debug::SummaryLsaIdExhausted(..) => {
                write!(f, "no link state ID available for summary")
            }
            Debug::SpfStart => {
                write!(f, "starting routing table calculation")
            }
            Debug::SpfNetworkUnreachableAbr(..)
            | Debug::SpfRouterUnreachableAbr(..) => {
                write!(f, "no route found for originating ABR")
            }
            Debug::SpfUnreachableAsbr(..) => {
                write!(f, "no route found for originating ASBR")
            }
            Debug::VirtualLinkUp(..) => {
                write!(f, "virtual link endpoint reachable")
            }
            Debug::VirtualLinkDown(..) => {
                write!(f, "virtual link endpoint unreachable")
            }
            Debug::RouteInstall(..) => {
                write!(f, "installing route")
            }
            Debug::RouteUninstall(..) => {
                write!(f, "uninstalling route")
            }
        }
    }
}

// ===== impl InterfaceInactiveReason =====

impl std::fmt::Display for InterfaceInactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceInactiveReason::AdminDown => {
                write!(f, "administrative status down")
            }
            InterfaceInactiveReason::LoopedBack => {
                write!(f, "looped back")
            }
            InterfaceInactiveReason::VirtualLinkUnreachable => {
                write!(f, "virtual link endpoint unreachable")
            }
        }
    }
}

// ===== impl SeqNoMismatchReason =====

impl std::fmt::Display for SeqNoMismatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeqNoMismatchReason::InconsistentFlags => {
                write!(f, "inconsistent flags")
            }
            SeqNoMismatchReason::InconsistentOptions => {
                write!(f, "inconsistent options")
            }
            SeqNoMismatchReason::InconsistentSeqNo => {
                write!(f, "inconsistent sequence number")
            }
            SeqNoMismatchReason::UnexpectedDbDesc => {
                write!(f, "unexpected database description packet")
            }
            SeqNoMismatchReason::InvalidLsaType => {
                write!(f, "invalid LSA type")
            }
        }
    }
}

// ===== impl LsaDiscardReason =====

impl std::fmt::Display for LsaDiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LsaDiscardReason::InvalidChecksum => {
                write!(f, "invalid checksum")
            }
            LsaDiscardReason::UnknownType => {
                write!(f, "unknown LSA type")
            }
            LsaDiscardReason::StubArea => {
                write!(f, "AS-external LSA received on a stub area")
            }
        }
    }
}

// ===== impl LsaFlushReason =====

impl std::fmt::Display for LsaFlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LsaFlushReason::Expiry => {
                write!(f, "LSA reached MaxAge")
            }
            LsaFlushReason::PrematureAging => {
                write!(f, "premature aging")
            }
        }
    }
}
