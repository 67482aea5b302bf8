//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use tracing::{warn, warn_span};

use crate::collections::{AreaId, InterfaceId, LsaEntryId, NeighborId};
use crate::interface::ism;
use crate::neighbor::nsm;
use crate::packet::PacketType;
use crate::packet::lsa::LsaType;

// OSPF engine errors.
#[derive(Debug)]
pub enum Error {
    // Timer and event dispatch
    AreaIdNotFound(AreaId),
    InterfaceIdNotFound(InterfaceId),
    NeighborIdNotFound(NeighborId),
    LsaEntryIdNotFound(LsaEntryId),
    // Public API
    AreaNotFound(Ipv4Addr),
    // Packet input
    UnknownInterface(u32),
    InvalidSrcAddr(Ipv4Addr),
    InvalidDstAddr(Ipv4Addr),
    UnknownNeighbor(Ipv4Addr, Ipv4Addr),
    PacketAuthError(Ipv4Addr, AuthError),
    InterfaceCfgError(String, Ipv4Addr, PacketType, InterfaceCfgError),
    DbDescReject(Ipv4Addr, nsm::State),
    LsaUnknownType(LsaType),
    // SPF
    SpfRootNotFound(Ipv4Addr),
    // FSMs
    IsmUnexpectedEvent(ism::State, ism::Event),
    NsmUnexpectedEvent(Ipv4Addr, nsm::State, nsm::Event),
    // Configuration
    InvalidConfig(String),
}

// Authentication failures.
#[derive(Debug)]
pub enum AuthError {
    TypeMismatch,
    KeyMismatch,
    KeyIdMismatch(u8),
    DecreasingSeqno(u32),
}

// Interface parameter mismatches detected on received Hello packets.
#[derive(Debug)]
pub enum InterfaceCfgError {
    AreaIdMismatch(Ipv4Addr, Ipv4Addr),
    HelloMaskMismatch(Ipv4Addr, Ipv4Addr),
    HelloIntervalMismatch(u16, u16),
    DeadIntervalMismatch(u32, u32),
    ExternalRoutingCapabilityMismatch(bool),
    MtuMismatch(u16),
    DuplicateRouterId(Ipv4Addr),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::AreaIdNotFound(area_id) => {
                warn!(?area_id, "{}", self);
            }
            Error::InterfaceIdNotFound(iface_id) => {
                warn!(?iface_id, "{}", self);
            }
            Error::NeighborIdNotFound(nbr_id) => {
                warn!(?nbr_id, "{}", self);
            }
            Error::LsaEntryIdNotFound(lse_id) => {
                warn!(?lse_id, "{}", self);
            }
            Error::AreaNotFound(area_id) => {
                warn!(%area_id, "{}", self);
            }
            Error::UnknownInterface(ifindex) => {
                warn!(%ifindex, "{}", self);
            }
            Error::InvalidSrcAddr(addr) | Error::InvalidDstAddr(addr) => {
                warn!(address = %addr, "{}", self);
            }
            Error::UnknownNeighbor(source, router_id) => {
                warn!(%source, %router_id, "{}", self);
            }
            Error::PacketAuthError(source, error) => {
                warn!(%source, ?error, "{}", self);
            }
            Error::InterfaceCfgError(iface, source, pkt_type, error) => {
                warn_span!("interface", name = %iface, %source, ?pkt_type)
                    .in_scope(|| {
                        error.log();
                    })
            }
            Error::DbDescReject(router_id, state) => {
                warn_span!("neighbor", %router_id).in_scope(|| {
                    warn!(?state, "{}", self);
                })
            }
            Error::LsaUnknownType(lsa_type) => {
                warn!(%lsa_type, "{}", self);
            }
            Error::SpfRootNotFound(area_id) => {
                warn!(%area_id, "{}", self);
            }
            Error::IsmUnexpectedEvent(state, event) => {
                warn_span!("fsm").in_scope(|| {
                    warn!(?state, ?event, "{}", self);
                })
            }
            Error::NsmUnexpectedEvent(router_id, state, event) => {
                warn_span!("neighbor", %router_id).in_scope(|| {
                    warn_span!("fsm").in_scope(|| {
                        warn!(?state, ?event, "{}", self);
                    })
                })
            }
            Error::InvalidConfig(reason) => {
                warn!(%reason, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AreaIdNotFound(..) => {
                write!(f, "area ID not found")
            }
            Error::InterfaceIdNotFound(..) => {
                write!(f, "interface ID not found")
            }
            Error::NeighborIdNotFound(..) => {
                write!(f, "neighbor ID not found")
            }
            Error::LsaEntryIdNotFound(..) => {
                write!(f, "LSA entry ID not found")
            }
            Error::AreaNotFound(..) => {
                write!(f, "area not found")
            }
            Error::UnknownInterface(..) => {
                write!(f, "packet received on unknown interface")
            }
            Error::InvalidSrcAddr(..) => {
                write!(f, "invalid source address")
            }
            Error::InvalidDstAddr(..) => {
                write!(f, "invalid destination address")
            }
            Error::UnknownNeighbor(..) => {
                write!(f, "unknown neighbor")
            }
            Error::PacketAuthError(_, error) => {
                write!(f, "authentication failed: {}", error)
            }
            Error::InterfaceCfgError(_, _, _, error) => error.fmt(f),
            Error::DbDescReject(..) => {
                write!(f, "database description packet rejected")
            }
            Error::LsaUnknownType(..) => {
                write!(f, "discarding LSA due to unknown type")
            }
            Error::SpfRootNotFound(..) => {
                write!(f, "SPF root not found")
            }
            Error::IsmUnexpectedEvent(..) => {
                write!(f, "unexpected event")
            }
            Error::NsmUnexpectedEvent(..) => {
                write!(f, "unexpected event")
            }
            Error::InvalidConfig(..) => {
                write!(f, "invalid configuration")
            }
        }
    }
}

impl std::error::Error for Error {}

// ===== impl AuthError =====

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::TypeMismatch => {
                write!(f, "authentication type mismatch")
            }
            AuthError::KeyMismatch => {
                write!(f, "authentication key mismatch")
            }
            AuthError::KeyIdMismatch(..) => {
                write!(f, "unknown key ID")
            }
            AuthError::DecreasingSeqno(..) => {
                write!(f, "decreasing sequence number")
            }
        }
    }
}

// ===== impl InterfaceCfgError =====

impl InterfaceCfgError {
    pub(crate) fn log(&self) {
        match self {
            InterfaceCfgError::AreaIdMismatch(received, expected)
            | InterfaceCfgError::HelloMaskMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::HelloIntervalMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::DeadIntervalMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::ExternalRoutingCapabilityMismatch(e_bit) => {
                warn!(%e_bit, "{}", self);
            }
            InterfaceCfgError::MtuMismatch(mtu) => {
                warn!(%mtu, "{}", self);
            }
            InterfaceCfgError::DuplicateRouterId(router_id) => {
                warn!(%router_id, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for InterfaceCfgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceCfgError::AreaIdMismatch(..) => {
                write!(f, "area ID mismatch")
            }
            InterfaceCfgError::HelloMaskMismatch(..) => {
                write!(f, "network mask mismatch")
            }
            InterfaceCfgError::HelloIntervalMismatch(..) => {
                write!(f, "hello interval mismatch")
            }
            InterfaceCfgError::DeadIntervalMismatch(..) => {
                write!(f, "dead interval mismatch")
            }
            InterfaceCfgError::ExternalRoutingCapabilityMismatch(..) => {
                write!(f, "external routing capability mismatch")
            }
            InterfaceCfgError::MtuMismatch(..) => {
                write!(f, "MTU mismatch")
            }
            InterfaceCfgError::DuplicateRouterId(..) => {
                write!(f, "duplicate Router ID")
            }
        }
    }
}

impl std::error::Error for InterfaceCfgError {}
