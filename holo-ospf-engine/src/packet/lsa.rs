//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use derive_new::new;
use enum_as_inner::EnumAsInner;
use ipnetwork::Ipv4Network;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::lsdb::{LSA_MAX_AGE, LSA_MAX_SEQ_NO};
use crate::packet::Options;

// LSA (decoded form).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Lsa {
    pub hdr: LsaHdr,
    pub body: LsaBody,
}

// LSA key. Identifies an LSA instance within the scope of its flooding
// domain, and is also used as the LSDB key.
//
// The field order defines the LSDB iteration order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaKey {
    pub lsa_type: LsaType,
    pub adv_rtr: Ipv4Addr,
    pub lsa_id: Ipv4Addr,
}

// LSA type.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsaType(pub u8);

// LSA type code.
#[derive(Clone, Copy, Debug, Eq, Ord, FromPrimitive, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaTypeCode {
    Router = 1,
    Network = 2,
    SummaryNetwork = 3,
    SummaryRouter = 4,
    AsExternal = 5,
}

// LSA flooding scope.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaScope {
    Area,
    As,
    Unknown,
}

// LSA header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaHdr {
    pub age: u16,
    pub options: Options,
    pub lsa_type: LsaType,
    pub lsa_id: Ipv4Addr,
    pub adv_rtr: Ipv4Addr,
    pub seq_no: u32,
    pub cksum: u16,
    pub length: u16,
}

// LSA body.
#[derive(Clone, Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaBody {
    Router(LsaRouter),
    Network(LsaNetwork),
    SummaryNetwork(LsaSummary),
    SummaryRouter(LsaSummary),
    AsExternal(LsaAsExternal),
    Unknown(LsaUnknown),
}

// Router-LSA.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouter {
    pub flags: LsaRouterFlags,
    pub links: Vec<LsaRouterLink>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaRouterFlags: u8 {
        const B = 0x01;
        const E = 0x02;
        const V = 0x04;
    }
}

#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaRouterLinkType {
    PointToPoint = 0x01,
    TransitNetwork = 0x02,
    StubNetwork = 0x03,
    VirtualLink = 0x04,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouterLink {
    pub link_type: LsaRouterLinkType,
    pub link_id: Ipv4Addr,
    pub link_data: Ipv4Addr,
    pub metric: u16,
}

// Network-LSA.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaNetwork {
    pub mask: Ipv4Addr,
    pub attached_rtrs: BTreeSet<Ipv4Addr>,
}

// Summary-LSA (both type 3 and type 4).
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaSummary {
    pub mask: Ipv4Addr,
    pub metric: u32,
}

// AS-external-LSA.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaAsExternal {
    pub mask: Ipv4Addr,
    pub flags: LsaAsExternalFlags,
    pub metric: u32,
    pub fwd_addr: Option<Ipv4Addr>,
    pub tag: u32,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaAsExternalFlags: u8 {
        const E = 0x80;
    }
}

// LSA of a type this router doesn't support.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaUnknown {}

// ===== impl Lsa =====

impl Lsa {
    // Builds a locally originated LSA. The length field is derived from the
    // body and the checksum is left unset.
    pub fn new(
        age: u16,
        options: Options,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
        body: LsaBody,
    ) -> Lsa {
        let hdr = LsaHdr {
            age,
            options,
            lsa_type: body.lsa_type(),
            lsa_id,
            adv_rtr,
            seq_no,
            cksum: 0,
            length: LsaHdr::LENGTH.saturating_add(body.length()),
        };
        Lsa { hdr, body }
    }

    pub fn key(&self) -> LsaKey {
        self.hdr.key()
    }

    pub(crate) fn set_maxage(&mut self) {
        self.hdr.age = LSA_MAX_AGE;
    }
}

// ===== impl LsaKey =====

impl std::fmt::Display for LsaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "type {} adv-rtr {} lsa-id {}",
            self.lsa_type, self.adv_rtr, self.lsa_id
        )
    }
}

// ===== impl LsaType =====

impl LsaType {
    pub fn type_code(&self) -> Option<LsaTypeCode> {
        LsaTypeCode::from_u8(self.0)
    }

    pub fn scope(&self) -> LsaScope {
        match self.type_code() {
            Some(
                LsaTypeCode::Router
                | LsaTypeCode::Network
                | LsaTypeCode::SummaryNetwork
                | LsaTypeCode::SummaryRouter,
            ) => LsaScope::Area,
            Some(LsaTypeCode::AsExternal) => LsaScope::As,
            None => LsaScope::Unknown,
        }
    }

    // Position of this type in the processing order used for the LSAs of a
    // single Link State Update packet. Summary types share adjacent slots.
    pub(crate) fn processing_order(&self) -> u8 {
        match self.type_code() {
            Some(LsaTypeCode::Router) => 0,
            Some(LsaTypeCode::Network) => 1,
            Some(LsaTypeCode::SummaryNetwork) => 2,
            Some(LsaTypeCode::SummaryRouter) => 3,
            Some(LsaTypeCode::AsExternal) => 4,
            None => u8::MAX,
        }
    }
}

impl std::fmt::Display for LsaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<LsaTypeCode> for LsaType {
    fn from(code: LsaTypeCode) -> LsaType {
        LsaType(code as u8)
    }
}

// ===== impl LsaHdr =====

impl LsaHdr {
    pub const LENGTH: u16 = 20;

    pub fn key(&self) -> LsaKey {
        LsaKey::new(self.lsa_type, self.adv_rtr, self.lsa_id)
    }

    pub fn is_maxage(&self) -> bool {
        self.age == LSA_MAX_AGE
    }

    pub fn is_max_seq_no(&self) -> bool {
        self.seq_no == LSA_MAX_SEQ_NO
    }
}

// ===== impl LsaBody =====

impl LsaBody {
    pub fn lsa_type(&self) -> LsaType {
        match self {
            LsaBody::Router(_) => LsaTypeCode::Router.into(),
            LsaBody::Network(_) => LsaTypeCode::Network.into(),
            LsaBody::SummaryNetwork(_) => LsaTypeCode::SummaryNetwork.into(),
            LsaBody::SummaryRouter(_) => LsaTypeCode::SummaryRouter.into(),
            LsaBody::AsExternal(_) => LsaTypeCode::AsExternal.into(),
            LsaBody::Unknown(_) => LsaType(0),
        }
    }

    pub(crate) fn length(&self) -> u16 {
        match self {
            LsaBody::Router(lsa) => lsa.length(),
            LsaBody::Network(lsa) => lsa.length(),
            LsaBody::SummaryNetwork(_) | LsaBody::SummaryRouter(_) => {
                LsaSummary::BASE_LENGTH
            }
            LsaBody::AsExternal(_) => LsaAsExternal::BASE_LENGTH,
            LsaBody::Unknown(_) => 0,
        }
    }
}

// ===== impl LsaRouter =====

impl LsaRouter {
    pub const BASE_LENGTH: u16 = 4;
    pub const LINK_LENGTH: u16 = 12;

    fn length(&self) -> u16 {
        body_length(Self::BASE_LENGTH, self.links.len(), Self::LINK_LENGTH)
    }
}

// ===== impl LsaNetwork =====

impl LsaNetwork {
    pub const BASE_LENGTH: u16 = 4;

    fn length(&self) -> u16 {
        body_length(Self::BASE_LENGTH, self.attached_rtrs.len(), 4)
    }
}

// ===== impl LsaSummary =====

impl LsaSummary {
    pub const BASE_LENGTH: u16 = 8;
}

// ===== impl LsaAsExternal =====

impl LsaAsExternal {
    pub const BASE_LENGTH: u16 = 16;
}

// ===== global functions =====

// Builds the network prefix described by an LSA ID and a network mask.
pub(crate) fn lsa_prefix(
    lsa_id: Ipv4Addr,
    mask: Ipv4Addr,
) -> Option<Ipv4Network> {
    let plen = ipnetwork::ipv4_mask_to_prefix(mask).ok()?;
    let addr = u32::from(lsa_id) & u32::from(mask);
    Ipv4Network::new(addr.into(), plen).ok()
}

// ===== helper functions =====

// Length of a body made of a fixed part followed by a list of entries,
// saturated at the largest length an LSA header can encode.
fn body_length(base: u16, count: usize, entry_length: u16) -> u16 {
    let length = usize::from(entry_length)
        .saturating_mul(count)
        .saturating_add(usize::from(base));
    u16::try_from(length).unwrap_or(u16::MAX)
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    // Test description:
    // LSA lengths saturate instead of wrapping around.
    #[test]
    fn body_length_saturates() {
        assert_eq!(body_length(4, 3000, 12), 36004);
        assert_eq!(body_length(4, 6000, 12), u16::MAX);
        assert_eq!(body_length(4, usize::MAX, 12), u16::MAX);
    }
}
