//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::area::AreaType;
use crate::error::Error;
use crate::interface::InterfaceType;
use crate::lsdb::LSA_INFINITY;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceCfg {
    pub router_id: Ipv4Addr,
    pub rfc1583_compatibility: bool,
    // Initial Database Description sequence number. Each adjacency that
    // enters ExStart takes the next value.
    pub dd_seq_seed: u32,
    // Maximum number of equal-cost paths kept per destination.
    pub max_paths: u16,
    pub areas: Vec<AreaCfg>,
    pub virtual_links: Vec<VirtualLinkCfg>,
    pub external_routes: Vec<ExternalRouteCfg>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AreaCfg {
    pub area_id: Ipv4Addr,
    pub area_type: AreaType,
    // Cost of the default summary advertised into a stub area.
    pub stub_default_cost: u32,
    // Whether virtual links may be configured through this area.
    pub transit_capability: bool,
    pub ranges: Vec<RangeCfg>,
    pub host_routes: Vec<HostRouteCfg>,
    pub interfaces: Vec<InterfaceCfg>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RangeCfg {
    pub prefix: Ipv4Network,
    pub advertise: bool,
    pub cost: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostRouteCfg {
    pub addr: Ipv4Addr,
    pub cost: u16,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceCfg {
    pub name: String,
    pub ifindex: u32,
    pub if_type: InterfaceType,
    pub addr: Ipv4Network,
    pub passive: bool,
    pub mtu: u16,
    pub cost: u16,
    pub priority: u8,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub retransmit_interval: u16,
    pub transmit_delay: u16,
    pub ack_delay: u16,
    pub poll_interval: u16,
    pub auth: AuthCfg,
    pub static_nbrs: Vec<StaticNbrCfg>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum AuthCfg {
    #[default]
    Null,
    Simple {
        key: String,
    },
    Cryptographic {
        key_id: u8,
        key: String,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticNbrCfg {
    pub addr: Ipv4Addr,
    pub priority: u8,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VirtualLinkCfg {
    pub transit_area_id: Ipv4Addr,
    pub router_id: Ipv4Addr,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub retransmit_interval: u16,
    pub transmit_delay: u16,
    pub ack_delay: u16,
    pub auth: AuthCfg,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalRouteCfg {
    pub prefix: Ipv4Network,
    pub metric: u32,
    pub metric_type: ExternalMetricType,
    pub fwd_addr: Option<Ipv4Addr>,
    pub tag: u32,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExternalMetricType {
    Type1,
    #[default]
    Type2,
}

// ===== impl InstanceCfg =====

impl InstanceCfg {
    pub const DFLT_DD_SEQ_SEED: u32 = 0x1000;
    pub const DFLT_MAX_PATHS: u16 = 16;

    // Loads and validates a JSON configuration.
    pub fn from_json(data: &str) -> Result<InstanceCfg, Error> {
        let config: InstanceCfg = serde_json::from_str(data)
            .map_err(|error| Error::InvalidConfig(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.router_id.is_unspecified() {
            return Err(invalid("router-id must be set"));
        }
        if self.max_paths == 0 {
            return Err(invalid("max-paths must be at least one"));
        }

        let mut area_ids = BTreeSet::new();
        let mut ifindexes = BTreeSet::new();
        for area in &self.areas {
            if !area_ids.insert(area.area_id) {
                return Err(invalid(format!(
                    "duplicate area {}",
                    area.area_id
                )));
            }
            if area.area_id.is_unspecified()
                && area.area_type != AreaType::Normal
            {
                return Err(invalid("the backbone area can't be a stub area"));
            }
            for range in &area.ranges {
                if range.cost.is_some_and(|cost| cost > LSA_INFINITY) {
                    return Err(invalid(format!(
                        "range {} has an invalid cost",
                        range.prefix
                    )));
                }
            }
            for iface in &area.interfaces {
                if iface.if_type == InterfaceType::VirtualLink {
                    return Err(invalid(format!(
                        "interface {}: virtual links are configured \
                         separately",
                        iface.name
                    )));
                }
                if !ifindexes.insert(iface.ifindex) {
                    return Err(invalid(format!(
                        "interface {}: duplicate ifindex {}",
                        iface.name, iface.ifindex
                    )));
                }
                iface.validate()?;
            }
        }

        if !self.virtual_links.is_empty()
            && !area_ids.contains(&Ipv4Addr::UNSPECIFIED)
        {
            return Err(invalid("virtual links require the backbone area"));
        }
        for vlink in &self.virtual_links {
            let Some(transit) = self
                .areas
                .iter()
                .find(|area| area.area_id == vlink.transit_area_id)
            else {
                return Err(invalid(format!(
                    "virtual link to {}: unknown transit area {}",
                    vlink.router_id, vlink.transit_area_id
                )));
            };
            if transit.area_id.is_unspecified()
                || transit.area_type != AreaType::Normal
                || !transit.transit_capability
            {
                return Err(invalid(format!(
                    "virtual link to {}: area {} can't be used as transit",
                    vlink.router_id, vlink.transit_area_id
                )));
            }
            if vlink.hello_interval == 0 || vlink.dead_interval == 0 {
                return Err(invalid(format!(
                    "virtual link to {}: invalid timers",
                    vlink.router_id
                )));
            }
        }

        Ok(())
    }
}

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            router_id: Ipv4Addr::UNSPECIFIED,
            rfc1583_compatibility: false,
            dd_seq_seed: Self::DFLT_DD_SEQ_SEED,
            max_paths: Self::DFLT_MAX_PATHS,
            areas: vec![],
            virtual_links: vec![],
            external_routes: vec![],
        }
    }
}

// ===== impl AreaCfg =====

impl Default for AreaCfg {
    fn default() -> AreaCfg {
        AreaCfg {
            area_id: Ipv4Addr::UNSPECIFIED,
            area_type: AreaType::Normal,
            stub_default_cost: 1,
            transit_capability: true,
            ranges: vec![],
            host_routes: vec![],
            interfaces: vec![],
        }
    }
}

// ===== impl RangeCfg =====

impl Default for RangeCfg {
    fn default() -> RangeCfg {
        RangeCfg {
            prefix: Ipv4Network::from(Ipv4Addr::UNSPECIFIED),
            advertise: true,
            cost: None,
        }
    }
}

// ===== impl HostRouteCfg =====

impl Default for HostRouteCfg {
    fn default() -> HostRouteCfg {
        HostRouteCfg {
            addr: Ipv4Addr::UNSPECIFIED,
            cost: 0,
        }
    }
}

// ===== impl InterfaceCfg =====

impl InterfaceCfg {
    // Minimum datagram size every IPv4 host must accept.
    pub const MIN_MTU: u16 = 576;

    fn validate(&self) -> Result<(), Error> {
        if self.hello_interval == 0 {
            return Err(invalid(format!(
                "interface {}: hello-interval can't be zero",
                self.name
            )));
        }
        if self.dead_interval <= self.hello_interval as u32 {
            return Err(invalid(format!(
                "interface {}: dead-interval must exceed hello-interval",
                self.name
            )));
        }
        if self.mtu < InterfaceCfg::MIN_MTU {
            return Err(invalid(format!(
                "interface {}: mtu must be at least {}",
                self.name,
                InterfaceCfg::MIN_MTU
            )));
        }
        if self.retransmit_interval == 0 {
            return Err(invalid(format!(
                "interface {}: retransmit-interval can't be zero",
                self.name
            )));
        }
        if self.addr.ip().is_unspecified() {
            return Err(invalid(format!(
                "interface {}: missing IPv4 address",
                self.name
            )));
        }
        if !self.static_nbrs.is_empty()
            && !matches!(
                self.if_type,
                InterfaceType::NonBroadcast | InterfaceType::PointToMultipoint
            )
        {
            return Err(invalid(format!(
                "interface {}: static neighbors require an NBMA or \
                 point-to-multipoint interface",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for InterfaceCfg {
    fn default() -> InterfaceCfg {
        InterfaceCfg {
            name: String::new(),
            ifindex: 0,
            if_type: InterfaceType::Broadcast,
            addr: Ipv4Network::from(Ipv4Addr::UNSPECIFIED),
            passive: false,
            mtu: 1500,
            cost: 10,
            priority: 1,
            hello_interval: 10,
            dead_interval: 40,
            retransmit_interval: 5,
            transmit_delay: 1,
            ack_delay: 1,
            poll_interval: 120,
            auth: AuthCfg::Null,
            static_nbrs: vec![],
        }
    }
}

// ===== impl StaticNbrCfg =====

impl Default for StaticNbrCfg {
    fn default() -> StaticNbrCfg {
        StaticNbrCfg {
            addr: Ipv4Addr::UNSPECIFIED,
            priority: 1,
        }
    }
}

// ===== impl VirtualLinkCfg =====

impl VirtualLinkCfg {
    // Builds the interface configuration used by the virtual link once it's
    // up.
    pub(crate) fn iface_cfg(&self) -> InterfaceCfg {
        InterfaceCfg {
            name: format!("vlink-{}-{}", self.transit_area_id, self.router_id),
            if_type: InterfaceType::VirtualLink,
            addr: Ipv4Network::from(Ipv4Addr::UNSPECIFIED),
            cost: 0,
            priority: 0,
            hello_interval: self.hello_interval,
            dead_interval: self.dead_interval,
            retransmit_interval: self.retransmit_interval,
            transmit_delay: self.transmit_delay,
            ack_delay: self.ack_delay,
            auth: self.auth.clone(),
            ..Default::default()
        }
    }
}

impl Default for VirtualLinkCfg {
    fn default() -> VirtualLinkCfg {
        VirtualLinkCfg {
            transit_area_id: Ipv4Addr::UNSPECIFIED,
            router_id: Ipv4Addr::UNSPECIFIED,
            hello_interval: 10,
            dead_interval: 60,
            retransmit_interval: 5,
            transmit_delay: 1,
            ack_delay: 1,
            auth: AuthCfg::Null,
        }
    }
}

// ===== impl ExternalRouteCfg =====

impl Default for ExternalRouteCfg {
    fn default() -> ExternalRouteCfg {
        ExternalRouteCfg {
            prefix: Ipv4Network::from(Ipv4Addr::UNSPECIFIED),
            metric: 20,
            metric_type: ExternalMetricType::Type2,
            fwd_addr: None,
            tag: 0,
        }
    }
}

// ===== helper functions =====

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidConfig(msg.into())
}
