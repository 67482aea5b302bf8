//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use const_addrs::ip4;
use holo_ospf_engine::config::{AreaCfg, ExternalRouteCfg, RangeCfg};
use holo_ospf_engine::lsdb::{LSA_INIT_SEQ_NO, LSA_MAX_AGE};
use holo_ospf_engine::packet::Options;
use holo_ospf_engine::packet::lsa::{
    Lsa, LsaAsExternal, LsaAsExternalFlags, LsaBody, LsaRouterFlags,
    LsaTypeCode,
};
use holo_ospf_engine::route::PathType;
use holo_ospf_engine::{InstanceCfg, RouteChange};
use ipnetwork::Ipv4Network;

use crate::stub::{
    BACKBONE, RT_ID, RT1, RT3, TestRouter, config, iface_config, ls_update,
    router_lsa,
};

const AREA1: Ipv4Addr = ip4!("0.0.0.1");

fn prefix(prefix: &str) -> Ipv4Network {
    prefix.parse().unwrap()
}

// Router 2.2.2.2 as an ABR: "eth0" in the backbone and "eth1" in area
// 0.0.0.1.
fn abr_config(ranges: Vec<RangeCfg>) -> InstanceCfg {
    InstanceCfg {
        router_id: RT_ID,
        areas: vec![
            AreaCfg {
                area_id: BACKBONE,
                interfaces: vec![iface_config(&RT1, "10.0.1.2/24")],
                ..Default::default()
            },
            AreaCfg {
                area_id: AREA1,
                ranges,
                interfaces: vec![iface_config(&RT3, "10.0.2.2/24")],
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

fn net_summary(
    router: &TestRouter,
    lsa_id: Ipv4Addr,
    area_id: Ipv4Addr,
) -> Option<&Lsa> {
    router
        .instance
        .find_lsa(LsaTypeCode::SummaryNetwork.into(), lsa_id, RT_ID, area_id)
        .filter(|lsa| !lsa.hdr.is_maxage())
}

// Test description:
// Networks of the operational interfaces are installed as intra-area
// routes as soon as the router starts.
#[test]
fn connected_routes() {
    let router = TestRouter::started();

    for network in ["10.0.1.0/24", "10.0.2.0/24"] {
        let route = router.instance.route(&prefix(network)).unwrap();
        assert_eq!(route.path_type, PathType::IntraArea);
        assert_eq!(route.area_id, Some(BACKBONE));
        assert_eq!(route.metric, 10);
    }
}

// Test description:
// A stub network advertised by a fully adjacent neighbor becomes reachable
// through it, and unreachable again once the neighbor flushes its
// Router-LSA.
#[test]
fn intra_area_route() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);
    router.advance(6);

    let stub = (ip4!("192.168.1.0"), ip4!("255.255.255.0"), 1);
    let lsa = router_lsa(&RT1, 1, LSA_INIT_SEQ_NO, &[stub]);
    router.receive(&RT1, ls_update(&RT1, vec![lsa.clone()]));

    let route = router.instance.route(&prefix("192.168.1.0/24")).unwrap();
    assert_eq!(route.path_type, PathType::IntraArea);
    assert_eq!(route.metric, 11);
    assert!(
        route
            .nexthops
            .values()
            .all(|nexthop| nexthop.addr == Some(RT1.addr)
                && nexthop.ifindex == RT1.ifindex)
    );
    assert!(!route.nexthops.is_empty());

    let (best, _) = router.instance.lookup(ip4!("192.168.1.77")).unwrap();
    assert_eq!(*best, prefix("192.168.1.0/24"));
    assert!(router.instance.lookup(ip4!("172.16.0.1")).is_none());

    // Nothing changed since the last calculation.
    assert!(router.instance.rebuild_routing_table().is_empty());

    router.advance(1);
    let mut flushed = lsa;
    flushed.hdr.age = LSA_MAX_AGE;
    router.receive(&RT1, ls_update(&RT1, vec![flushed]));
    assert!(router.instance.route(&prefix("192.168.1.0/24")).is_none());
}

// Test description:
// AS-external-LSAs originated by a reachable ASBR produce external routes
// that inherit the nexthops of the ASBR.
#[test]
fn external_route() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);
    router.advance(6);

    let mut asbr_lsa = router_lsa(&RT1, 1, LSA_INIT_SEQ_NO, &[]);
    if let LsaBody::Router(body) = &mut asbr_lsa.body {
        body.flags = LsaRouterFlags::E;
    }
    let ext_lsa = Lsa::new(
        1,
        Options::E,
        ip4!("172.16.0.0"),
        RT1.router_id,
        LSA_INIT_SEQ_NO,
        LsaBody::AsExternal(LsaAsExternal {
            mask: ip4!("255.255.0.0"),
            flags: LsaAsExternalFlags::E,
            metric: 20,
            fwd_addr: None,
            tag: 100,
        }),
    );
    router.receive(&RT1, ls_update(&RT1, vec![ext_lsa, asbr_lsa]));

    let route = router.instance.route(&prefix("172.16.0.0/16")).unwrap();
    assert_eq!(route.path_type, PathType::Type2External);
    assert_eq!(route.metric, 10);
    assert_eq!(route.type2_metric, Some(20));
    assert_eq!(route.metric(), 20);
    assert_eq!(route.tag, Some(100));
    assert!(
        route
            .nexthops
            .values()
            .any(|nexthop| nexthop.addr == Some(RT1.addr))
    );
}

// Test description:
// Locally configured external routes are advertised in AS-external-LSAs
// and the router announces itself as an ASBR.
#[test]
fn local_external_route() {
    let mut router = TestRouter::started();
    router.advance(6);

    router.instance.update_external_route(ExternalRouteCfg {
        prefix: prefix("172.16.0.0/16"),
        metric: 50,
        ..Default::default()
    });
    let lsa = router
        .instance
        .find_lsa(
            LsaTypeCode::AsExternal.into(),
            ip4!("172.16.0.0"),
            RT_ID,
            BACKBONE,
        )
        .unwrap();
    let body = lsa.body.as_as_external().unwrap();
    assert_eq!(body.metric, 50);
    assert!(body.flags.contains(LsaAsExternalFlags::E));

    // Let any pending Router-LSA update go out.
    router.advance(5);
    let lsa = router
        .instance
        .find_lsa(LsaTypeCode::Router.into(), RT_ID, RT_ID, BACKBONE)
        .unwrap();
    let body = lsa.body.as_router().unwrap();
    assert!(body.flags.contains(LsaRouterFlags::E));

    // Withdraw the route.
    router.instance.remove_external_route(prefix("172.16.0.0/16"));
    router.advance(1);
    let lsa = router.instance.find_lsa(
        LsaTypeCode::AsExternal.into(),
        ip4!("172.16.0.0"),
        RT_ID,
        BACKBONE,
    );
    assert!(lsa.is_none_or(|lsa| lsa.hdr.is_maxage()));
}

// Test description:
// An area border router advertises the networks of each attached area into
// the other areas.
#[test]
fn abr_summaries() {
    let mut router = TestRouter::new(abr_config(vec![]));
    router.instance.start();

    assert!(net_summary(&router, ip4!("10.0.2.0"), BACKBONE).is_some());
    assert!(net_summary(&router, ip4!("10.0.1.0"), AREA1).is_some());
    assert!(net_summary(&router, ip4!("10.0.1.0"), BACKBONE).is_none());

    router.advance(6);
    let lsa = router
        .instance
        .find_lsa(LsaTypeCode::Router.into(), RT_ID, RT_ID, AREA1)
        .unwrap();
    let body = lsa.body.as_router().unwrap();
    assert!(body.flags.contains(LsaRouterFlags::B));
}

// Test description:
// Networks covered by an area range are advertised through a single
// summary, or not at all when the range isn't advertised.
#[test]
fn abr_area_ranges() {
    let range = RangeCfg {
        prefix: prefix("10.0.0.0/16"),
        ..Default::default()
    };
    let mut router = TestRouter::new(abr_config(vec![range.clone()]));
    router.instance.start();

    let lsa = net_summary(&router, ip4!("10.0.0.0"), BACKBONE).unwrap();
    let body = lsa.body.as_summary_network().unwrap();
    assert_eq!(body.mask, ip4!("255.255.0.0"));
    assert_eq!(body.metric, 10);
    assert!(net_summary(&router, ip4!("10.0.2.0"), BACKBONE).is_none());

    let range = RangeCfg {
        advertise: false,
        ..range
    };
    let mut router = TestRouter::new(abr_config(vec![range]));
    router.instance.start();
    assert!(net_summary(&router, ip4!("10.0.0.0"), BACKBONE).is_none());
    assert!(net_summary(&router, ip4!("10.0.2.0"), BACKBONE).is_none());
}

// Test description:
// Routing table changes are reported relative to the previous calculation.
#[test]
fn route_changes() {
    let mut router = TestRouter::new(config());
    let changes = router.instance.rebuild_routing_table();
    assert!(changes.is_empty());

    router.instance.start();
    assert!(router.instance.routing_table().len() >= 2);
    assert!(router.instance.rebuild_routing_table().is_empty());

    router.instance.interface_down(RT3.ifname).unwrap();
    router.advance(6);
    assert!(router.instance.route(&prefix("10.0.2.0/24")).is_none());

    router.instance.interface_up(RT3.ifname).unwrap();
    router.advance(6);
    assert!(router.instance.route(&prefix("10.0.2.0/24")).is_some());
    assert!(matches!(
        router.instance.rebuild_routing_table().as_slice(),
        [] | [RouteChange::Update(..)]
    ));
}
