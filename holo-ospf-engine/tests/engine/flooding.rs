//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use const_addrs::ip4;
use holo_ospf_engine::area::AreaType;
use holo_ospf_engine::config::{AreaCfg, ExternalRouteCfg, InterfaceCfg};
use holo_ospf_engine::lsdb::{LSA_INIT_SEQ_NO, LSA_MAX_AGE, LSA_MAX_SEQ_NO};
use holo_ospf_engine::neighbor::nsm;
use holo_ospf_engine::packet::lsa::{
    Lsa, LsaAsExternal, LsaAsExternalFlags, LsaBody, LsaRouter,
    LsaRouterFlags, LsaSummary, LsaTypeCode,
};
use holo_ospf_engine::packet::{DbDescFlags, Options, Packet};
use holo_ospf_engine::InstanceCfg;
use maplit::btreeset;

use crate::stub::{
    BACKBONE, Peer, RT_ID, RT1, RT3, SentPacket, TestRouter, acked, config,
    dbdesc, flooded, hello, iface_config, ls_ack, ls_update, router_lsa,
};

const RT4: Peer = Peer {
    router_id: ip4!("4.4.4.4"),
    ..RT1
};

fn find_lsa<'a>(
    router: &'a TestRouter,
    lsa_type: LsaTypeCode,
    lsa_id: Ipv4Addr,
    adv_rtr: Ipv4Addr,
) -> Option<&'a Lsa> {
    router
        .instance
        .find_lsa(lsa_type.into(), lsa_id, adv_rtr, BACKBONE)
}

fn rt1_router_lsa(router: &TestRouter) -> Option<&Lsa> {
    find_lsa(router, LsaTypeCode::Router, RT1.router_id, RT1.router_id)
}

// Router 2.2.2.2 with both interfaces using the given MTU.
fn mtu_config(mtu: u16) -> InstanceCfg {
    let mut config = config();
    for iface in &mut config.areas[0].interfaces {
        iface.mtu = mtu;
    }
    config
}

// Sequence numbers of the instances of the given LSA sent in LS Updates out
// the given interface.
fn sent_seq_nos(sent: &[SentPacket], ifindex: u32, lsa: &Lsa) -> Vec<u32> {
    sent.iter()
        .filter(|sent| sent.ifindex == ifindex)
        .filter_map(|sent| sent.packet.as_ls_update())
        .flat_map(|upd| upd.lsas.iter())
        .filter(|upd_lsa| upd_lsa.key() == lsa.key())
        .map(|upd_lsa| upd_lsa.hdr.seq_no)
        .collect()
}

fn as_external_lsa(adv_rtr: Ipv4Addr, lsa_id: Ipv4Addr) -> Lsa {
    Lsa::new(
        1,
        Options::E,
        lsa_id,
        adv_rtr,
        LSA_INIT_SEQ_NO,
        LsaBody::AsExternal(LsaAsExternal {
            mask: ip4!("255.255.255.0"),
            flags: LsaAsExternalFlags::E,
            metric: 20,
            fwd_addr: None,
            tag: 0,
        }),
    )
}

// Rewrites a packet built for the backbone so that it belongs to the given
// stub area.
fn to_stub_area(mut packet: Packet, area_id: Ipv4Addr) -> Packet {
    match &mut packet {
        Packet::Hello(pkt) => {
            pkt.hdr.area_id = area_id;
            pkt.options.remove(Options::E);
        }
        Packet::DbDesc(pkt) => {
            pkt.hdr.area_id = area_id;
            pkt.options.remove(Options::E);
        }
        Packet::LsRequest(pkt) => pkt.hdr.area_id = area_id,
        Packet::LsUpdate(pkt) => pkt.hdr.area_id = area_id,
        Packet::LsAck(pkt) => pkt.hdr.area_id = area_id,
    }
    packet
}

// Test description:
// A newer Router-LSA received from a neighbor is installed, flooded out the
// other interfaces and acknowledged through a delayed acknowledgment. The
// old instance doesn't linger in any retransmission list.
#[test]
fn newer_lsa() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);
    router.bring_up(&RT3);
    router.advance(6);

    let old = router_lsa(&RT1, 10, LSA_INIT_SEQ_NO + 2, &[]);
    assert!(router.instance.install_lsa(old, BACKBONE).unwrap());
    router.take_sent();

    let new = router_lsa(&RT1, 10, LSA_INIT_SEQ_NO + 4, &[]);
    router.receive(&RT1, ls_update(&RT1, vec![new.clone()]));

    let lsa = rt1_router_lsa(&router).unwrap();
    assert_eq!(lsa.hdr.seq_no, LSA_INIT_SEQ_NO + 4);

    // Flooded to RT3, but not back to RT1.
    let sent = router.take_sent();
    assert!(flooded(&sent, RT3.ifindex, &new));
    assert!(!flooded(&sent, RT1.ifindex, &new));
    let rt1 = router.instance.neighbor(RT1.ifname, RT1.router_id).unwrap();
    assert!(!rt1.lists.ls_rxmt.contains_key(&new.key()));
    let rt3 = router.instance.neighbor(RT3.ifname, RT3.router_id).unwrap();
    assert_eq!(
        rt3.lists.ls_rxmt.get(&new.key()).map(|hdr| hdr.seq_no),
        Some(LSA_INIT_SEQ_NO + 4)
    );

    // Delayed acknowledgment.
    let iface = router.instance.interface(RT1.ifname).unwrap();
    assert!(iface.state.ls_ack_list.contains_key(&new.key()));
    assert!(!acked(&sent, &new));
    router.advance(1);
    assert!(acked(&router.take_sent(), &new));
    let iface = router.instance.interface(RT1.ifname).unwrap();
    assert!(iface.state.ls_ack_list.is_empty());

    // RT3 acknowledges the flooded LSA.
    router.receive(&RT3, ls_ack(&RT3, vec![&new]));
    let rt3 = router.instance.neighbor(RT3.ifname, RT3.router_id).unwrap();
    assert!(!rt3.lists.ls_rxmt.contains_key(&new.key()));
}

// Test description:
// A MaxAge LSA with no database copy is acknowledged right away and
// discarded.
#[test]
fn maxage_lsa_without_instance() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);
    router.take_sent();

    let lsa = router_lsa(&RT4, LSA_MAX_AGE, LSA_INIT_SEQ_NO, &[]);
    router.receive(&RT1, ls_update(&RT1, vec![lsa.clone()]));

    let sent = router.take_sent();
    assert!(acked(&sent, &lsa));
    assert!(sent.iter().all(|sent| sent.packet.as_ls_update().is_none()));
    assert!(
        find_lsa(&router, LsaTypeCode::Router, RT4.router_id, RT4.router_id)
            .is_none()
    );
    let iface = router.instance.interface(RT1.ifname).unwrap();
    assert!(iface.state.ls_ack_list.is_empty());
}

// Test description:
// An LSA that is on the neighbor's request list but isn't newer than the
// database copy resets the adjacency. The rest of the packet is ignored.
#[test]
fn bad_ls_request() {
    let mut router = TestRouter::started();

    let old = router_lsa(&RT1, 10, LSA_INIT_SEQ_NO + 2, &[]);
    router.instance.install_lsa(old, BACKBONE).unwrap();

    // Start the database exchange, advertising a newer Router-LSA.
    router.receive(&RT1, hello(&RT1, btreeset![RT_ID]));
    let new = router_lsa(&RT1, 10, LSA_INIT_SEQ_NO + 4, &[]);
    let seq_no = router.dd_seq_no(&RT1);
    router.receive(
        &RT1,
        dbdesc(&RT1, DbDescFlags::empty(), seq_no, vec![&new]),
    );
    assert_eq!(router.nbr_state(&RT1), Some(nsm::State::Exchange));
    let nbr = router.instance.neighbor(RT1.ifname, RT1.router_id).unwrap();
    assert!(
        nbr.lists.ls_request.contains_key(&new.key())
            || nbr.lists.ls_request_pending.contains_key(&new.key())
    );

    // Reply with the old instance instead.
    let summary = Lsa::new(
        1,
        Options::E,
        ip4!("172.16.0.0"),
        RT1.router_id,
        LSA_INIT_SEQ_NO,
        LsaBody::SummaryNetwork(LsaSummary {
            mask: ip4!("255.255.0.0"),
            metric: 10,
        }),
    );
    let db_copy = rt1_router_lsa(&router).cloned().unwrap();
    router.receive(&RT1, ls_update(&RT1, vec![summary, db_copy]));

    assert_eq!(router.nbr_state(&RT1), Some(nsm::State::ExStart));
    let nbr = router.instance.neighbor(RT1.ifname, RT1.router_id).unwrap();
    assert!(nbr.lists.ls_request.is_empty());
    assert!(nbr.lists.ls_request_pending.is_empty());
    assert!(
        find_lsa(
            &router,
            LsaTypeCode::SummaryNetwork,
            ip4!("172.16.0.0"),
            RT1.router_id,
        )
        .is_none()
    );
}

// Test description:
// A neighbor sending back the instance we're retransmitting to it acts as
// an implied acknowledgment. No explicit acknowledgment is needed.
#[test]
fn duplicate_implied_ack() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);
    router.advance(6);

    router.instance.update_external_route(ExternalRouteCfg {
        prefix: "172.16.0.0/16".parse().unwrap(),
        ..Default::default()
    });
    let lsa = find_lsa(
        &router,
        LsaTypeCode::AsExternal,
        ip4!("172.16.0.0"),
        RT_ID,
    )
    .cloned()
    .unwrap();
    let nbr = router.instance.neighbor(RT1.ifname, RT1.router_id).unwrap();
    assert!(nbr.lists.ls_rxmt.contains_key(&lsa.key()));
    assert!(nbr.rxmt_lsupd_is_active());
    router.take_sent();

    router.receive(&RT1, ls_update(&RT1, vec![lsa.clone()]));

    let nbr = router.instance.neighbor(RT1.ifname, RT1.router_id).unwrap();
    assert!(!nbr.lists.ls_rxmt.contains_key(&lsa.key()));
    let iface = router.instance.interface(RT1.ifname).unwrap();
    assert!(!iface.state.ls_ack_list.contains_key(&lsa.key()));
    assert!(!acked(&router.take_sent(), &lsa));
}

// Test description:
// A duplicate that wasn't being retransmitted is acknowledged directly.
#[test]
fn duplicate_direct_ack() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);

    let lsa = router_lsa(&RT1, 10, LSA_INIT_SEQ_NO, &[]);
    router.receive(&RT1, ls_update(&RT1, vec![lsa]));
    router.advance(1);
    router.take_sent();

    let db_copy = rt1_router_lsa(&router).cloned().unwrap();
    router.receive(&RT1, ls_update(&RT1, vec![db_copy.clone()]));

    assert!(acked(&router.take_sent(), &db_copy));
    let lsa = rt1_router_lsa(&router).unwrap();
    assert_eq!(lsa.hdr.seq_no, LSA_INIT_SEQ_NO);
}

// Test description:
// Newer instances arriving less than MinLSArrival seconds after the
// previous one are discarded.
#[test]
fn min_ls_arrival() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);

    let seq_no =
        |router: &TestRouter| rt1_router_lsa(router).map(|lsa| lsa.hdr.seq_no);

    let lsa = router_lsa(&RT1, 1, LSA_INIT_SEQ_NO + 4, &[]);
    router.receive(&RT1, ls_update(&RT1, vec![lsa]));
    assert_eq!(seq_no(&router), Some(LSA_INIT_SEQ_NO + 4));

    let lsa = router_lsa(&RT1, 1, LSA_INIT_SEQ_NO + 5, &[]);
    router.receive(&RT1, ls_update(&RT1, vec![lsa]));
    assert_eq!(seq_no(&router), Some(LSA_INIT_SEQ_NO + 4));

    router.advance(1);
    let lsa = router_lsa(&RT1, 1, LSA_INIT_SEQ_NO + 6, &[]);
    router.receive(&RT1, ls_update(&RT1, vec![lsa]));
    assert_eq!(seq_no(&router), Some(LSA_INIT_SEQ_NO + 6));
}

// Test description:
// A self-originated LSA received with the maximum sequence number is
// flushed instead of wrapping. A new instance starting from
// InitialSequenceNumber is originated once the flush is acknowledged.
#[test]
fn seq_no_wraparound() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);
    router.advance(6);

    let body = LsaBody::Router(LsaRouter {
        flags: LsaRouterFlags::empty(),
        links: vec![],
    });
    let lsa = Lsa::new(1, Options::E, RT_ID, RT_ID, LSA_MAX_SEQ_NO, body);
    router.receive(&RT1, ls_update(&RT1, vec![lsa]));

    let db_copy = find_lsa(&router, LsaTypeCode::Router, RT_ID, RT_ID)
        .cloned()
        .unwrap();
    assert_eq!(db_copy.hdr.seq_no, LSA_MAX_SEQ_NO);
    assert_eq!(db_copy.hdr.age, LSA_MAX_AGE);
    let nbr = router.instance.neighbor(RT1.ifname, RT1.router_id).unwrap();
    assert!(nbr.lists.ls_rxmt.contains_key(&db_copy.key()));

    router.receive(&RT1, ls_ack(&RT1, vec![&db_copy]));
    router.advance(1);

    let lsa = find_lsa(&router, LsaTypeCode::Router, RT_ID, RT_ID).unwrap();
    assert_eq!(lsa.hdr.seq_no, LSA_INIT_SEQ_NO);
    assert!(!lsa.hdr.is_maxage());
}

// Test description:
// LSAs of unknown types are skipped without affecting the remaining LSAs of
// the packet.
#[test]
fn unknown_lsa_type() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);

    let mut unknown = router_lsa(&RT1, 1, LSA_INIT_SEQ_NO, &[]);
    unknown.hdr.lsa_type.0 = 11;
    let known = router_lsa(&RT1, 1, LSA_INIT_SEQ_NO, &[]);
    router.receive(&RT1, ls_update(&RT1, vec![unknown, known]));

    assert!(rt1_router_lsa(&router).is_some());
}

// Test description:
// LSAs age one second per tick, and re-delivering an already installed
// instance changes nothing.
#[test]
fn aging_and_idempotence() {
    let mut router = TestRouter::started();

    let lsa = router_lsa(&RT1, 10, LSA_INIT_SEQ_NO, &[]);
    assert!(router.instance.install_lsa(lsa, BACKBONE).unwrap());
    router.instance.age_database();
    let db_copy = rt1_router_lsa(&router).unwrap();
    assert_eq!(db_copy.hdr.age, 11);

    // Same contents, newer instance.
    let lsa = router_lsa(&RT1, 0, LSA_INIT_SEQ_NO + 1, &[]);
    assert!(!router.instance.install_lsa(lsa, BACKBONE).unwrap());

    // Area-scoped LSAs can't be installed in unknown areas.
    let lsa = router_lsa(&RT4, 1, LSA_INIT_SEQ_NO, &[]);
    assert!(router.instance.install_lsa(lsa, ip4!("9.9.9.9")).is_err());
}

// Test description:
// Flooding through the public API adds the LSA to the retransmission lists
// of the adjacencies, except for the neighbor it was received from.
#[test]
fn flood_lsa() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);
    router.bring_up(&RT3);

    let lsa = router_lsa(&RT4, 1, LSA_INIT_SEQ_NO, &[]);
    let flooded_back = router
        .instance
        .flood_lsa(&lsa, BACKBONE, Some(RT1.ifname), Some(RT1.router_id))
        .unwrap();
    assert!(!flooded_back);

    let rt1 = router.instance.neighbor(RT1.ifname, RT1.router_id).unwrap();
    assert!(!rt1.lists.ls_rxmt.contains_key(&lsa.key()));
    let rt3 = router.instance.neighbor(RT3.ifname, RT3.router_id).unwrap();
    assert!(rt3.lists.ls_rxmt.contains_key(&lsa.key()));
    assert!(flooded(&router.take_sent(), RT3.ifindex, &lsa));
}

// Test description:
// An older instance received from a neighbor is answered with the database
// copy. Further older instances arriving within MinLSArrival seconds of that
// answer are discarded.
#[test]
fn older_lsa() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);
    router.advance(6);

    let lsa = router_lsa(&RT1, 1, LSA_INIT_SEQ_NO + 4, &[]);
    router.receive(&RT1, ls_update(&RT1, vec![lsa]));
    router.advance(1);
    router.take_sent();

    let old = router_lsa(&RT1, 1, LSA_INIT_SEQ_NO + 2, &[]);
    router.receive(&RT1, ls_update(&RT1, vec![old.clone()]));
    let sent = router.take_sent();
    assert_eq!(
        sent_seq_nos(&sent, RT1.ifindex, &old),
        vec![LSA_INIT_SEQ_NO + 4]
    );
    let nbr = router.instance.neighbor(RT1.ifname, RT1.router_id).unwrap();
    assert!(nbr.lists.ls_transmitted.contains_key(&old.key()));

    // Too soon for another answer.
    router.receive(&RT1, ls_update(&RT1, vec![old.clone()]));
    let sent = router.take_sent();
    assert!(sent_seq_nos(&sent, RT1.ifindex, &old).is_empty());

    // The database copy is still the newer instance.
    let db_copy = rt1_router_lsa(&router).unwrap();
    assert_eq!(db_copy.hdr.seq_no, LSA_INIT_SEQ_NO + 4);

    // Once MinLSArrival elapses, older instances are answered again.
    router.advance(1);
    router.take_sent();
    router.receive(&RT1, ls_update(&RT1, vec![old.clone()]));
    let sent = router.take_sent();
    assert_eq!(
        sent_seq_nos(&sent, RT1.ifindex, &old),
        vec![LSA_INIT_SEQ_NO + 4]
    );
}

// Test description:
// AS-external-LSAs received on an interface attached to a stub area are
// dropped, while the other LSAs of the same packet are processed.
#[test]
fn stub_area_drops_external_lsas() {
    let stub_area = ip4!("0.0.0.1");
    let config = InstanceCfg {
        router_id: RT_ID,
        areas: vec![AreaCfg {
            area_id: stub_area,
            area_type: AreaType::Stub,
            interfaces: vec![iface_config(&RT1, "10.0.1.2/24")],
            ..Default::default()
        }],
        ..Default::default()
    };
    let mut router = TestRouter::new(config);
    router.instance.start();

    // Bring up the adjacency. We're the master of the exchange.
    let packet = hello(&RT1, btreeset![RT_ID]);
    router.receive(&RT1, to_stub_area(packet, stub_area));
    for _ in 0..2 {
        let seq_no = router.dd_seq_no(&RT1);
        let packet = dbdesc(&RT1, DbDescFlags::empty(), seq_no, vec![]);
        router.receive(&RT1, to_stub_area(packet, stub_area));
    }
    assert_eq!(router.nbr_state(&RT1), Some(nsm::State::Full));

    let external = as_external_lsa(RT1.router_id, ip4!("172.16.1.0"));
    let rtr = router_lsa(&RT1, 1, LSA_INIT_SEQ_NO, &[]);
    let packet = ls_update(&RT1, vec![external.clone(), rtr]);
    router.receive(&RT1, to_stub_area(packet, stub_area));

    let lsa_type = LsaTypeCode::AsExternal.into();
    let external_hdr = external.hdr;
    assert!(
        router
            .instance
            .find_lsa(
                lsa_type,
                external_hdr.lsa_id,
                external_hdr.adv_rtr,
                stub_area
            )
            .is_none()
    );
    assert!(
        router
            .instance
            .find_lsa(
                LsaTypeCode::Router.into(),
                RT1.router_id,
                RT1.router_id,
                stub_area
            )
            .is_some()
    );
    assert!(!acked(&router.take_sent(), &external));
}

// Test description:
// Delayed acknowledgments that don't fit in a single packet are split
// across as many LS Ack packets as necessary.
#[test]
fn delayed_acks_split() {
    let mut router = TestRouter::new(mtu_config(InterfaceCfg::MIN_MTU));
    router.instance.start();
    router.bring_up(&RT1);
    router.advance(6);
    router.take_sent();

    let base = u32::from(ip4!("172.16.0.0"));
    let lsas = (0..40u32)
        .map(|i| as_external_lsa(RT1.router_id, Ipv4Addr::from(base + i)))
        .collect::<Vec<_>>();
    router.receive(&RT1, ls_update(&RT1, lsas.clone()));
    router.advance(1);

    let sent = router.take_sent();
    let acks = sent
        .iter()
        .filter_map(|sent| sent.packet.as_ls_ack())
        .collect::<Vec<_>>();
    assert!(acks.len() >= 2);
    assert!(acks.iter().all(|ack| !ack.lsa_hdrs.is_empty()));
    assert!(lsas.iter().all(|lsa| acked(&sent, lsa)));
    let iface = router.instance.interface(RT1.ifname).unwrap();
    assert!(iface.state.ls_ack_list.is_empty());
}

// Test description:
// LSAs whose combined size exceeds what a single packet can carry are
// flooded in separate LS Update packets.
#[test]
fn large_lsas_flooding() {
    let mut router = TestRouter::new(mtu_config(u16::MAX));
    router.instance.start();
    router.bring_up(&RT1);
    router.bring_up(&RT3);
    router.advance(6);
    router.take_sent();

    let base = u32::from(ip4!("10.100.0.0"));
    let stubs = (0..2999u32)
        .map(|i| (Ipv4Addr::from(base + (i << 8)), ip4!("255.255.255.0"), 1))
        .collect::<Vec<_>>();
    let lsa1 = router_lsa(&RT1, 1, LSA_INIT_SEQ_NO, &stubs);
    let lsa4 = router_lsa(&RT4, 1, LSA_INIT_SEQ_NO, &stubs);
    assert_eq!(lsa1.hdr.length, 36024);
    router.receive(&RT1, ls_update(&RT1, vec![lsa1.clone(), lsa4.clone()]));

    let sent = router.take_sent();
    let updates = sent
        .iter()
        .filter(|sent| sent.ifindex == RT3.ifindex)
        .filter_map(|sent| sent.packet.as_ls_update())
        .collect::<Vec<_>>();
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().all(|upd| upd.lsas.len() == 1));
    assert!(flooded(&sent, RT3.ifindex, &lsa1));
    assert!(flooded(&sent, RT3.ifindex, &lsa4));
}

// Test description:
// The routing table is updated as soon as an LSA is installed through the
// public API.
#[test]
fn install_lsa_updates_routes() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);
    router.advance(6);

    let stub = (ip4!("192.168.1.0"), ip4!("255.255.255.0"), 1);
    let lsa = router_lsa(&RT1, 1, LSA_INIT_SEQ_NO, &[stub]);
    assert!(router.instance.install_lsa(lsa, BACKBONE).unwrap());

    let prefix = "192.168.1.0/24".parse().unwrap();
    let route = router.instance.route(&prefix).unwrap();
    assert_eq!(route.metric, 11);
}
