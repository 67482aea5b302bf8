//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::ip4;
use holo_ospf_engine::interface::ism;
use holo_ospf_engine::neighbor::nsm;
use holo_ospf_engine::packet::DbDescFlags;
use holo_ospf_engine::packet::lsa::{LsaRouterLinkType, LsaTypeCode};
use maplit::btreeset;

use crate::stub::{BACKBONE, Peer, RT_ID, RT1, RT3, TestRouter, dbdesc, hello};

// Test description:
// The router comes up, sends Hello packets out all of its interfaces and
// originates its Router-LSA.
#[test]
fn instance_start() {
    let router = TestRouter::started();

    let sent = router.take_sent();
    for ifindex in [RT1.ifindex, RT3.ifindex] {
        assert!(
            sent.iter()
                .filter(|sent| sent.ifindex == ifindex)
                .any(|sent| sent.packet.as_hello().is_some())
        );
    }
    for ifname in [RT1.ifname, RT3.ifname] {
        let iface = router.instance.interface(ifname).unwrap();
        assert_eq!(iface.state.ism_state, ism::State::PointToPoint);
    }
    assert!(
        router
            .instance
            .find_lsa(LsaTypeCode::Router.into(), RT_ID, RT_ID, BACKBONE)
            .is_some()
    );
}

// Test description:
// Full adjacency with a neighbor whose Router ID is lower than ours. The
// Router-LSA is updated to describe the new adjacency once MinLSInterval
// elapses.
#[test]
fn adjacency_as_master() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);

    // The initial Database Description packet claims the master role.
    let sent = router.take_sent();
    let first = sent
        .iter()
        .find_map(|sent| sent.packet.as_db_desc())
        .unwrap();
    let init_flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
    assert!(first.dd_flags.contains(init_flags));
    assert!(first.lsa_hdrs.is_empty());

    router.advance(6);
    let lsa = router
        .instance
        .find_lsa(LsaTypeCode::Router.into(), RT_ID, RT_ID, BACKBONE)
        .unwrap();
    let links = &lsa.body.as_router().unwrap().links;
    assert!(links.iter().any(|link| {
        link.link_type == LsaRouterLinkType::PointToPoint
            && link.link_id == RT1.router_id
            && link.link_data == ip4!("10.0.1.2")
    }));
}

// Test description:
// Full adjacency with a neighbor whose Router ID is higher than ours. The
// last Database Description packet is kept for a while to answer
// retransmissions from the master.
#[test]
fn adjacency_as_slave() {
    let mut router = TestRouter::started();
    router.bring_up(&RT3);

    let nbr = router.instance.neighbor(RT3.ifname, RT3.router_id).unwrap();
    assert!(!nbr.dd_flags.contains(DbDescFlags::MS));
    assert!(nbr.last_sent_dbdesc.is_some());
    assert!(nbr.tasks.dbdesc_free_timer.is_some());

    // Duplicates are answered with the last packet sent.
    router.take_sent();
    router.receive(&RT3, dbdesc(&RT3, DbDescFlags::MS, 0x5001, vec![]));
    assert_eq!(router.nbr_state(&RT3), Some(nsm::State::Full));
    assert!(
        router
            .take_sent()
            .iter()
            .any(|sent| sent.packet.as_db_desc().is_some())
    );

    router.advance(41);
    let nbr = router.instance.neighbor(RT3.ifname, RT3.router_id);
    assert!(nbr.is_none_or(|nbr| nbr.last_sent_dbdesc.is_none()));
}

// Test description:
// An unexpected Database Description packet on a Full adjacency triggers
// the SeqNumberMismatch event.
#[test]
fn adjacency_seqno_mismatch() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);

    router.receive(&RT1, dbdesc(&RT1, DbDescFlags::empty(), 0x9999, vec![]));
    assert_eq!(router.nbr_state(&RT1), Some(nsm::State::ExStart));
    let nbr = router.instance.neighbor(RT1.ifname, RT1.router_id).unwrap();
    assert!(nbr.lists.db_summary.is_empty());
    assert!(nbr.lists.ls_rxmt.is_empty());
}

// Test description:
// A Hello packet that doesn't list our Router ID brings the neighbor back
// to the Init state.
#[test]
fn adjacency_one_way() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);

    router.receive(&RT1, hello(&RT1, btreeset![]));
    assert_eq!(router.nbr_state(&RT1), Some(nsm::State::Init));
}

// Test description:
// Neighbors that stop sending Hello packets are declared down after
// RouterDeadInterval seconds.
#[test]
fn adjacency_inactivity_timer() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);

    router.advance(39);
    assert_eq!(router.nbr_state(&RT1), Some(nsm::State::Full));
    router.advance(2);
    assert_eq!(router.nbr_state(&RT1), None);
}

// Test description:
// Hello packets with mismatched parameters or our own Router ID don't
// create neighbors.
#[test]
fn hello_sanity_checks() {
    let mut router = TestRouter::started();

    let mut packet = hello(&RT1, btreeset![]);
    packet.as_hello_mut().unwrap().hello_interval = 5;
    router.receive(&RT1, packet);
    assert_eq!(router.nbr_state(&RT1), None);

    let mut packet = hello(&RT1, btreeset![]);
    packet.as_hello_mut().unwrap().options = Default::default();
    router.receive(&RT1, packet);
    assert_eq!(router.nbr_state(&RT1), None);

    let imposter = Peer {
        router_id: RT_ID,
        ..RT1
    };
    router.receive(&imposter, hello(&imposter, btreeset![]));
    assert!(router.instance.neighbor(RT1.ifname, RT_ID).is_none());
}

// Test description:
// Interface state changes driven through the public API.
#[test]
fn interface_down_up() {
    let mut router = TestRouter::started();
    router.bring_up(&RT1);

    router.instance.interface_down(RT1.ifname).unwrap();
    let iface = router.instance.interface(RT1.ifname).unwrap();
    assert_eq!(iface.state.ism_state, ism::State::Down);
    assert_eq!(router.nbr_state(&RT1), None);

    router.instance.interface_up(RT1.ifname).unwrap();
    let iface = router.instance.interface(RT1.ifname).unwrap();
    assert_eq!(iface.state.ism_state, ism::State::PointToPoint);

    router.instance.interface_loop(RT1.ifname).unwrap();
    let iface = router.instance.interface(RT1.ifname).unwrap();
    assert_eq!(iface.state.ism_state, ism::State::Loopback);

    assert!(router.instance.interface_up("eth9").is_err());
}
