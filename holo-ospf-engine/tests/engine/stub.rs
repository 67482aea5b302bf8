//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use const_addrs::ip4;
use holo_ospf_engine::config::{AreaCfg, InstanceCfg, InterfaceCfg};
use holo_ospf_engine::interface::InterfaceType;
use holo_ospf_engine::neighbor::nsm;
use holo_ospf_engine::packet::lsa::{
    Lsa, LsaBody, LsaRouter, LsaRouterFlags, LsaRouterLink,
    LsaRouterLinkType,
};
use holo_ospf_engine::packet::{
    AuthData, DbDesc, DbDescFlags, Hello, LsAck, LsUpdate, Options, Packet,
    PacketHdr, PacketType,
};
use holo_ospf_engine::{Instance, Scheduler, TimerId, Transport};
use tracing_subscriber::EnvFilter;

pub const RT_ID: Ipv4Addr = ip4!("2.2.2.2");
pub const BACKBONE: Ipv4Addr = ip4!("0.0.0.0");
pub const ALL_SPF_RTRS: Ipv4Addr = ip4!("224.0.0.5");

// Neighbor attached to one of the interfaces of the router under test.
#[derive(Clone, Copy, Debug)]
pub struct Peer {
    pub ifname: &'static str,
    pub ifindex: u32,
    pub router_id: Ipv4Addr,
    pub addr: Ipv4Addr,
}

// Neighbor reachable through "eth0". Its Router ID is lower than ours, so
// we become the master of the database exchange.
pub const RT1: Peer = Peer {
    ifname: "eth0",
    ifindex: 1,
    router_id: ip4!("1.1.1.1"),
    addr: ip4!("10.0.1.1"),
};

// Neighbor reachable through "eth1". Its Router ID is higher than ours, so
// we become the slave of the database exchange.
pub const RT3: Peer = Peer {
    ifname: "eth1",
    ifindex: 2,
    router_id: ip4!("3.3.3.3"),
    addr: ip4!("10.0.2.3"),
};

// Packet handed to the transport.
#[derive(Clone, Debug)]
pub struct SentPacket {
    pub packet: Packet,
    pub dst: Ipv4Addr,
    pub ifindex: u32,
    pub ttl: u8,
}

// Simulated environment shared by the scheduler and transport stubs.
#[derive(Debug, Default)]
pub struct Env {
    pub now: Duration,
    pub timers: BTreeMap<(Duration, u64), TimerId>,
    pub sent: Vec<SentPacket>,
}

pub type EnvRef = Rc<RefCell<Env>>;

pub struct StubScheduler(pub EnvRef);

pub struct StubTransport(pub EnvRef);

// Router under test, along with its simulated environment.
pub struct TestRouter {
    pub instance: Instance,
    pub env: EnvRef,
}

// ===== impl StubScheduler =====

impl Scheduler for StubScheduler {
    fn now(&self) -> Duration {
        self.0.borrow().now
    }

    fn schedule_at(&self, time: Duration, timer_id: TimerId) {
        self.0
            .borrow_mut()
            .timers
            .insert((time, timer_id.seqno), timer_id);
    }

    fn cancel(&self, timer_id: TimerId) {
        self.0
            .borrow_mut()
            .timers
            .retain(|_, armed| armed.seqno != timer_id.seqno);
    }
}

// ===== impl StubTransport =====

impl Transport for StubTransport {
    fn send_packet(
        &self,
        packet: &Packet,
        dst: Ipv4Addr,
        ifindex: u32,
        ttl: u8,
    ) {
        self.0.borrow_mut().sent.push(SentPacket {
            packet: packet.clone(),
            dst,
            ifindex,
            ttl,
        });
    }
}

// ===== impl TestRouter =====

impl TestRouter {
    pub fn new(config: InstanceCfg) -> TestRouter {
        init_tracing();
        let env = EnvRef::default();
        let instance = Instance::new(
            config,
            Box::new(StubScheduler(env.clone())),
            Box::new(StubTransport(env.clone())),
        )
        .expect("invalid configuration");
        TestRouter { instance, env }
    }

    // Router 2.2.2.2 with two point-to-point interfaces in the backbone.
    pub fn started() -> TestRouter {
        let mut router = TestRouter::new(config());
        router.instance.start();
        router
    }

    // Advances the simulated clock, firing every timer that expires in the
    // meantime.
    pub fn advance(&mut self, secs: u64) {
        let target = self.env.borrow().now + Duration::from_secs(secs);
        loop {
            let timer_id = {
                let mut env = self.env.borrow_mut();
                let Some((&(time, _), _)) = env.timers.first_key_value()
                else {
                    break;
                };
                if time > target {
                    break;
                }
                let (_, timer_id) = env.timers.pop_first().unwrap();
                env.now = time;
                timer_id
            };
            self.instance.timer_expired(timer_id);
        }
        self.env.borrow_mut().now = target;
    }

    // Delivers a packet sent by the given peer.
    pub fn receive(&mut self, peer: &Peer, packet: Packet) {
        self.instance
            .process_packet(peer.ifindex, peer.addr, ALL_SPF_RTRS, packet);
    }

    // Returns and clears the packets sent so far.
    pub fn take_sent(&self) -> Vec<SentPacket> {
        std::mem::take(&mut self.env.borrow_mut().sent)
    }

    pub fn nbr_state(&self, peer: &Peer) -> Option<nsm::State> {
        self.instance
            .neighbor(peer.ifname, peer.router_id)
            .map(|nbr| nbr.state)
    }

    // Brings the adjacency with the given peer up to the Full state,
    // playing the peer's side of the database exchange.
    pub fn bring_up(&mut self, peer: &Peer) {
        self.receive(peer, hello(peer, [RT_ID].into()));
        assert_eq!(self.nbr_state(peer), Some(nsm::State::ExStart));

        if peer.router_id < RT_ID {
            // We're the master: the peer echoes our sequence numbers.
            for _ in 0..2 {
                let seq_no = self.dd_seq_no(peer);
                self.receive(
                    peer,
                    dbdesc(peer, DbDescFlags::empty(), seq_no, vec![]),
                );
            }
        } else {
            // We're the slave: the peer dictates the sequence numbers.
            let seq_no = 0x5000;
            let flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
            self.receive(peer, dbdesc(peer, flags, seq_no, vec![]));
            self.receive(
                peer,
                dbdesc(peer, DbDescFlags::MS, seq_no + 1, vec![]),
            );
        }
        assert_eq!(self.nbr_state(peer), Some(nsm::State::Full));
    }

    pub fn dd_seq_no(&self, peer: &Peer) -> u32 {
        self.instance
            .neighbor(peer.ifname, peer.router_id)
            .map(|nbr| nbr.dd_seq_no)
            .unwrap()
    }
}

// ===== global functions =====

// Logs to the test output, filtered through `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn iface_config(peer: &Peer, addr: &str) -> InterfaceCfg {
    InterfaceCfg {
        name: peer.ifname.to_owned(),
        ifindex: peer.ifindex,
        if_type: InterfaceType::PointToPoint,
        addr: addr.parse().unwrap(),
        ..Default::default()
    }
}

pub fn config() -> InstanceCfg {
    InstanceCfg {
        router_id: RT_ID,
        areas: vec![AreaCfg {
            area_id: BACKBONE,
            interfaces: vec![
                iface_config(&RT1, "10.0.1.2/24"),
                iface_config(&RT3, "10.0.2.2/24"),
            ],
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn packet_hdr(pkt_type: PacketType, peer: &Peer) -> PacketHdr {
    PacketHdr {
        pkt_type,
        router_id: peer.router_id,
        area_id: BACKBONE,
        auth: AuthData::Null,
    }
}

pub fn hello(peer: &Peer, neighbors: BTreeSet<Ipv4Addr>) -> Packet {
    Packet::Hello(Hello {
        hdr: packet_hdr(PacketType::Hello, peer),
        network_mask: ip4!("255.255.255.0"),
        hello_interval: 10,
        options: Options::E,
        priority: 1,
        dead_interval: 40,
        dr: None,
        bdr: None,
        neighbors,
    })
}

pub fn dbdesc(
    peer: &Peer,
    dd_flags: DbDescFlags,
    dd_seq_no: u32,
    lsas: Vec<&Lsa>,
) -> Packet {
    Packet::DbDesc(DbDesc {
        hdr: packet_hdr(PacketType::DbDesc, peer),
        mtu: InterfaceCfg::MIN_MTU,
        options: Options::E,
        dd_flags,
        dd_seq_no,
        lsa_hdrs: lsas.into_iter().map(|lsa| lsa.hdr).collect(),
    })
}

pub fn ls_update(peer: &Peer, lsas: Vec<Lsa>) -> Packet {
    Packet::LsUpdate(LsUpdate {
        hdr: packet_hdr(PacketType::LsUpdate, peer),
        lsas,
    })
}

pub fn ls_ack(peer: &Peer, lsas: Vec<&Lsa>) -> Packet {
    Packet::LsAck(LsAck {
        hdr: packet_hdr(PacketType::LsAck, peer),
        lsa_hdrs: lsas.into_iter().map(|lsa| lsa.hdr).collect(),
    })
}

// Router-LSA of the given peer, describing its point-to-point link to us
// and the provided stub networks.
pub fn router_lsa(
    peer: &Peer,
    age: u16,
    seq_no: u32,
    stubs: &[(Ipv4Addr, Ipv4Addr, u16)],
) -> Lsa {
    let mut links = vec![LsaRouterLink {
        link_type: LsaRouterLinkType::PointToPoint,
        link_id: RT_ID,
        link_data: peer.addr,
        metric: 10,
    }];
    links.extend(stubs.iter().map(|(network, mask, metric)| {
        LsaRouterLink {
            link_type: LsaRouterLinkType::StubNetwork,
            link_id: *network,
            link_data: *mask,
            metric: *metric,
        }
    }));
    let body = LsaBody::Router(LsaRouter {
        flags: LsaRouterFlags::empty(),
        links,
    });
    Lsa::new(age, Options::E, peer.router_id, peer.router_id, seq_no, body)
}

// Returns whether an LS Ack carrying the given LSA was sent.
pub fn acked(sent: &[SentPacket], lsa: &Lsa) -> bool {
    sent.iter()
        .filter_map(|sent| sent.packet.as_ls_ack())
        .any(|ack| ack.lsa_hdrs.iter().any(|hdr| hdr.key() == lsa.key()))
}

// Returns whether an LS Update carrying the given LSA was sent out the
// given interface.
pub fn flooded(sent: &[SentPacket], ifindex: u32, lsa: &Lsa) -> bool {
    sent.iter()
        .filter(|sent| sent.ifindex == ifindex)
        .filter_map(|sent| sent.packet.as_ls_update())
        .any(|upd| upd.lsas.iter().any(|upd_lsa| upd_lsa.key() == lsa.key()))
}
