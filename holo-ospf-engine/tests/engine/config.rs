//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::ip4;
use holo_ospf_engine::config::{AuthCfg, ExternalMetricType};
use holo_ospf_engine::interface::InterfaceType;
use holo_ospf_engine::{Error, Instance, InstanceCfg};

use crate::stub::{
    BACKBONE, EnvRef, RT_ID, StubScheduler, StubTransport, TestRouter, config,
};

const CONFIG: &str = r#"{
    "router_id": "2.2.2.2",
    "areas": [
        {
            "area_id": "0.0.0.0",
            "interfaces": [
                {
                    "name": "eth0",
                    "ifindex": 1,
                    "if_type": "point-to-point",
                    "addr": "10.0.1.2/24",
                    "auth": { "type": "simple", "key": "secret" }
                }
            ]
        }
    ],
    "external_routes": [
        { "prefix": "172.16.0.0/16", "metric_type": "type1" }
    ]
}"#;

fn invalid(data: &str) -> bool {
    matches!(InstanceCfg::from_json(data), Err(Error::InvalidConfig(_)))
}

// Test description:
// A JSON configuration is loaded, with defaults filling in the omitted
// settings.
#[test]
fn config_from_json() {
    let config = InstanceCfg::from_json(CONFIG).unwrap();
    assert_eq!(config.router_id, RT_ID);
    assert_eq!(config.max_paths, InstanceCfg::DFLT_MAX_PATHS);

    let area = &config.areas[0];
    assert_eq!(area.area_id, BACKBONE);
    let iface = &area.interfaces[0];
    assert_eq!(iface.if_type, InterfaceType::PointToPoint);
    assert_eq!(iface.addr.ip(), ip4!("10.0.1.2"));
    assert_eq!(iface.hello_interval, 10);
    assert_eq!(iface.dead_interval, 40);
    assert!(matches!(&iface.auth, AuthCfg::Simple { key } if key == "secret"));

    let route = &config.external_routes[0];
    assert_eq!(route.metric_type, ExternalMetricType::Type1);
    assert_eq!(route.metric, 20);

    let mut router = TestRouter::new(config);
    router.instance.start();
    assert!(router.instance.interface("eth0").is_some());
}

// Test description:
// Malformed or inconsistent configurations are rejected.
#[test]
fn config_invalid() {
    // Unknown field.
    assert!(invalid(r#"{ "router_id": "2.2.2.2", "hostname": "rt2" }"#));
    // Missing Router ID.
    assert!(invalid(r#"{ "areas": [] }"#));
    // Duplicate area.
    assert!(invalid(
        r#"{
            "router_id": "2.2.2.2",
            "areas": [{ "area_id": "0.0.0.1" }, { "area_id": "0.0.0.1" }]
        }"#
    ));
    // Stub backbone.
    assert!(invalid(
        r#"{
            "router_id": "2.2.2.2",
            "areas": [{ "area_id": "0.0.0.0", "area_type": "stub" }]
        }"#
    ));
    // Dead interval not greater than the hello interval.
    assert!(invalid(
        r#"{
            "router_id": "2.2.2.2",
            "areas": [{
                "interfaces": [{
                    "name": "eth0",
                    "ifindex": 1,
                    "if_type": "broadcast",
                    "addr": "10.0.1.2/24",
                    "hello_interval": 10,
                    "dead_interval": 10
                }]
            }]
        }"#
    ));
    // Virtual link through an unknown transit area.
    assert!(invalid(
        r#"{
            "router_id": "2.2.2.2",
            "areas": [{ "area_id": "0.0.0.0" }],
            "virtual_links": [
                { "transit_area_id": "0.0.0.9", "router_id": "9.9.9.9" }
            ]
        }"#
    ));
    // MTU below the IPv4 minimum datagram size.
    assert!(invalid(
        r#"{
            "router_id": "2.2.2.2",
            "areas": [{
                "interfaces": [{
                    "name": "eth0",
                    "ifindex": 1,
                    "if_type": "point-to-point",
                    "addr": "10.0.1.2/24",
                    "mtu": 40
                }]
            }]
        }"#
    ));
}

// Test description:
// Instances can't be created from invalid configurations.
#[test]
fn instance_invalid_config() {
    let mut config = config();
    config.areas[0].interfaces[1].ifindex = 1;

    let env = EnvRef::default();
    let result = Instance::new(
        config,
        Box::new(StubScheduler(env.clone())),
        Box::new(StubTransport(env)),
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
