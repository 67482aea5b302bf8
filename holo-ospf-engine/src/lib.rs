//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod area;
pub mod collections;
pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod flood;
pub mod instance;
pub mod interface;
pub mod lsdb;
pub mod neighbor;
pub mod network;
pub mod output;
pub mod packet;
pub mod route;
pub mod spf;
pub mod tasks;

pub use crate::config::InstanceCfg;
pub use crate::error::Error;
pub use crate::instance::Instance;
pub use crate::network::Transport;
pub use crate::packet::Packet;
pub use crate::route::{RouteChange, RouteNet};
pub use crate::tasks::{Scheduler, TimerEvent, TimerId};
