//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod adjacency;
mod config;
mod flooding;
mod routing;
mod stub;
