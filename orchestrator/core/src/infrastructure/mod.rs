// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Adapters giving the domain a filesystem, a clock, and a network: the
//! only layer that touches `tokio::fs`, TCP sockets, child processes, or
//! the HTTP client.

pub mod checkpoint_store;
pub mod event_bus;
pub mod logging;
pub mod port_allocator;
pub mod process_discovery;
pub mod process_spawner;
pub mod usage_store;
