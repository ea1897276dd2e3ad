// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Host-channel adapter layer.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`mcp_server`] | stdio (MCP/JSON-RPC via `rmcp`) | C12 broker front-end; translates host tool calls into [`crate::application::broker::Broker`] calls |
//!
//! No business logic lives here — all real work is delegated to
//! `crate::application`. This is the only module that touches the wire
//! format the spec treats as opaque.

pub mod mcp_server;
