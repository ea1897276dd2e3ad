// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! # broker-core
//!
//! The runtime heart of the Montage Broker: a tool-broker daemon that
//! mediates between an LLM host and a Remotion-style motion-graphics
//! renderer. This crate owns the domain model, application services,
//! infrastructure adapters, and the stdio host-channel surface.
//!
//! ## Components Implemented
//!
//! | Component | Home | Description |
//! |---|---|---|
//! | **C1 Logger** | [`infrastructure::logging`] | File-only `tracing` sink |
//! | **C2 Config** | [`domain::config`] | YAML + env-override configuration |
//! | **C3 Port Allocator** | [`infrastructure::port_allocator`] | Safe port selection within the renderer's range |
//! | **C4 Process Discovery** | [`infrastructure::process_discovery`] | Finds and classifies already-running studios |
//! | **C5 Source Validator** | [`domain::source_validator`] | Import/export/interpolation repair passes |
//! | **C6 Checkpoint Store** | [`infrastructure::checkpoint_store`] | Resumable-transform persistence |
//! | **C7 Transform Pipeline** | [`application::transform_pipeline`] | Chunked, checkpointed JSX cleanup/validation/export |
//! | **C8 Studio Lifecycle** | [`application::studio_lifecycle`] | Launch/reuse/shutdown of renderer studios |
//! | **C9 Context Manager** | [`application::context_manager`] | Weighted context pressure & eviction |
//! | **C10 Layer Manager** | [`application::layer_manager`] | Dependency-aware tool-layer activation |
//! | **C11 Tool Registry** | [`application::tool_registry`] | Built-in catalog, search, invocation, usage tracking |
//! | **C12 Broker Front-End** | [`presentation::mcp_server`], [`application::broker`] | Host-channel adapter and dispatch |
//!
//! ## Layer Structure
//!
//! ```text
//! presentation/   ← stdio host-channel adapter (rmcp ServerHandler)
//!     ↓
//! application/    ← orchestrating services, composition root
//!     ↓
//! domain/         ← pure types, value objects, domain events
//!     ↓
//! infrastructure/ ← filesystem, process, network adapters
//! ```
//!
//! The composition root, [`application::bootstrap::Composition`], wires every
//! per-process singleton together once at startup and is the only place that
//! owns mutable global state (spec §9).

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
