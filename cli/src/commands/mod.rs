// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Subcommand implementations for the `broker` CLI.

pub mod config;
pub mod daemon;
pub mod serve;
pub mod tool;

pub use self::config::ConfigCommand;
pub use self::daemon::DaemonCommand;
pub use self::tool::ToolCommand;
