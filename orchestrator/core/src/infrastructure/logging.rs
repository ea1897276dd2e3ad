// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Logger (C1, spec §4 "Logger: Sink-only structured logging; writes to
//! file; NEVER to the host channel"). Stdout is reserved for the MCP stdio
//! transport (C12); any tracing subscriber writing there would corrupt
//! framing, so this module only ever opens a file sink.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;

use crate::domain::config::LogLevel;

/// Must be kept alive for the duration of the process; dropping it stops
/// the background flush thread (mirrors the teacher's pattern of holding a
/// `WorkerGuard` in `main`).
pub struct LoggingHandle {
    _guard: WorkerGuard,
}

/// Initializes the global tracing subscriber with a file-only, non-blocking
/// append sink. Call once at startup.
pub fn init(level: LogLevel, file: Option<PathBuf>) -> anyhow::Result<LoggingHandle> {
    let path = file.unwrap_or_else(default_log_path);
    let directory = path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&directory)?;
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("montage-broker.log").to_string();

    let file_appender = tracing_appender::rolling::never(&directory, &file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_filter_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .compact()
        .init();

    Ok(LoggingHandle { _guard: guard })
}

fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".montage-broker")
        .join("broker.log")
}
