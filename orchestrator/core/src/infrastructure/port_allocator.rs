// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Port Allocator (C3, spec §4.1): probes, reserves, and releases TCP ports
//! in a configured range.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

use thiserror::Error;

use crate::domain::studio::{PortConflict, PortInfo};

/// Ports reserved by common OS services, kept separate from the
/// user-configured deny-list so both apply (spec §4.1 "deny-list is static
/// and platform-aware").
const SYSTEM_RESERVED_PORTS: &[u16] = &[22, 25, 53, 80, 443, 3306, 5432, 6379, 8080, 27017];

#[derive(Debug, Error)]
pub enum PortError {
    #[error(
        "no free port found in range {start}-{end} (deny-list: {deny:?})\n\n\
         Every port in the configured range is either occupied or reserved.\n\
         Try widening portRange in the configuration, or stop the process\n\
         holding the port you expected to reuse."
    )]
    PortRangeExhausted { start: u16, end: u16, deny: Vec<u16> },

    #[error("port {port} is reserved by a system service and cannot be used for the renderer")]
    PortReservedBySystem { port: u16 },

    #[error("failed to terminate process {pid}: {reason}")]
    KillDenied { pid: u32, reason: String },
}

pub struct PortAllocator {
    start: u16,
    end: u16,
    deny: Vec<u16>,
}

impl PortAllocator {
    pub fn new(start: u16, end: u16, deny: Vec<u16>) -> Self {
        Self { start, end, deny }
    }

    /// Returns the preferred port if free, else the first free port in the
    /// configured range, ties broken by lowest number (spec §4.1).
    pub fn find_available(&self, preferred: Option<u16>) -> Result<PortInfo, PortError> {
        if let Some(port) = preferred {
            if let Err(reason) = self.validate_safety(port) {
                return Err(reason);
            }
            if Self::probe_bind(port) {
                return Ok(PortInfo { port, available: true, conflict: None });
            }
        }
        for port in self.start..=self.end {
            if self.deny.contains(&port) || SYSTEM_RESERVED_PORTS.contains(&port) {
                continue;
            }
            if Self::probe_bind(port) {
                return Ok(PortInfo { port, available: true, conflict: None });
            }
        }
        Err(PortError::PortRangeExhausted {
            start: self.start,
            end: self.end,
            deny: self.deny.clone(),
        })
    }

    /// Refuses ports in the deny-list and privileged ports (< 1024).
    pub fn validate_safety(&self, port: u16) -> Result<(), PortError> {
        if port < 1024 || self.deny.contains(&port) || SYSTEM_RESERVED_PORTS.contains(&port) {
            return Err(PortError::PortReservedBySystem { port });
        }
        Ok(())
    }

    /// Availability is tested by attempting a zero-backlog bind on loopback;
    /// the port is released before returning (spec §4.1).
    fn probe_bind(port: u16) -> bool {
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        TcpListener::bind(addr).is_ok()
    }

    /// Best-effort termination of the owner process.
    #[cfg(unix)]
    pub fn kill(&self, pid: u32, force: bool) -> Result<bool, PortError> {
        let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
        // SAFETY: kill(2) with a validated pid and a fixed signal constant;
        // no memory is touched through the raw pointer-free libc binding.
        let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if result == 0 {
            Ok(true)
        } else {
            let err = std::io::Error::last_os_error();
            Err(PortError::KillDenied { pid, reason: err.to_string() })
        }
    }

    #[cfg(not(unix))]
    pub fn kill(&self, _pid: u32, _force: bool) -> Result<bool, PortError> {
        Ok(false)
    }

    /// Ports in the configured range currently occupied, with best-effort
    /// conflict detail (spec §4.1 `listInUse`).
    pub fn list_in_use(&self) -> Vec<PortInfo> {
        (self.start..=self.end)
            .filter(|port| !Self::probe_bind(*port))
            .map(|port| PortInfo {
                port,
                available: false,
                conflict: Some(PortConflict {
                    occupant_pid: None,
                    is_system_service: SYSTEM_RESERVED_PORTS.contains(&port),
                    description: format!("port {port} is in use"),
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_first_free_port_in_range() {
        let allocator = PortAllocator::new(21000, 21010, vec![]);
        let info = allocator.find_available(None).unwrap();
        assert!((21000..=21010).contains(&info.port));
    }

    #[test]
    fn denied_port_is_rejected_as_preferred() {
        let allocator = PortAllocator::new(21000, 21010, vec![21002]);
        assert!(allocator.validate_safety(21002).is_err());
    }

    #[test]
    fn privileged_port_is_unsafe() {
        let allocator = PortAllocator::new(21000, 21010, vec![]);
        assert!(allocator.validate_safety(80).is_err());
    }

    #[test]
    fn exhausted_range_reports_start_end_and_deny() {
        // A range entirely composed of denied ports always exhausts.
        let allocator = PortAllocator::new(21020, 21021, vec![21020, 21021]);
        let err = allocator.find_available(None).unwrap_err();
        assert!(matches!(err, PortError::PortRangeExhausted { .. }));
    }

    // Property test for spec §8 invariant 9: any port that `validate_safety`
    // accepts is neither privileged nor in the (user or system) deny-list.
    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn validate_safety_only_accepts_unprivileged_non_denied_ports(
                port in 1u16..=40000,
                deny in prop::collection::vec(1u16..=40000, 0..6),
            ) {
                let allocator = PortAllocator::new(1, 65535, deny.clone());
                let result = allocator.validate_safety(port);
                let should_be_safe = port >= 1024 && !deny.contains(&port) && !SYSTEM_RESERVED_PORTS.contains(&port);
                prop_assert_eq!(result.is_ok(), should_be_safe);
            }
        }
    }
}
