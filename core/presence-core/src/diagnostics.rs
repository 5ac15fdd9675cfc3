//! Where the session loop reports failures it swallows.
//!
//! Nothing here ever reaches the public session API. The default sink logs;
//! tests install their own to count what went wrong.

use std::fmt;

use crate::error::PresenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Handshake,
    Transmit,
    Probe,
    Spawn,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Connect => "connect",
            Phase::Handshake => "handshake",
            Phase::Transmit => "transmit",
            Phase::Probe => "probe",
            Phase::Spawn => "spawn",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct Diagnostic<'a> {
    pub phase: Phase,
    pub error: &'a PresenceError,
}

pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic<'_>);
}

/// Default sink: structured `tracing` events.
///
/// "No endpoint" is the normal state when the desktop app is closed, so it is
/// logged at debug to keep the reconnect loop quiet.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn report(&self, diagnostic: &Diagnostic<'_>) {
        match diagnostic.error {
            PresenceError::TransportUnavailable { .. } => {
                tracing::debug!(
                    phase = %diagnostic.phase,
                    error = %diagnostic.error,
                    "Presence endpoint unavailable"
                );
            }
            _ => {
                tracing::warn!(
                    phase = %diagnostic.phase,
                    error = %diagnostic.error,
                    "Presence session error"
                );
            }
        }
    }
}
