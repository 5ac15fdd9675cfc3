//! # presence-core
//!
//! Client side of the desktop chat app's local rich-presence IPC: find the
//! app's socket or pipe, identify, and keep an activity displayed while the
//! host program runs.
//!
//! ## Design Principles
//!
//! - **Synchronous**: One background thread per session, no async runtime.
//! - **Never intrusive**: A missing or misbehaving app never surfaces as an
//!   error after construction. Failures go to a [`DiagnosticsSink`] and the
//!   session quietly reconnects.
//! - **Single writer**: Only the session worker touches the channel.
//! - **Injectable seams**: Transport, clock, and diagnostics are traits so the
//!   loop can be tested without a real app.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use presence_core::{load_config, ActivityUpdate, PresenceSession};
//!
//! let session = PresenceSession::new(load_config(None)?)?;
//! session.start();
//! session.update(ActivityUpdate::new().state("Reviewing"));
//! session.stop();
//! ```

pub mod activity;
pub mod channel;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod handshake;
pub mod session;
pub mod transport;
pub mod webhook;

pub use activity::{to_wire, to_wire_clear, Activity, ActivityUpdate, LARGE_IMAGE, SMALL_IMAGE};
pub use channel::FramedChannel;
pub use clock::{Clock, SystemClock};
pub use config::{default_config_path, load_config, PresenceConfig, SessionTiming, CONFIG_ENV};
pub use diagnostics::{Diagnostic, DiagnosticsSink, Phase, TracingSink};
pub use error::{PresenceError, Result};
pub use handshake::handshake;
pub use session::{PresenceSession, PresenceSessionBuilder};
pub use transport::{platform_transport, Duplex, Endpoint, NullTransport, Transport};
#[cfg(unix)]
pub use transport::{UnixLocator, UnixTransport};
#[cfg(windows)]
pub use transport::NamedPipeTransport;
pub use webhook::{Embed, EmbedField, WebhookClient, WebhookMessage};
