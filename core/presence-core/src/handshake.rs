//! Opening exchange: identify with the client id, wait for READY.

use std::time::Duration;

use presence_protocol::{CloseEvent, EventFrame, Handshake, Opcode};

use crate::channel::FramedChannel;
use crate::error::{PresenceError, Result};

/// Sends the identification frame and blocks for the remote's answer.
///
/// The read is bounded by `timeout` when the transport supports deadlines, so a
/// remote that accepts the connection but never answers fails the attempt
/// instead of wedging the caller.
pub fn handshake(
    channel: &mut FramedChannel,
    client_id: &str,
    timeout: Duration,
) -> Result<EventFrame> {
    if let Err(err) = channel.set_read_timeout(Some(timeout)) {
        tracing::debug!(
            endpoint = %channel.endpoint(),
            error = %err,
            "Transport has no read deadline; handshake read is unbounded"
        );
    }

    channel.send_json(Opcode::Handshake, &Handshake::new(client_id))?;
    let frame = channel.read_frame()?;
    let _ = channel.set_read_timeout(None);

    match frame.opcode {
        Opcode::Frame => {
            let event: EventFrame = frame.parse().map_err(|err| {
                PresenceError::Protocol(format!("malformed handshake response: {}", err))
            })?;
            if event.is_ready() {
                Ok(event)
            } else if event.is_error() {
                Err(PresenceError::Protocol(format!(
                    "handshake rejected: {}",
                    event.data
                )))
            } else {
                Err(PresenceError::Protocol(format!(
                    "expected READY, got {:?}",
                    event.evt
                )))
            }
        }
        Opcode::Close => {
            let close: CloseEvent = frame.parse().unwrap_or_default();
            Err(PresenceError::RemoteClosed {
                code: close.code,
                message: close.message,
            })
        }
        other => Err(PresenceError::Protocol(format!(
            "unexpected {:?} frame during handshake",
            other
        ))),
    }
}
