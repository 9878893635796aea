//! Rotator wire codec.
//!
//! Requests are single ASCII characters. Replies are one line of free text
//! ending in `:<steps> <switch>`.

use xystage_core::{StageError, StageResult};

/// End-of-reply marker.
pub const LINE_END: u8 = b'\n';

/// Single-character rotator requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotatorCommand {
    /// Report step counter and index switch without moving.
    Status,
    /// One step forward.
    Increment,
    /// One step backward.
    Decrement,
}

impl RotatorCommand {
    /// Request byte on the wire.
    pub fn as_byte(self) -> u8 {
        match self {
            RotatorCommand::Status => b'r',
            RotatorCommand::Increment => b'a',
            RotatorCommand::Decrement => b'b',
        }
    }
}

/// Terminator predicate for [`xystage_core::Transport::read_until`].
pub fn is_reply_complete(buffer: &[u8]) -> bool {
    buffer.contains(&LINE_END)
}

/// Parse `"...:<steps> <state>"` into the board step counter and switch level.
///
/// Any non-zero state counts as the switch being closed.
pub fn parse_response(reply: &str) -> StageResult<(i64, bool)> {
    let Some((_, payload)) = reply.split_once(':') else {
        return Err(StageError::protocol("missing ':' separator", reply));
    };

    let fields: Vec<&str> = payload.split_whitespace().collect();
    let [steps, state] = fields.as_slice() else {
        return Err(StageError::protocol(
            format!("expected '<steps> <state>', got {} field(s)", fields.len()),
            reply,
        ));
    };

    let steps = steps
        .parse::<i64>()
        .map_err(|e| StageError::protocol(format!("bad step count: {}", e), reply))?;
    let state = state
        .parse::<i64>()
        .map_err(|e| StageError::protocol(format!("bad switch state: {}", e), reply))?;

    Ok((steps, state != 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        assert_eq!(parse_response("status:7 1").unwrap(), (7, true));
        assert_eq!(parse_response("step:-12 0\r\n").unwrap(), (-12, false));
        assert_eq!(parse_response(":3 2").unwrap(), (3, true));
    }

    #[test]
    fn test_parse_response_rejects_malformed() {
        for reply in ["", "status 7 1", "status:7", "status:7 1 0", "status:x 1", "status:7 on"] {
            assert!(
                matches!(parse_response(reply), Err(StageError::Protocol { .. })),
                "{:?}",
                reply
            );
        }
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(RotatorCommand::Status.as_byte(), b'r');
        assert_eq!(RotatorCommand::Increment.as_byte(), b'a');
        assert_eq!(RotatorCommand::Decrement.as_byte(), b'b');
    }
}
