//! Galaxy SIA wire format — framing, command bytes, and the XOR checksum.
//!
//! Every block on the wire is `length_byte | command_byte | payload | checksum_byte`.
//! `length_byte = payload.len() as u8 + 0x40`, so payloads are capped at 191
//! bytes (0xFF - 0x40). The checksum is the XOR of every preceding byte,
//! starting from 0xFF.
//!
//! This module only validates and builds blocks. It does not know about
//! events, accounts, or notifications — see `parse` and `event` for that.

use bytes::Bytes;

/// Offset added to the payload length to form the wire length byte.
const LENGTH_OFFSET: u8 = 0x40;

/// Largest payload this codec will encode. Not a protocol limit on decode —
/// a received block can declare up to 191 bytes and we accept it; this is
/// the cap we enforce when *we* build a block, since anything larger is a
/// programming error, not network input.
pub const MAX_PAYLOAD: usize = 0xFF - LENGTH_OFFSET as usize;

/// A decoded block's semantic command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    AccountId,
    NewEvent,
    Ascii,
    EndOfData,
    Acknowledge,
    Reject,
    Wait,
    Abort,
    AckAndDisconnect,
    Configuration,
    RemoteLogin,
    Unknown(u8),
}

impl Command {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x23 => Command::AccountId,
            0x4E => Command::NewEvent,
            0x41 => Command::Ascii,
            0x30 => Command::EndOfData,
            0x38 => Command::Acknowledge,
            0x39 => Command::Reject,
            0x31 => Command::Wait,
            0x32 => Command::Abort,
            0x37 => Command::AckAndDisconnect,
            0x40 => Command::Configuration,
            0x3F => Command::RemoteLogin,
            other => Command::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Command::AccountId => 0x23,
            Command::NewEvent => 0x4E,
            Command::Ascii => 0x41,
            Command::EndOfData => 0x30,
            Command::Acknowledge => 0x38,
            Command::Reject => 0x39,
            Command::Wait => 0x31,
            Command::Abort => 0x32,
            Command::AckAndDisconnect => 0x37,
            Command::Configuration => 0x40,
            Command::RemoteLogin => 0x3F,
            Command::Unknown(byte) => byte,
        }
    }

    /// The name used in logs, falling back to `UNKNOWN(0xNN)` for
    /// unrecognized codes.
    pub fn name(self) -> String {
        match self {
            Command::AccountId => "ACCOUNT_ID".to_string(),
            Command::NewEvent => "NEW_EVENT".to_string(),
            Command::Ascii => "ASCII".to_string(),
            Command::EndOfData => "END_OF_DATA".to_string(),
            Command::Acknowledge => "ACKNOWLEDGE".to_string(),
            Command::Reject => "REJECT".to_string(),
            Command::Wait => "WAIT".to_string(),
            Command::Abort => "ABORT".to_string(),
            Command::AckAndDisconnect => "ACK_AND_DISCONNECT".to_string(),
            Command::Configuration => "CONFIGURATION".to_string(),
            Command::RemoteLogin => "REMOTE_LOGIN".to_string(),
            Command::Unknown(byte) => format!("UNKNOWN(0x{byte:02x})"),
        }
    }
}

/// A validated block: command plus its payload, checksum already verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub payload: Bytes,
}

/// Why a received block was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("block too short: {0} bytes (minimum 3)")]
    TooShort(usize),
    #[error("length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: i16, actual: usize },
    #[error("checksum mismatch: expected 0x{expected:02x}, computed 0x{computed:02x}")]
    BadChecksum { expected: u8, computed: u8 },
}

fn xor_from_ff(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0xFFu8, |acc, b| acc ^ b)
}

/// Validate and strip a raw block read from the wire.
///
/// Validation order is length first, checksum second.
pub fn decode(data: &[u8]) -> Result<Frame, FrameError> {
    if data.len() < 3 {
        return Err(FrameError::TooShort(data.len()));
    }

    let declared_len = data[0] as i16 - LENGTH_OFFSET as i16;
    let actual_len = (data.len() - 3) as i16;
    if declared_len != actual_len {
        return Err(FrameError::LengthMismatch {
            declared: declared_len,
            actual: actual_len as usize,
        });
    }

    let expected_checksum = data[data.len() - 1];
    let computed_checksum = xor_from_ff(&data[..data.len() - 1]);
    if computed_checksum != expected_checksum {
        return Err(FrameError::BadChecksum {
            expected: expected_checksum,
            computed: computed_checksum,
        });
    }

    let command = Command::from_byte(data[1]);
    let payload = Bytes::copy_from_slice(&data[2..data.len() - 1]);
    Ok(Frame { command, payload })
}

/// Build a wire block for `command` carrying `payload`.
///
/// Panics if `payload.len() > MAX_PAYLOAD` — that's a programmer error,
/// never network input (we control every payload we encode).
pub fn encode(command: Command, payload: &[u8]) -> Vec<u8> {
    assert!(
        payload.len() <= MAX_PAYLOAD,
        "payload of {} bytes exceeds MAX_PAYLOAD ({})",
        payload.len(),
        MAX_PAYLOAD
    );

    let length_byte = payload.len() as u8 + LENGTH_OFFSET;
    let mut message = Vec::with_capacity(payload.len() + 3);
    message.push(length_byte);
    message.push(command.to_byte());
    message.extend_from_slice(payload);

    let checksum = xor_from_ff(&message);
    message.push(checksum);
    message
}

/// Pre-built REJECT block (length 0, command 0x39, checksum 0x86) — the
/// checksum the XOR-from-0xFF formula actually produces for this
/// zero-payload block, since REJECT always carries no payload.
pub fn reject_block() -> Vec<u8> {
    encode(Command::Reject, &[])
}

/// Pre-built ACKNOWLEDGE block (length 0, command 0x38).
pub fn ack_block() -> Vec<u8> {
    encode(Command::Acknowledge, &[])
}

/// `0x05 0x01` prefix marks the proprietary encryption handshake. We never
/// implement the handshake (out of scope); detecting the marker lets the
/// connection handler close the socket instead of replying with REJECT,
/// so the panel stops retrying on the same session.
pub fn is_encryption_handshake(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x05 && data[1] == 0x01
}
