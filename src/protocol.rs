//! # Wire Protocol
//!
//! Fixed-width command framing for the stop-and-wait TCP exchange between the
//! network consumer (server) and remote evaluation clients. Every control
//! field is fixed-length ASCII text padded with spaces: a command token, then
//! depending on the command a decimal size header, a serialization-mode token
//! and a decimal port-id token, followed by the raw payload bytes. One
//! request/response pair per connection.
//!
//! Framing lives here as plain functions over `io::Read`/`io::Write`, so the
//! exact bytes are testable against in-memory cursors without a socket.
//!
//! A malformed header is a protocol error scoped to the one exchange it
//! occurred on: the peer drops that connection and carries on.

use std::io::{Read, Write};

use crate::broker::PortId;
use crate::error::{ExecutionError, Result};
use crate::work_item::SerializationMode;

/// Width of every command token, in bytes.
pub const COMMAND_LEN: usize = 16;
/// Width of the decimal payload-size header.
pub const SIZE_LEN: usize = 16;
/// Width of the serialization-mode token.
pub const MODE_LEN: usize = 4;
/// Width of the decimal port-id token.
pub const PORT_LEN: usize = 20;
/// Width of the decimal seed reply.
pub const SEED_LEN: usize = 20;

/// Upper bound on a declared payload size. A header past this is treated as
/// malformed rather than honored with an allocation.
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// The commands of the stop-and-wait exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client requests a work item.
    Ready,
    /// Server response carrying a work item.
    Compute,
    /// Client returns a computed item.
    Result,
    /// Client requests its startup random seed.
    GetSeed,
    /// Server response when no work is currently available.
    NoData,
}

impl Command {
    /// The token text written for this command.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Ready => "ready",
            Command::Compute => "compute",
            Command::Result => "result",
            Command::GetSeed => "getSeed",
            Command::NoData => "nodata",
        }
    }

    /// Parses a trimmed token back into a command.
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "ready" => Ok(Command::Ready),
            "compute" => Ok(Command::Compute),
            "result" => Ok(Command::Result),
            "getSeed" => Ok(Command::GetSeed),
            "nodata" => Ok(Command::NoData),
            other => Err(ExecutionError::Protocol(format!(
                "Unknown command token: {:?}",
                other
            ))),
        }
    }
}

/// The server's reply to `ready`: one work item travelling to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeFrame {
    /// Encoding of `payload`, echoed back implicitly by the result path.
    pub mode: SerializationMode,
    /// Port id correlating this item with its eventual return.
    pub port: PortId,
    /// Serialized work item. May be empty.
    pub payload: Vec<u8>,
}

/// The client's `result` request: one computed item travelling back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFrame {
    /// Port id assigned when the item was handed out.
    pub port: PortId,
    /// Serialized work item.
    pub payload: Vec<u8>,
}

fn write_token<W: Write>(writer: &mut W, text: &str, width: usize) -> Result<()> {
    if text.len() > width {
        return Err(ExecutionError::Protocol(format!(
            "Token {:?} exceeds field width {}",
            text, width
        )));
    }
    let mut field = vec![b' '; width];
    field[..text.len()].copy_from_slice(text.as_bytes());
    writer.write_all(&field)?;
    Ok(())
}

fn read_token<R: Read>(reader: &mut R, width: usize) -> Result<String> {
    let mut field = vec![0u8; width];
    reader.read_exact(&mut field)?;
    let text = std::str::from_utf8(&field)
        .map_err(|e| ExecutionError::Protocol(format!("Non-UTF8 token field: {}", e)))?;
    Ok(text.trim().to_string())
}

fn write_decimal<W: Write>(writer: &mut W, value: u64, width: usize) -> Result<()> {
    write_token(writer, &value.to_string(), width)
}

fn read_decimal<R: Read>(reader: &mut R, width: usize) -> Result<u64> {
    let token = read_token(reader, width)?;
    token
        .parse::<u64>()
        .map_err(|_| ExecutionError::Protocol(format!("Unparseable decimal field: {:?}", token)))
}

/// Writes a bare command token, e.g. the client's `ready` request or the
/// server's `nodata` reply.
pub fn write_command<W: Write>(writer: &mut W, command: Command) -> Result<()> {
    write_token(writer, command.as_str(), COMMAND_LEN)
}

/// Reads and parses the leading command token of an exchange.
pub fn read_command<R: Read>(reader: &mut R) -> Result<Command> {
    let token = read_token(reader, COMMAND_LEN)?;
    Command::parse(&token)
}

/// Writes a full `compute` response: command, size header, mode token,
/// port-id token, payload.
pub fn write_compute<W: Write>(writer: &mut W, frame: &ComputeFrame) -> Result<()> {
    write_token(writer, Command::Compute.as_str(), COMMAND_LEN)?;
    write_decimal(writer, frame.payload.len() as u64, SIZE_LEN)?;
    write_decimal(writer, frame.mode.as_tag() as u64, MODE_LEN)?;
    write_decimal(writer, frame.port.value(), PORT_LEN)?;
    writer.write_all(&frame.payload)?;
    Ok(())
}

/// Reads the body of a `compute` response. The command token must already
/// have been consumed by [`read_command`].
pub fn read_compute_body<R: Read>(reader: &mut R) -> Result<ComputeFrame> {
    let size = read_decimal(reader, SIZE_LEN)? as usize;
    if size > MAX_PAYLOAD {
        return Err(ExecutionError::Protocol(format!(
            "Declared payload size {} exceeds limit",
            size
        )));
    }
    let mode_tag = read_decimal(reader, MODE_LEN)?;
    let mode = SerializationMode::from_tag(mode_tag as u8)?;
    let port = PortId::from_value(read_decimal(reader, PORT_LEN)?);
    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload)?;
    Ok(ComputeFrame {
        mode,
        port,
        payload,
    })
}

/// Writes a full `result` request: command, port-id token, size header,
/// payload. Note the field order differs from the compute frame.
pub fn write_result<W: Write>(writer: &mut W, frame: &ResultFrame) -> Result<()> {
    write_token(writer, Command::Result.as_str(), COMMAND_LEN)?;
    write_decimal(writer, frame.port.value(), PORT_LEN)?;
    write_decimal(writer, frame.payload.len() as u64, SIZE_LEN)?;
    writer.write_all(&frame.payload)?;
    Ok(())
}

/// Reads the body of a `result` request, command token already consumed.
pub fn read_result_body<R: Read>(reader: &mut R) -> Result<ResultFrame> {
    let port = PortId::from_value(read_decimal(reader, PORT_LEN)?);
    let size = read_decimal(reader, SIZE_LEN)? as usize;
    if size > MAX_PAYLOAD {
        return Err(ExecutionError::Protocol(format!(
            "Declared payload size {} exceeds limit",
            size
        )));
    }
    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload)?;
    Ok(ResultFrame { port, payload })
}

/// Writes the fixed-width decimal reply to `getSeed`.
pub fn write_seed<W: Write>(writer: &mut W, seed: u64) -> Result<()> {
    write_decimal(writer, seed, SEED_LEN)
}

/// Reads the fixed-width decimal reply to `getSeed`.
pub fn read_seed<R: Read>(reader: &mut R) -> Result<u64> {
    read_decimal(reader, SEED_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_command_tokens_round_trip() {
        for command in [
            Command::Ready,
            Command::Compute,
            Command::Result,
            Command::GetSeed,
            Command::NoData,
        ] {
            let mut wire = Vec::new();
            write_command(&mut wire, command).unwrap();
            assert_eq!(wire.len(), COMMAND_LEN);
            assert_eq!(read_command(&mut Cursor::new(wire)).unwrap(), command);
        }
    }

    #[test]
    fn test_unknown_command_is_protocol_error() {
        let mut wire = vec![b' '; COMMAND_LEN];
        wire[..7].copy_from_slice(b"destroy");
        let err = read_command(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, ExecutionError::Protocol(_)));
    }

    #[test]
    fn test_compute_frame_round_trip() {
        let frame = ComputeFrame {
            mode: SerializationMode::Binary,
            port: PortId::from_value(987654321),
            payload: vec![0xAB; 1500],
        };
        let mut wire = Vec::new();
        write_compute(&mut wire, &frame).unwrap();

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_command(&mut cursor).unwrap(), Command::Compute);
        assert_eq!(read_compute_body(&mut cursor).unwrap(), frame);
    }

    #[test]
    fn test_result_frame_round_trip_empty_payload() {
        let frame = ResultFrame {
            port: PortId::from_value(7),
            payload: Vec::new(),
        };
        let mut wire = Vec::new();
        write_result(&mut wire, &frame).unwrap();

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_command(&mut cursor).unwrap(), Command::Result);
        assert_eq!(read_result_body(&mut cursor).unwrap(), frame);
    }

    #[test]
    fn test_malformed_size_header() {
        let mut wire = Vec::new();
        write_token(&mut wire, "result", COMMAND_LEN).unwrap();
        write_decimal(&mut wire, 1, PORT_LEN).unwrap();
        write_token(&mut wire, "not-a-number", SIZE_LEN).unwrap();

        let mut cursor = Cursor::new(wire);
        read_command(&mut cursor).unwrap();
        let err = read_result_body(&mut cursor).unwrap_err();
        assert!(matches!(err, ExecutionError::Protocol(_)));
    }

    #[test]
    fn test_oversized_declared_payload_rejected() {
        let mut wire = Vec::new();
        write_decimal(&mut wire, (MAX_PAYLOAD as u64) + 1, SIZE_LEN).unwrap();
        write_decimal(&mut wire, 0, MODE_LEN).unwrap();
        write_decimal(&mut wire, 0, PORT_LEN).unwrap();

        let err = read_compute_body(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, ExecutionError::Protocol(_)));
    }

    #[test]
    fn test_seed_round_trip() {
        let mut wire = Vec::new();
        write_seed(&mut wire, u64::MAX).unwrap();
        assert_eq!(wire.len(), SEED_LEN);
        assert_eq!(read_seed(&mut Cursor::new(wire)).unwrap(), u64::MAX);
    }
}
