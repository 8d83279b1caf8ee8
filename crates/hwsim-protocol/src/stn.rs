//! STN1110 / ELM327 Text Protocol Implementation
//!
//! The adapter speaks a line-oriented ASCII protocol. Requests are terminated
//! by a carriage return; replies are CR-terminated lines followed by a bare
//! `>` prompt once the adapter is ready for the next request.
//!
//! # Format
//! - Requests: `ATZ\r`, `STFPA201,FFF\r`, ...
//! - Replies: `OK\r>`, `ERROR\r>`, `?\r>`
//! - Terminator: `\r` (0x0D)
//!
//! # Supported Commands
//! - `ATZ` - Reset, answers with the identification line
//! - `ATE0` - Echo off
//! - `ATH1` - Headers on
//! - `ATS0` - Spaces off
//! - `STFPA` - Add a pass filter: `STFPAiii,mmm` (hex id, hex mask)
//! - `STM` - Start bus monitoring

use crate::error::ParseError;
use crate::{EncodeFrame, ProtocolCodec};

/// Line terminator for both directions
pub const TERMINATOR: u8 = b'\r';

/// Prompt written once the adapter is idle
pub const PROMPT: &str = ">";

/// Generic acknowledgement
pub const OK: &str = "OK";

/// Reply to a malformed command
pub const ERROR: &str = "ERROR";

/// Reply to an unrecognized command
pub const UNKNOWN: &str = "?";

/// Reply once bus monitoring has been interrupted
pub const STOPPED: &str = "STOPPED";

/// Identification line written after a reset
pub const IDENTIFICATION: &str = "ELM327 v1.5simu";

/// Token written when monitoring starts, before the first bus line
pub const MONITOR_PREAMBLE: &str = "some garbage";

/// Bus traffic repeated while monitoring (header + data, no spaces)
pub const MONITOR_LINES: [&str; 5] = [
    "0850138000000000000",
    "20113480000571C5400",
    "2407F46007F46000000",
    "4307F00000000000000",
    "4B0AA00BB00CC00DD00",
];

/// Prefix of the pass filter command
const FILTER_PREFIX: &str = "STFPA";

/// Number of hex digits in a CAN id or mask
const FILTER_DIGITS: usize = 3;

/// Maximum line length kept in the codec buffer
const MAX_LINE_LEN: usize = 128;

/// A pass filter registered with `STFPA`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanFilter {
    /// 11-bit CAN identifier, three upper-case hex digits
    pub id: String,
    /// Identifier mask, three upper-case hex digits
    pub mask: String,
}

/// STN1110 adapter command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StnCommand {
    /// Reset: ATZ
    Reset,
    /// Echo off: ATE0
    EchoOff,
    /// Headers on: ATH1
    HeadersOn,
    /// Spaces off: ATS0
    SpacesOff,
    /// Add pass filter: STFPA201,FFF
    AddFilter(CanFilter),
    /// `STFPA` line whose parameters do not match `XXX,XXX`
    MalformedFilter(String),
    /// Start monitoring: STM
    StartMonitor,
    /// Unknown/unrecognized command
    Unknown(String),
}

impl StnCommand {
    /// Decode a line with its terminator already stripped
    ///
    /// Decoding is total: anything unrecognized becomes [`StnCommand::Unknown`].
    pub fn decode(line: &str) -> Self {
        match line {
            "ATZ" => StnCommand::Reset,
            "ATE0" => StnCommand::EchoOff,
            "ATH1" => StnCommand::HeadersOn,
            "ATS0" => StnCommand::SpacesOff,
            "STM" => StnCommand::StartMonitor,
            _ => match line.strip_prefix(FILTER_PREFIX) {
                Some(params) => match parse_can_filter(params) {
                    Ok(filter) => StnCommand::AddFilter(filter),
                    Err(e) => {
                        tracing::debug!("Rejecting filter command {:?}: {}", line, e);
                        StnCommand::MalformedFilter(line.to_string())
                    }
                },
                None => StnCommand::Unknown(line.to_string()),
            },
        }
    }
}

/// Encodes the command as the host would send it, terminator included
impl EncodeFrame for StnCommand {
    fn encode(&self) -> Vec<u8> {
        match self {
            StnCommand::Reset => encode_line("ATZ"),
            StnCommand::EchoOff => encode_line("ATE0"),
            StnCommand::HeadersOn => encode_line("ATH1"),
            StnCommand::SpacesOff => encode_line("ATS0"),
            StnCommand::AddFilter(filter) => {
                encode_line(&format!("{}{},{}", FILTER_PREFIX, filter.id, filter.mask))
            }
            StnCommand::StartMonitor => encode_line("STM"),
            StnCommand::MalformedFilter(raw) | StnCommand::Unknown(raw) => encode_line(raw),
        }
    }
}

/// Parse `iii,mmm` filter parameters
///
/// Both fields must be exactly three characters from `0-9A-F`. Anything after
/// the mask is ignored.
pub fn parse_can_filter(params: &str) -> Result<CanFilter, ParseError> {
    let bytes = params.as_bytes();
    let mask_start = FILTER_DIGITS + 1;
    let end = mask_start + FILTER_DIGITS;

    if bytes.len() < end {
        return Err(ParseError::InvalidFilter(format!(
            "expected {} characters, got {}",
            end,
            bytes.len()
        )));
    }

    let id = &bytes[..FILTER_DIGITS];
    let mask = &bytes[mask_start..end];

    if !id.iter().all(is_upper_hex) {
        return Err(ParseError::InvalidFilter(format!(
            "id {:?} is not hex",
            String::from_utf8_lossy(id)
        )));
    }
    if bytes[FILTER_DIGITS] != b',' {
        return Err(ParseError::InvalidFilter("missing ',' separator".into()));
    }
    if !mask.iter().all(is_upper_hex) {
        return Err(ParseError::InvalidFilter(format!(
            "mask {:?} is not hex",
            String::from_utf8_lossy(mask)
        )));
    }

    // Only ASCII was accepted above, so these slices are valid UTF-8 boundaries
    Ok(CanFilter {
        id: params[..FILTER_DIGITS].to_string(),
        mask: params[mask_start..end].to_string(),
    })
}

fn is_upper_hex(b: &u8) -> bool {
    matches!(b, b'0'..=b'9' | b'A'..=b'F')
}

/// Append the line terminator to `text`
pub fn encode_line(text: &str) -> Vec<u8> {
    let mut line = Vec::with_capacity(text.len() + 1);
    line.extend_from_slice(text.as_bytes());
    line.push(TERMINATOR);
    line
}

/// Streaming line codec
///
/// Splits the inbound byte stream on `\r` and yields each line without its
/// terminator. Lines are not decoded here because a monitoring adapter treats
/// any line as an interrupt.
pub struct StnCodec {
    buffer: Vec<u8>,
}

impl StnCodec {
    /// Create a new STN codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_LINE_LEN),
        }
    }
}

impl Default for StnCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec for StnCodec {
    type Frame = String;

    fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // Prevent buffer overflow from an unterminated stream
        if !self.buffer.contains(&TERMINATOR) && self.buffer.len() > MAX_LINE_LEN {
            let start = self.buffer.len() - MAX_LINE_LEN;
            self.buffer.drain(..start);
        }
    }

    fn next_frame(&mut self) -> Option<Self::Frame> {
        let term_pos = self.buffer.iter().position(|&b| b == TERMINATOR)?;
        let line: Vec<u8> = self.buffer.drain(..=term_pos).collect();
        Some(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned())
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}
