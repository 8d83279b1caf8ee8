//! u-blox UBX Binary Protocol Implementation
//!
//! UBX frames carry a class/id pair, a little-endian length and a payload,
//! protected by an 8-bit Fletcher checksum.
//!
//! # Format
//! ```text
//! B5 62 <class> <id> <len_lo> <len_hi> <payload...> <ck_a> <ck_b>
//! ```
//!
//! The checksum covers everything between the sync bytes and the checksum
//! itself: class, id, both length bytes and the payload.

use crate::error::ParseError;
use crate::{EncodeFrame, ProtocolCodec};

/// First sync byte (`µ`)
pub const SYNC_1: u8 = 0xB5;
/// Second sync byte (`b`)
pub const SYNC_2: u8 = 0x62;

/// Sync + class + id + length
pub const HEADER_LEN: usize = 6;
/// Trailing checksum pair
pub const CHECKSUM_LEN: usize = 2;

/// Largest payload the codec will wait for before resyncing
const MAX_PAYLOAD_LEN: usize = 1024;

/// Largest payload the 16-bit length field can describe
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Message classes
pub mod class {
    pub const NAV: u8 = 0x01;
    pub const ACK: u8 = 0x05;
    pub const CFG: u8 = 0x06;
    pub const MON: u8 = 0x0A;
}

/// Message ids, scoped by class
pub mod id {
    pub const NAV_POSLLH: u8 = 0x02;
    pub const NAV_STATUS: u8 = 0x03;
    pub const ACK_NAK: u8 = 0x00;
    pub const ACK_ACK: u8 = 0x01;
    pub const MON_VER: u8 = 0x04;
    pub const CFG_VALSET: u8 = 0x8A;
}

/// Configuration key ids set by the host during bring-up
pub mod keys {
    pub const CFG_USBOUTPROT_UBX: u32 = 0x1078_0001;
    pub const CFG_USBOUTPROT_NMEA: u32 = 0x1078_0002;
    pub const CFG_NAVSPG_FIXMODE: u32 = 0x2011_0011;
    pub const CFG_NAVSPG_DYNMODEL: u32 = 0x2011_0021;
    pub const CFG_MSGOUT_UBX_NAV_POSLLH_USB: u32 = 0x2091_002C;
    pub const CFG_MSGOUT_UBX_NAV_STATUS_USB: u32 = 0x2091_001D;
    pub const CFG_RATE_MEAS: u32 = 0x3021_0001;
    pub const CFG_RATE_NAV: u32 = 0x3021_0002;
}

/// Header that identifies a CFG-VALSET request
pub const CFG_VALSET_HEADER: [u8; 4] = [SYNC_1, SYNC_2, class::CFG, id::CFG_VALSET];

/// Returns true if `data` starts with a CFG-VALSET header
///
/// Only the first four bytes are inspected; the rest of the frame is not
/// validated.
pub fn is_cfg_valset(data: &[u8]) -> bool {
    data.starts_with(&CFG_VALSET_HEADER)
}

/// 8-bit Fletcher checksum over `data`
pub fn fletcher8(data: &[u8]) -> (u8, u8) {
    data.iter().fold((0u8, 0u8), |(ck_a, ck_b), &byte| {
        let ck_a = ck_a.wrapping_add(byte);
        (ck_a, ck_b.wrapping_add(ck_a))
    })
}

/// Little-endian length field for a payload of `len` bytes
///
/// # Panics
///
/// If `len` exceeds [`MAX_FRAME_PAYLOAD`].
fn length_field(len: usize) -> [u8; 2] {
    match u16::try_from(len) {
        Ok(len) => len.to_le_bytes(),
        Err(_) => panic!("UBX payload of {len} bytes exceeds the 16-bit length field"),
    }
}

/// Checksum of a frame with the given class, id and payload
///
/// # Panics
///
/// If `payload` is longer than [`MAX_FRAME_PAYLOAD`].
pub fn checksum(class: u8, id: u8, payload: &[u8]) -> (u8, u8) {
    let len = length_field(payload.len());
    let (mut ck_a, mut ck_b) = fletcher8(&[class, id, len[0], len[1]]);
    for &byte in payload {
        ck_a = ck_a.wrapping_add(byte);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    (ck_a, ck_b)
}

/// A UBX frame
///
/// The payload must not exceed [`MAX_FRAME_PAYLOAD`] bytes; encoding or
/// checksumming a larger frame panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UbxFrame {
    pub class: u8,
    pub id: u8,
    pub payload: Vec<u8>,
}

impl UbxFrame {
    /// Create a frame from its parts
    pub fn new(class: u8, id: u8, payload: Vec<u8>) -> Self {
        Self { class, id, payload }
    }

    /// Checksum pair for this frame
    pub fn checksum(&self) -> (u8, u8) {
        checksum(self.class, self.id, &self.payload)
    }

    /// Encoded length including sync, header and checksum
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + CHECKSUM_LEN
    }

    /// Parse one complete frame, verifying sync bytes, length and checksum
    pub fn parse(frame: &[u8]) -> Result<Self, ParseError> {
        if frame.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(ParseError::Incomplete {
                needed: HEADER_LEN + CHECKSUM_LEN - frame.len(),
            });
        }

        if frame[0] != SYNC_1 || frame[1] != SYNC_2 {
            return Err(ParseError::InvalidFrame("missing sync bytes".into()));
        }

        let payload_len = u16::from_le_bytes([frame[4], frame[5]]) as usize;
        let total = HEADER_LEN + payload_len + CHECKSUM_LEN;
        if frame.len() < total {
            return Err(ParseError::Incomplete {
                needed: total - frame.len(),
            });
        }

        let parsed = Self::new(
            frame[2],
            frame[3],
            frame[HEADER_LEN..HEADER_LEN + payload_len].to_vec(),
        );
        let expected = parsed.checksum();
        let actual = (frame[total - 2], frame[total - 1]);
        if expected != actual {
            return Err(ParseError::ChecksumMismatch { expected, actual });
        }

        Ok(parsed)
    }
}

impl EncodeFrame for UbxFrame {
    fn encode(&self) -> Vec<u8> {
        let len = length_field(self.payload.len());
        let mut frame = Vec::with_capacity(self.encoded_len());
        frame.extend_from_slice(&[SYNC_1, SYNC_2, self.class, self.id, len[0], len[1]]);
        frame.extend_from_slice(&self.payload);

        let (ck_a, ck_b) = self.checksum();
        frame.push(ck_a);
        frame.push(ck_b);
        frame
    }
}

/// ACK-ACK acknowledging the message `class`/`id`
pub fn ack_ack(acked_class: u8, acked_id: u8) -> UbxFrame {
    UbxFrame::new(class::ACK, id::ACK_ACK, vec![acked_class, acked_id])
}

/// NAV-POSLLH geodetic position solution
///
/// Seven little-endian 4-byte fields, 28 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NavPosllh {
    /// GPS time of week (ms)
    pub itow: u32,
    /// Longitude (1e-7 deg)
    pub lon: i32,
    /// Latitude (1e-7 deg)
    pub lat: i32,
    /// Height above ellipsoid (mm)
    pub height: i32,
    /// Height above mean sea level (mm)
    pub h_msl: i32,
    /// Horizontal accuracy estimate (mm)
    pub h_acc: u32,
    /// Vertical accuracy estimate (mm)
    pub v_acc: u32,
}

impl NavPosllh {
    /// Payload length on the wire
    pub const PAYLOAD_LEN: usize = 28;

    /// The fixed solution reported by the simulator: fields hold 0 through 6
    pub const fn canned() -> Self {
        Self {
            itow: 0,
            lon: 1,
            lat: 2,
            height: 3,
            h_msl: 4,
            h_acc: 5,
            v_acc: 6,
        }
    }

    /// Serialize the payload
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(Self::PAYLOAD_LEN);
        payload.extend_from_slice(&self.itow.to_le_bytes());
        payload.extend_from_slice(&self.lon.to_le_bytes());
        payload.extend_from_slice(&self.lat.to_le_bytes());
        payload.extend_from_slice(&self.height.to_le_bytes());
        payload.extend_from_slice(&self.h_msl.to_le_bytes());
        payload.extend_from_slice(&self.h_acc.to_le_bytes());
        payload.extend_from_slice(&self.v_acc.to_le_bytes());
        payload
    }

    /// Deserialize the payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        if payload.len() < Self::PAYLOAD_LEN {
            return Err(ParseError::Incomplete {
                needed: Self::PAYLOAD_LEN - payload.len(),
            });
        }

        let word = |i: usize| {
            let start = i * 4;
            [
                payload[start],
                payload[start + 1],
                payload[start + 2],
                payload[start + 3],
            ]
        };

        Ok(Self {
            itow: u32::from_le_bytes(word(0)),
            lon: i32::from_le_bytes(word(1)),
            lat: i32::from_le_bytes(word(2)),
            height: i32::from_le_bytes(word(3)),
            h_msl: i32::from_le_bytes(word(4)),
            h_acc: u32::from_le_bytes(word(5)),
            v_acc: u32::from_le_bytes(word(6)),
        })
    }

    /// Wrap the payload in a NAV-POSLLH frame
    pub fn to_frame(&self) -> UbxFrame {
        UbxFrame::new(class::NAV, id::NAV_POSLLH, self.to_payload())
    }
}

/// One key/value item of a CFG-VALSET request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CfgItem {
    pub key: u32,
    pub value: u64,
}

/// Size in bytes of the value stored under `key`
///
/// Bits 28..30 of the key id encode the storage size.
pub fn cfg_value_len(key: u32) -> Result<usize, ParseError> {
    match (key >> 28) & 0x07 {
        // One bit, stored in a full byte
        0x01 => Ok(1),
        0x02 => Ok(1),
        0x03 => Ok(2),
        0x04 => Ok(4),
        0x05 => Ok(8),
        _ => Err(ParseError::InvalidConfigKey(key)),
    }
}

/// CFG-VALSET request payload
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CfgValset {
    /// Message version
    pub version: u8,
    /// Bit mask of configuration layers to apply to (bit 0 = RAM)
    pub layers: u8,
    /// Key/value pairs, in wire order
    pub items: Vec<CfgItem>,
}

impl CfgValset {
    /// Version and layer mask (1) followed by two reserved bytes
    const PREFIX_LEN: usize = 4;

    /// Layer mask bit for the volatile RAM layer
    pub const LAYER_RAM: u8 = 0x01;

    /// Create an empty request for the RAM layer
    pub fn ram() -> Self {
        Self {
            version: 0,
            layers: Self::LAYER_RAM,
            items: Vec::new(),
        }
    }

    /// Append a key/value item
    pub fn with(mut self, key: u32, value: u64) -> Self {
        self.items.push(CfgItem { key, value });
        self
    }

    /// Decode a CFG-VALSET payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        if payload.len() < Self::PREFIX_LEN {
            return Err(ParseError::Incomplete {
                needed: Self::PREFIX_LEN - payload.len(),
            });
        }

        let mut items = Vec::new();
        let mut rest = &payload[Self::PREFIX_LEN..];
        while !rest.is_empty() {
            if rest.len() < 4 {
                return Err(ParseError::Incomplete {
                    needed: 4 - rest.len(),
                });
            }
            let key = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            let value_len = cfg_value_len(key)?;
            rest = &rest[4..];
            if rest.len() < value_len {
                return Err(ParseError::Incomplete {
                    needed: value_len - rest.len(),
                });
            }

            let mut raw = [0u8; 8];
            raw[..value_len].copy_from_slice(&rest[..value_len]);
            items.push(CfgItem {
                key,
                value: u64::from_le_bytes(raw),
            });
            rest = &rest[value_len..];
        }

        Ok(Self {
            version: payload[0],
            layers: payload[1],
            items,
        })
    }

    /// Serialize the payload
    ///
    /// Fails if an item's key has no defined value width or the items do not
    /// fit in one frame.
    pub fn to_payload(&self) -> Result<Vec<u8>, ParseError> {
        let mut payload = vec![self.version, self.layers, 0, 0];
        for item in &self.items {
            let value_len = cfg_value_len(item.key)?;
            payload.extend_from_slice(&item.key.to_le_bytes());
            payload.extend_from_slice(&item.value.to_le_bytes()[..value_len]);
        }

        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(ParseError::InvalidFrame(format!(
                "VALSET payload of {} bytes exceeds {}",
                payload.len(),
                MAX_FRAME_PAYLOAD
            )));
        }
        Ok(payload)
    }

    /// Wrap the payload in a CFG-VALSET frame
    pub fn to_frame(&self) -> Result<UbxFrame, ParseError> {
        Ok(UbxFrame::new(class::CFG, id::CFG_VALSET, self.to_payload()?))
    }
}

/// Streaming UBX codec
///
/// Skips bytes until a sync pair, waits for the full frame announced by the
/// length field, and drops frames whose checksum does not verify.
pub struct UbxCodec {
    buffer: Vec<u8>,
}

impl UbxCodec {
    /// Create a new UBX codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    /// Find the start of a frame (B5 62 sequence)
    fn find_sync(&self) -> Option<usize> {
        self.buffer
            .windows(2)
            .position(|w| w[0] == SYNC_1 && w[1] == SYNC_2)
    }
}

impl Default for UbxCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec for UbxCodec {
    type Frame = UbxFrame;

    fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // Prevent buffer overflow
        let max = HEADER_LEN + MAX_PAYLOAD_LEN + CHECKSUM_LEN;
        if self.buffer.len() > max * 4 {
            let start = self.buffer.len() - max;
            self.buffer.drain(..start);
        }
    }

    fn next_frame(&mut self) -> Option<Self::Frame> {
        loop {
            let Some(sync_pos) = self.find_sync() else {
                // Keep a trailing first sync byte, its partner may be next
                let keep = usize::from(self.buffer.last() == Some(&SYNC_1));
                let drop = self.buffer.len() - keep;
                self.buffer.drain(..drop);
                return None;
            };

            // Discard noise before the sync pair
            if sync_pos > 0 {
                self.buffer.drain(..sync_pos);
            }

            if self.buffer.len() < HEADER_LEN {
                return None;
            }

            let payload_len = u16::from_le_bytes([self.buffer[4], self.buffer[5]]) as usize;
            if payload_len > MAX_PAYLOAD_LEN {
                tracing::warn!("UBX frame length {} too large, resyncing", payload_len);
                self.buffer.drain(..2);
                continue;
            }

            let total = HEADER_LEN + payload_len + CHECKSUM_LEN;
            if self.buffer.len() < total {
                return None;
            }

            match UbxFrame::parse(&self.buffer[..total]) {
                Ok(frame) => {
                    self.buffer.drain(..total);
                    return Some(frame);
                }
                Err(e) => {
                    tracing::warn!("Failed to parse UBX frame: {}", e);
                    // The sync pair may have been payload noise; resync past it
                    self.buffer.drain(..2);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}
