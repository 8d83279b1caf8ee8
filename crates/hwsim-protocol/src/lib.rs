//! Simulator Protocol Library
//!
//! This crate provides parsing and encoding for the two serial protocols the
//! hardware simulators terminate:
//!
//! - **STN1110 / ELM327**: CR-terminated ASCII commands (`ATZ`, `STFPA...`, `STM`)
//! - **u-blox UBX**: binary frames with sync bytes, a length field and a
//!   Fletcher checksum
//!
//! # Architecture
//!
//! Each protocol module provides:
//! - A streaming codec that handles partial data
//! - Frame/command encoding to wire bytes
//! - Typed payloads for the messages the host actually exchanges
//!
//! # Example
//!
//! ```rust
//! use hwsim_protocol::{EncodeFrame, ProtocolCodec};
//! use hwsim_protocol::stn::{StnCodec, StnCommand};
//! use hwsim_protocol::ubx;
//!
//! let mut codec = StnCodec::new();
//! codec.push_bytes(b"STFPA201,FFF\r");
//! let line = codec.next_frame().unwrap();
//! assert!(matches!(StnCommand::decode(&line), StnCommand::AddFilter(_)));
//!
//! let ack = ubx::ack_ack(ubx::class::CFG, ubx::id::CFG_VALSET);
//! assert_eq!(ack.encode(), [0xB5, 0x62, 0x05, 0x01, 0x02, 0x00, 0x06, 0x8A, 0x98, 0xC1]);
//! ```

pub mod error;
pub mod stn;
pub mod ubx;

pub use error::ParseError;
pub use stn::{CanFilter, StnCodec, StnCommand};
pub use ubx::{NavPosllh, UbxCodec, UbxFrame};

/// Trait for protocol codecs that can parse incoming data streams
pub trait ProtocolCodec {
    /// The unit produced by this codec
    type Frame;

    /// Push raw bytes into the codec's buffer
    fn push_bytes(&mut self, data: &[u8]);

    /// Try to extract the next complete frame from the buffer
    fn next_frame(&mut self) -> Option<Self::Frame>;

    /// Clear the internal buffer
    fn clear(&mut self);
}

/// Trait for frames that can be encoded to bytes
pub trait EncodeFrame {
    /// Encode this frame to its wire format
    fn encode(&self) -> Vec<u8>;
}
