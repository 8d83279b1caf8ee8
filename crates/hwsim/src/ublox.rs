//! u-blox GNSS receiver simulator
//!
//! Until the host sends a CFG-VALSET the receiver only produces noise. The
//! first VALSET is acknowledged and switches the receiver to reporting a fixed
//! NAV-POSLLH solution on every iteration. There is no way back to the
//! unconfigured state short of restarting the process.

use std::io;

use hwsim_protocol::ubx::{self, CfgValset, NavPosllh, UbxCodec, UbxFrame};
use hwsim_protocol::{EncodeFrame, ProtocolCodec};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::UbloxConfig;
use crate::transport::{ByteReader, ReadEvent, SharedWriter};

/// Whether the host has configured the receiver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigState {
    #[default]
    Unconfigured,
    Configured,
}

/// Receiver state owned by the simulator loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UbloxState {
    config_state: ConfigState,
    noise_len: usize,
    position: NavPosllh,
}

impl UbloxState {
    /// Unconfigured receiver emitting `noise_len` bytes of noise per iteration
    pub fn new(noise_len: usize) -> Self {
        Self {
            config_state: ConfigState::Unconfigured,
            noise_len,
            position: NavPosllh::canned(),
        }
    }

    pub fn config_state(&self) -> ConfigState {
        self.config_state
    }

    /// Bytes to write at the start of an iteration
    pub fn next_output<G: Rng>(&self, rng: &mut G) -> Vec<u8> {
        match self.config_state {
            ConfigState::Unconfigured => noise(rng, self.noise_len),
            ConfigState::Configured => self.position.to_frame().encode(),
        }
    }

    /// Handle bytes read from the host, returning the reply frame if any
    ///
    /// Only a CFG-VALSET header is recognized; everything else is ignored.
    pub fn on_input(&mut self, data: &[u8]) -> Option<UbxFrame> {
        if !ubx::is_cfg_valset(data) {
            return None;
        }

        if self.config_state == ConfigState::Unconfigured {
            info!("Receiver configured");
            self.config_state = ConfigState::Configured;
        }
        Some(ubx::ack_ack(ubx::class::CFG, ubx::id::CFG_VALSET))
    }
}

/// Random bytes that never contain the first UBX sync byte
fn noise<G: Rng>(rng: &mut G, len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| {
            let b = rng.gen_range(0..u8::MAX);
            if b >= ubx::SYNC_1 {
                b + 1
            } else {
                b
            }
        })
        .collect()
}

/// The u-blox simulator
pub struct UbloxSimulator {
    state: UbloxState,
    rng: StdRng,
    codec: UbxCodec,
}

impl UbloxSimulator {
    /// Create an unconfigured simulator
    pub fn new(config: &UbloxConfig) -> Self {
        Self {
            state: UbloxState::new(config.noise_len),
            rng: StdRng::from_entropy(),
            codec: UbxCodec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> &UbloxState {
        &self.state
    }

    /// Serve the host until shutdown is signalled or the stream closes
    ///
    /// Each iteration writes first, then reads. Dropping the shutdown sender
    /// counts as a shutdown request.
    pub async fn run<R, W>(
        &mut self,
        reader: &mut ByteReader<R>,
        writer: SharedWriter<W>,
        mut shutdown: watch::Receiver<bool>,
    ) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("u-blox simulator running");

        loop {
            let output = self.state.next_output(&mut self.rng);
            writer.write_bytes(&output).await?;

            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("Shutdown requested");
                    break;
                }
                event = reader.read_bytes() => event?,
            };

            let data = match event {
                ReadEvent::Data(data) => data,
                ReadEvent::Timeout => continue,
                ReadEvent::Closed => {
                    info!("Host closed the stream");
                    break;
                }
            };

            self.log_frames(&data);
            if let Some(reply) = self.state.on_input(&data) {
                writer.write_frame(&reply).await?;
            }
        }

        info!("u-blox simulator stopped");
        Ok(())
    }

    /// Log complete frames found in the host's traffic
    fn log_frames(&mut self, data: &[u8]) {
        self.codec.push_bytes(data);
        while let Some(frame) = self.codec.next_frame() {
            if frame.class != ubx::class::CFG || frame.id != ubx::id::CFG_VALSET {
                debug!(
                    "Ignoring UBX frame class 0x{:02X} id 0x{:02X}",
                    frame.class, frame.id
                );
                continue;
            }

            match CfgValset::from_payload(&frame.payload) {
                Ok(valset) => {
                    for item in &valset.items {
                        info!(
                            "VALSET layers 0x{:02X}: key 0x{:08X} = {}",
                            valset.layers, item.key, item.value
                        );
                    }
                }
                Err(e) => warn!("Undecodable VALSET payload: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ACK_VALSET: [u8; 10] = [0xB5, 0x62, 0x05, 0x01, 0x02, 0x00, 0x06, 0x8A, 0x98, 0xC1];

    #[test]
    fn test_starts_unconfigured() {
        let state = UbloxState::new(128);
        assert_eq!(state.config_state(), ConfigState::Unconfigured);
    }

    #[test]
    fn test_noise_before_configuration() {
        let state = UbloxState::new(128);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..16 {
            let output = state.next_output(&mut rng);
            assert_eq!(output.len(), 128);
            assert!(!output.contains(&ubx::SYNC_1));
        }
    }

    #[test]
    fn test_valset_header_configures() {
        let mut state = UbloxState::new(128);
        let reply = state.on_input(&[0xB5, 0x62, 0x06, 0x8A]).unwrap();
        assert_eq!(reply.encode(), ACK_VALSET);
        assert_eq!(state.config_state(), ConfigState::Configured);
    }

    #[test]
    fn test_valset_header_with_trailing_bytes() {
        let mut state = UbloxState::new(128);
        assert!(state.on_input(&[0xB5, 0x62, 0x06, 0x8A, 0x00, 0x13]).is_some());
        assert_eq!(state.config_state(), ConfigState::Configured);
    }

    #[test]
    fn test_other_input_ignored() {
        let mut state = UbloxState::new(128);
        for input in [
            &[0xB5, 0x62, 0x06, 0x8B][..],
            &[0xB5, 0x62, 0x06][..],
            &[0x00, 0xB5, 0x62, 0x06, 0x8A][..],
            &[][..],
        ] {
            assert!(state.on_input(input).is_none());
        }
        assert_eq!(state.config_state(), ConfigState::Unconfigured);
    }

    #[test]
    fn test_configured_is_terminal() {
        let mut state = UbloxState::new(128);
        state.on_input(&ubx::CFG_VALSET_HEADER);
        state.on_input(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(state.config_state(), ConfigState::Configured);

        // A repeated VALSET is acknowledged again
        assert!(state.on_input(&ubx::CFG_VALSET_HEADER).is_some());
        assert_eq!(state.config_state(), ConfigState::Configured);
    }

    #[test]
    fn test_position_after_configuration() {
        let mut state = UbloxState::new(128);
        state.on_input(&ubx::CFG_VALSET_HEADER);

        let mut rng = StdRng::seed_from_u64(7);
        let output = state.next_output(&mut rng);
        let frame = UbxFrame::parse(&output).unwrap();
        assert_eq!(frame.class, ubx::class::NAV);
        assert_eq!(frame.id, ubx::id::NAV_POSLLH);
        assert_eq!(
            NavPosllh::from_payload(&frame.payload).unwrap(),
            NavPosllh::canned()
        );
    }

    proptest! {
        #[test]
        fn prop_noise_never_contains_sync(seed in any::<u64>(), len in 0usize..1024) {
            let mut rng = StdRng::seed_from_u64(seed);
            let output = noise(&mut rng, len);
            prop_assert_eq!(output.len(), len);
            prop_assert!(!output.contains(&ubx::SYNC_1));
        }

        #[test]
        fn prop_configuration_is_terminal(inputs in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..16), 0..16)) {
            let mut state = UbloxState::new(16);
            state.on_input(&ubx::CFG_VALSET_HEADER);
            for input in &inputs {
                state.on_input(input);
                prop_assert_eq!(state.config_state(), ConfigState::Configured);
            }
        }
    }
}
