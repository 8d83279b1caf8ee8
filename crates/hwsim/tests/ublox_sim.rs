//! End-to-end tests for the u-blox simulator

use std::time::Duration;

use hwsim::protocol::ubx::{self, CfgValset, NavPosllh, UbxFrame};
use hwsim::protocol::EncodeFrame;
use hwsim::transport::split_bytes;
use hwsim::{ConfigState, UbloxConfig, UbloxSimulator};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const ACK_VALSET: [u8; 10] = [0xB5, 0x62, 0x05, 0x01, 0x02, 0x00, 0x06, 0x8A, 0x98, 0xC1];

struct Harness {
    host: DuplexStream,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<std::io::Result<UbloxSimulator>>,
}

fn start() -> Harness {
    let config = UbloxConfig::default();
    let (host, sim_side) = tokio::io::duplex(64 * 1024);
    let (mut reader, writer) = split_bytes(sim_side, config.read_size, READ_TIMEOUT);
    let (shutdown, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut sim = UbloxSimulator::new(&config);
        sim.run(&mut reader, writer, shutdown_rx).await.map(|_| sim)
    });

    Harness {
        host,
        shutdown,
        handle,
    }
}

async fn read_n(host: &mut DuplexStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    tokio::time::timeout(Duration::from_secs(3), host.read_exact(&mut buf))
        .await
        .expect("output timed out")
        .unwrap();
    buf
}

/// Skip output up to and including the first sync byte, returning what was skipped
async fn skip_to_sync(host: &mut DuplexStream) -> Vec<u8> {
    let mut skipped = Vec::new();
    loop {
        let byte = read_n(host, 1).await[0];
        if byte == ubx::SYNC_1 {
            return skipped;
        }
        skipped.push(byte);
    }
}

async fn finish(harness: Harness) -> UbloxSimulator {
    harness.shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(3), harness.handle)
        .await
        .expect("simulator did not shut down")
        .unwrap()
        .unwrap()
}

/// Check the ACK and the position frames that follow a configuration request
async fn expect_configured_output(host: &mut DuplexStream) {
    let noise = skip_to_sync(host).await;
    assert!(!noise.contains(&ubx::SYNC_1));

    let mut ack = vec![ubx::SYNC_1];
    ack.extend(read_n(host, ACK_VALSET.len() - 1).await);
    assert_eq!(ack, ACK_VALSET);

    let frame_len = ubx::HEADER_LEN + NavPosllh::PAYLOAD_LEN + ubx::CHECKSUM_LEN;
    for _ in 0..3 {
        let bytes = read_n(host, frame_len).await;
        let frame = UbxFrame::parse(&bytes).unwrap();
        assert_eq!(frame.class, ubx::class::NAV);
        assert_eq!(frame.id, ubx::id::NAV_POSLLH);
        assert_eq!(
            NavPosllh::from_payload(&frame.payload).unwrap(),
            NavPosllh::canned()
        );
    }
}

#[tokio::test]
async fn test_noise_until_configured() {
    let mut h = start();

    let noise = read_n(&mut h.host, 3 * UbloxConfig::default().noise_len).await;
    assert!(!noise.contains(&ubx::SYNC_1));

    let sim = finish(h).await;
    assert_eq!(sim.state().config_state(), ConfigState::Unconfigured);
}

#[tokio::test]
async fn test_valset_header_is_acknowledged() {
    let mut h = start();

    h.host.write_all(&ubx::CFG_VALSET_HEADER).await.unwrap();
    expect_configured_output(&mut h.host).await;

    let sim = finish(h).await;
    assert_eq!(sim.state().config_state(), ConfigState::Configured);
}

#[tokio::test]
async fn test_full_valset_frame_is_acknowledged() {
    let mut h = start();

    let request = CfgValset::ram()
        .with(ubx::keys::CFG_RATE_MEAS, 100)
        .with(ubx::keys::CFG_MSGOUT_UBX_NAV_POSLLH_USB, 1)
        .to_frame()
        .unwrap();
    h.host.write_all(&request.encode()).await.unwrap();
    expect_configured_output(&mut h.host).await;

    let sim = finish(h).await;
    assert_eq!(sim.state().config_state(), ConfigState::Configured);
}

#[tokio::test]
async fn test_other_input_keeps_noise() {
    let mut h = start();

    // MON-VER poll and unrelated bytes
    h.host
        .write_all(&UbxFrame::new(ubx::class::MON, ubx::id::MON_VER, Vec::new()).encode())
        .await
        .unwrap();
    h.host.write_all(b"$GPGGA,hello\r\n").await.unwrap();

    let noise = read_n(&mut h.host, 4 * UbloxConfig::default().noise_len).await;
    assert!(!noise.contains(&ubx::SYNC_1));

    let sim = finish(h).await;
    assert_eq!(sim.state().config_state(), ConfigState::Unconfigured);
}

#[tokio::test]
async fn test_host_close_ends_run() {
    let h = start();
    drop(h.host);

    // Ends either on the failed write or on the closed read, without panicking
    tokio::time::timeout(Duration::from_secs(3), h.handle)
        .await
        .expect("simulator did not notice the close")
        .unwrap()
        .ok();
}
