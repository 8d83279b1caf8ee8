//! Bus monitor streaming task
//!
//! While the adapter is monitoring it writes a preamble and then the canned
//! bus lines every interval. The task is stopped cooperatively: the stop
//! signal is checked before each burst and raced against each delay, so it
//! exits within one interval. [`MonitorTask::stop`] waits for the exit, which
//! guarantees no monitor line is written after `stop` returns.

use std::io;
use std::time::Duration;

use hwsim_protocol::stn::{MONITOR_LINES, MONITOR_PREAMBLE};
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::SharedWriter;

/// Handle to a running monitor task
pub struct MonitorTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MonitorTask {
    /// Spawn the task writing to `writer` every `interval`
    pub fn spawn<W>(writer: SharedWriter<W>, interval: Duration) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            if let Err(e) = run_monitor(&writer, interval, stop_rx).await {
                warn!("Monitor task write failed: {}", e);
            }
        });

        Self { stop_tx, handle }
    }

    /// Signal the task and wait until it has fully terminated
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!("Monitor task ended abnormally: {}", e);
        }
    }
}

async fn run_monitor<W>(
    writer: &SharedWriter<W>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug!("Monitor task started");
    writer.write_text(MONITOR_PREAMBLE).await?;

    loop {
        if *stop_rx.borrow_and_update() {
            break;
        }

        for line in MONITOR_LINES {
            writer.write_line(line).await?;
        }

        tokio::select! {
            // A closed channel means the handle was dropped; stop as well
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!("Monitor task stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    const INTERVAL: Duration = Duration::from_millis(10);

    fn burst() -> String {
        MONITOR_LINES.iter().map(|l| format!("{l}\r")).collect()
    }

    #[tokio::test]
    async fn test_writes_preamble_then_bursts() {
        let (mut peer, sim) = tokio::io::duplex(64 * 1024);
        let task = MonitorTask::spawn(SharedWriter::new(sim), INTERVAL);

        let expected = format!("{}{}{}", MONITOR_PREAMBLE, burst(), burst());
        let mut buf = vec![0u8; expected.len()];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);

        task.stop().await;
    }

    #[tokio::test]
    async fn test_nothing_written_after_stop() {
        let (mut peer, sim) = tokio::io::duplex(64 * 1024);
        // Keep a writer alive so the stream stays open after the task exits
        let writer = SharedWriter::new(sim);
        let task = MonitorTask::spawn(writer.clone(), INTERVAL);

        tokio::time::sleep(INTERVAL * 3).await;
        task.stop().await;

        // Drain what was written before the stop, then expect silence
        let mut buf = vec![0u8; 64 * 1024];
        let n = peer.read(&mut buf).await.unwrap();
        let output = String::from_utf8_lossy(&buf[..n]).into_owned();
        assert!(output.starts_with(MONITOR_PREAMBLE));
        assert!(output.ends_with('\r'));

        let more = tokio::time::timeout(INTERVAL * 5, peer.read(&mut buf)).await;
        assert!(more.is_err(), "monitor wrote after stop");
    }

    #[tokio::test]
    async fn test_write_failure_ends_task() {
        let (peer, sim) = tokio::io::duplex(64);
        drop(peer);

        let task = MonitorTask::spawn(SharedWriter::new(sim), INTERVAL);
        tokio::time::timeout(Duration::from_secs(1), task.handle)
            .await
            .expect("task should exit on write error")
            .unwrap();
    }
}
