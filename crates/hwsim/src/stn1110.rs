//! STN1110 OBD adapter simulator
//!
//! Answers the handful of AT/ST commands the host sends during bring-up and
//! then streams canned CAN traffic once monitoring starts. While monitoring,
//! any received line interrupts the stream: the monitor task is stopped and
//! joined before `STOPPED` is written, so the reply never interleaves with a
//! late bus line.

use std::collections::HashSet;
use std::io;

use hwsim_protocol::stn::{self, CanFilter, StnCodec, StnCommand};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::StnConfig;
use crate::monitor::MonitorTask;
use crate::transport::{FrameReader, ReadEvent, SharedWriter};

/// CAN ids registered with `STFPA`
///
/// Ids are only ever added one at a time or cleared all at once by a reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    ids: HashSet<String>,
}

impl FilterSet {
    /// Register the id of `filter`; returns false if it was already present
    pub fn insert(&mut self, filter: &CanFilter) -> bool {
        self.ids.insert(filter.id.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

/// Whether the monitor task is streaming
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SimulatorMode {
    #[default]
    Idle,
    Monitoring,
}

/// State owned by the simulator loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StnState {
    pub filters: FilterSet,
    pub mode: SimulatorMode,
}

/// What the loop must do after a command was applied to the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Write the line, then the prompt
    Reply(&'static str),
    /// Wait out the reset delay, then write the identification and prompt
    Identify,
    /// Spawn the monitor task; nothing is written yet
    StartMonitor,
}

/// Apply `command` to `state` and return the reaction to carry out
///
/// Must only be called while idle: in monitoring mode lines are not commands.
pub fn handle_command(state: &mut StnState, command: StnCommand) -> Reaction {
    match command {
        StnCommand::Reset => {
            state.filters.clear();
            Reaction::Identify
        }
        StnCommand::EchoOff | StnCommand::HeadersOn | StnCommand::SpacesOff => {
            Reaction::Reply(stn::OK)
        }
        StnCommand::AddFilter(filter) => {
            info!("Added filter for CAN id {} (mask {})", filter.id, filter.mask);
            state.filters.insert(&filter);
            Reaction::Reply(stn::OK)
        }
        StnCommand::MalformedFilter(_) => Reaction::Reply(stn::ERROR),
        StnCommand::StartMonitor => {
            state.mode = SimulatorMode::Monitoring;
            Reaction::StartMonitor
        }
        StnCommand::Unknown(raw) => {
            debug!("Unknown command {:?}", raw);
            Reaction::Reply(stn::UNKNOWN)
        }
    }
}

/// The STN1110 simulator
pub struct Stn1110Simulator {
    config: StnConfig,
    state: StnState,
}

impl Stn1110Simulator {
    /// Create an idle simulator with no filters
    pub fn new(config: StnConfig) -> Self {
        Self {
            config,
            state: StnState::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> &StnState {
        &self.state
    }

    /// Serve the host until shutdown is signalled or the stream closes
    ///
    /// Dropping the shutdown sender counts as a shutdown request. An active
    /// monitor task is always stopped and joined before returning.
    pub async fn run<R, W>(
        &mut self,
        reader: &mut FrameReader<R, StnCodec>,
        writer: SharedWriter<W>,
        mut shutdown: watch::Receiver<bool>,
    ) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!("STN1110 simulator running");
        let mut monitor: Option<MonitorTask> = None;

        let result = loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                event = reader.read_frame() => event,
            };

            let line = match event {
                Ok(ReadEvent::Data(line)) => line,
                Ok(ReadEvent::Timeout) => continue,
                Ok(ReadEvent::Closed) => {
                    info!("Host closed the stream");
                    break Ok(());
                }
                Err(e) => break Err(e),
            };

            // Any line ends monitoring; it is not interpreted as a command
            if let Some(task) = monitor.take() {
                info!("Stopping monitoring mode");
                task.stop().await;
                self.state.mode = SimulatorMode::Idle;
                if let Err(e) = Self::reply(&writer, stn::STOPPED).await {
                    break Err(e);
                }
                continue;
            }

            let command = StnCommand::decode(&line);
            let outcome = match handle_command(&mut self.state, command) {
                Reaction::Reply(text) => Self::reply(&writer, text).await,
                Reaction::Identify => {
                    info!("Resetting");
                    tokio::time::sleep(self.config.reset_delay()).await;
                    // Input sent while resetting is lost, as on the real adapter
                    match Self::reply(&writer, stn::IDENTIFICATION).await {
                        Ok(()) => reader.discard_buffered().await,
                        Err(e) => Err(e),
                    }
                }
                Reaction::StartMonitor => {
                    info!("Starting monitoring mode");
                    monitor = Some(MonitorTask::spawn(
                        writer.clone(),
                        self.config.monitor_interval(),
                    ));
                    Ok(())
                }
            };
            if let Err(e) = outcome {
                break Err(e);
            }
        };

        if let Some(task) = monitor.take() {
            task.stop().await;
            self.state.mode = SimulatorMode::Idle;
        }

        info!("STN1110 simulator stopped");
        result
    }

    /// Write a reply line followed by the prompt
    async fn reply<W>(writer: &SharedWriter<W>, text: &str) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_line(text).await?;
        writer.write_text(stn::PROMPT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filter(id: &str) -> CanFilter {
        CanFilter {
            id: id.to_string(),
            mask: "FFF".to_string(),
        }
    }

    #[test]
    fn test_filter_command_adds_id() {
        let mut state = StnState::default();
        let reaction = handle_command(&mut state, StnCommand::decode("STFPA123,456"));
        assert_eq!(reaction, Reaction::Reply("OK"));
        assert!(state.filters.contains("123"));
        assert_eq!(state.filters.len(), 1);
    }

    #[test]
    fn test_malformed_filter_leaves_state() {
        let mut state = StnState::default();
        state.filters.insert(&filter("201"));
        let before = state.clone();

        let reaction = handle_command(&mut state, StnCommand::decode("STFPAZZZ"));
        assert_eq!(reaction, Reaction::Reply("ERROR"));
        assert_eq!(state, before);
    }

    #[test]
    fn test_reset_clears_filters() {
        let mut state = StnState::default();
        state.filters.insert(&filter("085"));
        state.filters.insert(&filter("4B0"));

        assert_eq!(handle_command(&mut state, StnCommand::Reset), Reaction::Identify);
        assert!(state.filters.is_empty());
    }

    #[test]
    fn test_settings_reply_ok() {
        let mut state = StnState::default();
        for line in ["ATE0", "ATH1", "ATS0"] {
            assert_eq!(
                handle_command(&mut state, StnCommand::decode(line)),
                Reaction::Reply("OK")
            );
        }
        assert_eq!(state, StnState::default());
    }

    #[test]
    fn test_unknown_replies_question_mark() {
        let mut state = StnState::default();
        assert_eq!(
            handle_command(&mut state, StnCommand::decode("ATI")),
            Reaction::Reply("?")
        );
    }

    #[test]
    fn test_start_monitor_changes_mode() {
        let mut state = StnState::default();
        assert_eq!(
            handle_command(&mut state, StnCommand::StartMonitor),
            Reaction::StartMonitor
        );
        assert_eq!(state.mode, SimulatorMode::Monitoring);
    }

    #[test]
    fn test_duplicate_filter_id() {
        let mut filters = FilterSet::default();
        assert!(filters.insert(&filter("240")));
        assert!(!filters.insert(&CanFilter {
            id: "240".into(),
            mask: "7FF".into(),
        }));
        assert_eq!(filters.iter().collect::<Vec<_>>(), vec!["240"]);
    }

    proptest! {
        #[test]
        fn prop_filters_hold_each_distinct_id(ids in proptest::collection::vec("[0-9A-F]{3}", 0..32)) {
            let mut state = StnState::default();
            for id in &ids {
                let reaction = handle_command(&mut state, StnCommand::decode(&format!("STFPA{id},7FF")));
                prop_assert_eq!(reaction, Reaction::Reply("OK"));
            }

            let distinct: HashSet<&str> = ids.iter().map(String::as_str).collect();
            prop_assert_eq!(state.filters.len(), distinct.len());
            for id in &distinct {
                prop_assert!(state.filters.contains(id));
            }

            handle_command(&mut state, StnCommand::Reset);
            prop_assert!(state.filters.is_empty());
        }

        #[test]
        fn prop_non_hex_filter_changes_nothing(params in "[G-Z]{3},[0-9A-F]{3}") {
            let mut state = StnState::default();
            state.filters.insert(&filter("085"));
            let before = state.clone();

            let reaction = handle_command(&mut state, StnCommand::decode(&format!("STFPA{params}")));
            prop_assert_eq!(reaction, Reaction::Reply("ERROR"));
            prop_assert_eq!(state, before);
        }
    }
}
