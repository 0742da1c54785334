use crate::prelude::*;

use crate::datalog_writer::DatalogWriter;
use crate::gis::device::{ChannelData as DeviceData, Receiver};
use crate::recorder::Recorder;
use crate::register::GROUP_COUNT;

use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::error::RecvError;

/// What the display shell gets to see.
#[derive(PartialEq, Debug, Clone, Serialize)]
pub enum DisplayUpdate {
    Connection(LinkState),
    Telemetry {
        summary: Summary,
        /// PRPD points, oldest poll first. Holds several polls in
        /// accumulation mode.
        points: Vec<(f64, f64)>,
        batches: usize,
    },
    Status(String),
}

#[derive(Default, Debug, Clone)]
pub struct PollStats {
    pub polls_ok: u64,
    pub polls_failed: u64,
    // polls where at least one slot was cut off
    pub short_samples: u64,
    pub connects: u64,
    pub disconnections: u64,
    pub datalog_errors: u64,
    pub last_error: Option<String>,
}

impl PollStats {
    pub fn print_summary(&self) {
        info!("Poll Statistics:");
        info!("  Successful polls: {}", self.polls_ok);
        info!("  Failed polls: {}", self.polls_failed);
        info!("  Polls with truncated slots: {}", self.short_samples);
        info!("  Connection Stats:");
        info!("    Connects: {}", self.connects);
        info!("    Disconnections: {}", self.disconnections);
        if let Some(last_error) = &self.last_error {
            info!("    Last error: {}", last_error);
        }
        info!("  Datalog errors: {}", self.datalog_errors);
    }
}

struct State {
    aggregator: Aggregator,
    recorder: Recorder,
    link: LinkState,
    last_summary: Option<Summary>,
}

#[derive(Clone)]
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    state: Arc<Mutex<State>>,
    datalog_writer: Option<DatalogWriter>,
    pub shared_stats: Arc<Mutex<PollStats>>,
}

impl Coordinator {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        let poll = config.poll();
        let mut recorder = Recorder::new();
        if config.recording().enabled() {
            recorder.start();
        }

        Self {
            config,
            channels,
            state: Arc::new(Mutex::new(State {
                aggregator: Aggregator::new(poll.accumulate(), poll.history()),
                recorder,
                link: LinkState::Disconnected,
                last_summary: None,
            })),
            datalog_writer: None,
            shared_stats: Arc::new(Mutex::new(PollStats::default())),
        }
    }

    pub fn with_datalog_writer(mut self, writer: DatalogWriter) -> Self {
        self.datalog_writer = Some(writer);
        self
    }

    pub async fn start(&self) -> Result<()> {
        self.run(self.channels.from_device.subscribe()).await
    }

    /// Consumes device events in arrival order until shutdown.
    pub async fn run(&self, mut receiver: Receiver) -> Result<()> {
        debug!("coordinator starting");

        loop {
            match receiver.recv().await {
                Ok(DeviceData::Sample(sample)) => self.handle_sample(&sample),
                Ok(DeviceData::Connected) => self.handle_link(LinkState::Connected, None),
                Ok(DeviceData::Disconnected(reason)) => {
                    self.handle_link(LinkState::Disconnected, Some(reason))
                }
                Ok(DeviceData::PollFailed(reason)) => self.handle_failure(reason),
                Ok(DeviceData::Shutdown) => {
                    info!("coordinator received shutdown signal");
                    break;
                }
                Ok(DeviceData::SetInterval(_)) => {}
                Err(RecvError::Lagged(n)) => warn!("coordinator lagging, {} device events dropped", n),
                Err(RecvError::Closed) => break,
            }
        }

        debug!("coordinator exiting");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.from_device.send(DeviceData::Shutdown);
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, PollStats> {
        self.shared_stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_sample(&self, sample: &DecodedSample) {
        let (summary, points, batches) = {
            let mut state = self.state();
            let summary = state.aggregator.ingest(sample);
            state.recorder.record(sample, &summary);
            state.last_summary = Some(summary);
            (summary, state.aggregator.points(), state.aggregator.batches())
        };

        info!("discharge count total: {}", summary.total_count);
        info!("uhf_db max: {:.2}", summary.max_amplitude);

        {
            let mut stats = self.stats();
            stats.polls_ok += 1;
            let shortest = sample
                .counters
                .len()
                .min(sample.amplitudes.len())
                .min(sample.phases.len());
            if shortest < GROUP_COUNT {
                stats.short_samples += 1;
            }
        }

        if let Some(writer) = &self.datalog_writer {
            if let Err(e) = writer.write_sample(sample, &summary) {
                error!("datalog write failed: {}", e);
                self.stats().datalog_errors += 1;
            }
        }

        self.publish(DisplayUpdate::Telemetry {
            summary,
            points,
            batches,
        });
    }

    fn handle_link(&self, link: LinkState, reason: Option<String>) {
        self.state().link = link;

        {
            let mut stats = self.stats();
            match link {
                LinkState::Connected => stats.connects += 1,
                _ => stats.disconnections += 1,
            }
        }

        match &reason {
            Some(reason) => info!("device {}: {}", link, reason),
            None => info!("device {}", link),
        }

        self.publish(DisplayUpdate::Connection(link));
    }

    fn handle_failure(&self, reason: String) {
        warn!("poll failed: {}", reason);

        {
            let mut stats = self.stats();
            stats.polls_failed += 1;
            stats.last_error = Some(reason.clone());
        }

        self.publish(DisplayUpdate::Status(reason));
    }

    fn publish(&self, update: DisplayUpdate) {
        if self.channels.to_display.send(update).is_err() {
            trace!("no display subscribed");
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.state().link
    }

    pub fn last_summary(&self) -> Option<Summary> {
        self.state().last_summary
    }

    pub fn points(&self) -> Vec<(f64, f64)> {
        self.state().aggregator.points()
    }

    pub fn set_accumulate(&self, accumulate: bool) {
        self.state().aggregator.set_accumulate(accumulate);
        info!("accumulated PRPD {}", if accumulate { "enabled" } else { "disabled" });
    }

    /// Asks the device poller for a new refresh rate.
    pub fn set_refresh_interval(&self, interval_ms: u64) -> Result<()> {
        if interval_ms == 0 {
            bail!("refresh interval must be greater than 0");
        }
        self.channels
            .to_device
            .send(DeviceData::SetInterval(interval_ms))
            .map_err(|_| anyhow!("device poller is not running"))?;
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.state().recorder.is_recording()
    }

    pub fn start_recording(&self) {
        self.state().recorder.start();
    }

    pub fn stop_recording(&self) -> usize {
        self.state().recorder.stop()
    }

    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        self.state().recorder.export_csv(path)
    }

    /// Exports to the configured CSV file, if any. Used at shutdown.
    pub fn export_recording(&self) -> Result<()> {
        let recording = self.config.recording();
        let Some(csv_file) = recording.csv_file() else {
            return Ok(());
        };

        if self.is_recording() {
            self.stop_recording();
        }
        if self.state().recorder.records().is_empty() {
            info!("nothing recorded, skipping export to {}", csv_file);
            return Ok(());
        }

        self.export_csv(csv_file)?;
        Ok(())
    }
}
