use crate::prelude::*;

use serde::Serialize;
use std::path::Path;

/// One exported row: a single PRPD point of one poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub time: String,
    pub phase: f64,
    pub amplitude: f64,
    pub discharge_count: u64,
}

#[derive(Debug, Default)]
pub struct Recorder {
    recording: bool,
    records: Vec<Record>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Starts a fresh recording; rows from an earlier one are discarded.
    pub fn start(&mut self) {
        self.records.clear();
        self.recording = true;
        info!("recording started");
    }

    /// Returns how many rows were recorded.
    pub fn stop(&mut self) -> usize {
        self.recording = false;
        info!("recording stopped, {} rows recorded", self.records.len());
        self.records.len()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&mut self, sample: &DecodedSample, summary: &Summary) {
        let time = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.record_at(&time, sample, summary);
    }

    fn record_at(&mut self, time: &str, sample: &DecodedSample, summary: &Summary) {
        if !self.recording {
            return;
        }

        self.records.extend(sample.points().into_iter().map(|(phase, amplitude)| Record {
            time: time.to_string(),
            phase,
            amplitude,
            discharge_count: summary.total_count,
        }));
    }

    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        if self.records.is_empty() {
            bail!("no recorded data to export");
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(path)
            .map_err(|err| anyhow!("error creating {}: {}", path.display(), err))?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;

        info!("exported {} rows to {}", self.records.len(), path.display());
        Ok(self.records.len())
    }
}
