use crate::prelude::*;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Appends one JSON object per successful poll.
#[derive(Debug, Clone)]
pub struct DatalogWriter {
    file: Arc<Mutex<std::fs::File>>,
    path: String,
    lines_written: Arc<Mutex<u64>>,
}

impl DatalogWriter {
    pub fn new(path: &str) -> Result<Self> {
        info!("Opening datalog file at {}", path);

        // Ensure the directory exists
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open datalog file {}: {}", path, e);
                return Err(e.into());
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
                error!("Failed to set permissions on datalog file {}: {}", path, e);
                return Err(e.into());
            }
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_string(),
            lines_written: Arc::new(Mutex::new(0)),
        })
    }

    pub fn write_sample(&self, sample: &DecodedSample, summary: &Summary) -> Result<()> {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let json = serde_json::json!({
            "utc_timestamp": timestamp,
            "counters": sample.counters,
            "amplitudes": sample.amplitudes,
            "phases": sample.phases,
            "total_count": summary.total_count,
            "max_amplitude": summary.max_amplitude,
        });
        let json_string = serde_json::to_string(&json)?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("Failed to lock datalog file"))?;
        match writeln!(file, "{}", json_string) {
            Ok(_) => {
                if let Err(e) = file.flush() {
                    error!("Failed to flush datalog file {}: {}", self.path, e);
                    return Err(e.into());
                }

                let mut lines_written = self
                    .lines_written
                    .lock()
                    .map_err(|_| anyhow!("Failed to lock line counter"))?;
                *lines_written += 1;
                debug!("Total polls stored in datalog file: {}", *lines_written);

                Ok(())
            }
            Err(e) => {
                error!("Failed to write to datalog file {}: {}", self.path, e);
                Err(e.into())
            }
        }
    }
}
