// Module declarations for the application's core components
pub mod aggregator;     // Per-poll summary and accumulated PRPD history
pub mod channels;       // Inter-component communication channels
pub mod classifier;     // Discharge-type classification service client
pub mod config;         // Configuration management
pub mod coordinator;    // Device events -> aggregator, recorder, display
pub mod datalog_writer; // JSON-lines log of every successful poll
pub mod error;          // Error handling and types
pub mod gis;            // Telemetry device protocol and polling
pub mod options;        // Command line options parsing
pub mod prelude;        // Common imports and types
pub mod recorder;       // Recording and CSV export
pub mod register;       // Register map definition

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::classifier::Classifier;
use crate::coordinator::Coordinator;
use crate::datalog_writer::DatalogWriter;
use crate::gis::device::Device;
use crate::prelude::*;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Manages the running components and their lifecycle
pub struct Components {
    pub coordinator: Coordinator,
    pub device: Device,
    pub channels: Channels,
    coordinator_handle: JoinHandle<()>,
    device_handle: JoinHandle<()>,
}

impl Components {
    /// Creates the channels, coordinator and device poller and starts them
    pub fn start(config: ConfigWrapper) -> Result<Self> {
        info!("Initializing channels...");
        let channels = Channels::new();

        info!("  Creating Coordinator...");
        let mut coordinator = Coordinator::new(config.clone(), channels.clone());
        if let Some(path) = config.datalog_file() {
            coordinator = coordinator.with_datalog_writer(DatalogWriter::new(&path)?);
        }
        // subscribe before the device can publish anything
        let receiver = channels.from_device.subscribe();
        let coordinator_clone = coordinator.clone();
        let coordinator_handle = tokio::spawn(async move {
            if let Err(e) = coordinator_clone.run(receiver).await {
                error!("Coordinator task failed: {}", e);
            }
        });

        info!("  Creating Device poller...");
        let device = Device::new(config, channels.clone());
        let device_clone = device.clone();
        let device_handle = tokio::spawn(async move {
            if let Err(e) = device_clone.start().await {
                error!("Device task failed: {}", e);
            }
        });

        Ok(Self {
            coordinator,
            device,
            channels,
            coordinator_handle,
            device_handle,
        })
    }

    /// Gracefully stops all components in the correct order
    ///
    /// The device goes first so every sample it already published still
    /// reaches the coordinator ahead of the coordinator's shutdown message.
    pub async fn stop(self) {
        info!("Stopping all components...");

        self.device.stop();
        if let Err(e) = self.device_handle.await {
            error!("Error waiting for device task: {}", e);
        }

        self.coordinator.stop();
        if let Err(e) = self.coordinator_handle.await {
            error!("Error waiting for coordinator task: {}", e);
        }

        if let Err(e) = self.coordinator.export_recording() {
            error!("CSV export failed: {}", e);
        }

        if let Ok(stats) = self.coordinator.shared_stats.lock() {
            stats.print_summary();
        }

        info!("Shutdown complete");
    }
}

/// Initialises env_logger with a timestamped format
pub fn init_logging(level: &str) {
    if let Err(e) = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init()
    {
        error!("Failed to initialise logger: {}", e);
    }
}

/// Main application entry point
///
/// Loads the configuration, then either runs a one-off classification or
/// polls the device until shutdown is signalled or the runtime limit passes.
pub async fn app(mut shutdown_rx: broadcast::Receiver<()>, options: Options) -> Result<()> {
    let config = ConfigWrapper::new(options.config_file.clone())?;

    init_logging(&config.loglevel());
    info!(
        "gis-pd-monitor {} starting with config file: {}",
        CARGO_PKG_VERSION, options.config_file
    );
    config.log_summary();

    if let Some(image) = &options.classify {
        return classify(&config, image).await;
    }

    let classifier_config = config.classifier();
    if classifier_config.enabled() {
        let classifier = Classifier::new(&classifier_config)?;
        if classifier.check_available().await {
            info!("classification service available at {}", classifier.url());
        }
    }

    let components = Components::start(config)?;

    info!("Waiting for shutdown signal...");
    match options.runtime {
        Some(secs) => {
            tokio::select! {
                _ = shutdown_rx.recv() => info!("Shutdown signal received"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => info!("Runtime limit of {}s reached", secs),
            }
        }
        None => {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received");
        }
    }

    components.stop().await;
    Ok(())
}

async fn classify(config: &ConfigWrapper, image: &str) -> Result<()> {
    let classifier_config = config.classifier();
    if !classifier_config.enabled() {
        bail!("classifier is disabled in the configuration");
    }

    let classifier = Classifier::new(&classifier_config)?;
    if !classifier.check_available().await {
        bail!(
            "classification service at {} is not available, is it running?",
            classifier.url()
        );
    }
    let classification = classifier.classify(image).await?;

    println!(
        "{} ({})",
        classification.label(),
        classification.predicted_probability
    );

    Ok(())
}
