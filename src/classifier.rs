use crate::error::ClassifyError;
use crate::prelude::*;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const PREDICT_PATH: &str = "/api/v1/predict";
const DOCS_PATH: &str = "/docs";

/// Discharge types the classification service knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdCategory {
    Corona,
    Particle,
    Floating,
    Surface,
    Void,
}

impl PdCategory {
    pub fn description(&self) -> &'static str {
        match self {
            PdCategory::Corona => "corona discharge",
            PdCategory::Particle => "free particle discharge",
            PdCategory::Floating => "floating potential discharge",
            PdCategory::Surface => "surface discharge",
            PdCategory::Void => "void discharge",
        }
    }
}

impl FromStr for PdCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "corona" => Ok(PdCategory::Corona),
            "particle" => Ok(PdCategory::Particle),
            "floating" => Ok(PdCategory::Floating),
            "surface" => Ok(PdCategory::Surface),
            "void" => Ok(PdCategory::Void),
            _ => Err(anyhow!("unknown discharge category {}", s)),
        }
    }
}

/// Service verdict. The raw strings are kept as sent; unknown labels still
/// display as-is.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Classification {
    pub predicted_category: String,
    pub predicted_probability: String,
}

impl Classification {
    pub fn category(&self) -> Option<PdCategory> {
        self.predicted_category.parse().ok()
    }

    /// `"87.50%"` -> `87.5`
    pub fn confidence(&self) -> Option<f64> {
        self.predicted_probability
            .trim()
            .trim_end_matches('%')
            .trim()
            .parse()
            .ok()
    }

    pub fn label(&self) -> &str {
        self.category()
            .map(|c| c.description())
            .unwrap_or(self.predicted_category.as_str())
    }
}

#[derive(Clone)]
pub struct Classifier {
    client: reqwest::Client,
    url: String,
}

impl Classifier {
    pub fn new(config: &config::Classifier) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms()))
            .build()?;

        Ok(Self {
            client,
            url: config.url().to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Probes the service's docs page; any failure just means "not there".
    pub async fn check_available(&self) -> bool {
        let docs_url = self.url.replace(PREDICT_PATH, DOCS_PATH);

        match self.client.get(&docs_url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("classification service answered {} at {}", response.status(), docs_url);
                false
            }
            Err(e) => {
                warn!("classification service not reachable at {}: {}", docs_url, e);
                false
            }
        }
    }

    /// Uploads a PRPD snapshot and returns the predicted discharge type.
    pub async fn classify<P: AsRef<Path>>(&self, image_path: P) -> Result<Classification, ClassifyError> {
        let path = image_path.as_ref();
        let image = tokio::fs::read(path).await.map_err(|source| ClassifyError::Image {
            path: path.display().to_string(),
            source,
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "snapshot.png".to_string());

        info!("sending {} ({} bytes) to {}", file_name, image.len(), self.url);

        let form = Form::new().part("file", Part::bytes(image).file_name(file_name));

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(ClassifyError::Status { status, body });
        }

        let classification: Classification = serde_json::from_str(&body)
            .map_err(|e| ClassifyError::MalformedResponse(format!("{}: {}", e, body)))?;

        info!(
            "classified as {} ({})",
            classification.label(),
            classification.predicted_probability
        );

        Ok(classification)
    }

    fn transport_error(&self, e: reqwest::Error) -> ClassifyError {
        if e.is_connect() {
            ClassifyError::Connection {
                url: self.url.clone(),
                source: e,
            }
        } else {
            ClassifyError::Request(e)
        }
    }
}
