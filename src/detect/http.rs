use super::{LegendDetector, RegionDetector, Regions};
use crate::config::DetectorConfig;
use crate::error::{GeoMapError, Result};
use crate::legend::LegendBoxes;
use crate::meta::{BBox, RegionClass};
use crate::vision;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Serialize)]
struct DetectRequest {
    image: String,
}

#[derive(Deserialize)]
struct ComponentsResponse {
    regions: BTreeMap<String, Vec<BBox>>,
}

/// Client for a detector service exposing `/detect/components` and
/// `/detect/legend`.
pub struct HttpDetector {
    client: Client,
    base_url: String,
}

impl HttpDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GeoMapError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: DeserializeOwned>(&self, endpoint: &str, image: &[u8]) -> Result<T> {
        let mime = if image.starts_with(&[0xFF, 0xD8]) {
            "image/jpeg"
        } else {
            "image/png"
        };
        let request = DetectRequest {
            image: vision::data_url(image, mime),
        };

        let response = self
            .client
            .post(format!("{}/{}", self.base_url, endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| GeoMapError::Detector(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(GeoMapError::Detector(format!(
                "Detector returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| GeoMapError::Detector(format!("Failed to parse response: {}", e)))
    }
}

/// Convert class names from the wire into region classes, skipping unknown ones.
fn into_regions(raw: BTreeMap<String, Vec<BBox>>) -> Regions {
    let mut regions = Regions::new();
    for (name, boxes) in raw {
        match name.parse::<RegionClass>() {
            Ok(class) => regions.entry(class).or_default().extend(boxes),
            Err(_) => log::warn!("Detector reported unknown region class '{}', ignoring", name),
        }
    }
    regions
}

#[async_trait]
impl RegionDetector for HttpDetector {
    async fn detect(&self, image: &[u8]) -> Result<Regions> {
        let response: ComponentsResponse = self.post("detect/components", image).await?;
        Ok(into_regions(response.regions))
    }
}

#[async_trait]
impl LegendDetector for HttpDetector {
    async fn detect_legend(&self, legend_png: &[u8]) -> Result<LegendBoxes> {
        self.post("detect/legend", legend_png).await
    }
}
