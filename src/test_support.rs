//! Scripted collaborators shared by the pipeline tests.

use crate::detect::{LegendDetector, RegionDetector, Regions};
use crate::error::{GeoMapError, Result};
use crate::inference::{InferenceService, Message, MessageContent};
use crate::knowledge::{GeoBox, KnowledgeBundle, KnowledgeProvider};
use crate::legend::LegendBoxes;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Inference service answering from needle -> response rules.
///
/// The first rule whose needle occurs in any text of the request wins;
/// unmatched requests get no answer.
#[derive(Default)]
pub struct ScriptedInference {
    rules: Vec<(String, String)>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, needle: &str, response: &str) -> Self {
        self.rules.push((needle.to_string(), response.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of requests whose text contains `needle`
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|messages| request_text(messages).contains(needle))
            .count()
    }

    pub fn last_request(&self) -> Option<Vec<Message>> {
        self.requests.lock().unwrap().last().cloned()
    }
}

fn request_text(messages: &[Message]) -> String {
    messages
        .iter()
        .flat_map(|m| match &m.content {
            MessageContent::Text(t) => vec![t.clone()],
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.as_text().map(str::to_string))
                .collect(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl InferenceService for ScriptedInference {
    async fn complete(&self, messages: &[Message], _structured: bool) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());
        let text = request_text(messages);
        self.rules
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
    }
}

/// Region detector returning fixed boxes
pub struct StaticRegionDetector {
    regions: Regions,
    calls: AtomicUsize,
}

impl StaticRegionDetector {
    pub fn new(regions: Regions) -> Self {
        Self {
            regions,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegionDetector for StaticRegionDetector {
    async fn detect(&self, _image: &[u8]) -> Result<Regions> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.regions.clone())
    }
}

/// Legend detector returning fixed boxes
pub struct StaticLegendDetector {
    boxes: LegendBoxes,
    calls: AtomicUsize,
}

impl StaticLegendDetector {
    pub fn new(boxes: LegendBoxes) -> Self {
        Self {
            boxes,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LegendDetector for StaticLegendDetector {
    async fn detect_legend(&self, _legend_png: &[u8]) -> Result<LegendBoxes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.boxes.clone())
    }
}

/// Knowledge provider returning a fixed bundle after a number of failures
pub struct StaticProvider {
    name: String,
    bundle: KnowledgeBundle,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl StaticProvider {
    pub fn new<const N: usize>(name: &str, entries: [(&str, serde_json::Value); N]) -> Self {
        Self {
            name: name.to_string(),
            bundle: entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Provider that never answers
    pub fn failing(name: &str) -> Self {
        Self::new(name, []).failing_times(usize::MAX)
    }

    /// Fail the first `n` queries, then answer
    pub fn failing_times(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, _area: &GeoBox) -> Result<KnowledgeBundle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GeoMapError::Knowledge(format!("{} unavailable", self.name)));
        }
        Ok(self.bundle.clone())
    }
}

pub const RED: Rgb<u8> = Rgb([220, 30, 30]);
pub const BLUE: Rgb<u8> = Rgb([30, 30, 220]);

/// 400x300 synthetic map.
///
/// Main map (0,60)-(300,300): left half red, right half blue.
/// Legend (300,200)-(400,260): red swatch at (0,0)-(20,12) and blue swatch
/// at (0,15)-(20,27) in legend coordinates, dark label text at x 40..70.
pub fn map_image() -> RgbImage {
    RgbImage::from_fn(400, 300, |x, y| {
        if y >= 60 && x < 300 {
            return if x < 150 { RED } else { BLUE };
        }
        if x >= 300 && (200..260).contains(&y) {
            let (lx, ly) = (x - 300, y - 200);
            if lx < 20 && ly < 12 {
                return RED;
            }
            if lx < 20 && (15..27).contains(&ly) {
                return BLUE;
            }
            if (40..70).contains(&lx) && (ly < 12 || (15..27).contains(&ly)) {
                return Rgb([0, 0, 0]);
            }
        }
        Rgb([255, 255, 255])
    })
}

/// Write `image` as PNG into `dir` and return its path
pub fn write_png(dir: &Path, name: &str, image: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}
