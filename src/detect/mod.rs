//! Interfaces to the pretrained region and legend detectors.

pub mod http;

pub use http::HttpDetector;

use crate::error::Result;
use crate::legend::LegendBoxes;
use crate::meta::{BBox, RegionClass};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Detected boxes per region class, in detection order
pub type Regions = BTreeMap<RegionClass, Vec<BBox>>;

/// Map image -> boxes per region class
#[async_trait]
pub trait RegionDetector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<Regions>;
}

/// Legend crop -> colour swatch and label boxes
#[async_trait]
pub trait LegendDetector: Send + Sync {
    async fn detect_legend(&self, legend_png: &[u8]) -> Result<LegendBoxes>;
}

/// Keep only non-degenerate boxes inside the image, dropping empty classes.
pub fn retain_usable(regions: Regions, width: u32, height: u32) -> Regions {
    regions
        .into_iter()
        .filter_map(|(class, boxes)| {
            let total = boxes.len();
            let kept: Vec<BBox> = boxes
                .into_iter()
                .filter(|b| b.is_usable(width, height))
                .collect();
            if kept.len() < total {
                log::warn!("Dropped {} unusable {} box(es)", total - kept.len(), class);
            }
            (!kept.is_empty()).then_some((class, kept))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_usable() {
        let mut regions = Regions::new();
        regions.insert(
            RegionClass::Title,
            vec![BBox::new(0, 0, 10, 10), BBox::new(0, 0, 200, 10)],
        );
        regions.insert(RegionClass::Scale, vec![BBox::new(5, 5, 5, 9)]);

        let kept = retain_usable(regions, 100, 100);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[&RegionClass::Title], vec![BBox::new(0, 0, 10, 10)]);
    }
}
