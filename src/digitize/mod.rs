//! Map digitization: image -> structured meta document.

use crate::cache::{CacheKey, CacheStore, CacheStoreExt};
use crate::config::{Config, Locale, VisionConfig};
use crate::detect::{retain_usable, LegendDetector, RegionDetector};
use crate::error::{GeoMapError, Result};
use crate::inference::{ContentPart, InferenceService, Message};
use crate::knowledge::LegendVocabulary;
use crate::legend::{LegendExtractor, PairingStrategy};
use crate::meta::{map_name, BBox, ImageSize, MapMeta, RegionClass, LONLAT_CROP};
use crate::prompt::{parse_basic_info, BasicInfoRegion, SYSTEM_PROMPT};
use crate::vision;
use image::RgbImage;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// First crop of a kind, as persisted
struct SavedCrop {
    image: RgbImage,
    png: Vec<u8>,
    bbox: Option<BBox>,
}

/// Builds (or loads) the meta document of a map image.
///
/// A cached meta is authoritative: on a hit neither the detector nor the
/// inference service is called.
pub struct MapDigitizer {
    cache: Arc<dyn CacheStore>,
    inference: Arc<dyn InferenceService>,
    region_detector: Arc<dyn RegionDetector>,
    legend_detector: Arc<dyn LegendDetector>,
    extractor: LegendExtractor,
    vocabulary: LegendVocabulary,
    vision: VisionConfig,
    source: String,
    locale: Locale,
}

impl MapDigitizer {
    pub fn new(
        config: &Config,
        cache: Arc<dyn CacheStore>,
        inference: Arc<dyn InferenceService>,
        region_detector: Arc<dyn RegionDetector>,
        legend_detector: Arc<dyn LegendDetector>,
        vocabulary: LegendVocabulary,
    ) -> Self {
        Self {
            extractor: LegendExtractor::new(inference.clone(), config.vision.near_black),
            cache,
            inference,
            region_detector,
            legend_detector,
            vocabulary,
            vision: config.vision.clone(),
            source: config.geomap.dataset_source.clone(),
            locale: config.locale(),
        }
    }

    /// Use a different legend pairing strategy
    pub fn with_pairing(mut self, strategy: Box<dyn PairingStrategy>) -> Self {
        self.extractor = self.extractor.with_strategy(strategy);
        self
    }

    pub async fn digitize(&self, image_path: &Path) -> Result<MapMeta> {
        let name = map_name(image_path);
        let key = CacheKey::Meta(name.clone());
        if let Some(meta) = self.cache.get_json::<MapMeta>(&key)? {
            log::debug!("Using cached meta for {}", name);
            return Ok(meta);
        }

        log::info!("Digitizing {}", image_path.display());
        let bytes = std::fs::read(image_path)?;
        let image = vision::decode(&bytes)?;
        let (width, height) = image.dimensions();

        let regions = retain_usable(self.region_detector.detect(&bytes).await?, width, height);
        let mut meta = MapMeta::new(&name, &self.source, ImageSize { width, height });
        meta.regions = regions;

        let crops = self.save_crops(&name, &image, &meta)?;

        if let Some(legend) = crops.get(RegionClass::Legend.as_str()) {
            self.read_legend(legend, &mut meta).await?;
        }

        for region in BasicInfoRegion::ALL {
            if let Some(crop) = crops.get(region.crop_name()) {
                let raw = self.ask_basic_info(region, crop).await?;
                parse_basic_info(region, &raw)?.apply(&mut meta.information);
            }
        }

        if let Some(main_map) = crops.get(RegionClass::MainMap.as_str()) {
            let colors: Vec<[u8; 3]> = meta.legend.values().map(|e| e.color).collect();
            let areas = vision::area_fractions(&main_map.image, &colors, self.vision.area_downsample);
            for (entry, area) in meta.legend.values_mut().zip(areas) {
                entry.area = area;
            }
        }

        self.cache.put_json(&key, &meta)?;
        log::info!(
            "Digitized {}: {} region class(es), {} legend entries",
            name,
            meta.regions.len(),
            meta.legend.len()
        );
        Ok(meta)
    }

    /// Persist every crop (plus derived crops) and return the first of each kind.
    fn save_crops(
        &self,
        name: &str,
        image: &RgbImage,
        meta: &MapMeta,
    ) -> Result<HashMap<&'static str, SavedCrop>> {
        let mut firsts = HashMap::new();
        for (class, boxes) in &meta.regions {
            for (i, bbox) in boxes.iter().enumerate() {
                let crop = vision::crop(image, bbox)?;

                if *class == RegionClass::MainMap {
                    let corners = vision::corner_composite(&crop, self.vision.corner_fraction);
                    let png = vision::encode_png(&corners)?;
                    self.cache.put(&CacheKey::detection(name, LONLAT_CROP, i), &png)?;
                    if i == 0 {
                        firsts.insert(
                            LONLAT_CROP,
                            SavedCrop {
                                image: corners,
                                png,
                                bbox: None,
                            },
                        );
                    }
                }

                let saved = if *class == RegionClass::IndexMap {
                    vision::annotate_directions(&crop, self.vision.direction_margin)
                } else {
                    crop
                };
                let png = vision::encode_png(&saved)?;
                self.cache.put(&CacheKey::detection(name, class.as_str(), i), &png)?;
                if i == 0 {
                    firsts.insert(
                        class.as_str(),
                        SavedCrop {
                            image: saved,
                            png,
                            bbox: Some(*bbox),
                        },
                    );
                }
            }
        }
        Ok(firsts)
    }

    async fn read_legend(&self, legend: &SavedCrop, meta: &mut MapMeta) -> Result<()> {
        let Some(bbox) = legend.bbox else {
            return Ok(());
        };
        let boxes = self.legend_detector.detect_legend(&legend.png).await?;
        let mut entries = self.extractor.extract(&legend.image, &bbox, &boxes).await?;

        for entry in entries.values_mut() {
            let label = (entry.text != "unknown").then_some(entry.text.as_str());
            let knowledge = self.vocabulary.resolve(label);
            entry.lithology = knowledge.rock_type;
            entry.stratigraphic_age = knowledge.rock_age;
        }
        meta.legend = entries;
        Ok(())
    }

    async fn ask_basic_info(&self, region: BasicInfoRegion, crop: &SavedCrop) -> Result<String> {
        let url = vision::data_url_within_limit(&crop.png, "image/png", self.vision.upload_limit_bytes)?;
        let messages = [
            Message::system(SYSTEM_PROMPT),
            Message::user(vec![
                ContentPart::image(url),
                ContentPart::text(region.instruction(self.locale)),
            ]),
        ];
        self.inference
            .complete(&messages, true)
            .await
            .ok_or_else(|| {
                GeoMapError::Inference(format!("No answer reading the {} crop", region.crop_name()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCache;
    use crate::detect::Regions;
    use crate::legend::{ColumnTabulationPairing, LegendBoxes};
    use crate::knowledge::RockVocabulary;
    use crate::test_support::{
        map_image, write_png, ScriptedInference, StaticLegendDetector, StaticRegionDetector,
    };
    use tempfile::TempDir;

    const OCR: &str = "Only output the OCR result";
    const TITLE: &str = "title region";
    const SCALE: &str = "scale region";
    const LONLAT: &str = "longitude and latitude of a geologic map";

    struct Fixture {
        _dir: TempDir,
        image_path: std::path::PathBuf,
        cache: Arc<FileCache>,
        inference: Arc<ScriptedInference>,
        regions: Arc<StaticRegionDetector>,
        legends: Arc<StaticLegendDetector>,
    }

    impl Fixture {
        fn new(regions: Regions, inference: ScriptedInference) -> Self {
            let dir = TempDir::new().unwrap();
            let image_path = write_png(dir.path(), "E4901.png", &map_image());
            let cache = Arc::new(FileCache::new(dir.path().join("cache")));
            let legends = LegendBoxes {
                color: vec![BBox::new(0, 0, 20, 12), BBox::new(0, 15, 20, 27)],
                text: vec![BBox::new(22, 0, 100, 12), BBox::new(22, 15, 100, 27)],
            };
            Self {
                _dir: dir,
                image_path,
                cache,
                inference: Arc::new(inference),
                regions: Arc::new(StaticRegionDetector::new(regions)),
                legends: Arc::new(StaticLegendDetector::new(legends)),
            }
        }

        fn digitizer(&self) -> MapDigitizer {
            let vocabulary = LegendVocabulary {
                rock_type: RockVocabulary::from_entries([("granite", "igneous")]),
                rock_age: RockVocabulary::from_entries([("granite", "cretaceous")]),
            };
            MapDigitizer::new(
                &Config::default(),
                self.cache.clone(),
                self.inference.clone(),
                self.regions.clone(),
                self.legends.clone(),
                vocabulary,
            )
        }
    }

    fn regions(with_main_map: bool) -> Regions {
        let mut regions = Regions::new();
        regions.insert(RegionClass::Title, vec![BBox::new(0, 0, 400, 30)]);
        regions.insert(RegionClass::Scale, vec![BBox::new(0, 30, 200, 60)]);
        regions.insert(
            RegionClass::Legend,
            vec![BBox::new(300, 200, 400, 260), BBox::new(300, 260, 400, 300)],
        );
        if with_main_map {
            regions.insert(RegionClass::MainMap, vec![BBox::new(0, 60, 300, 300)]);
        }
        regions
    }

    fn scripted() -> ScriptedInference {
        ScriptedInference::new()
            .on(OCR, "Unit: Granite")
            .on(TITLE, r#"{"title_name": "Geologic map of Test"}"#)
            .on(SCALE, r#"{"scale": "1:24,000"}"#)
            .on(
                LONLAT,
                r#"{"longitude_range": "(120°00'E, 121°00'E)", "latitude_range": "(30°30'N, 31°30'N)"}"#,
            )
    }

    #[tokio::test]
    async fn test_digitize_title_scale_legend() {
        let fx = Fixture::new(regions(false), scripted());
        let meta = fx.digitizer().digitize(&fx.image_path).await.unwrap();

        assert_eq!(meta.name, "E4901");
        assert_eq!(meta.size, ImageSize { width: 400, height: 300 });
        assert_eq!(meta.information.title.as_deref(), Some("Geologic map of Test"));
        assert_eq!(meta.information.scale, Some([1, 24000]));
        assert!(meta.information.longitude.is_none());

        assert_eq!(meta.legend.len(), 2);
        assert!(meta.legend.values().all(|e| !e.color_name.is_empty()));
        assert_eq!(meta.legend[&0].color_name, "Red");
        assert_eq!(meta.legend[&1].color_name, "Blue");
        assert_eq!(meta.legend[&0].text, "Granite");
        assert_eq!(meta.legend[&0].lithology, "igneous");
        assert_eq!(meta.legend[&0].stratigraphic_age, "cretaceous");
        assert_eq!(meta.legend[&0].color_bndbox, BBox::new(300, 200, 320, 212));

        // only the first legend region is read
        assert_eq!(fx.legends.calls(), 1);
        assert!(fx.cache.exists(&CacheKey::detection("E4901", "legend", 1)));
        assert!(fx.cache.exists(&CacheKey::detection("E4901", "title", 0)));
        assert!(fx.cache.exists(&CacheKey::Meta("E4901".to_string())));
    }

    #[tokio::test]
    async fn test_digitize_is_idempotent() {
        let fx = Fixture::new(regions(false), scripted());
        let digitizer = fx.digitizer();
        let first = digitizer.digitize(&fx.image_path).await.unwrap();
        let calls = fx.inference.calls();

        let second = digitizer.digitize(&fx.image_path).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fx.regions.calls(), 1);
        assert_eq!(fx.inference.calls(), calls);
    }

    #[tokio::test]
    async fn test_main_map_adds_lonlat_and_areas() {
        let fx = Fixture::new(regions(true), scripted());
        let meta = fx.digitizer().digitize(&fx.image_path).await.unwrap();

        assert!(fx.cache.exists(&CacheKey::detection("E4901", "lonlat", 0)));
        assert_eq!(
            meta.information.longitude,
            Some(vec!["120°00'E".to_string(), "121°00'E".to_string()])
        );
        assert_eq!(fx.inference.calls_matching(LONLAT), 1);

        // main map is 300 px wide, red on the left 150 px; downsampled by 4
        assert!((meta.legend[&0].area - 0.506667).abs() < 1e-9);
        assert!((meta.legend[&1].area - 0.493333).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_index_map_crop_is_annotated() {
        let mut r = Regions::new();
        r.insert(RegionClass::IndexMap, vec![BBox::new(0, 0, 60, 40)]);
        let inference = ScriptedInference::new().on("index map region", r#"{"WN": "SHELBY"}"#);
        let fx = Fixture::new(r, inference);
        let meta = fx.digitizer().digitize(&fx.image_path).await.unwrap();

        let png = fx
            .cache
            .get(&CacheKey::detection("E4901", "index_map", 0))
            .unwrap()
            .unwrap();
        let margin = VisionConfig::default().direction_margin;
        assert_eq!(vision::decode(&png).unwrap().dimensions(), (60 + 2 * margin, 40 + 2 * margin));
        let connection = meta.information.connection.unwrap();
        assert_eq!(connection.len(), 9);
    }

    #[tokio::test]
    async fn test_unparseable_basic_info_propagates() {
        let inference = ScriptedInference::new()
            .on(OCR, "Granite")
            .on(TITLE, "Geologic map of Test");
        let fx = Fixture::new(regions(false), inference);
        let err = fx.digitizer().digitize(&fx.image_path).await.unwrap_err();
        assert!(matches!(err, GeoMapError::Parse(_)));
        assert!(!fx.cache.exists(&CacheKey::Meta("E4901".to_string())));
    }

    #[tokio::test]
    async fn test_pairing_strategy_is_pluggable() {
        let fx = Fixture::new(regions(false), scripted());
        let meta = fx
            .digitizer()
            .with_pairing(Box::new(ColumnTabulationPairing))
            .digitize(&fx.image_path)
            .await
            .unwrap();
        assert_eq!(meta.legend.len(), 2);
        // label spans from the swatch column to the legend edge, then is trimmed
        assert_eq!(meta.legend[&0].text_bndbox, BBox::new(339, 200, 370, 212));
    }
}
