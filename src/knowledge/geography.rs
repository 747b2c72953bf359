//! Geographic knowledge: land-cover mix and population density.
//!
//! Each quantity sits behind a source trait with a dataset-backed grid
//! implementation and a deterministic placeholder.

use super::coords::GeoBox;
use super::{round_to, KnowledgeBundle, KnowledgeProvider};
use crate::config::{GeographySource, KnowledgeConfig};
use crate::error::{GeoMapError, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// ESA WorldCover class codes
const LAND_COVER_CLASSES: [(u32, &str); 11] = [
    (10, "Trees"),
    (20, "Shrubland"),
    (30, "Grassland"),
    (40, "Cropland"),
    (50, "Built-up"),
    (60, "Bare / Sparse Vegetation"),
    (70, "Snow and Ice"),
    (80, "Permanent Water Bodies"),
    (90, "Herbaceous Wetland"),
    (95, "Mangroves"),
    (100, "Moss and Lichen"),
];

fn land_cover_name(code: u32) -> Option<&'static str> {
    LAND_COVER_CLASSES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Percentage of each land-cover class inside a box
pub trait LandCoverSource: Send + Sync {
    fn distribution(&self, area: &GeoBox) -> Result<BTreeMap<String, f64>>;
}

/// People per km² inside a box
pub trait PopulationSource: Send + Sync {
    fn density(&self, area: &GeoBox) -> Result<f64>;
}

fn read_samples<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        GeoMapError::Knowledge(format!("Failed to read grid {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&text)?)
}

#[derive(Debug, Clone, Deserialize)]
pub struct LandCoverSample {
    pub lon: f64,
    pub lat: f64,
    pub class: u32,
}

/// Land-cover class samples on a regular lon/lat grid
pub struct LandCoverGrid {
    samples: Vec<LandCoverSample>,
}

impl LandCoverGrid {
    pub fn new(samples: Vec<LandCoverSample>) -> Self {
        Self { samples }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(read_samples(path)?))
    }
}

impl LandCoverSource for LandCoverGrid {
    fn distribution(&self, area: &GeoBox) -> Result<BTreeMap<String, f64>> {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for sample in self.samples.iter().filter(|s| area.contains(s.lon, s.lat)) {
            match land_cover_name(sample.class) {
                Some(name) => *counts.entry(name).or_default() += 1,
                None => log::debug!("Unknown land-cover class {}", sample.class),
            }
        }
        let total = counts.values().sum::<usize>().max(1) as f64;
        Ok(counts
            .into_iter()
            .map(|(name, n)| (name.to_string(), round_to(n as f64 / total * 100.0, 3)))
            .collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PopulationSample {
    pub lon: f64,
    pub lat: f64,
    pub population: f64,
}

/// Population counts per grid cell
pub struct PopulationGrid {
    samples: Vec<PopulationSample>,
}

impl PopulationGrid {
    pub fn new(samples: Vec<PopulationSample>) -> Self {
        Self { samples }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(read_samples(path)?))
    }
}

impl PopulationSource for PopulationGrid {
    fn density(&self, area: &GeoBox) -> Result<f64> {
        let total: f64 = self
            .samples
            .iter()
            .filter(|s| area.contains(s.lon, s.lat))
            .map(|s| s.population)
            .sum();
        Ok(round_to(total / area.area_km2().max(1e-6), 2))
    }
}

/// RNG seeded from the box so repeated queries agree
fn seeded_rng(area: &GeoBox) -> StdRng {
    let key = format!(
        "{:.6},{:.6},{:.6},{:.6}",
        area.min_lon, area.min_lat, area.max_lon, area.max_lat
    );
    let digest = Sha256::digest(key.as_bytes());
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest);
    StdRng::from_seed(seed)
}

/// Plausible land-cover mix derived from the box alone
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderLandCover;

impl LandCoverSource for PlaceholderLandCover {
    fn distribution(&self, area: &GeoBox) -> Result<BTreeMap<String, f64>> {
        let mut rng = seeded_rng(area);
        let weights: Vec<f64> = LAND_COVER_CLASSES
            .iter()
            .map(|_| rng.gen_range(0.0..1.0))
            .collect();
        let total: f64 = weights.iter().sum::<f64>().max(f64::EPSILON);
        Ok(LAND_COVER_CLASSES
            .iter()
            .zip(weights)
            .map(|((_, name), w)| (name.to_string(), round_to(w / total * 100.0, 3)))
            .collect())
    }
}

/// Plausible population density derived from the box alone
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderPopulation;

impl PopulationSource for PlaceholderPopulation {
    fn density(&self, area: &GeoBox) -> Result<f64> {
        let mut rng = seeded_rng(area);
        Ok(round_to(rng.gen_range(1.0..1000.0), 2))
    }
}

/// Land cover and population density for a box
pub struct GeographicProvider {
    land_cover: Box<dyn LandCoverSource>,
    population: Box<dyn PopulationSource>,
}

impl GeographicProvider {
    pub fn new(land_cover: Box<dyn LandCoverSource>, population: Box<dyn PopulationSource>) -> Self {
        Self {
            land_cover,
            population,
        }
    }

    /// Sources chosen by `knowledge.geography`
    pub fn from_config(config: &KnowledgeConfig) -> Result<Self> {
        match config.geography {
            GeographySource::Placeholder => Ok(Self::new(
                Box::new(PlaceholderLandCover),
                Box::new(PlaceholderPopulation),
            )),
            GeographySource::Dataset => {
                let (Some(land_cover), Some(population)) =
                    (&config.land_cover_grid_path, &config.population_grid_path)
                else {
                    return Err(GeoMapError::Config(
                        "Dataset geography requires land cover and population grids".to_string(),
                    ));
                };
                Ok(Self::new(
                    Box::new(LandCoverGrid::load(land_cover)?),
                    Box::new(PopulationGrid::load(population)?),
                ))
            }
        }
    }
}

#[async_trait]
impl KnowledgeProvider for GeographicProvider {
    fn name(&self) -> &str {
        "geographic"
    }

    async fn query(&self, area: &GeoBox) -> Result<KnowledgeBundle> {
        let distribution = self.land_cover.distribution(area)?;
        let density = self.population.density(area)?;

        let mut bundle = KnowledgeBundle::new();
        bundle.insert("landcover_distribution".to_string(), json!(distribution));
        bundle.insert(
            "population_density".to_string(),
            json!(format!("{} people/km^2", density)),
        );
        Ok(bundle)
    }
}
