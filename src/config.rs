use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub geomap: GeomapConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub vision: VisionConfig,
}

/// Pipeline-wide settings
#[derive(Debug, Clone, Deserialize)]
pub struct GeomapConfig {
    /// Dataset the maps come from (`usgs`, `cgs`). Namespaces the cache and
    /// selects the prompt language.
    #[serde(default = "default_dataset_source")]
    pub dataset_source: String,
    /// Root of the on-disk cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Screen questions for sensitive content before answering.
    #[serde(default = "default_true")]
    pub screen_questions: bool,
}

impl Default for GeomapConfig {
    fn default() -> Self {
        Self {
            dataset_source: default_dataset_source(),
            cache_dir: default_cache_dir(),
            log_level: default_log_level(),
            screen_questions: true,
        }
    }
}

/// Vision-language inference service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_url")]
    pub base_url: String,
    /// Candidate models; one attempt per model on transient faults.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_inference_url(),
            models: default_models(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_inference_timeout(),
        }
    }
}

/// Region / legend detector service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_url")]
    pub base_url: String,
    #[serde(default = "default_detector_timeout")]
    pub timeout_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            base_url: default_detector_url(),
            timeout_secs: default_detector_timeout(),
        }
    }
}

/// Which implementation backs land-cover / population lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeographySource {
    /// Gridded dataset files on disk
    Dataset,
    /// Deterministic pseudo-random values seeded by the bounding box
    #[default]
    Placeholder,
}

/// Knowledge datasets configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_faults_path")]
    pub active_faults_path: PathBuf,
    #[serde(default = "default_earthquakes_path")]
    pub earthquake_catalog_path: PathBuf,
    #[serde(default = "default_rock_type_path")]
    pub rock_type_vocabulary: PathBuf,
    #[serde(default = "default_rock_age_path")]
    pub rock_age_vocabulary: PathBuf,
    #[serde(default)]
    pub geography: GeographySource,
    #[serde(default)]
    pub land_cover_grid_path: Option<PathBuf>,
    #[serde(default)]
    pub population_grid_path: Option<PathBuf>,
    /// Degrees added around the map box when searching the earthquake catalog.
    #[serde(default = "default_earthquake_margin")]
    pub earthquake_margin_deg: f64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            active_faults_path: default_faults_path(),
            earthquake_catalog_path: default_earthquakes_path(),
            rock_type_vocabulary: default_rock_type_path(),
            rock_age_vocabulary: default_rock_age_path(),
            geography: GeographySource::default(),
            land_cover_grid_path: None,
            population_grid_path: None,
            earthquake_margin_deg: default_earthquake_margin(),
        }
    }
}

/// Image-processing parameters
#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    /// Fraction of width/height taken from each main-map corner for the lon/lat crop.
    #[serde(default = "default_corner_fraction")]
    pub corner_fraction: f32,
    /// Downsample factor applied to the main map before area estimation.
    #[serde(default = "default_area_downsample")]
    pub area_downsample: u32,
    /// Pixels with every channel below this value are ignored when sampling colors.
    #[serde(default = "default_near_black")]
    pub near_black: u8,
    /// Padding (pixels) around the index map for the direction labels.
    #[serde(default = "default_direction_margin")]
    pub direction_margin: u32,
    /// Images at or above this size are halved before upload.
    #[serde(default = "default_upload_limit")]
    pub upload_limit_bytes: u64,
    #[serde(default = "default_data_url_cache")]
    pub data_url_cache_capacity: usize,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            corner_fraction: default_corner_fraction(),
            area_downsample: default_area_downsample(),
            near_black: default_near_black(),
            direction_margin: default_direction_margin(),
            upload_limit_bytes: default_upload_limit(),
            data_url_cache_capacity: default_data_url_cache(),
        }
    }
}

/// Prompt language, derived from the dataset source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    English,
    Chinese,
}

fn default_true() -> bool {
    true
}

fn default_dataset_source() -> String {
    "usgs".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_inference_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_models() -> Vec<String> {
    vec!["gpt-4o".to_string()]
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_inference_timeout() -> u64 {
    120
}

fn default_detector_url() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_detector_timeout() -> u64 {
    60
}

fn default_faults_path() -> PathBuf {
    PathBuf::from("knowledge/gem_active_faults_harmonized.geojson")
}

fn default_earthquakes_path() -> PathBuf {
    PathBuf::from("knowledge/earthquakes.csv")
}

fn default_rock_type_path() -> PathBuf {
    PathBuf::from("knowledge/k2_rock_type.json")
}

fn default_rock_age_path() -> PathBuf {
    PathBuf::from("knowledge/k2_rock_age.json")
}

fn default_earthquake_margin() -> f64 {
    0.05
}

fn default_corner_fraction() -> f32 {
    0.1
}

fn default_area_downsample() -> u32 {
    4
}

fn default_near_black() -> u8 {
    16
}

fn default_direction_margin() -> u32 {
    50
}

fn default_upload_limit() -> u64 {
    20 * 1024 * 1024
}

fn default_data_url_cache() -> usize {
    64
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in GEOMAP_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("GEOMAP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.geomap.dataset_source.trim().is_empty() {
            anyhow::bail!("geomap.dataset_source must not be empty");
        }

        if self.inference.models.iter().all(|m| m.trim().is_empty()) {
            anyhow::bail!("inference.models must list at least one model");
        }

        if !(self.vision.corner_fraction > 0.0 && self.vision.corner_fraction <= 0.5) {
            anyhow::bail!("vision.corner_fraction must be in (0.0, 0.5]");
        }

        if self.vision.area_downsample == 0 {
            anyhow::bail!("vision.area_downsample must be greater than 0");
        }

        if self.knowledge.geography == GeographySource::Dataset
            && (self.knowledge.land_cover_grid_path.is_none()
                || self.knowledge.population_grid_path.is_none())
        {
            anyhow::bail!(
                "knowledge.geography = \"dataset\" requires land_cover_grid_path and population_grid_path"
            );
        }

        Ok(())
    }

    /// Model identity used to namespace the cache (first candidate model)
    pub fn model_identity(&self) -> &str {
        self.inference
            .models
            .iter()
            .map(|m| m.trim())
            .find(|m| !m.is_empty())
            .unwrap_or("default")
    }

    /// Cache root: `<cache_dir>/<dataset_source>/<model_identity>`
    pub fn cache_root(&self) -> PathBuf {
        self.geomap
            .cache_dir
            .join(&self.geomap.dataset_source)
            .join(self.model_identity())
    }

    /// Prompt language for the active dataset
    pub fn locale(&self) -> Locale {
        if self.geomap.dataset_source.eq_ignore_ascii_case("cgs") {
            Locale::Chinese
        } else {
            Locale::English
        }
    }

    /// Get the cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.geomap.cache_dir
    }
}
