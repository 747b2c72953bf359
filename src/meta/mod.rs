//! Structured metadata of one digitized geologic map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::GeoMapError;

/// Schema version written into every meta document.
pub const META_VERSION: &str = "v1.0";

/// Name of the derived crop holding the four main-map corners.
pub const LONLAT_CROP: &str = "lonlat";

/// Axis-aligned box in pixel space, serialized as `[x0, y0, x1, y1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl BBox {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }

    pub fn center_y(&self) -> f64 {
        (self.y0 as f64 + self.y1 as f64) / 2.0
    }

    /// `0 <= x0 <= x1 <= width` and `0 <= y0 <= y1 <= height`
    pub fn is_within(&self, width: u32, height: u32) -> bool {
        0 <= self.x0
            && self.x0 <= self.x1
            && self.x1 as i64 <= width as i64
            && 0 <= self.y0
            && self.y0 <= self.y1
            && self.y1 as i64 <= height as i64
    }

    /// Non-degenerate and inside the image.
    pub fn is_usable(&self, width: u32, height: u32) -> bool {
        self.is_within(width, height) && self.width() > 0 && self.height() > 0
    }

    /// Shift by the origin of the enclosing crop.
    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x0 + dx, self.y0 + dy, self.x1 + dx, self.y1 + dy)
    }
}

impl From<[i32; 4]> for BBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [i32; 4] {
    fn from(b: BBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

/// Fixed semantic zones of a geologic map
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionClass {
    Title,
    MainMap,
    Scale,
    Legend,
    IndexMap,
    CrossSection,
    StratigraphicColumn,
    Others,
}

impl RegionClass {
    pub const ALL: [RegionClass; 8] = [
        RegionClass::Title,
        RegionClass::MainMap,
        RegionClass::Scale,
        RegionClass::Legend,
        RegionClass::IndexMap,
        RegionClass::CrossSection,
        RegionClass::StratigraphicColumn,
        RegionClass::Others,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionClass::Title => "title",
            RegionClass::MainMap => "main_map",
            RegionClass::Scale => "scale",
            RegionClass::Legend => "legend",
            RegionClass::IndexMap => "index_map",
            RegionClass::CrossSection => "cross_section",
            RegionClass::StratigraphicColumn => "stratigraphic_column",
            RegionClass::Others => "others",
        }
    }
}

impl fmt::Display for RegionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegionClass {
    type Err = GeoMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RegionClass::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| GeoMapError::InvalidInput(format!("Unknown region class: {}", s)))
    }
}

/// The eight neighbours of an index map plus the (always empty) centre
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "WN")]
    NorthWest,
    #[serde(rename = "N")]
    North,
    #[serde(rename = "EN")]
    NorthEast,
    #[serde(rename = "W")]
    West,
    #[serde(rename = "C")]
    Center,
    #[serde(rename = "E")]
    East,
    #[serde(rename = "WS")]
    SouthWest,
    #[serde(rename = "S")]
    South,
    #[serde(rename = "ES")]
    SouthEast,
}

impl Direction {
    /// Neighbour slots in reading order, centre excluded.
    pub const NEIGHBOURS: [Direction; 8] = [
        Direction::NorthWest,
        Direction::North,
        Direction::NorthEast,
        Direction::West,
        Direction::East,
        Direction::SouthWest,
        Direction::South,
        Direction::SouthEast,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Direction::NorthWest => "WN",
            Direction::North => "N",
            Direction::NorthEast => "EN",
            Direction::West => "W",
            Direction::Center => "C",
            Direction::East => "E",
            Direction::SouthWest => "WS",
            Direction::South => "S",
            Direction::SouthEast => "ES",
        }
    }
}

/// Pixel size of the source image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// One legend row: a colour swatch paired with its label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub color_bndbox: BBox,
    pub text_bndbox: BBox,
    /// Sampled RGB colour
    pub color: [u8; 3],
    pub color_name: String,
    #[serde(default)]
    pub color_hex: String,
    /// OCR'd label
    pub text: String,
    #[serde(default = "unknown")]
    pub lithology: String,
    #[serde(default = "unknown")]
    pub stratigraphic_age: String,
    /// Fraction of the (downsampled) main map covered by this colour
    #[serde(default)]
    pub area: f64,
}

pub(crate) fn unknown() -> String {
    "unknown".to_string()
}

/// Fields read off the map by the inference service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Information {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Scale ratio, e.g. `[1, 100000]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<[u64; 2]>,
    /// Raw angle strings such as `120°30'E`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<Vec<String>>,
    /// Index-map adjacency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<BTreeMap<Direction, String>>,
}

/// Map metadata document ("meta")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMeta {
    pub name: String,
    pub date: String,
    pub version: String,
    pub source: String,
    pub size: ImageSize,
    #[serde(default)]
    pub regions: BTreeMap<RegionClass, Vec<BBox>>,
    #[serde(default)]
    pub legend: BTreeMap<u32, LegendEntry>,
    #[serde(default)]
    pub information: Information,
}

impl MapMeta {
    pub fn new(name: impl Into<String>, source: impl Into<String>, size: ImageSize) -> Self {
        Self {
            name: name.into(),
            date: chrono::Local::now().format("%Y%m%d").to_string(),
            version: META_VERSION.to_string(),
            source: source.into(),
            size,
            regions: BTreeMap::new(),
            legend: BTreeMap::new(),
            information: Information::default(),
        }
    }
}

/// Map name derived from the image file name (stem).
pub fn map_name(image_path: &std::path::Path) -> String {
    image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
