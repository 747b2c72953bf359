//! Prompt assets: system prompt, region instructions and parsing of the
//! basic-information answers read off map crops.

pub mod polish;
pub mod question;

pub use polish::prompt_view;
pub use question::{compose_question, finalize_answer, parse_choice, AnswerFormat, QuestionType, NO_ANSWER};

use crate::config::Locale;
use crate::error::{GeoMapError, Result};
use crate::inference::parse_structured;
use crate::meta::{Direction, Information, RegionClass, LONLAT_CROP};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const SYSTEM_PROMPT: &str =
    "You are an expert in geology and cartography with a focus on geological maps.";

/// Crops read by one structured inference call each during digitization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicInfoRegion {
    Title,
    Scale,
    Lonlat,
    IndexMap,
}

impl BasicInfoRegion {
    pub const ALL: [BasicInfoRegion; 4] = [
        BasicInfoRegion::Title,
        BasicInfoRegion::Scale,
        BasicInfoRegion::Lonlat,
        BasicInfoRegion::IndexMap,
    ];

    /// Name of the crop this region is read from
    pub fn crop_name(&self) -> &'static str {
        match self {
            BasicInfoRegion::Title => RegionClass::Title.as_str(),
            BasicInfoRegion::Scale => RegionClass::Scale.as_str(),
            BasicInfoRegion::Lonlat => LONLAT_CROP,
            BasicInfoRegion::IndexMap => RegionClass::IndexMap.as_str(),
        }
    }

    fn example(&self, locale: Locale) -> &'static str {
        match (self, locale) {
            (BasicInfoRegion::Title, Locale::Chinese) => r#"{"图幅名": "G-47-04(中甸幅)"}"#,
            (BasicInfoRegion::Title, Locale::English) => {
                r#"{"title_name": "Geologic map of the Valle 30' x 60' quadrangle, Coconino County, northern Arizona"}"#
            }
            (BasicInfoRegion::Scale, Locale::Chinese) => r#"{"比例尺": "1:XXX"}"#,
            (BasicInfoRegion::Scale, Locale::English) => r#"{"scale": "1:XXX"}"#,
            (BasicInfoRegion::Lonlat, Locale::Chinese) => {
                r#"{"经度范围": "(X°X'E, X°X'E)", "纬度范围": "(X°X'N, X°X'N)"}"#
            }
            (BasicInfoRegion::Lonlat, Locale::English) => {
                r#"{"longitude_range": "(X°X'W, X°X'W)", "latitude_range": "(X°X'N, X°X'N)"}"#
            }
            (BasicInfoRegion::IndexMap, Locale::Chinese) => {
                r#"{"WN": "弥勒 (G-48-32)", "N": "", "EN": "广南 (G-48-34)", "W": "个旧 (F-48-02)", "E": "", "WS": "金平 (F-48-08)", "S": "马关 (F-48-09)", "ES": "保乐 (F-48-10)"}"#
            }
            (BasicInfoRegion::IndexMap, Locale::English) => {
                r#"{"WN": "SHELBY", "N": "WACO and BESSEMER CITY", "EN": "GASTONIA NORTH", "W": "BLACKSBURG NORTH", "E": "GASTONIA SOUTH", "WS": "BLACKSBURG SOUTH", "S": "KINGS CREEK and FILBERT", "ES": "CLOVER"}"#
            }
        }
    }

    /// Instruction sent with the crop, ending in a literal example
    pub fn instruction(&self, locale: Locale) -> String {
        let lead = match (self, locale) {
            (BasicInfoRegion::Title, Locale::Chinese) => "给定地质图的标题局部图片，以JSON格式，返回 图幅名，例如：",
            (BasicInfoRegion::Title, Locale::English) => {
                "Given a image of the title region of a geologic map, return the title name in JSON format, for example: "
            }
            (BasicInfoRegion::Scale, Locale::Chinese) => "给定地质图的比例尺局部图片，以JSON格式，返回 比例尺，例如：",
            (BasicInfoRegion::Scale, Locale::English) => {
                "Given a image of the scale region of a geologic map, return the scale in JSON format, for example: "
            }
            (BasicInfoRegion::Lonlat, Locale::Chinese) => {
                "给定中国（东北半球）地质图的经纬度局部图片，表示经度的文字一般横向排列，表示纬度的文字竖向排列，以JSON格式，返回 经度范围和纬度范围，例如："
            }
            (BasicInfoRegion::Lonlat, Locale::English) => {
                "Given a image of the longitude and latitude of a geologic map, which locates in the United States (Northwestern Hemisphere), longitude is represented horizontally in text, while latitude is represented vertically, return the longitude range and latitude range in JSON format, for example: "
            }
            (BasicInfoRegion::IndexMap, Locale::Chinese) => {
                "给定地质图的接图表局部图片，以JSON格式，返回 8个方位的邻接区域信息，例如："
            }
            (BasicInfoRegion::IndexMap, Locale::English) => {
                "Given a image of the index map region of a geologic map, return the names of adjacent areas in 8 directions in JSON format, for example: "
            }
        };
        format!("{}{}", lead, self.example(locale))
    }
}

/// Typed basic-information field parsed from an answer
#[derive(Debug, Clone, PartialEq)]
pub enum BasicInfo {
    Title(String),
    Scale([u64; 2]),
    Lonlat {
        longitude: Vec<String>,
        latitude: Vec<String>,
    },
    Connection(BTreeMap<Direction, String>),
}

impl BasicInfo {
    /// Write the field into the meta information block
    pub fn apply(self, information: &mut Information) {
        match self {
            BasicInfo::Title(title) => information.title = Some(title),
            BasicInfo::Scale(scale) => information.scale = Some(scale),
            BasicInfo::Lonlat {
                longitude,
                latitude,
            } => {
                information.longitude = Some(longitude);
                information.latitude = Some(latitude);
            }
            BasicInfo::Connection(connection) => information.connection = Some(connection),
        }
    }
}

#[derive(Deserialize)]
struct TitleAnswer {
    #[serde(alias = "图幅名")]
    title_name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScaleValue {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
struct ScaleAnswer {
    #[serde(alias = "比例尺")]
    scale: ScaleValue,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AngleRange {
    List(Vec<String>),
    Text(String),
}

impl AngleRange {
    fn into_list(self) -> Vec<String> {
        match self {
            AngleRange::List(items) => items.into_iter().map(|s| s.trim().to_string()).collect(),
            AngleRange::Text(text) => text
                .replace(' ', "")
                .trim_matches(|c| c == '(' || c == ')')
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct LonlatAnswer {
    #[serde(alias = "经度范围")]
    longitude_range: AngleRange,
    #[serde(alias = "纬度范围")]
    latitude_range: AngleRange,
}

fn parse_scale(value: ScaleValue) -> Result<[u64; 2]> {
    let text = match value {
        ScaleValue::Number(n) => return Ok([1, n]),
        ScaleValue::Text(text) => text,
    };
    let cleaned = text.replace([',', ' '], "").replace('：', ":");
    let parts = cleaned
        .split(':')
        .map(|p| p.parse::<u64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GeoMapError::Parse(format!("Invalid scale '{}': {}", text, e)))?;
    match parts.as_slice() {
        [n] => Ok([1, *n]),
        [a, b] => Ok([*a, *b]),
        _ => Err(GeoMapError::Parse(format!("Invalid scale '{}'", text))),
    }
}

/// Parse the structured answer for one basic-info region.
pub fn parse_basic_info(region: BasicInfoRegion, raw: &str) -> Result<BasicInfo> {
    match region {
        BasicInfoRegion::Title => {
            let answer: TitleAnswer = parse_structured(raw)?;
            Ok(BasicInfo::Title(answer.title_name.trim().to_string()))
        }
        BasicInfoRegion::Scale => {
            let answer: ScaleAnswer = parse_structured(raw)?;
            Ok(BasicInfo::Scale(parse_scale(answer.scale)?))
        }
        BasicInfoRegion::Lonlat => {
            let answer: LonlatAnswer = parse_structured(raw)?;
            Ok(BasicInfo::Lonlat {
                longitude: answer.longitude_range.into_list(),
                latitude: answer.latitude_range.into_list(),
            })
        }
        BasicInfoRegion::IndexMap => {
            let answer: BTreeMap<Direction, Option<String>> = parse_structured(raw)?;
            let mut connection: BTreeMap<Direction, String> = Direction::NEIGHBOURS
                .iter()
                .map(|d| (*d, answer.get(d).cloned().flatten().unwrap_or_default()))
                .collect();
            connection.insert(Direction::Center, String::new());
            Ok(BasicInfo::Connection(connection))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_embeds_example() {
        let text = BasicInfoRegion::Scale.instruction(Locale::English);
        assert!(text.ends_with(r#"{"scale": "1:XXX"}"#));
        let zh = BasicInfoRegion::Title.instruction(Locale::Chinese);
        assert!(zh.contains("图幅名"));
        assert_eq!(BasicInfoRegion::Lonlat.crop_name(), "lonlat");
    }

    #[test]
    fn test_parse_title_both_locales() {
        let en = parse_basic_info(BasicInfoRegion::Title, r#"{"title_name": " Geologic map of Test "}"#);
        assert_eq!(en.unwrap(), BasicInfo::Title("Geologic map of Test".to_string()));
        let zh = parse_basic_info(BasicInfoRegion::Title, r#"{"图幅名": "义县幅"}"#);
        assert_eq!(zh.unwrap(), BasicInfo::Title("义县幅".to_string()));
    }

    #[test]
    fn test_parse_scale_variants() {
        let parse = |raw: &str| parse_basic_info(BasicInfoRegion::Scale, raw).unwrap();
        assert_eq!(parse(r#"{"scale": "1:100,000"}"#), BasicInfo::Scale([1, 100000]));
        assert_eq!(parse(r#"{"比例尺": "1：50 000"}"#), BasicInfo::Scale([1, 50000]));
        assert_eq!(parse(r#"{"scale": 24000}"#), BasicInfo::Scale([1, 24000]));
        assert!(parse_basic_info(BasicInfoRegion::Scale, r#"{"scale": "1:XXX"}"#).is_err());
    }

    #[test]
    fn test_parse_lonlat_string_and_list() {
        let parsed = parse_basic_info(
            BasicInfoRegion::Lonlat,
            r#"{"longitude_range": "(109°40'W, 110°40'W)", "latitude_range": ["19°20'N", "20°00'N"]}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            BasicInfo::Lonlat {
                longitude: vec!["109°40'W".to_string(), "110°40'W".to_string()],
                latitude: vec!["19°20'N".to_string(), "20°00'N".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_index_map_forces_empty_centre() {
        let parsed = parse_basic_info(
            BasicInfoRegion::IndexMap,
            r#"{"WN": "SHELBY", "N": null, "C": "HERE", "ES": "CLOVER"}"#,
        )
        .unwrap();
        let BasicInfo::Connection(conn) = parsed else {
            panic!("expected connection");
        };
        assert_eq!(conn.len(), 9);
        assert_eq!(conn[&Direction::NorthWest], "SHELBY");
        assert_eq!(conn[&Direction::North], "");
        assert_eq!(conn[&Direction::Center], "");
        assert_eq!(conn[&Direction::SouthEast], "CLOVER");
    }

    #[test]
    fn test_parse_failure_is_error() {
        let err = parse_basic_info(BasicInfoRegion::Title, "The title is Valle").unwrap_err();
        assert!(matches!(err, GeoMapError::Parse(_)));
    }
}
