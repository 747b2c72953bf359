//! Question-type taxonomy, answer instructions and final-answer mapping.

use crate::config::Locale;
use crate::error::{GeoMapError, Result};
use crate::inference::parse_structured;
use crate::meta::RegionClass;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Returned when the inference service gives no answer at all
pub const NO_ANSWER: &str = "no answer";

/// Shape of the expected answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerFormat {
    FillInTheBlank,
    MultipleChoice,
    TrueFalse,
    Essay,
    Grounding,
}

/// One question ability, e.g. `reasoning-fault_existence`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestionType {
    SheetName,
    Scale,
    Lonlat,
    IndexMap,
    /// Locate a component given its name
    GroundingByName(RegionClass),
    /// Locate a component given what it is used for
    GroundingByIntention(RegionClass),
    RockByColor,
    ColorByRock,
    LonlatLocalization,
    FaultExistence,
    AreaComparison,
    LithologyComposition,
    EarthquakeRisk,
}

impl QuestionType {
    pub fn format(&self) -> AnswerFormat {
        match self {
            QuestionType::SheetName
            | QuestionType::Scale
            | QuestionType::Lonlat
            | QuestionType::IndexMap => AnswerFormat::FillInTheBlank,
            QuestionType::GroundingByName(_) | QuestionType::GroundingByIntention(_) => {
                AnswerFormat::Grounding
            }
            QuestionType::RockByColor
            | QuestionType::ColorByRock
            | QuestionType::LonlatLocalization
            | QuestionType::AreaComparison
            | QuestionType::LithologyComposition => AnswerFormat::MultipleChoice,
            QuestionType::FaultExistence => AnswerFormat::TrueFalse,
            QuestionType::EarthquakeRisk => AnswerFormat::Essay,
        }
    }

    /// Every ability, in taxonomy order
    pub fn all() -> Vec<QuestionType> {
        let groundable: Vec<RegionClass> = RegionClass::ALL
            .iter()
            .copied()
            .filter(|c| *c != RegionClass::Others)
            .collect();

        let mut all = vec![
            QuestionType::SheetName,
            QuestionType::Scale,
            QuestionType::Lonlat,
            QuestionType::IndexMap,
        ];
        all.extend(groundable.iter().map(|c| QuestionType::GroundingByName(*c)));
        all.extend(groundable.iter().map(|c| QuestionType::GroundingByIntention(*c)));
        all.extend([
            QuestionType::RockByColor,
            QuestionType::ColorByRock,
            QuestionType::LonlatLocalization,
            QuestionType::FaultExistence,
            QuestionType::AreaComparison,
            QuestionType::LithologyComposition,
            QuestionType::EarthquakeRisk,
        ]);
        all
    }

    /// Instruction template with `$width` / `$height` placeholders
    fn template(&self, locale: Locale) -> String {
        let zh = locale == Locale::Chinese;
        let fill = if zh {
            "这是一道填空题，结合提供的文本信息和图片（宽：$width，高：$height），回答答案并给出分析过程，"
        } else {
            "This is a fill-in-the-blank question. Based on the provided text and image (width: $width, height: $height), analyze and answer the question in JSON format only, "
        };
        let only_json = if zh { "仅返回JSON格式结果，例如：" } else { "for example: " };

        match self {
            QuestionType::SheetName => {
                let example = if zh {
                    r#"{"answer": "K-49-65(义县幅)", "reason": "XXX"}"#
                } else {
                    r#"{"answer": "Geologic map of the Valle 30' x 60' quadrangle, Coconino County, northern Arizona", "reason": "XXX"}"#
                };
                format!("{}{}{}", fill, only_json, example)
            }
            QuestionType::Scale => {
                format!("{}{}{}", fill, only_json, r#"{"answer": "1:100000", "reason": "XXX"}"#)
            }
            QuestionType::Lonlat => {
                if zh {
                    format!(
                        "{}经度范围在前，从西到东顺序，纬度范围在后，从南到北顺序，{}{}",
                        fill,
                        only_json,
                        r#"{"answer": "109°40'E-110°40'E,19°20'N-20°00'N", "reason": "XXX"}"#
                    )
                } else {
                    format!(
                        "{}longitude range comes first, from west to east, followed by latitude range, from south to north, {}{}",
                        fill,
                        only_json,
                        r#"{"answer": "109°40'W-110°40'W,19°20'N-20°00'N", "reason": "XXX"}"#
                    )
                }
            }
            QuestionType::IndexMap => {
                let example = if zh {
                    r#"{"answer": ["乌石港", "海口市", "七洲列岛", "万宁市", "乐东县", "儋州市"], "reason": "XXX"}"#
                } else {
                    r#"{"answer": ["SHELBY", "WACO and BESSEMER CITY", "GASTONIA NORTH", "BLACKSBURG NORTH", "CLOVER"], "reason": "XXX"}"#
                };
                format!("{}{}{}", fill, only_json, example)
            }
            QuestionType::GroundingByName(_) | QuestionType::GroundingByIntention(_) => format!(
                "{}{}{}",
                fill,
                only_json,
                r#"{"answer": [x_min, y_min, x_max, y_max], "reason": "XXX"}"#
            ),
            QuestionType::FaultExistence => {
                if zh {
                    r#"这是一道判断题，结合提供的文本信息和图片（宽：$width，高：$height），回答答案并给出分析过程，仅返回JSON格式结果，例如：{"answer": true, "reason": "XXX"}"#.to_string()
                } else {
                    r#"This is a true/false question. Based on the provided text and image (width: $width, height: $height), analyze and answer the question in JSON format only, for example: {"answer": true, "reason": "XXX"}"#.to_string()
                }
            }
            QuestionType::EarthquakeRisk => {
                if zh {
                    r#"这是一道问答题，结合提供的文本信息和图片（宽：$width，高：$height），回答答案并从不同方面给出详细的分析过程，仅返回JSON格式结果，例如：{"answer": "high risk", "reason": "XXX"}"#.to_string()
                } else {
                    r#"This is a essay question. Based on the provided text and image (width: $width, height: $height), detailedly anylyze and answer the question from different aspects in JSON format only, for example: {"answer": "high risk", "reason": "1. XXX; 2. XXX; 3. XXX; ..."}"#.to_string()
                }
            }
            _ => {
                if zh {
                    r#"这是一道选择题，结合提供的文本信息和图片（宽：$width，高：$height），回答答案并给出分析过程，仅返回JSON格式结果，例如：{"answer": "C", "reason": "XXX"}"#.to_string()
                } else {
                    r#"This is a multiple-choice question. Based on the provided text and image (width: $width, height: $height), analyze and answer the question in JSON format only, for example: {"answer": "C", "reason": "XXX"}"#.to_string()
                }
            }
        }
    }

    /// Answer instruction for an image of the given size.
    ///
    /// The full form asks for reasoning alongside the answer. The baseline
    /// form keeps only the lead-in and asks for a bare `{"answer": "XXX"}`.
    pub fn instruction(&self, locale: Locale, width: u32, height: u32, enhanced: bool) -> String {
        let text = self
            .template(locale)
            .replace("$width", &width.to_string())
            .replace("$height", &height.to_string());
        if enhanced {
            return text;
        }
        match text.find(r#"{"answer":"#) {
            Some(pos) => format!(r#"{}{{"answer": "XXX"}}"#, &text[..pos]),
            None => text,
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionType::SheetName => f.write_str("extracting-sheet_name"),
            QuestionType::Scale => f.write_str("extracting-scale"),
            QuestionType::Lonlat => f.write_str("extracting-lonlat"),
            QuestionType::IndexMap => f.write_str("extracting-index_map"),
            QuestionType::GroundingByName(c) => write!(f, "grounding-{}_by_name", c),
            QuestionType::GroundingByIntention(c) => write!(f, "grounding-{}_by_intention", c),
            QuestionType::RockByColor => f.write_str("referring-rock_by_color"),
            QuestionType::ColorByRock => f.write_str("referring-color_by_rock"),
            QuestionType::LonlatLocalization => f.write_str("reasoning-lonlat_localization"),
            QuestionType::FaultExistence => f.write_str("reasoning-fault_existence"),
            QuestionType::AreaComparison => f.write_str("reasoning-area_comparison"),
            QuestionType::LithologyComposition => f.write_str("reasoning-lithology_composition"),
            QuestionType::EarthquakeRisk => f.write_str("analyzing-earthquake_risk"),
        }
    }
}

impl FromStr for QuestionType {
    type Err = GeoMapError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let unknown = || GeoMapError::InvalidInput(format!("Unknown question type: {}", s));

        if let Some(rest) = s.strip_prefix("grounding-") {
            let (component, by_name) = match rest.strip_suffix("_by_name") {
                Some(c) => (c, true),
                None => (rest.strip_suffix("_by_intention").ok_or_else(unknown)?, false),
            };
            let class: RegionClass = component.parse().map_err(|_| unknown())?;
            if class == RegionClass::Others {
                return Err(unknown());
            }
            return Ok(if by_name {
                QuestionType::GroundingByName(class)
            } else {
                QuestionType::GroundingByIntention(class)
            });
        }

        Ok(match s {
            "extracting-sheet_name" => QuestionType::SheetName,
            "extracting-scale" => QuestionType::Scale,
            "extracting-lonlat" => QuestionType::Lonlat,
            "extracting-index_map" => QuestionType::IndexMap,
            "referring-rock_by_color" => QuestionType::RockByColor,
            "referring-color_by_rock" => QuestionType::ColorByRock,
            "reasoning-lonlat_localization" => QuestionType::LonlatLocalization,
            "reasoning-fault_existence" => QuestionType::FaultExistence,
            "reasoning-area_comparison" => QuestionType::AreaComparison,
            "reasoning-lithology_composition" => QuestionType::LithologyComposition,
            "analyzing-earthquake_risk" => QuestionType::EarthquakeRisk,
            _ => return Err(unknown()),
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map_or(false, |v| v != 0.0),
        Value::String(s) => {
            matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "是" | "对" | "正确")
        }
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map a raw `{"answer": ..., "reason": ...}` envelope to the user-facing answer.
///
/// Text that is not a valid envelope is returned as-is.
pub fn finalize_answer(raw: &str, question_type: QuestionType, locale: Locale) -> String {
    let envelope: Value = match parse_structured(raw) {
        Ok(v) => v,
        Err(_) => return raw.trim().to_string(),
    };
    let Some(answer) = envelope.get("answer") else {
        return raw.trim().to_string();
    };

    let text = match question_type.format() {
        AnswerFormat::TrueFalse => {
            let yes = is_truthy(answer);
            match (yes, locale) {
                (true, Locale::Chinese) => "是".to_string(),
                (false, Locale::Chinese) => "否".to_string(),
                (true, Locale::English) => "Yes".to_string(),
                (false, Locale::English) => "No".to_string(),
            }
        }
        AnswerFormat::Essay => envelope
            .get("reason")
            .map(value_text)
            .unwrap_or_else(|| value_text(answer)),
        _ => value_text(answer),
    };
    text.trim().to_string()
}

/// Question text up to and including its first question mark (either width).
pub fn strip_format_requirement(question: &str) -> &str {
    let end = [question.find('？').map(|i| i + '？'.len_utf8()), question.find('?').map(|i| i + 1)]
        .into_iter()
        .flatten()
        .min();
    match end {
        Some(end) => &question[..end],
        None => question,
    }
}

/// Append lettered options to a multiple-choice question
pub fn with_choices<K: AsRef<str>, V: AsRef<str>>(question: &str, choices: &[(K, V)]) -> String {
    let mut out = question.to_string();
    for (key, value) in choices {
        out.push_str(&format!("\n{}. {}", key.as_ref(), value.as_ref()));
    }
    out
}

/// Question as sent to the model: any trailing format requirement removed,
/// then the options (if any) appended.
pub fn compose_question<K: AsRef<str>, V: AsRef<str>>(question: &str, choices: &[(K, V)]) -> String {
    with_choices(strip_format_requirement(question.trim()), choices)
}

/// Parse a `KEY=text` option, e.g. `A=Granite`.
pub fn parse_choice(arg: &str) -> Result<(String, String)> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(GeoMapError::InvalidInput(format!(
            "Invalid choice '{}', expected KEY=text",
            arg
        ))),
    }
}
