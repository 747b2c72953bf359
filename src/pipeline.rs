//! End-to-end question answering: screen, digitize, consult, answer.

use crate::cache::{CacheStore, FileCache};
use crate::compose::AnswerComposer;
use crate::config::{Config, Locale};
use crate::detect::{HttpDetector, LegendDetector, RegionDetector};
use crate::digitize::MapDigitizer;
use crate::error::{GeoMapError, Result};
use crate::inference::{ChatCompletionClient, ContentPart, InferenceService, Message};
use crate::knowledge::{
    GeographicProvider, KnowledgeBroker, KnowledgeProvider, LegendVocabulary, SeismicProvider,
};
use crate::meta::MapMeta;
use crate::prompt::{finalize_answer, QuestionType, NO_ANSWER};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Reply given to screened-out questions
pub const REFUSAL: &str = "I can't help you with that.";

const SCREEN_SYSTEM_PROMPT: &str = "You are an expert in sensitive content filter.";
const SCREEN_INSTRUCTION: &str = r#"Does the question contain sensitive content, such as harmful, toxic, racially discriminatory, and politically related content? Respond in JSON format only, for example: {"contain": true, "reason": "XXX"}"#;

/// Which stages run for a question.
///
/// Parsed from a comma-separated list of `HIE` (digitize), `DKI` (consult
/// knowledge) and `PEQA` (enhanced prompt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopilotModes {
    pub digitize: bool,
    pub consult: bool,
    pub enhance: bool,
}

impl Default for CopilotModes {
    fn default() -> Self {
        Self {
            digitize: true,
            consult: true,
            enhance: true,
        }
    }
}

impl FromStr for CopilotModes {
    type Err = GeoMapError;

    fn from_str(s: &str) -> Result<Self> {
        let mut modes = CopilotModes {
            digitize: false,
            consult: false,
            enhance: false,
        };
        for mode in s.split(',').map(str::trim).filter(|m| !m.is_empty()) {
            match mode.to_ascii_uppercase().as_str() {
                "HIE" => modes.digitize = true,
                "DKI" => modes.consult = true,
                "PEQA" => modes.enhance = true,
                _ => return Err(GeoMapError::InvalidInput(format!("Unknown mode: {}", mode))),
            }
        }
        Ok(modes)
    }
}

impl fmt::Display for CopilotModes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.digitize, "HIE"),
            (self.consult, "DKI"),
            (self.enhance, "PEQA"),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| *name)
        .collect();
        f.write_str(&names.join(","))
    }
}

/// Geologic map copilot: the three stages wired over one cache and one
/// inference service.
pub struct Copilot {
    inference: Arc<dyn InferenceService>,
    digitizer: MapDigitizer,
    broker: KnowledgeBroker,
    composer: AnswerComposer,
    locale: Locale,
    screen_questions: bool,
}

impl Copilot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        cache: Arc<dyn CacheStore>,
        inference: Arc<dyn InferenceService>,
        region_detector: Arc<dyn RegionDetector>,
        legend_detector: Arc<dyn LegendDetector>,
        vocabulary: LegendVocabulary,
        providers: Vec<Box<dyn KnowledgeProvider>>,
    ) -> Self {
        Self {
            digitizer: MapDigitizer::new(
                config,
                cache.clone(),
                inference.clone(),
                region_detector,
                legend_detector,
                vocabulary,
            ),
            broker: KnowledgeBroker::new(cache.clone(), inference.clone(), providers),
            composer: AnswerComposer::new(config, cache, inference.clone()),
            inference,
            locale: config.locale(),
            screen_questions: config.geomap.screen_questions,
        }
    }

    /// Wire the HTTP services and on-disk datasets named by `config`.
    ///
    /// Missing vocabularies or knowledge datasets degrade the answers but do
    /// not prevent startup.
    pub fn build(config: &Config) -> Result<Self> {
        let cache: Arc<dyn CacheStore> = Arc::new(FileCache::new(config.cache_root()));
        log::info!("Cache root: {}", config.cache_root().display());

        let api_key = std::env::var(&config.inference.api_key_env).map_err(|_| {
            GeoMapError::Config(format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                config.inference.api_key_env
            ))
        })?;
        let inference: Arc<dyn InferenceService> =
            Arc::new(ChatCompletionClient::new(&config.inference, api_key)?);
        let detector = Arc::new(HttpDetector::new(&config.detector)?);

        let knowledge = &config.knowledge;
        let vocabulary =
            match LegendVocabulary::load(&knowledge.rock_type_vocabulary, &knowledge.rock_age_vocabulary) {
                Ok(vocabulary) => vocabulary,
                Err(e) => {
                    log::warn!("Rock vocabularies unavailable, lithology and age will be unknown: {}", e);
                    LegendVocabulary::default()
                }
            };

        let mut providers: Vec<Box<dyn KnowledgeProvider>> = Vec::new();
        match SeismicProvider::from_config(knowledge) {
            Ok(provider) => providers.push(Box::new(provider)),
            Err(e) => log::warn!("Seismic knowledge unavailable: {}", e),
        }
        match GeographicProvider::from_config(knowledge) {
            Ok(provider) => providers.push(Box::new(provider)),
            Err(e) => log::warn!("Geographic knowledge unavailable: {}", e),
        }
        log::info!("{} knowledge provider(s) ready", providers.len());

        Ok(Self::new(
            config,
            cache,
            inference,
            detector.clone(),
            detector,
            vocabulary,
            providers,
        ))
    }

    pub async fn digitize(&self, image_path: &Path) -> Result<MapMeta> {
        self.digitizer.digitize(image_path).await
    }

    /// Whether the question should be refused. No verdict counts as a refusal.
    pub async fn screen(&self, question: &str) -> bool {
        let messages = [
            Message::system(SCREEN_SYSTEM_PROMPT),
            Message::user(vec![
                ContentPart::text(format!("Question: {}", question)),
                ContentPart::text(SCREEN_INSTRUCTION),
            ]),
        ];
        match self.inference.complete(&messages, false).await {
            Some(verdict) => verdict.to_lowercase().contains("true"),
            None => true,
        }
    }

    /// Final user-facing answer to `question` about the map at `image_path`.
    pub async fn ask(
        &self,
        image_path: &Path,
        question: &str,
        question_type: QuestionType,
        modes: CopilotModes,
    ) -> Result<String> {
        if self.screen_questions && self.screen(question).await {
            log::warn!("Question refused by content screen");
            return Ok(REFUSAL.to_string());
        }

        let meta = if modes.digitize {
            Some(self.digitizer.digitize(image_path).await?)
        } else {
            None
        };
        let knowledge = if modes.consult {
            self.broker.consult(question, meta.as_ref()).await?
        } else {
            None
        };
        if let Some(knowledge) = &knowledge {
            log::debug!("Selected knowledge: {:?}", knowledge.keys().collect::<Vec<_>>());
        }

        let raw = self
            .composer
            .answer(
                meta.as_ref(),
                knowledge.as_ref(),
                modes.enhance,
                image_path,
                question,
                question_type,
            )
            .await?;

        Ok(match raw {
            Some(raw) => {
                log::debug!("Raw answer: {}", raw);
                finalize_answer(&raw, question_type, self.locale)
            }
            None => NO_ANSWER.to_string(),
        })
    }
}
