use super::selector::ComponentSelector;
use crate::cache::{CacheKey, CacheStore, DataUrlCache};
use crate::config::{Config, Locale};
use crate::error::Result;
use crate::inference::{ContentPart, InferenceService, Message};
use crate::knowledge::KnowledgeBundle;
use crate::meta::MapMeta;
use crate::prompt::{prompt_view, QuestionType, SYSTEM_PROMPT};
use crate::vision;
use std::path::Path;
use std::sync::Arc;

/// Assembles the grounded question prompt and asks the model.
pub struct AnswerComposer {
    cache: Arc<dyn CacheStore>,
    inference: Arc<dyn InferenceService>,
    selector: ComponentSelector,
    data_urls: DataUrlCache,
    upload_limit: u64,
    locale: Locale,
}

impl AnswerComposer {
    pub fn new(
        config: &Config,
        cache: Arc<dyn CacheStore>,
        inference: Arc<dyn InferenceService>,
    ) -> Self {
        Self {
            selector: ComponentSelector::new(cache.clone(), inference.clone()),
            cache,
            inference,
            data_urls: DataUrlCache::new(config.vision.data_url_cache_capacity),
            upload_limit: config.vision.upload_limit_bytes,
            locale: config.locale(),
        }
    }

    pub fn selector(&self) -> &ComponentSelector {
        &self.selector
    }

    /// Raw structured answer, or `None` when the model gave none.
    ///
    /// With `enhance` the prompt carries the selected component crops and a
    /// reasoning instruction; without it only the full image and a bare
    /// answer instruction.
    pub async fn answer(
        &self,
        meta: Option<&MapMeta>,
        knowledge: Option<&KnowledgeBundle>,
        enhance: bool,
        image_path: &Path,
        question: &str,
        question_type: QuestionType,
    ) -> Result<Option<String>> {
        let mut parts = Vec::new();

        if let Some(meta) = meta {
            parts.push(ContentPart::text(prompt_view(meta).to_string()));
        }
        if let Some(knowledge) = knowledge {
            parts.push(ContentPart::text(serde_json::to_string(knowledge)?));
        }

        let (width, height) = vision::image_size(image_path)?;
        if enhance {
            let selected = self.selector.select(question, question_type).await?;

            let mut attached = 0;
            if let (Some(meta), Some(components)) = (meta, &selected) {
                for component in components {
                    if let Some(url) = self.crop_data_url(&meta.name, component)? {
                        parts.push(ContentPart::image(url));
                        attached += 1;
                    }
                }
            }
            if attached == 0 {
                if let Some(components) = selected.as_ref().filter(|c| !c.is_empty()) {
                    parts.push(ContentPart::text(format!(
                        "Let's focus more on {}",
                        components.join(", ")
                    )));
                }
                parts.push(ContentPart::image(self.image_data_url(image_path)?));
            }

            let instruction = question_type.instruction(self.locale, width, height, true);
            parts.push(ContentPart::text(format!("Instruction: {}\n", instruction)));
        } else {
            parts.push(ContentPart::image(self.image_data_url(image_path)?));
            let instruction = question_type.instruction(self.locale, width, height, false);
            parts.push(ContentPart::text(format!("Instruction: {}\n", instruction)));
        }

        parts.push(ContentPart::text(format!("Question: {}\n", question)));
        parts.push(ContentPart::text("Answer: "));

        log::info!(
            "Answering {} question on {} ({} part(s), enhanced: {})",
            question_type,
            image_path.display(),
            parts.len(),
            enhance
        );
        let messages = [Message::system(SYSTEM_PROMPT), Message::user(parts)];
        let answer = self.inference.complete(&messages, true).await;
        if answer.is_none() {
            log::warn!("No answer for question on {}", image_path.display());
        }
        Ok(answer)
    }

    /// Data URL of the first cached crop of `component`, if one was saved.
    fn crop_data_url(&self, map: &str, component: &str) -> Result<Option<String>> {
        let key = CacheKey::detection(map, component, 0);
        let id = key.relative_path().to_string_lossy().into_owned();
        if let Some(url) = self.data_urls.get(&id) {
            return Ok(Some(url));
        }
        let Some(bytes) = self.cache.get(&key)? else {
            return Ok(None);
        };
        let url = vision::data_url_within_limit(&bytes, "image/png", self.upload_limit)?;
        self.data_urls.put(id, url.clone());
        Ok(Some(url))
    }

    fn image_data_url(&self, path: &Path) -> Result<String> {
        let id = path.to_string_lossy().into_owned();
        if let Some(url) = self.data_urls.get(&id) {
            return Ok(url);
        }
        let url = vision::file_data_url(path, self.upload_limit)?;
        self.data_urls.put(id, url.clone());
        Ok(url)
    }
}
