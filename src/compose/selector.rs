use crate::cache::{CacheKey, CacheStore, CacheStoreExt};
use crate::error::Result;
use crate::inference::{complete_structured, ContentPart, InferenceService, Message};
use crate::meta::RegionClass;
use crate::prompt::{QuestionType, SYSTEM_PROMPT};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Picks the map components relevant to a question type.
///
/// The component relation table is computed at most once per selector (and
/// persisted under `component/relations`). Selections are cached per
/// question type, including failed (`null`) ones.
pub struct ComponentSelector {
    cache: Arc<dyn CacheStore>,
    inference: Arc<dyn InferenceService>,
    relations: OnceCell<Value>,
}

fn component_names() -> Vec<&'static str> {
    RegionClass::ALL.iter().map(|c| c.as_str()).collect()
}

impl ComponentSelector {
    pub fn new(cache: Arc<dyn CacheStore>, inference: Arc<dyn InferenceService>) -> Self {
        Self {
            cache,
            inference,
            relations: OnceCell::new(),
        }
    }

    /// Relation table between the region classes
    pub async fn relations(&self) -> Result<&Value> {
        self.relations.get_or_try_init(|| self.load_relations()).await
    }

    async fn load_relations(&self) -> Result<Value> {
        let key = CacheKey::relations();
        if let Some(relations) = self.cache.get_json::<Value>(&key)? {
            log::debug!("Using cached component relations");
            return Ok(relations);
        }

        let example = json!([
            {"component1": "main_map", "component2": "legend", "relation": "XXX"},
            {"component1": "scale", "component2": "title", "relation": "XXX"},
        ]);
        let messages = [
            Message::system(SYSTEM_PROMPT),
            Message::user(vec![
                ContentPart::text(format!(
                    "The components of geologic map are {}.",
                    component_names().join(", ")
                )),
                ContentPart::text(format!(
                    "What are the relations for all the component pairs in geologic map, the example is {}, only respond with JSON format.\n",
                    example
                )),
            ]),
        ];

        match complete_structured::<Value>(self.inference.as_ref(), &messages).await {
            Ok(relations) => {
                self.cache.put_json(&key, &relations)?;
                log::info!("Computed component relations");
                Ok(relations)
            }
            Err(e) => {
                log::warn!("Component relations unavailable, continuing without: {}", e);
                Ok(Value::Array(Vec::new()))
            }
        }
    }

    /// Components to show for `question_type`, most important first.
    pub async fn select(
        &self,
        question: &str,
        question_type: QuestionType,
    ) -> Result<Option<Vec<String>>> {
        let key = CacheKey::Component(question_type.to_string());
        if let Some(selected) = self.cache.get_json::<Option<Vec<String>>>(&key)? {
            log::debug!("Using cached component selection for {}", question_type);
            return Ok(selected);
        }

        let relations = self.relations().await?;
        let example = json!({"1": "XXX", "2": "XXX"});
        let messages = [
            Message::system(SYSTEM_PROMPT),
            Message::user(vec![
                ContentPart::text(format!(
                    "The component relations of geologic map are {}",
                    relations
                )),
                ContentPart::text(format!(
                    "Select component(s) from {}, which is/are used to answer the question, {}, the example is: {}, only respond with JSON format by the order of importance.\n",
                    component_names().join(", "),
                    question,
                    example
                )),
            ]),
        ];

        let selected =
            match complete_structured::<BTreeMap<String, Value>>(self.inference.as_ref(), &messages)
                .await
            {
                Ok(ranked) => Some(ordered_values(ranked)),
                Err(e) => {
                    log::warn!("Component selection unavailable for {}: {}", question_type, e);
                    None
                }
            };

        self.cache.put_json(&key, &selected)?;
        log::info!("Selected components for {}: {:?}", question_type, selected);
        Ok(selected)
    }
}

/// Values ordered by key, numerically where the keys are numbers.
fn ordered_values(ranked: BTreeMap<String, Value>) -> Vec<String> {
    let mut entries: Vec<(String, Value)> = ranked.into_iter().collect();
    entries.sort_by_key(|(k, _)| (k.trim().parse::<u64>().map_err(|_| ()), k.clone()));
    entries
        .into_iter()
        .map(|(_, v)| match v {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        })
        .collect()
}
