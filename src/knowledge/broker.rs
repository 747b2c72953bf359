use super::coords::GeoBox;
use super::{KnowledgeBundle, KnowledgeProvider};
use crate::cache::{CacheKey, CacheStore, CacheStoreExt};
use crate::error::Result;
use crate::inference::{complete_structured, ContentPart, InferenceService, Message};
use crate::meta::MapMeta;
use crate::prompt::SYSTEM_PROMPT;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
struct RequiredKnowledge {
    required_knowledge_types: Vec<String>,
}

/// Builds the per-map knowledge bundle and filters it per question.
///
/// The bundle is cached under `knowledge/<map_name>` once every provider
/// has answered. The relevance filter runs one inference call per question
/// and is never cached.
pub struct KnowledgeBroker {
    cache: Arc<dyn CacheStore>,
    inference: Arc<dyn InferenceService>,
    providers: Vec<Box<dyn KnowledgeProvider>>,
}

impl KnowledgeBroker {
    /// Providers are merged in order; later providers win on key collisions.
    pub fn new(
        cache: Arc<dyn CacheStore>,
        inference: Arc<dyn InferenceService>,
        providers: Vec<Box<dyn KnowledgeProvider>>,
    ) -> Self {
        Self {
            cache,
            inference,
            providers,
        }
    }

    /// Knowledge relevant to `question`, or `None` without a map to reason about.
    pub async fn consult(
        &self,
        question: &str,
        meta: Option<&MapMeta>,
    ) -> Result<Option<KnowledgeBundle>> {
        let Some(meta) = meta else {
            log::warn!("Missing metadata, skipping knowledge consultation");
            return Ok(None);
        };

        let bundle = self.bundle(meta).await?;
        Ok(Some(self.select(question, &bundle).await))
    }

    /// Cached bundle for the map, built from the providers on a miss.
    pub async fn bundle(&self, meta: &MapMeta) -> Result<KnowledgeBundle> {
        let key = CacheKey::Knowledge(meta.name.clone());
        if let Some(bundle) = self.cache.get_json::<KnowledgeBundle>(&key)? {
            return Ok(bundle);
        }

        let mut bundle = KnowledgeBundle::new();
        let mut complete = true;
        match map_area(meta) {
            Some(area) => {
                log::info!(
                    "Querying {} knowledge provider(s) for {} [{:.4}, {:.4}, {:.4}, {:.4}]",
                    self.providers.len(),
                    meta.name,
                    area.min_lon,
                    area.min_lat,
                    area.max_lon,
                    area.max_lat
                );
                for provider in &self.providers {
                    match provider.query(&area).await {
                        Ok(records) => bundle.extend(records),
                        Err(e) => {
                            log::warn!("Knowledge provider {} failed: {}", provider.name(), e);
                            complete = false;
                        }
                    }
                }
            }
            None => log::info!("No usable coordinates for {}, knowledge bundle is empty", meta.name),
        }

        // a partial bundle is served but not persisted, so failed providers are asked again
        if complete {
            self.cache.put_json(&key, &bundle)?;
        } else {
            log::warn!("Knowledge bundle for {} is partial, not caching it", meta.name);
        }
        Ok(bundle)
    }

    /// Project the bundle onto the categories the model asks for.
    pub async fn select(&self, question: &str, bundle: &KnowledgeBundle) -> KnowledgeBundle {
        if bundle.is_empty() {
            return KnowledgeBundle::new();
        }

        let types: Vec<&str> = bundle.keys().map(String::as_str).collect();
        let example = serde_json::json!({ "required_knowledge_types": types }).to_string();
        let messages = [
            Message::system(SYSTEM_PROMPT),
            Message::user(vec![
                ContentPart::text(format!("The given question is '{}'.", question)),
                ContentPart::text(format!(
                    "The knowledge types from expert group are {}.",
                    types.join(", ")
                )),
                ContentPart::text(format!(
                    "What are the helpful knowledge types among them to answer the given question, the example is {}, only respond with JSON format.\n",
                    example
                )),
            ]),
        ];

        let required =
            match complete_structured::<RequiredKnowledge>(self.inference.as_ref(), &messages).await {
                Ok(r) => r.required_knowledge_types,
                Err(e) => {
                    log::warn!("Knowledge selection unavailable, using none: {}", e);
                    Vec::new()
                }
            };

        required
            .into_iter()
            .filter_map(|k| bundle.get(&k).map(|v| (k, v.clone())))
            .collect()
    }
}

/// Geographic box of the map, if its coordinates decode to a valid box
fn map_area(meta: &MapMeta) -> Option<GeoBox> {
    let info = &meta.information;
    let (Some(lon), Some(lat)) = (&info.longitude, &info.latitude) else {
        return None;
    };
    match GeoBox::from_ranges(lon, lat) {
        Ok(area) if area.is_valid() => Some(area),
        Ok(area) => {
            log::warn!("Coordinates out of range for {}: {:?}", meta.name, area);
            None
        }
        Err(e) => {
            log::warn!("Undecodable coordinates for {}: {}", meta.name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCache;
    use crate::meta::ImageSize;
    use crate::test_support::{ScriptedInference, StaticProvider};
    use serde_json::json;
    use tempfile::TempDir;

    const SELECT_NEEDLE: &str = "helpful knowledge types";

    fn meta(lon: [&str; 2], lat: [&str; 2]) -> MapMeta {
        let mut meta = MapMeta::new("E4901", "usgs", ImageSize { width: 10, height: 10 });
        meta.information.longitude = Some(lon.iter().map(|s| s.to_string()).collect());
        meta.information.latitude = Some(lat.iter().map(|s| s.to_string()).collect());
        meta
    }

    fn providers() -> (Arc<StaticProvider>, Arc<StaticProvider>) {
        let seismic = StaticProvider::new(
            "seismic",
            [("active_faults", json!("none")), ("shared", json!("seismic"))],
        );
        let geographic = StaticProvider::new(
            "geographic",
            [("population_density", json!("12 people/km^2")), ("shared", json!("geographic"))],
        );
        (Arc::new(seismic), Arc::new(geographic))
    }

    fn broker(dir: &TempDir, inference: Arc<ScriptedInference>) -> (KnowledgeBroker, Arc<StaticProvider>, Arc<StaticProvider>) {
        let (a, b) = providers();
        let broker = KnowledgeBroker::new(
            Arc::new(FileCache::new(dir.path())),
            inference,
            vec![Box::new(a.clone()), Box::new(b.clone())],
        );
        (broker, a, b)
    }

    #[tokio::test]
    async fn test_missing_meta_gives_none() {
        let dir = TempDir::new().unwrap();
        let inference = Arc::new(ScriptedInference::new());
        let (broker, a, _) = broker(&dir, inference.clone());
        assert!(broker.consult("q", None).await.unwrap().is_none());
        assert_eq!(a.calls(), 0);
        assert_eq!(inference.calls(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_latitude_skips_providers() {
        let dir = TempDir::new().unwrap();
        let inference = Arc::new(ScriptedInference::new());
        let (broker, a, b) = broker(&dir, inference.clone());
        let m = meta(["120°00'E", "121°00'E"], ["120°00'N", "121°00'N"]);

        let selected = broker.consult("Is there a fault?", Some(&m)).await.unwrap();
        assert_eq!(selected, Some(KnowledgeBundle::new()));
        assert_eq!(a.calls() + b.calls(), 0);
        assert_eq!(inference.calls(), 0);
    }

    #[tokio::test]
    async fn test_later_provider_wins_and_bundle_is_cached() {
        let dir = TempDir::new().unwrap();
        let inference = Arc::new(ScriptedInference::new().on(
            SELECT_NEEDLE,
            r#"{"required_knowledge_types": ["shared", "active_faults", "landcover"]}"#,
        ));
        let (broker, a, b) = broker(&dir, inference.clone());
        let m = meta(["120°00'E", "121°00'E"], ["30°30'N", "31°30'N"]);

        let first = broker.consult("Is there a fault?", Some(&m)).await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first["shared"], json!("geographic"));
        assert_eq!(first["active_faults"], json!("none"));

        let second = broker.consult("Is there a fault?", Some(&m)).await.unwrap().unwrap();
        assert_eq!(second, first);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        // selection is recomputed per question
        assert_eq!(inference.calls(), 2);

        let cached: KnowledgeBundle = FileCache::new(dir.path())
            .get_json(&CacheKey::Knowledge("E4901".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(cached.len(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_selection_is_empty() {
        let dir = TempDir::new().unwrap();
        let inference = Arc::new(ScriptedInference::new().on(SELECT_NEEDLE, "{'required_knowledge_types': ['shared']}"));
        let (broker, _, _) = broker(&dir, inference);
        let m = meta(["120°00'E", "121°00'E"], ["30°30'N", "31°30'N"]);
        let selected = broker.consult("q", Some(&m)).await.unwrap().unwrap();
        assert!(selected.is_empty());
    }

    #[tokio::test]
    async fn test_failing_provider_is_skipped() {
        let dir = TempDir::new().unwrap();
        let inference = Arc::new(ScriptedInference::new());
        let failing = Arc::new(StaticProvider::failing("broken"));
        let (_, geographic) = providers();
        let broker = KnowledgeBroker::new(
            Arc::new(FileCache::new(dir.path())),
            inference,
            vec![Box::new(failing.clone()), Box::new(geographic.clone())],
        );
        let m = meta(["120°00'E", "121°00'E"], ["30°30'N", "31°30'N"]);
        let bundle = broker.bundle(&m).await.unwrap();
        assert_eq!(bundle.len(), 2);
        assert_eq!(failing.calls(), 1);
        assert!(!FileCache::new(dir.path()).exists(&CacheKey::Knowledge("E4901".to_string())));
    }

    #[tokio::test]
    async fn test_provider_recovering_after_failure_is_asked_again() {
        let dir = TempDir::new().unwrap();
        let flaky = Arc::new(
            StaticProvider::new("seismic", [("active_faults", json!("Test fault"))]).failing_times(1),
        );
        let broker = KnowledgeBroker::new(
            Arc::new(FileCache::new(dir.path())),
            Arc::new(ScriptedInference::new()),
            vec![Box::new(flaky.clone())],
        );
        let m = meta(["120°00'E", "121°00'E"], ["30°30'N", "31°30'N"]);

        assert!(broker.bundle(&m).await.unwrap().is_empty());
        let second = broker.bundle(&m).await.unwrap();
        assert_eq!(second["active_faults"], json!("Test fault"));
        assert_eq!(flaky.calls(), 2);

        // complete bundle is cached from then on
        broker.bundle(&m).await.unwrap();
        assert_eq!(flaky.calls(), 2);
    }
}
