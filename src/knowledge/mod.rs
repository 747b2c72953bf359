//! External domain knowledge: coordinates, vocabularies, providers and the broker.

pub mod broker;
pub mod coords;
pub mod geography;
pub mod seismic;
pub mod vocabulary;

pub use broker::KnowledgeBroker;
pub use coords::{decode_angle, polish_angle, GeoBox};
pub use geography::GeographicProvider;
pub use seismic::SeismicProvider;
pub use vocabulary::{LegendKnowledge, LegendVocabulary, RockVocabulary};

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Knowledge category name -> provider-specific content
pub type KnowledgeBundle = BTreeMap<String, serde_json::Value>;

/// Source of knowledge records for a geographic box
#[async_trait]
pub trait KnowledgeProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn query(&self, area: &GeoBox) -> Result<KnowledgeBundle>;
}

#[async_trait]
impl<P: KnowledgeProvider + ?Sized> KnowledgeProvider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn query(&self, area: &GeoBox) -> Result<KnowledgeBundle> {
        (**self).query(area).await
    }
}

/// Round to `digits` decimal places
pub(crate) fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}
