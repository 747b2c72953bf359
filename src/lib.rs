pub mod cache;
pub mod compose;
pub mod config;
pub mod detect;
pub mod digitize;
pub mod error;
pub mod inference;
pub mod knowledge;
pub mod legend;
pub mod meta;
pub mod pipeline;
pub mod prompt;
pub mod vision;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use digitize::MapDigitizer;
pub use error::{GeoMapError, Result};
pub use meta::MapMeta;
pub use pipeline::{Copilot, CopilotModes};
pub use prompt::QuestionType;
