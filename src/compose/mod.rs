//! Question answering over a digitized map: component selection and prompt
//! composition.

pub mod composer;
pub mod selector;

pub use composer::AnswerComposer;
pub use selector::ComponentSelector;
