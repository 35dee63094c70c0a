//! Prompt assembly
//!
//! Information Hiding:
//! - Prefix routing, directives and template lookup hidden behind `assemble`
//! - Tag syntax lives in one place
//! - The classifier only sees a text generator, never a concrete backend

mod assembler;
mod classifier;
mod tags;

pub use assembler::{AssembledPrompt, ImageRoute, Intent, PromptAssembler, PromptRequest};
pub use classifier::IntentClassifier;
pub use tags::Tags;
