//! The five concrete pipeline steps.

mod align;
mod dependencies;
mod refine;
mod transcribe;
mod translate;

pub use align::AlignStep;
pub use dependencies::{Dependencies, WaitForDependenciesStep};
pub use refine::{RefineInput, RefineStep, Script};
pub use transcribe::TranscribeStep;
pub use translate::{TranslateInput, TranslateStep};
