//! Text recognition backends.
//!
//! The operator loop hands each new live frame to the default recognizer
//! and offers the confident results to the detection filter.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::TextRecognizer;
pub use backends::ScriptedRecognizer;
pub use registry::RecognizerRegistry;
pub use result::{BoundingBox, TextRegion};
