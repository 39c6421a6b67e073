use super::result::TextRegion;
use crate::frame::Frame;
use crate::PilotError;

/// Text recognizer backend.
///
/// A failed call means "no result this cycle"; callers log it and move on
/// to the next frame.
pub trait TextRecognizer: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Find text regions in a frame. The frame is only borrowed for the call.
    fn recognize(&mut self, frame: &Frame) -> Result<Vec<TextRegion>, PilotError>;

    /// Optional warm-up hook, e.g. loading models before the first frame.
    fn warm_up(&mut self) -> Result<(), PilotError> {
        Ok(())
    }
}
