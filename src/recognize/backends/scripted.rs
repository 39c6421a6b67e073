use std::collections::VecDeque;

use crate::frame::Frame;
use crate::recognize::backend::TextRecognizer;
use crate::recognize::result::TextRegion;
use crate::PilotError;

/// Scripted backend for stub sessions and tests.
///
/// Each call consumes the next scripted result. Once the script runs out
/// every call returns no regions, unless the backend was built with
/// `repeating`, which keeps returning the last entry.
#[derive(Debug, Default)]
pub struct ScriptedRecognizer {
    script: VecDeque<Vec<TextRegion>>,
    repeat_last: bool,
    pending_failures: usize,
    calls: usize,
}

impl ScriptedRecognizer {
    pub fn new(script: impl IntoIterator<Item = Vec<TextRegion>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Return `regions` on every call.
    pub fn repeating(regions: Vec<TextRegion>) -> Self {
        Self {
            repeat_last: true,
            ..Self::new([regions])
        }
    }

    /// Make the next `count` calls fail.
    pub fn fail_next(mut self, count: usize) -> Self {
        self.pending_failures += count;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn recognize(&mut self, frame: &Frame) -> Result<Vec<TextRegion>, PilotError> {
        self.calls += 1;
        if self.pending_failures > 0 {
            self.pending_failures -= 1;
            return Err(PilotError::Recognition(format!(
                "scripted failure on frame {}",
                frame.sequence
            )));
        }

        if self.repeat_last && self.script.len() == 1 {
            return Ok(self.script.front().cloned().unwrap_or_default());
        }
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn frame() -> Frame {
        Frame::new(vec![0; 4], 2, 2, PixelFormat::Gray8, 0)
    }

    #[test]
    fn replays_script_then_goes_quiet() {
        let mut backend = ScriptedRecognizer::new([
            vec![TextRegion::new("A", 0.9)],
            vec![],
            vec![TextRegion::new("B", 0.5)],
        ]);
        assert_eq!(backend.recognize(&frame()).unwrap()[0].text, "A");
        assert!(backend.recognize(&frame()).unwrap().is_empty());
        assert_eq!(backend.recognize(&frame()).unwrap()[0].text, "B");
        assert!(backend.recognize(&frame()).unwrap().is_empty());
        assert_eq!(backend.calls(), 4);
    }

    #[test]
    fn repeating_keeps_returning_last_entry() {
        let mut backend = ScriptedRecognizer::repeating(vec![TextRegion::new("C", 0.99)]);
        for _ in 0..3 {
            assert_eq!(backend.recognize(&frame()).unwrap().len(), 1);
        }
    }

    #[test]
    fn scripted_failures_come_first() {
        let mut backend = ScriptedRecognizer::repeating(vec![TextRegion::new("A", 0.9)]).fail_next(1);
        assert!(matches!(
            backend.recognize(&frame()),
            Err(PilotError::Recognition(_))
        ));
        assert_eq!(backend.recognize(&frame()).unwrap().len(), 1);
    }
}
