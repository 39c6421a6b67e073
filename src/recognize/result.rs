/// Axis-aligned region in frame pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// One recognized piece of text.
#[derive(Clone, Debug, PartialEq)]
pub struct TextRegion {
    pub bbox: BoundingBox,
    pub text: String,
    /// Recognizer confidence in [0, 1].
    pub confidence: f32,
}

impl TextRegion {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox: BoundingBox::default(),
            text: text.into(),
            confidence,
        }
    }

    /// Confidence as a truncated integer percentage, as shown to the operator.
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence.clamp(0.0, 1.0) * 100.0) as u32
    }
}
