use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::TextRecognizer;
use super::result::TextRegion;
use crate::frame::Frame;
use crate::PilotError;

/// Thread-safe registry of recognizer backends.
///
/// Backends are wrapped in `Mutex` because `TextRecognizer::recognize` takes `&mut self`.
pub struct RecognizerRegistry {
    backends: HashMap<String, Arc<Mutex<dyn TextRecognizer>>>,
    default_name: Option<String>,
}

impl RecognizerRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<R: TextRecognizer + 'static>(&mut self, backend: R) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("recognizer '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_backend(&self) -> Option<Arc<Mutex<dyn TextRecognizer>>> {
        self.default_name
            .as_ref()
            .and_then(|name| self.backends.get(name).cloned())
    }

    /// Warm up every registered backend.
    pub fn warm_up(&self) -> Result<(), PilotError> {
        for backend in self.backends.values() {
            backend
                .lock()
                .map_err(|_| PilotError::LockPoisoned("recognizer"))?
                .warm_up()?;
        }
        Ok(())
    }

    /// Run the default backend on a frame.
    pub fn recognize(&self, frame: &Frame) -> Result<Vec<TextRegion>, PilotError> {
        let backend = self
            .default_backend()
            .ok_or_else(|| PilotError::Recognition("no recognizer registered".to_string()))?;
        let mut guard = backend
            .lock()
            .map_err(|_| PilotError::LockPoisoned("recognizer"))?;
        guard.recognize(frame)
    }
}

impl Default for RecognizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
