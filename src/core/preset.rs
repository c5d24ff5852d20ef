//! Named frames sent on demand

use super::protocol::FrameParameters;
use super::session::SessionHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A named frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    /// Display name
    pub description: String,
    /// Frame to send
    #[serde(default)]
    pub frame: FrameParameters,
}

impl Preset {
    /// Create a preset
    pub fn new(description: &str, frame: FrameParameters) -> Self {
        Self {
            description: description.to_string(),
            frame,
        }
    }
}

/// Ordered preset list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Presets {
    items: Vec<Preset>,
}

impl Presets {
    /// Wrap a list of presets
    pub fn new(items: Vec<Preset>) -> Self {
        Self { items }
    }

    /// Append a preset and return its index
    pub fn add(&mut self, preset: Preset) -> usize {
        self.items.push(preset);
        self.items.len() - 1
    }

    /// Remove the preset at `index`
    pub fn remove(&mut self, index: usize) -> Option<Preset> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    /// Preset at `index`
    pub fn get(&self, index: usize) -> Option<&Preset> {
        self.items.get(index)
    }

    /// First preset with a matching description
    pub fn find(&self, description: &str) -> Option<(usize, &Preset)> {
        self.items
            .iter()
            .enumerate()
            .find(|(_, p)| p.description == description)
    }

    /// All presets in order
    pub fn items(&self) -> &[Preset] {
        &self.items
    }

    /// Number of presets
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when there are no presets
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Send the preset at `index` through `handle`.
    ///
    /// Returns false for an unknown index or when the session ignored the
    /// frame.
    pub fn send(&self, index: usize, handle: &SessionHandle) -> bool {
        let Some(preset) = self.items.get(index) else {
            warn!(index, "no such preset");
            return false;
        };
        debug!(index, description = %preset.description, "sending preset");
        handle.send_frame(&preset.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::TextFormat;

    fn presets() -> Presets {
        Presets::new(vec![
            Preset::new("ping", FrameParameters::new("ping", TextFormat::Utf8)),
            Preset::new("reset", FrameParameters::new("AA 55", TextFormat::Hex)),
        ])
    }

    #[test]
    fn test_lookup() {
        let presets = presets();
        assert_eq!(presets.len(), 2);
        assert_eq!(presets.find("reset").map(|(i, _)| i), Some(1));
        assert!(presets.find("missing").is_none());
        assert_eq!(&presets.get(1).unwrap().frame.to_bytes()[..], &[0xAA, 0x55]);
    }

    #[test]
    fn test_add_remove() {
        let mut presets = presets();
        let index = presets.add(Preset::new("extra", FrameParameters::default()));
        assert_eq!(index, 2);
        assert_eq!(presets.remove(0).unwrap().description, "ping");
        assert!(presets.remove(10).is_none());
        assert_eq!(presets.items()[0].description, "reset");
    }

    #[test]
    fn test_toml_list() {
        #[derive(Serialize, Deserialize)]
        struct Doc {
            presets: Presets,
        }
        let doc = Doc { presets: presets() };
        let text = toml::to_string(&doc).unwrap();
        let back: Doc = toml::from_str(&text).unwrap();
        assert_eq!(back.presets, presets());
    }
}
