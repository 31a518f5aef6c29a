use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::smf::{EncodeOptions, Format};
use crate::timing::DEFAULT_TEMPO;
use crate::tracker::TrackerConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Client name announced to the MIDI system.
    pub client_name: String,
    /// Substring of the output port to connect to. First port otherwise.
    pub port_hint: Option<String>,
    pub default_tempo: f64,
    pub rows_per_beat: u32,
    pub sustain_rows: Option<u32>,
    pub ticks_per_quarter: u16,
    /// Follow every `stop` with an all-notes-off.
    pub release_on_stop: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client_name: "midiplay".to_string(),
            port_hint: None,
            default_tempo: DEFAULT_TEMPO,
            rows_per_beat: 4,
            sustain_rows: None,
            ticks_per_quarter: 480,
            release_on_stop: true,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let ron_string = fs::read_to_string(path)?;
        let settings: Settings = ron::from_str(&ron_string)?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn tracker_config(&self, name: &str) -> TrackerConfig {
        TrackerConfig {
            name: name.to_string(),
            tempo: self.default_tempo,
            rows_per_beat: self.rows_per_beat,
            sustain_rows: self.sustain_rows,
        }
    }

    pub fn encode_options(&self, format: Format) -> EncodeOptions {
        EncodeOptions {
            format,
            ticks_per_quarter: self.ticks_per_quarter,
        }
    }
}
