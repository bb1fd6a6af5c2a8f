//! Display screens and text fitting
//!
//! The installation drives a 128×64 monochrome OLED with the default 6×12 px
//! bitmap font, so a screen holds `height / 12` lines of `width / 6`
//! characters.

use harp_common::config::DisplayConfig;

/// Text capacity of the display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    pub rows: usize,
    pub columns: usize,
}

impl DisplayGeometry {
    pub const LINE_HEIGHT_PX: u32 = 12;
    pub const GLYPH_WIDTH_PX: u32 = 6;

    pub fn from_config(config: &DisplayConfig) -> Self {
        Self {
            rows: (config.height / Self::LINE_HEIGHT_PX) as usize,
            columns: (config.width / Self::GLYPH_WIDTH_PX) as usize,
        }
    }

    /// Clip lines to what the display can show
    pub fn fit(&self, lines: &[String]) -> Vec<String> {
        lines
            .iter()
            .take(self.rows)
            .map(|line| line.chars().take(self.columns).collect())
            .collect()
    }
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self::from_config(&DisplayConfig::default())
    }
}

/// What the display shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    /// Waiting for the first beam
    Ready,
    /// Target sequence recognized; reveal the key
    SequenceFound { key: String },
}

impl Screen {
    pub fn lines(&self) -> Vec<String> {
        match self {
            Screen::Ready => vec!["Laser Harp Ready".to_string(), "Break a beam...".to_string()],
            Screen::SequenceFound { key } => {
                vec!["Sequence found!".to_string(), format!("Key: {}", key)]
            }
        }
    }
}
