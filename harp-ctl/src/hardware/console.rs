//! Tone output and display that report through tracing
//!
//! Used by the binary when no physical speaker or OLED is attached.

use super::{TextDisplay, ToneOutput};
use crate::display::DisplayGeometry;
use harp_common::{Channel, Result};
use tracing::{debug, info};

/// Speaker stand-in that logs each tone
#[derive(Debug)]
pub struct LogToneOutput {
    channel: Channel,
    frequency: f64,
    sounding: bool,
}

impl LogToneOutput {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            frequency: 0.0,
            sounding: false,
        }
    }
}

impl ToneOutput for LogToneOutput {
    fn set_frequency(&mut self, hz: f64) {
        self.frequency = hz;
    }

    fn start(&mut self, duty_cycle: f64) {
        self.sounding = true;
        info!(
            "♪ {:.2} Hz on {} (duty {:.0}%)",
            self.frequency, self.channel, duty_cycle
        );
    }

    fn stop(&mut self) {
        if self.sounding {
            debug!("Tone off on {}", self.channel);
        }
        self.sounding = false;
    }
}

/// OLED stand-in that logs the visible lines
#[derive(Debug)]
pub struct LogDisplay {
    geometry: DisplayGeometry,
}

impl LogDisplay {
    pub fn new(geometry: DisplayGeometry) -> Self {
        Self { geometry }
    }
}

impl TextDisplay for LogDisplay {
    fn render(&mut self, lines: &[String]) -> Result<()> {
        for (row, line) in self.geometry.fit(lines).iter().enumerate() {
            info!("[display {}] {}", row, line);
        }
        Ok(())
    }
}
