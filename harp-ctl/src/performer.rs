//! Scripted player for the simulated installation
//!
//! Drives the receiver inputs of a [`SimulatedIo`] the way a hand does: the
//! level chatters a few times as the hand enters the beam, holds, then clears.

use crate::hardware::SimulatedIo;
use harp_common::{Channel, Error, HarpConfig, Result};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Shape of one simulated beam break
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformerTiming {
    /// Broken/clear flips before the level settles
    pub bounces: u32,
    /// Time between bounce flips; keep under the debounce interval
    pub bounce_gap: Duration,
    /// How long the beam stays blocked
    pub hold: Duration,
    /// Pause after clearing before the next note
    pub rest: Duration,
}

impl PerformerTiming {
    /// Timing that the configured debounce filters correctly
    pub fn for_config(config: &HarpConfig) -> Self {
        let debounce = config.debounce_interval();
        Self {
            bounces: 3,
            bounce_gap: (debounce / 4).max(Duration::from_millis(1)),
            hold: debounce * 2 + Duration::from_millis(80),
            rest: debounce * 2 + Duration::from_millis(80),
        }
    }
}

/// Plays symbol scripts on simulated beams
#[derive(Debug, Clone)]
pub struct BeamPerformer {
    io: SimulatedIo,
    receivers: HashMap<String, Channel>,
    broken_level: bool,
    timing: PerformerTiming,
}

impl BeamPerformer {
    pub fn new(io: SimulatedIo, config: &HarpConfig) -> Self {
        Self {
            io,
            receivers: config
                .notes
                .iter()
                .map(|n| (n.symbol.clone(), n.receiver_channel))
                .collect(),
            broken_level: config.beam_broken_level.as_bool(),
            timing: PerformerTiming::for_config(config),
        }
    }

    pub fn with_timing(mut self, timing: PerformerTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Put every beam in the clear state
    ///
    /// Call before the controller arms the receivers so the initial stable
    /// level is "clear".
    pub fn prepare(&self) {
        for &channel in self.receivers.values() {
            self.io.set_input(channel, !self.broken_level);
        }
    }

    /// Break each named beam in turn
    ///
    /// Every symbol is checked before the first note plays.
    pub async fn perform<S: AsRef<str>>(&self, symbols: &[S]) -> Result<()> {
        let channels = symbols
            .iter()
            .map(|s| {
                self.receivers.get(s.as_ref()).copied().ok_or_else(|| {
                    Error::Config(format!("Cannot perform unknown note '{}'", s.as_ref()))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!("Performing {} notes", channels.len());
        for channel in channels {
            self.strike(channel).await;
        }
        Ok(())
    }

    async fn strike(&self, channel: Channel) {
        debug!("Blocking {}", channel);
        for _ in 0..self.timing.bounces {
            self.io.set_input(channel, self.broken_level);
            tokio::time::sleep(self.timing.bounce_gap).await;
            self.io.set_input(channel, !self.broken_level);
            tokio::time::sleep(self.timing.bounce_gap).await;
        }
        self.io.set_input(channel, self.broken_level);
        tokio::time::sleep(self.timing.hold).await;
        self.io.set_input(channel, !self.broken_level);
        tokio::time::sleep(self.timing.rest).await;
    }
}
