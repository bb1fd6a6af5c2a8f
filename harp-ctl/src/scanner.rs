//! Debounced beam detection over the receiver channels
//!
//! Each receiver carries a [`ChannelState`]. A raw level that differs from the
//! last one seen starts a candidate; the candidate becomes the new stable level
//! only after it has been read continuously for at least the debounce
//! interval. A level that flickers back before then resets the candidate and
//! produces no event, which keeps a hand sweeping through a beam from
//! triggering the note several times.

use crate::hardware::{DigitalIo, Direction, Pull};
use harp_common::{Channel, Error, HarpConfig, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Direction of an accepted level change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Receiver moved to the blocked polarity
    BeamBroken,
    /// Receiver moved back to the clear polarity
    BeamRestored,
}

/// Debounced transition on one receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub channel: Channel,
    pub kind: TransitionKind,
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    last_stable_level: bool,
    last_raw_level: bool,
    last_change: Instant,
}

/// Polls receivers and turns raw levels into discrete transitions
pub struct BeamScanner<I: DigitalIo> {
    io: I,
    /// Scan order (note order)
    receivers: Vec<Channel>,
    emitters: Vec<Channel>,
    states: HashMap<Channel, ChannelState>,
    debounce: Duration,
    broken_level: bool,
    released: bool,
}

impl<I: DigitalIo> BeamScanner<I> {
    /// Light every emitter and arm every receiver
    ///
    /// The level read here becomes each receiver's initial stable level, so a
    /// beam that is already blocked at startup does not fire.
    pub fn initialize(config: &HarpConfig, io: I) -> Result<Self> {
        let mut scanner = Self {
            io,
            receivers: Vec::with_capacity(config.notes.len()),
            emitters: Vec::with_capacity(config.notes.len()),
            states: HashMap::with_capacity(config.notes.len()),
            debounce: config.debounce_interval(),
            broken_level: config.beam_broken_level.as_bool(),
            released: false,
        };

        if let Err(e) = scanner.arm(config) {
            scanner.release();
            return Err(e);
        }

        info!(
            "Beam scanner armed: {} receivers, debounce {:?}",
            scanner.receivers.len(),
            scanner.debounce
        );
        Ok(scanner)
    }

    fn arm(&mut self, config: &HarpConfig) -> Result<()> {
        let now = Instant::now();
        for note in &config.notes {
            if !self.emitters.contains(&note.emitter_channel) {
                self.emitters.push(note.emitter_channel);
                self.io
                    .configure(note.emitter_channel, Direction::Output, Pull::None)?;
            }
            self.io.write(note.emitter_channel, true)?;

            self.receivers.push(note.receiver_channel);
            self.io
                .configure(note.receiver_channel, Direction::Input, Pull::Up)?;
            let level = self.io.read(note.receiver_channel)?;
            self.states.insert(
                note.receiver_channel,
                ChannelState {
                    last_stable_level: level,
                    last_raw_level: level,
                    last_change: now,
                },
            );
            debug!(
                "Note '{}': emitter {} on, receiver {} initial level {}",
                note.symbol, note.emitter_channel, note.receiver_channel, level
            );
        }
        Ok(())
    }

    /// Read every receiver once and report accepted transitions
    pub fn scan(&mut self) -> Result<Vec<Transition>> {
        self.scan_at(Instant::now())
    }

    /// Like [`scan`](Self::scan), with the read timestamp supplied by the caller
    ///
    /// All receivers are read before any state changes, so a hardware error
    /// leaves every channel's state exactly as it was.
    pub fn scan_at(&mut self, now: Instant) -> Result<Vec<Transition>> {
        if self.released {
            return Err(Error::Config("Scan after channels were released".to_string()));
        }

        let mut levels = Vec::with_capacity(self.receivers.len());
        for &channel in &self.receivers {
            levels.push((channel, self.io.read(channel)?));
        }

        let mut transitions = Vec::new();
        for (channel, raw) in levels {
            let state = self
                .states
                .get_mut(&channel)
                .ok_or_else(|| Error::Config(format!("No scan state for {}", channel)))?;

            if raw != state.last_raw_level {
                state.last_raw_level = raw;
                state.last_change = now;
            }

            if raw != state.last_stable_level
                && now.saturating_duration_since(state.last_change) >= self.debounce
            {
                state.last_stable_level = raw;
                let kind = if raw == self.broken_level {
                    TransitionKind::BeamBroken
                } else {
                    TransitionKind::BeamRestored
                };
                debug!("{} -> {:?}", channel, kind);
                transitions.push(Transition { channel, kind });
            }
        }

        Ok(transitions)
    }

    /// Debounced level of a receiver
    pub fn stable_level(&self, channel: Channel) -> Result<bool> {
        self.states
            .get(&channel)
            .map(|s| s.last_stable_level)
            .ok_or_else(|| Error::Config(format!("{} is not a receiver channel", channel)))
    }

    /// Whether the beam on `channel` is currently (debounced) blocked
    pub fn is_blocked(&self, channel: Channel) -> Result<bool> {
        Ok(self.stable_level(channel)? == self.broken_level)
    }

    pub fn receivers(&self) -> &[Channel] {
        &self.receivers
    }

    /// Turn emitters off and release every configured channel
    ///
    /// Failures are logged and returned, never raised; a second call is a
    /// no-op.
    pub fn release(&mut self) -> Vec<Error> {
        if self.released {
            return Vec::new();
        }
        self.released = true;

        let mut failures = Vec::new();
        for &channel in &self.emitters {
            if let Err(e) = self.io.write(channel, false) {
                warn!("Failed to turn off emitter {}: {}", channel, e);
                failures.push(e);
            }
        }
        for &channel in self.emitters.iter().chain(self.receivers.iter()) {
            if let Err(e) = self.io.release(channel) {
                warn!("Failed to release {}: {}", channel, e);
                failures.push(e);
            }
        }

        info!("Released {} beam channels", self.emitters.len() + self.receivers.len());
        failures
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedIo;
    use harp_common::{Level, NoteConfig};

    const DEBOUNCE: Duration = Duration::from_millis(60);

    fn config() -> HarpConfig {
        HarpConfig {
            notes: vec![
                NoteConfig::new("do", 261.63, 5, 12),
                NoteConfig::new("re", 293.66, 6, 16),
            ],
            target_sequence: vec!["do".to_string()],
            debounce_ms: DEBOUNCE.as_millis() as u64,
            beam_broken_level: Level::High,
            ..HarpConfig::default()
        }
    }

    /// Scanner over a sim where every receiver starts clear (low)
    fn armed() -> (BeamScanner<SimulatedIo>, SimulatedIo) {
        let io = SimulatedIo::new();
        io.set_input(Channel(12), false);
        io.set_input(Channel(16), false);
        let scanner = BeamScanner::initialize(&config(), io.clone()).unwrap();
        (scanner, io)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_initialize_lights_emitters() {
        let (scanner, io) = armed();
        assert_eq!(io.level(Channel(5)), Some(true));
        assert_eq!(io.level(Channel(6)), Some(true));
        assert_eq!(scanner.receivers(), &[Channel(12), Channel(16)]);
        assert!(!scanner.is_blocked(Channel(12)).unwrap());
    }

    #[test]
    fn test_steady_input_emits_nothing() {
        let (mut scanner, _io) = armed();
        let t0 = Instant::now();
        for step in 0..20 {
            assert!(scanner.scan_at(t0 + ms(step * 10)).unwrap().is_empty());
        }
    }

    #[test]
    fn test_held_change_emits_once_after_debounce() {
        let (mut scanner, io) = armed();
        let t0 = Instant::now();

        io.set_input(Channel(12), true);
        assert!(scanner.scan_at(t0).unwrap().is_empty());
        assert!(scanner.scan_at(t0 + ms(30)).unwrap().is_empty());
        assert!(scanner.scan_at(t0 + ms(59)).unwrap().is_empty());

        let events = scanner.scan_at(t0 + ms(60)).unwrap();
        assert_eq!(
            events,
            vec![Transition {
                channel: Channel(12),
                kind: TransitionKind::BeamBroken
            }]
        );
        assert!(scanner.is_blocked(Channel(12)).unwrap());

        // Still held: no repeat
        assert!(scanner.scan_at(t0 + ms(200)).unwrap().is_empty());
    }

    #[test]
    fn test_flicker_shorter_than_debounce_is_discarded() {
        let (mut scanner, io) = armed();
        let t0 = Instant::now();

        io.set_input(Channel(12), true);
        scanner.scan_at(t0).unwrap();
        io.set_input(Channel(12), false);
        assert!(scanner.scan_at(t0 + ms(20)).unwrap().is_empty());

        for step in 1..20 {
            assert!(scanner.scan_at(t0 + ms(20 + step * 10)).unwrap().is_empty());
        }
        assert!(!scanner.is_blocked(Channel(12)).unwrap());
    }

    #[test]
    fn test_bounce_restarts_the_hold_timer() {
        let (mut scanner, io) = armed();
        let t0 = Instant::now();

        // high at 0, low at 40, high again at 50: hold counts from 50
        io.set_input(Channel(12), true);
        scanner.scan_at(t0).unwrap();
        io.set_input(Channel(12), false);
        scanner.scan_at(t0 + ms(40)).unwrap();
        io.set_input(Channel(12), true);
        assert!(scanner.scan_at(t0 + ms(50)).unwrap().is_empty());
        assert!(scanner.scan_at(t0 + ms(100)).unwrap().is_empty());

        let events = scanner.scan_at(t0 + ms(110)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TransitionKind::BeamBroken);
    }

    #[test]
    fn test_restore_after_break() {
        let (mut scanner, io) = armed();
        let t0 = Instant::now();

        io.set_input(Channel(16), true);
        scanner.scan_at(t0).unwrap();
        assert_eq!(scanner.scan_at(t0 + ms(60)).unwrap().len(), 1);

        io.set_input(Channel(16), false);
        scanner.scan_at(t0 + ms(100)).unwrap();
        let events = scanner.scan_at(t0 + ms(160)).unwrap();
        assert_eq!(
            events,
            vec![Transition {
                channel: Channel(16),
                kind: TransitionKind::BeamRestored
            }]
        );
    }

    #[test]
    fn test_zero_debounce_accepts_immediately() {
        let io = SimulatedIo::new();
        io.set_input(Channel(12), false);
        io.set_input(Channel(16), false);
        let config = HarpConfig {
            debounce_ms: 0,
            ..config()
        };
        let mut scanner = BeamScanner::initialize(&config, io.clone()).unwrap();

        io.set_input(Channel(12), true);
        assert_eq!(scanner.scan_at(Instant::now()).unwrap().len(), 1);
    }

    #[test]
    fn test_low_broken_polarity() {
        let io = SimulatedIo::new();
        let config = HarpConfig {
            beam_broken_level: Level::Low,
            ..config()
        };
        // Pull-up inputs idle high, i.e. clear under this polarity
        let mut scanner = BeamScanner::initialize(&config, io.clone()).unwrap();
        let t0 = Instant::now();

        io.set_input(Channel(12), false);
        scanner.scan_at(t0).unwrap();
        let events = scanner.scan_at(t0 + DEBOUNCE).unwrap();
        assert_eq!(events[0].kind, TransitionKind::BeamBroken);
    }

    #[test]
    fn test_hardware_error_leaves_state_untouched() {
        let (mut scanner, io) = armed();
        let t0 = Instant::now();

        io.set_input(Channel(12), true);
        scanner.scan_at(t0).unwrap();

        io.fail_next_reads(1);
        let result = scanner.scan_at(t0 + ms(30));
        assert!(matches!(result, Err(Error::Hardware { .. })));

        // Candidate from t0 is still pending and completes on schedule
        assert_eq!(scanner.scan_at(t0 + ms(60)).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_channel_is_config_error() {
        let (scanner, _io) = armed();
        assert!(matches!(
            scanner.stable_level(Channel(40)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_release_turns_emitters_off_and_is_idempotent() {
        let (mut scanner, io) = armed();
        assert!(scanner.release().is_empty());
        assert!(io.configured_channels().is_empty());
        assert!(scanner.release().is_empty());
        assert!(matches!(scanner.scan(), Err(Error::Config(_))));
    }
}
