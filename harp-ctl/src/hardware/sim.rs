//! In-memory hardware for the simulated installation and for tests
//!
//! Every type here is a cheap handle around shared state: clone one, give the
//! clone to the controller, and keep the original to drive inputs or inspect
//! what the controller did.

use super::{DigitalIo, Direction, Pull, TextDisplay, ToneOutput};
use harp_common::{Channel, Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy)]
struct SimPin {
    direction: Direction,
    level: bool,
}

#[derive(Debug, Default)]
struct SimState {
    pins: HashMap<Channel, SimPin>,
    /// Levels applied to inputs by the outside world, kept across configure
    driven: HashMap<Channel, bool>,
    pending_read_failures: u32,
}

/// Simulated GPIO bank
#[derive(Debug, Clone, Default)]
pub struct SimulatedIo {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive an input line from outside (a beam being blocked or cleared)
    pub fn set_input(&self, channel: Channel, level: bool) {
        let mut state = lock(&self.state);
        state.driven.insert(channel, level);
        if let Some(pin) = state.pins.get_mut(&channel) {
            if pin.direction == Direction::Input {
                pin.level = level;
            }
        }
    }

    /// Current level of a configured line
    pub fn level(&self, channel: Channel) -> Option<bool> {
        lock(&self.state).pins.get(&channel).map(|p| p.level)
    }

    pub fn is_configured(&self, channel: Channel) -> bool {
        lock(&self.state).pins.contains_key(&channel)
    }

    pub fn configured_channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = lock(&self.state).pins.keys().copied().collect();
        channels.sort();
        channels
    }

    /// Make the next `count` reads fail with a hardware error
    pub fn fail_next_reads(&self, count: u32) {
        lock(&self.state).pending_read_failures = count;
    }
}

impl DigitalIo for SimulatedIo {
    fn configure(&mut self, channel: Channel, direction: Direction, pull: Pull) -> Result<()> {
        let mut state = lock(&self.state);
        let level = match direction {
            Direction::Output => false,
            Direction::Input => state
                .driven
                .get(&channel)
                .copied()
                .unwrap_or(pull == Pull::Up),
        };
        state.pins.insert(channel, SimPin { direction, level });
        Ok(())
    }

    fn read(&mut self, channel: Channel) -> Result<bool> {
        let mut state = lock(&self.state);
        if state.pending_read_failures > 0 {
            state.pending_read_failures -= 1;
            return Err(Error::hardware(channel, "simulated read failure"));
        }
        state
            .pins
            .get(&channel)
            .map(|p| p.level)
            .ok_or_else(|| Error::Config(format!("Read of unconfigured channel {}", channel)))
    }

    fn write(&mut self, channel: Channel, level: bool) -> Result<()> {
        let mut state = lock(&self.state);
        match state.pins.get_mut(&channel) {
            Some(pin) if pin.direction == Direction::Output => {
                pin.level = level;
                Ok(())
            }
            Some(_) => Err(Error::Config(format!(
                "Write to input channel {}",
                channel
            ))),
            None => Err(Error::Config(format!(
                "Write to unconfigured channel {}",
                channel
            ))),
        }
    }

    fn release(&mut self, channel: Channel) -> Result<()> {
        lock(&self.state).pins.remove(&channel);
        Ok(())
    }
}

/// One call made on a [`RecordingToneOutput`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToneCall {
    SetFrequency(f64),
    Start(f64),
    Stop,
}

/// Tone output that records every call with its timestamp
#[derive(Debug, Clone, Default)]
pub struct RecordingToneOutput {
    calls: Arc<Mutex<Vec<(Instant, ToneCall)>>>,
}

impl RecordingToneOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ToneCall> {
        lock(&self.calls).iter().map(|(_, call)| *call).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, ToneCall)> {
        lock(&self.calls).clone()
    }

    /// Frequencies actually sounded, in order
    pub fn played_frequencies(&self) -> Vec<f64> {
        let calls = lock(&self.calls);
        let mut frequency = None;
        let mut played = Vec::new();
        for (_, call) in calls.iter() {
            match call {
                ToneCall::SetFrequency(hz) => frequency = Some(*hz),
                ToneCall::Start(_) => played.extend(frequency),
                ToneCall::Stop => {}
            }
        }
        played
    }

    /// True if the last start has not been followed by a stop
    pub fn is_sounding(&self) -> bool {
        lock(&self.calls)
            .iter()
            .rev()
            .find_map(|(_, call)| match call {
                ToneCall::Start(_) => Some(true),
                ToneCall::Stop => Some(false),
                ToneCall::SetFrequency(_) => None,
            })
            .unwrap_or(false)
    }
}

impl ToneOutput for RecordingToneOutput {
    fn set_frequency(&mut self, hz: f64) {
        lock(&self.calls).push((Instant::now(), ToneCall::SetFrequency(hz)));
    }

    fn start(&mut self, duty_cycle: f64) {
        lock(&self.calls).push((Instant::now(), ToneCall::Start(duty_cycle)));
    }

    fn stop(&mut self) {
        lock(&self.calls).push((Instant::now(), ToneCall::Stop));
    }
}

/// Display that keeps every frame it was asked to render
#[derive(Debug, Clone, Default)]
pub struct MemoryDisplay {
    frames: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MemoryDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Vec<String>> {
        lock(&self.frames).clone()
    }

    pub fn last_frame(&self) -> Option<Vec<String>> {
        lock(&self.frames).last().cloned()
    }
}

impl TextDisplay for MemoryDisplay {
    fn render(&mut self, lines: &[String]) -> Result<()> {
        lock(&self.frames).push(lines.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_up_input_idles_high() {
        let mut io = SimulatedIo::new();
        io.configure(Channel(12), Direction::Input, Pull::Up).unwrap();
        assert!(io.read(Channel(12)).unwrap());
    }

    #[test]
    fn test_driven_level_survives_configure() {
        let mut io = SimulatedIo::new();
        io.set_input(Channel(12), false);
        io.configure(Channel(12), Direction::Input, Pull::Up).unwrap();
        assert!(!io.read(Channel(12)).unwrap());
    }

    #[test]
    fn test_unconfigured_read_is_config_error() {
        let mut io = SimulatedIo::new();
        assert!(matches!(io.read(Channel(3)), Err(Error::Config(_))));
    }

    #[test]
    fn test_injected_failures_are_hardware_errors() {
        let mut io = SimulatedIo::new();
        io.configure(Channel(12), Direction::Input, Pull::Up).unwrap();
        io.fail_next_reads(1);
        assert!(matches!(io.read(Channel(12)), Err(Error::Hardware { .. })));
        assert!(io.read(Channel(12)).is_ok());
    }

    #[test]
    fn test_write_requires_output() {
        let mut io = SimulatedIo::new();
        io.configure(Channel(5), Direction::Output, Pull::None).unwrap();
        io.write(Channel(5), true).unwrap();
        assert_eq!(io.level(Channel(5)), Some(true));

        io.configure(Channel(12), Direction::Input, Pull::Up).unwrap();
        assert!(io.write(Channel(12), true).is_err());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut io = SimulatedIo::new();
        io.configure(Channel(5), Direction::Output, Pull::None).unwrap();
        io.release(Channel(5)).unwrap();
        io.release(Channel(5)).unwrap();
        assert!(!io.is_configured(Channel(5)));
    }

    #[test]
    fn test_recording_tone_output_tracks_sound() {
        let mut tone = RecordingToneOutput::new();
        tone.set_frequency(440.0);
        tone.start(50.0);
        assert!(tone.is_sounding());
        tone.stop();
        assert!(!tone.is_sounding());
        assert_eq!(tone.played_frequencies(), vec![440.0]);
    }
}
