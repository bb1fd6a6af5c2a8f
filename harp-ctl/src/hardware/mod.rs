//! Hardware capabilities the controller is built on
//!
//! The controller never touches pins or devices directly. Each collaborator
//! is handed one of these capability objects at construction, so tests and
//! the simulated installation can swap in their own implementations.

pub mod console;
pub mod sim;

use harp_common::{Channel, Result};

pub use console::{LogDisplay, LogToneOutput};
pub use sim::{MemoryDisplay, RecordingToneOutput, SimulatedIo, ToneCall};

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Input bias resistor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    None,
    Up,
    Down,
}

/// Per-channel digital I/O
///
/// Reads are point-in-time snapshots and must never block waiting for an
/// edge.
pub trait DigitalIo {
    fn configure(&mut self, channel: Channel, direction: Direction, pull: Pull) -> Result<()>;

    fn read(&mut self, channel: Channel) -> Result<bool>;

    fn write(&mut self, channel: Channel, level: bool) -> Result<()>;

    /// Return the channel to its unconfigured, safe default state.
    ///
    /// Releasing an unconfigured channel is not an error.
    fn release(&mut self, channel: Channel) -> Result<()>;
}

/// PWM tone generator on the speaker pin
///
/// `stop()` must be safe to call repeatedly.
pub trait ToneOutput {
    fn set_frequency(&mut self, hz: f64);

    /// Begin sounding at `duty_cycle` percent
    fn start(&mut self, duty_cycle: f64);

    fn stop(&mut self);
}

/// Text display; each call replaces the entire contents
pub trait TextDisplay {
    fn render(&mut self, lines: &[String]) -> Result<()>;
}

impl<T: DigitalIo + ?Sized> DigitalIo for Box<T> {
    fn configure(&mut self, channel: Channel, direction: Direction, pull: Pull) -> Result<()> {
        (**self).configure(channel, direction, pull)
    }

    fn read(&mut self, channel: Channel) -> Result<bool> {
        (**self).read(channel)
    }

    fn write(&mut self, channel: Channel, level: bool) -> Result<()> {
        (**self).write(channel, level)
    }

    fn release(&mut self, channel: Channel) -> Result<()> {
        (**self).release(channel)
    }
}

impl<T: ToneOutput + ?Sized> ToneOutput for Box<T> {
    fn set_frequency(&mut self, hz: f64) {
        (**self).set_frequency(hz)
    }

    fn start(&mut self, duty_cycle: f64) {
        (**self).start(duty_cycle)
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

impl<T: TextDisplay + ?Sized> TextDisplay for Box<T> {
    fn render(&mut self, lines: &[String]) -> Result<()> {
        (**self).render(lines)
    }
}
