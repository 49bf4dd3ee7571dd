//! Bluetooth LE ECG sensor monitor.
//!
//! A [`session::Session`] is opened with [`session::connect_sensor`], after which
//! the sampling interval is managed by an [`interval::IntervalController`] and the
//! voltage notifications are decoded by an [`ecg::EcgStream`]. Everything talks to
//! the radio through the [`transport::Transport`] trait, implemented over btleplug
//! in [`btle`] and in memory in [`sim`].

pub mod btle;
pub mod ecg;
pub mod error;
pub mod interval;
pub mod manager;
pub mod negotiator;
pub mod options;
pub mod recording;
pub mod session;
pub mod signal;
pub mod sim;
pub mod transport;

pub use ecg::{EcgStream, Sample};
pub use error::{ConnectError, FrameError, IntervalError, NegotiationError, StreamError, TransportError};
pub use interval::IntervalController;
pub use options::SensorOptions;
pub use recording::Recording;
pub use session::{connect_sensor, Session, SessionState, TeardownReport};
pub use transport::{DeviceFilter, Transport};
