//! Event-mode data acquisition for pulse detection experiments
//!
//! The pipeline drives a four-channel digitizer in rapid-block mode,
//! extracts pulse timing (digital CFD) and pulse energy (charge
//! integration) from every triggered waveform and keeps the
//! parameterized events in a capped in-memory store. Energy spectra,
//! coincidence timing spectra and a two-point energy calibration
//! operate on snapshots of that store.
//!
//! The graphical shell is NOT part of this crate. It sits on the
//! consumer end of the engine's message channel and only ever sees
//! [`acquisition::EngineMessage`] values and store snapshots.

pub mod constants;
pub mod errors;
pub mod events;
pub mod analysis;
pub mod storage;
pub mod calibrations;
pub mod spectra;
pub mod trigger;
pub mod driver;
pub mod acquisition;
pub mod settings;

#[macro_use] extern crate log;
