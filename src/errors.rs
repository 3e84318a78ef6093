//! Specific error types
//!
//!
//!

use std::error::Error;
use std::fmt;

extern crate serde;
extern crate serde_json;

////////////////////////////////////////

/// Problems talking to (or programming) the digitizer
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum DriverError {
  /// No supported device answered the probe
  DeviceNotFound,
  /// A device answered but is held by another process
  DeviceBusy,
  /// USB power-state handshake failed
  DevicePowerState,
  /// Identification succeeded but programming did not
  DeviceUnsupported,
  /// Out-of-range voltage, incompatible impedance, empty
  /// trigger specification
  ConfigurationInvalid,
  /// No timebase index satisfies the capture windows at
  /// four channels
  TimebaseUnavailable,
  BufferBindingFailed,
  DownloadFailed,
  /// Unexpected vendor status code
  HardwareFailure,
}

impl fmt::Display for DriverError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp = serde_json::to_string(self).unwrap_or(
      String::from("Error: cannot unwrap this DriverError"));
    write!(f, "<DriverError : {}>", disp)
  }
}

impl Error for DriverError {
}

////////////////////////////////////////

/// Problems in waveform analysis
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum WaveformError {
  EmptyWaveform,
  OutOfRangeUpperBound,
  OutOfRangeLowerBound,
  DidNotCrossThreshold,
}

impl fmt::Display for WaveformError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp = serde_json::to_string(self).unwrap_or(
      String::from("Error: cannot unwrap this WaveformError"));
    write!(f, "<WaveformError : {}>", disp)
  }
}

impl Error for WaveformError {
}

////////////////////////////////////////

/// Reasons for rejecting a two-point energy calibration
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum CalibrationError {
  /// Fewer events with a pulse on the channel than required
  TooFewEvents,
  /// Relative separation of the two raw peaks below 10%
  PeaksTooClose,
  /// peak2/peak1 outside the Na-22 sanity window [1.5, 4.0]
  BadPeakRatio,
  NonPositiveGain,
  /// Gain outside [1e-3, 1e3] keV/(mV ns)
  GainOutOfRange,
  /// The selected sub-range contains no events
  EmptyRegion,
  /// Region maximum not larger than region minimum
  InvalidRegion,
}

impl fmt::Display for CalibrationError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp = serde_json::to_string(self).unwrap_or(
      String::from("Error: cannot unwrap this CalibrationError"));
    write!(f, "<CalibrationError : {}>", disp)
  }
}

impl Error for CalibrationError {
}

////////////////////////////////////////

/// Errors from the spectrum operators
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum AnalysisError {
  /// Timing difference of a channel against itself
  IdenticalChannels,
  /// A keV quantity was requested on an uncalibrated channel
  ChannelNotCalibrated,
  /// No qualifying events and no explicit range to fall
  /// back to
  NoQualifyingEvents,
  InvalidBinCount,
  InvalidRange,
}

impl fmt::Display for AnalysisError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp = serde_json::to_string(self).unwrap_or(
      String::from("Error: cannot unwrap this AnalysisError"));
    write!(f, "<AnalysisError : {}>", disp)
  }
}

impl Error for AnalysisError {
}

////////////////////////////////////////

/// Problems loading or saving the persisted state
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum SettingsError {
  FileUnreadable,
  FileUnwritable,
  JsonDecodingError,
}

impl fmt::Display for SettingsError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp = serde_json::to_string(self).unwrap_or(
      String::from("Error: cannot unwrap this SettingsError"));
    write!(f, "<SettingsError : {}>", disp)
  }
}

impl Error for SettingsError {
}
