//! Persisted state for the shell
//!
//! A single JSON object on disk: last device family, trigger
//! specification, per-channel calibrations and the retention
//! limits. The core only reads and writes the structure, schema
//! evolution and presentation are the shell's problem.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::acquisition::RunLimits;
use crate::calibrations::ChannelCalibration;
use crate::constants::{N_CHANNELS, EVENT_STORE_CAPACITY};
use crate::driver::DeviceFamily;
use crate::errors::SettingsError;
use crate::events::ChannelId;
use crate::trigger::TriggerSpec;

/// How much data to keep before acquisition pauses itself
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RetentionLimits {
  /// Event store capacity
  pub max_events   : usize,
  pub time_limit_s : Option<f64>,
  pub event_limit  : Option<u64>,
}

impl RetentionLimits {
  pub fn new() -> Self {
    Self {
      max_events   : EVENT_STORE_CAPACITY,
      time_limit_s : None,
      event_limit  : None,
    }
  }

  pub fn run_limits(&self) -> RunLimits {
    RunLimits {
      time_limit_s : self.time_limit_s,
      event_limit  : self.event_limit,
    }
  }
}

impl Default for RetentionLimits {
  fn default() -> Self {
    Self::new()
  }
}

/// The full persisted state
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DaqSettings {
  pub device_family : Option<DeviceFamily>,
  pub trigger       : TriggerSpec,
  pub calibrations  : [ChannelCalibration; N_CHANNELS],
  pub retention     : RetentionLimits,
}

impl DaqSettings {
  pub fn new() -> Self {
    Self {
      device_family : None,
      trigger       : TriggerSpec::new(),
      calibrations  : [ChannelCalibration::new(); N_CHANNELS],
      retention     : RetentionLimits::new(),
    }
  }

  pub fn calibration(&self, ch : ChannelId) -> &ChannelCalibration {
    &self.calibrations[ch.index()]
  }

  pub fn set_calibration(&mut self, ch : ChannelId, cal : ChannelCalibration) {
    self.calibrations[ch.index()] = cal;
  }

  pub fn from_file(path : &Path) -> Result<DaqSettings, SettingsError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(err)    => {
        error!("Unable to read {}! {err}", path.display());
        return Err(SettingsError::FileUnreadable);
      }
    };
    match serde_json::from_str::<DaqSettings>(&content) {
      Ok(settings) => Ok(settings),
      Err(err)     => {
        error!("Unable to decode {}! {err}", path.display());
        Err(SettingsError::JsonDecodingError)
      }
    }
  }

  pub fn to_file(&self, path : &Path) -> Result<(), SettingsError> {
    let content = match serde_json::to_string_pretty(self) {
      Ok(content) => content,
      Err(err)    => {
        error!("Unable to encode the settings! {err}");
        return Err(SettingsError::JsonDecodingError);
      }
    };
    match fs::write(path, content) {
      Ok(())   => Ok(()),
      Err(err) => {
        error!("Unable to write {}! {err}", path.display());
        Err(SettingsError::FileUnwritable)
      }
    }
  }
}

impl Default for DaqSettings {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for DaqSettings {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp = serde_json::to_string_pretty(self).unwrap_or(
      String::from("-- SERIALIZATION ERROR! --"));
    write!(f, "<DaqSettings :\n{}>", disp)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::calibrations::fit_two_point;

  #[test]
  fn json_roundtrip_is_stable() {
    let mut settings = DaqSettings::new();
    settings.device_family = Some(DeviceFamily::Ps6000);
    settings.trigger = TriggerSpec::single(&[ChannelId::A, ChannelId::B]);
    settings.trigger.auto_trigger = true;
    settings.set_calibration(ChannelId::A,
                             fit_two_point(2000, 200_000.0, 500_000.0).unwrap());
    settings.retention.event_limit = Some(50_000);
    assert!(settings.calibration(ChannelId::A).calibrated);
    assert!(!settings.calibration(ChannelId::B).calibrated);

    let path = std::env::temp_dir().join("pals-daq-settings-test.json");
    settings.to_file(&path).unwrap();
    let reloaded = DaqSettings::from_file(&path).unwrap();
    assert_eq!(settings, reloaded);
    // a reload serializes byte-for-byte identically
    let first  = serde_json::to_string_pretty(&settings).unwrap();
    let second = serde_json::to_string_pretty(&reloaded).unwrap();
    assert_eq!(first, second);
    std::fs::remove_file(&path).ok();
  }

  #[test]
  fn missing_file_is_an_error() {
    let path = std::env::temp_dir().join("pals-daq-no-such-settings.json");
    let res = DaqSettings::from_file(&path);
    assert_eq!(res.err(), Some(SettingsError::FileUnreadable));
  }

  #[test]
  fn retention_maps_to_run_limits() {
    let mut retention = RetentionLimits::new();
    retention.time_limit_s = Some(600.0);
    let limits = retention.run_limits();
    assert_eq!(limits.time_limit_s, Some(600.0));
    assert_eq!(limits.event_limit, None);
  }
}
