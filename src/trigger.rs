//! Trigger specification with AND/OR channel logic
//!
//! Up to four conditions are ORed against each other; the
//! channels inside one condition are ANDed. Level, direction and
//! hysteresis are fixed for the experiment (negative pulses,
//! falling edge at -5 mV), the user only chooses the logic and
//! whether the auto trigger is armed.

use std::fmt;

use crate::constants::{N_CHANNELS,
                       AUTO_TRIGGER_MAX_MS,
                       TRIGGER_THRESHOLD_MV};
use crate::errors::DriverError;
use crate::events::ChannelId;

/// Channels ANDed within one trigger condition. A condition
/// without any channel is inactive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct TriggerCondition {
  pub channels : [bool; N_CHANNELS],
}

impl TriggerCondition {
  pub fn new() -> Self {
    Self {
      channels : [false; N_CHANNELS],
    }
  }

  /// Condition requiring exactly the given channels
  pub fn of(channels : &[ChannelId]) -> Self {
    let mut condition = Self::new();
    for ch in channels {
      condition.channels[ch.index()] = true;
    }
    condition
  }

  pub fn is_active(&self) -> bool {
    self.channels.iter().any(|on| *on)
  }

  pub fn channel_list(&self) -> Vec<ChannelId> {
    let mut list = Vec::<ChannelId>::new();
    for ch in ChannelId::ALL {
      if self.channels[ch.index()] {
        list.push(ch);
      }
    }
    list
  }
}

impl Default for TriggerCondition {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for TriggerCondition {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let labels : Vec<String>
      = self.channel_list().iter().map(|ch| format!("Ch{}", ch)).collect();
    write!(f, "{}", labels.join(" AND "))
  }
}

/// The full user-facing trigger specification
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct TriggerSpec {
  /// ORed against each other, inactive conditions ignored
  pub conditions   : [TriggerCondition; 4],
  pub auto_trigger : bool,
}

impl TriggerSpec {
  pub fn new() -> Self {
    Self {
      conditions   : [TriggerCondition::new(); 4],
      auto_trigger : false,
    }
  }

  /// Single-condition spec, the common case
  pub fn single(channels : &[ChannelId]) -> Self {
    let mut spec = Self::new();
    spec.conditions[0] = TriggerCondition::of(channels);
    spec
  }

  pub fn active_conditions(&self) -> Vec<TriggerCondition> {
    self.conditions.iter().filter(|c| c.is_active()).copied().collect()
  }

  /// All channels participating in any active condition
  pub fn participating_channels(&self) -> Vec<ChannelId> {
    let mut mask = [false; N_CHANNELS];
    for condition in &self.conditions {
      for k in 0..N_CHANNELS {
        mask[k] |= condition.channels[k];
      }
    }
    ChannelId::ALL.into_iter().filter(|ch| mask[ch.index()]).collect()
  }

  /// A spec without a single active condition can not trigger
  /// and is rejected
  pub fn validate(&self) -> Result<(), DriverError> {
    if self.active_conditions().is_empty() {
      error!("The trigger specification has no active condition!");
      return Err(DriverError::ConfigurationInvalid);
    }
    Ok(())
  }

  /// Auto-trigger timeout as programmed into the device (0
  /// disables it)
  pub fn auto_trigger_ms(&self) -> u32 {
    if self.auto_trigger {
      AUTO_TRIGGER_MAX_MS
    } else {
      0
    }
  }
}

impl Default for TriggerSpec {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for TriggerSpec {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<TriggerSpec :");
    for (k, condition) in self.active_conditions().iter().enumerate() {
      repr += &(format!("\n  Condition {} : {}", k + 1, condition));
    }
    repr += &(format!("\n  auto trigger : {}>", self.auto_trigger));
    write!(f, "{}", repr)
  }
}

/// What was actually programmed into the device
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSummary {
  pub num_conditions     : usize,
  pub condition_channels : Vec<Vec<ChannelId>>,
  pub threshold_mv       : f32,
  pub direction          : &'static str,
  pub auto_trigger_ms    : u32,
}

impl TriggerSummary {
  /// Summary for a spec that went through without rewrites -
  /// both hardware families program the spec verbatim
  pub fn from_spec(spec : &TriggerSpec) -> Self {
    let active = spec.active_conditions();
    Self {
      num_conditions     : active.len(),
      condition_channels : active.iter().map(|c| c.channel_list()).collect(),
      threshold_mv       : TRIGGER_THRESHOLD_MV,
      direction          : "Falling",
      auto_trigger_ms    : spec.auto_trigger_ms(),
    }
  }
}

impl fmt::Display for TriggerSummary {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<TriggerSummary :");
    repr += &(format!("\n  conditions : {}", self.num_conditions));
    repr += &(format!("\n  threshold  : {} mV ({})",
                      self.threshold_mv, self.direction));
    repr += &(format!("\n  auto trig  : {} ms>", self.auto_trigger_ms));
    write!(f, "{}", repr)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_spec_is_rejected() {
    let spec = TriggerSpec::new();
    assert_eq!(spec.validate(), Err(DriverError::ConfigurationInvalid));
  }

  #[test]
  fn single_condition_validates() {
    let spec = TriggerSpec::single(&[ChannelId::A, ChannelId::B]);
    assert!(spec.validate().is_ok());
    assert_eq!(spec.active_conditions().len(), 1);
    assert_eq!(spec.participating_channels(),
               vec![ChannelId::A, ChannelId::B]);
  }

  #[test]
  fn inactive_conditions_are_skipped() {
    let mut spec = TriggerSpec::new();
    spec.conditions[2] = TriggerCondition::of(&[ChannelId::D]);
    let summary = TriggerSummary::from_spec(&spec);
    assert_eq!(summary.num_conditions, 1);
    assert_eq!(summary.condition_channels, vec![vec![ChannelId::D]]);
  }

  #[test]
  fn auto_trigger_timeout_follows_the_flag() {
    let mut spec = TriggerSpec::single(&[ChannelId::A]);
    assert_eq!(spec.auto_trigger_ms(), 0);
    spec.auto_trigger = true;
    assert_eq!(spec.auto_trigger_ms(), AUTO_TRIGGER_MAX_MS);
  }
}
