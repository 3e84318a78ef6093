//! Parameterized event records
//!
//! An [`Event`] is the immutable result of one trigger: one
//! [`ChannelPulse`] per channel, in fixed channel order A,B,C,D.
//! Events are created by the acquisition engine and destroyed only
//! by clearing the store.

use std::fmt;

use crate::constants::N_CHANNELS;

/// The four analog channels, in fixed order
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub enum ChannelId {
  A,
  B,
  C,
  D,
}

impl ChannelId {
  pub const ALL : [ChannelId; N_CHANNELS] = [ChannelId::A,
                                             ChannelId::B,
                                             ChannelId::C,
                                             ChannelId::D];

  /// Zero-based index of the channel (A = 0)
  pub fn index(&self) -> usize {
    match self {
      ChannelId::A => 0,
      ChannelId::B => 1,
      ChannelId::C => 2,
      ChannelId::D => 3,
    }
  }

  pub fn from_index(idx : usize) -> Option<ChannelId> {
    match idx {
      0 => Some(ChannelId::A),
      1 => Some(ChannelId::B),
      2 => Some(ChannelId::C),
      3 => Some(ChannelId::D),
      _ => None,
    }
  }
}

impl fmt::Display for ChannelId {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      ChannelId::A => "A",
      ChannelId::B => "B",
      ChannelId::C => "C",
      ChannelId::D => "D",
    };
    write!(f, "{}", repr)
  }
}

/// Analysis result for a single channel of a single capture
///
/// If no pulse passed the amplitude test, `timing_ns` is NaN and
/// `energy` is zero. `peak_mv` always carries the raw minimum
/// sample value so that sub-threshold channels can still be
/// inspected.
#[derive(Debug, Copy, Clone)]
pub struct ChannelPulse {
  /// CFD crossing time relative to the trigger (ns)
  pub timing_ns : f32,
  /// Integrated, baseline-corrected charge (mV ns, positive
  /// for negative pulses)
  pub energy    : f32,
  /// Raw peak value (mV)
  pub peak_mv   : f32,
  pub has_pulse : bool,
}

impl ChannelPulse {
  /// A channel without a detectable pulse
  pub fn absent() -> Self {
    Self {
      timing_ns : f32::NAN,
      energy    : 0.0,
      peak_mv   : 0.0,
      has_pulse : false,
    }
  }
}

impl Default for ChannelPulse {
  fn default() -> Self {
    Self::absent()
  }
}

impl fmt::Display for ChannelPulse {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<ChannelPulse : t {} ns, E {} mVns, peak {} mV, pulse {}>",
           self.timing_ns, self.energy, self.peak_mv, self.has_pulse)
  }
}

/// One trigger worth of parameterized data
///
/// `event_id` is assigned by the event store at insertion and
/// equals the zero-based position in the store at that moment.
#[derive(Debug, Copy, Clone)]
pub struct Event {
  pub event_id  : u64,
  /// Seconds since acquisition start, paused intervals excluded
  pub timestamp : f64,
  pub channels  : [ChannelPulse; N_CHANNELS],
}

impl Event {
  pub fn new(timestamp : f64, channels : [ChannelPulse; N_CHANNELS]) -> Self {
    Self {
      event_id  : 0,
      timestamp,
      channels,
    }
  }

  pub fn channel(&self, ch : ChannelId) -> &ChannelPulse {
    &self.channels[ch.index()]
  }
}

impl Default for Event {
  fn default() -> Self {
    Self::new(0.0, [ChannelPulse::absent(); N_CHANNELS])
  }
}

impl fmt::Display for Event {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<Event");
    repr += &(format!(" : id {}, t {:.3} s", self.event_id, self.timestamp));
    for ch in ChannelId::ALL {
      if self.channel(ch).has_pulse {
        repr += &(format!("\n  {} : {}", ch, self.channel(ch)));
      }
    }
    repr += ">";
    write!(f, "{}", repr)
  }
}

#[test]
fn channel_index_roundtrip() {
  for ch in ChannelId::ALL {
    assert_eq!(ChannelId::from_index(ch.index()), Some(ch));
  }
  assert_eq!(ChannelId::from_index(4), None);
}

#[test]
fn absent_pulse_is_empty() {
  let pulse = ChannelPulse::absent();
  assert!(pulse.timing_ns.is_nan());
  assert_eq!(pulse.energy, 0.0);
  assert!(!pulse.has_pulse);
}
