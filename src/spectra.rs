//! Spectrum operators over event-store snapshots
//!
//! Stateless and read-only: every function takes a slice of
//! events (a snapshot) and bins it with `ndhistogram`. Nothing in
//! here blocks or even sees the acquisition side.

use std::fmt;

use ndhistogram::{ndhistogram, Histogram, Hist1D};
use ndhistogram::axis::Uniform;

use crate::calibrations::ChannelCalibration;
use crate::errors::AnalysisError;
use crate::events::{ChannelId, Event};

/// Energy window in keV, bounds inclusive
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EnergyGate {
  pub lo_kev : f32,
  pub hi_kev : f32,
}

impl EnergyGate {
  pub fn new(lo_kev : f32, hi_kev : f32) -> Self {
    Self { lo_kev, hi_kev }
  }

  pub fn contains(&self, energy_kev : f32) -> bool {
    self.lo_kev <= energy_kev && energy_kev <= self.hi_kev
  }
}

impl fmt::Display for EnergyGate {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<EnergyGate : [{}, {}] keV>", self.lo_kev, self.hi_kev)
  }
}

/// One coincidence slot: two distinct channels, each with its
/// own energy gate and calibration
#[derive(Debug, Clone)]
pub struct CoincidencePair {
  pub channel_a     : ChannelId,
  pub channel_b     : ChannelId,
  pub gate_a        : EnergyGate,
  pub gate_b        : EnergyGate,
  pub calibration_a : ChannelCalibration,
  pub calibration_b : ChannelCalibration,
}

/// Raw charges (mV ns) of all events with a pulse on the channel
pub fn raw_energies(events : &[Event], channel : ChannelId) -> Vec<f32> {
  let mut energies = Vec::<f32>::with_capacity(events.len());
  for ev in events {
    let pulse = ev.channel(channel);
    if pulse.has_pulse {
      energies.push(pulse.energy);
    }
  }
  energies
}

/// Calibrated energies (keV) of all events with a pulse on the
/// channel
pub fn calibrated_energies(events      : &[Event],
                           channel     : ChannelId,
                           calibration : &ChannelCalibration)
  -> Result<Vec<f32>, AnalysisError> {
  if !calibration.calibrated {
    error!("Channel {} is not calibrated!", channel);
    return Err(AnalysisError::ChannelNotCalibrated);
  }
  let mut energies = Vec::<f32>::with_capacity(events.len());
  for ev in events {
    let pulse = ev.channel(channel);
    if pulse.has_pulse {
      energies.push(calibration.apply(pulse.energy));
    }
  }
  Ok(energies)
}

fn binned(values : &[f32],
          nbins  : usize,
          range  : Option<(f32, f32)>)
  -> Result<Hist1D<Uniform<f32>>, AnalysisError> {
  if nbins == 0 {
    return Err(AnalysisError::InvalidBinCount);
  }
  let (lo, hi) = match range {
    Some((lo, hi)) => {
      if hi <= lo {
        return Err(AnalysisError::InvalidRange);
      }
      (lo, hi)
    }
    None => {
      if values.is_empty() {
        return Err(AnalysisError::NoQualifyingEvents);
      }
      let mut lo = values[0];
      let mut hi = values[0];
      for v in values {
        if *v < lo { lo = *v; }
        if *v > hi { hi = *v; }
      }
      if hi <= lo {
        // all values identical, widen so the axis stays sane
        hi = lo + 1.0;
      }
      (lo, hi)
    }
  };
  let mut histo : Hist1D<Uniform<f32>> = ndhistogram!(Uniform::new(nbins, lo, hi).unwrap());
  for v in values {
    histo.fill(v);
  }
  Ok(histo)
}

/// Per-channel energy spectrum
///
/// With `calibration = None` the x axis is the raw charge in
/// mV ns; with a calibration the axis is keV and the channel has
/// to be calibrated. Without an explicit range the observed
/// min/max is used.
pub fn energy_spectrum(events      : &[Event],
                       channel     : ChannelId,
                       nbins       : usize,
                       range       : Option<(f32, f32)>,
                       calibration : Option<&ChannelCalibration>)
  -> Result<Hist1D<Uniform<f32>>, AnalysisError> {
  let energies = match calibration {
    None      => raw_energies(events, channel),
    Some(cal) => calibrated_energies(events, channel, cal)?,
  };
  binned(&energies, nbins, range)
}

/// Timing differences a - b (ns) of all coincident, in-gate
/// events
///
/// An event qualifies if both channels carry a pulse and both
/// calibrated energies sit inside their gates.
pub fn timing_differences(events : &[Event],
                          pair   : &CoincidencePair)
  -> Result<Vec<f32>, AnalysisError> {
  if pair.channel_a == pair.channel_b {
    error!("Coincidence of channel {} against itself!", pair.channel_a);
    return Err(AnalysisError::IdenticalChannels);
  }
  if !pair.calibration_a.calibrated || !pair.calibration_b.calibrated {
    error!("Both channels of a coincidence pair have to be calibrated!");
    return Err(AnalysisError::ChannelNotCalibrated);
  }
  let mut deltas = Vec::<f32>::new();
  for ev in events {
    let pulse_a = ev.channel(pair.channel_a);
    let pulse_b = ev.channel(pair.channel_b);
    if !pulse_a.has_pulse || !pulse_b.has_pulse {
      continue;
    }
    if !pair.gate_a.contains(pair.calibration_a.apply(pulse_a.energy)) {
      continue;
    }
    if !pair.gate_b.contains(pair.calibration_b.apply(pulse_b.energy)) {
      continue;
    }
    deltas.push(pulse_a.timing_ns - pulse_b.timing_ns);
  }
  Ok(deltas)
}

/// Coincidence timing spectrum for one slot
///
/// Several slots shown on a shared axis are simply several calls
/// with the same explicit range.
pub fn timing_difference_spectrum(events : &[Event],
                                  pair   : &CoincidencePair,
                                  nbins  : usize,
                                  range  : Option<(f32, f32)>)
  -> Result<Hist1D<Uniform<f32>>, AnalysisError> {
  let deltas = timing_differences(events, pair)?;
  binned(&deltas, nbins, range)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::calibrations::fit_two_point;
  use crate::constants::N_CHANNELS;
  use crate::events::ChannelPulse;

  fn event_with(pulses : &[(ChannelId, f32, f32)]) -> Event {
    let mut channels = [ChannelPulse::absent(); N_CHANNELS];
    for (ch, timing_ns, energy) in pulses {
      channels[ch.index()] = ChannelPulse {
        timing_ns : *timing_ns,
        energy    : *energy,
        peak_mv   : -20.0,
        has_pulse : true,
      };
    }
    Event::new(0.0, channels)
  }

  fn test_calibration() -> ChannelCalibration {
    fit_two_point(2000, 200_000.0, 500_000.0).unwrap()
  }

  #[test]
  fn raw_spectrum_counts_only_pulses() {
    let events = vec![
      event_with(&[(ChannelId::A, 10.0, 150.0)]),
      event_with(&[(ChannelId::A, 11.0, 250.0)]),
      event_with(&[(ChannelId::B, 12.0, 300.0)]),
    ];
    let histo = energy_spectrum(&events, ChannelId::A, 10,
                                Some((100.0, 300.0)), None).unwrap();
    let mut total = 0.0;
    for k in 0..10 {
      let center = 100.0 + (k as f32 + 0.5) * 20.0;
      total += histo.value(&center).copied().unwrap_or(0.0);
    }
    assert_eq!(total, 2.0);
  }

  #[test]
  fn calibrated_spectrum_needs_calibration() {
    let events = vec![event_with(&[(ChannelId::A, 10.0, 150.0)])];
    let uncal  = ChannelCalibration::new();
    let res = energy_spectrum(&events, ChannelId::A, 10, None, Some(&uncal));
    assert_eq!(res.err(), Some(AnalysisError::ChannelNotCalibrated));
  }

  #[test]
  fn auto_range_needs_events() {
    let events : Vec<Event> = Vec::new();
    let res = energy_spectrum(&events, ChannelId::A, 10, None, None);
    assert_eq!(res.err(), Some(AnalysisError::NoQualifyingEvents));
  }

  #[test]
  fn zero_bins_is_invalid() {
    let events = vec![event_with(&[(ChannelId::A, 10.0, 150.0)])];
    let res = energy_spectrum(&events, ChannelId::A, 0, None, None);
    assert_eq!(res.err(), Some(AnalysisError::InvalidBinCount));
  }

  #[test]
  fn identical_channels_are_rejected() {
    let cal  = test_calibration();
    let pair = CoincidencePair {
      channel_a     : ChannelId::A,
      channel_b     : ChannelId::A,
      gate_a        : EnergyGate::new(300.0, 800.0),
      gate_b        : EnergyGate::new(300.0, 800.0),
      calibration_a : cal,
      calibration_b : cal,
    };
    let res = timing_differences(&Vec::new(), &pair);
    assert_eq!(res.err(), Some(AnalysisError::IdenticalChannels));
  }

  #[test]
  fn gates_select_coincidences() {
    let cal = test_calibration();
    // raw 200k -> 511 keV, inside a [300, 800] gate
    let in_gate  = 200_000.0;
    // raw 500k -> 1275 keV, outside
    let out_gate = 500_000.0;
    let events = vec![
      event_with(&[(ChannelId::A, 50.0, in_gate), (ChannelId::B, 60.0, in_gate)]),
      event_with(&[(ChannelId::A, 50.0, in_gate), (ChannelId::B, 60.0, out_gate)]),
      event_with(&[(ChannelId::A, 50.0, in_gate)]),
    ];
    let pair = CoincidencePair {
      channel_a     : ChannelId::A,
      channel_b     : ChannelId::B,
      gate_a        : EnergyGate::new(300.0, 800.0),
      gate_b        : EnergyGate::new(300.0, 800.0),
      calibration_a : cal,
      calibration_b : cal,
    };
    let deltas = timing_differences(&events, &pair).unwrap();
    assert_eq!(deltas.len(), 1);
    assert!((deltas[0] - (-10.0)).abs() < 1e-4);
  }
}
