//! Two-point energy calibration
//!
//! Converts raw pulse charges (mV ns) into keV with a per-channel
//! linear fit anchored on the two Na-22 lines (511 keV from
//! positron annihilation, 1275 keV from the de-excitation gamma).
//!
//! The fit inputs are peak positions found with a count-weighted
//! mean over a user-selected sub-range of the raw spectrum.

use std::fmt;

use chrono::{DateTime, Utc};
use ndhistogram::{ndhistogram, Histogram, Hist1D};
use ndhistogram::axis::Uniform;

use crate::constants::{CAL_PEAK_1_KEV,
                       CAL_PEAK_2_KEV,
                       CAL_MIN_EVENTS,
                       CAL_PEAK_FINDER_BINS};
use crate::errors::CalibrationError;

/// Linear energy calibration for one channel
///
/// Invariant: if `calibrated` is set, `gain` is positive and
/// finite and the two raw peaks differ.
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ChannelCalibration {
  pub calibrated       : bool,
  /// keV per mV ns
  pub gain             : f32,
  /// keV
  pub offset           : f32,
  /// Raw position of the 511 keV peak (mV ns)
  pub peak_1_raw       : f32,
  /// Raw position of the 1275 keV peak (mV ns)
  pub peak_2_raw       : f32,
  pub calibration_date : Option<DateTime<Utc>>,
}

impl ChannelCalibration {
  pub fn new() -> Self {
    Self {
      calibrated       : false,
      gain             : 0.0,
      offset           : 0.0,
      peak_1_raw       : 0.0,
      peak_2_raw       : 0.0,
      calibration_date : None,
    }
  }

  /// Convert a raw charge to keV
  pub fn apply(&self, raw_energy : f32) -> f32 {
    self.gain * raw_energy + self.offset
  }
}

impl Default for ChannelCalibration {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for ChannelCalibration {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<ChannelCalibration");
    if self.calibrated {
      repr += &(format!(" : gain {:.6} keV/(mV ns), offset {:.3} keV",
                        self.gain, self.offset));
      repr += &(format!("\n  511 keV  @ raw {:.1}", self.peak_1_raw));
      repr += &(format!("\n  1275 keV @ raw {:.1}", self.peak_2_raw));
      match self.calibration_date {
        Some(date) => {repr += &(format!("\n  date {}", date));}
        None       => ()
      }
    } else {
      repr += " : uncalibrated";
    }
    repr += ">";
    write!(f, "{}", repr)
  }
}

/// Fit gain and offset from the two raw peak positions
///
/// # Arguments
///
/// * sample_size : number of events with a pulse on the channel
///                 that went into the peak spectra
/// * peak_1_raw  : raw position assigned to 511 keV
/// * peak_2_raw  : raw position assigned to 1275 keV
pub fn fit_two_point(sample_size : usize,
                     peak_1_raw  : f32,
                     peak_2_raw  : f32) -> Result<ChannelCalibration, CalibrationError> {
  if sample_size < CAL_MIN_EVENTS {
    error!("Only {} events on the channel, {} required!",
           sample_size, CAL_MIN_EVENTS);
    return Err(CalibrationError::TooFewEvents);
  }
  let separation = (peak_2_raw - peak_1_raw).abs()
                 / f32::max(peak_1_raw.abs(), peak_2_raw.abs());
  if !separation.is_finite() || separation < 0.10 {
    error!("Peak separation of {:.1}% is below 10%!", separation * 100.0);
    return Err(CalibrationError::PeaksTooClose);
  }
  let ratio = peak_2_raw / peak_1_raw;
  if !ratio.is_finite() || ratio < 1.5 || ratio > 4.0 {
    error!("Peak ratio {:.2} outside the Na-22 window [1.5, 4.0]!", ratio);
    return Err(CalibrationError::BadPeakRatio);
  }
  let gain   = (CAL_PEAK_2_KEV - CAL_PEAK_1_KEV) / (peak_2_raw - peak_1_raw);
  let offset = CAL_PEAK_1_KEV - gain * peak_1_raw;
  if !gain.is_finite() || gain <= 0.0 {
    error!("Fitted gain {} is not positive!", gain);
    return Err(CalibrationError::NonPositiveGain);
  }
  if gain < 1e-3 || gain > 1e3 {
    error!("Fitted gain {} keV/(mV ns) outside [1e-3, 1e3]!", gain);
    return Err(CalibrationError::GainOutOfRange);
  }
  info!("Calibration fit: gain {:.6} keV/(mV ns), offset {:.3} keV",
        gain, offset);
  Ok(ChannelCalibration {
    calibrated       : true,
    gain,
    offset,
    peak_1_raw,
    peak_2_raw,
    calibration_date : Some(Utc::now()),
  })
}

/// Peak position as the count-weighted mean of a binned
/// sub-range
///
/// The subset of `energies` inside `[region_min, region_max]` is
/// filled into 100 uniform bins and the weighted mean of the bin
/// centers is returned. Undefined (an error) for an empty
/// sub-range; a sparse one only logs a warning.
pub fn find_peak_weighted_mean(energies   : &[f32],
                               region_min : f32,
                               region_max : f32) -> Result<f32, CalibrationError> {
  if region_max <= region_min {
    error!("Region maximum {} is not above the minimum {}!",
           region_max, region_min);
    return Err(CalibrationError::InvalidRegion);
  }
  let mut histo : Hist1D<Uniform<f32>>
    = ndhistogram!(Uniform::new(CAL_PEAK_FINDER_BINS, region_min, region_max).unwrap());
  let mut n_in_region = 0usize;
  for energy in energies {
    if *energy >= region_min && *energy <= region_max {
      histo.fill(energy);
      n_in_region += 1;
    }
  }
  if n_in_region == 0 {
    error!("No events in the region [{}, {}]!", region_min, region_max);
    return Err(CalibrationError::EmptyRegion);
  }
  if n_in_region < 10 {
    warn!("Only {} events in the region [{}, {}], the peak position will be poor!",
          n_in_region, region_min, region_max);
  }
  let bin_width    = (region_max - region_min) / CAL_PEAK_FINDER_BINS as f32;
  let mut weighted = 0f64;
  let mut counts   = 0f64;
  for k in 0..CAL_PEAK_FINDER_BINS {
    let center = region_min + (k as f32 + 0.5) * bin_width;
    let count  = histo.value(&center).copied().unwrap_or(0.0);
    weighted  += center as f64 * count;
    counts    += count;
  }
  // events sitting exactly on region_max land in the overflow
  // bin of the axis, count them into the last bin by hand
  let overflow = histo.value(&(region_max + bin_width)).copied().unwrap_or(0.0);
  if overflow > 0.0 {
    let last_center = region_max - 0.5 * bin_width;
    weighted += last_center as f64 * overflow;
    counts   += overflow;
  }
  Ok((weighted / counts) as f32)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn two_point_fit_reproduces_the_anchors() {
    let cal = fit_two_point(2000, 200_000.0, 500_000.0).unwrap();
    assert!(cal.calibrated);
    assert!((cal.apply(200_000.0) - 511.0).abs() < 1.0);
    assert!((cal.apply(500_000.0) - 1275.0).abs() < 1.0);
    assert!((cal.gain - 0.002547).abs() < 1e-5);
  }

  #[test]
  fn fit_rejects_too_few_events() {
    let res = fit_two_point(99, 200_000.0, 500_000.0);
    assert_eq!(res, Err(CalibrationError::TooFewEvents));
  }

  #[test]
  fn fit_rejects_close_peaks() {
    let res = fit_two_point(2000, 200_000.0, 210_000.0);
    assert_eq!(res, Err(CalibrationError::PeaksTooClose));
  }

  #[test]
  fn fit_rejects_bad_ratio() {
    // separated enough but below the 1.5 ratio floor
    let res = fit_two_point(2000, 200_000.0, 280_000.0);
    assert_eq!(res, Err(CalibrationError::BadPeakRatio));
    // and way above the 4.0 ceiling
    let res = fit_two_point(2000, 100_000.0, 500_000.0);
    assert_eq!(res, Err(CalibrationError::BadPeakRatio));
  }

  #[test]
  fn fit_rejects_inverted_peaks() {
    // negative ratio fails the ratio window before a negative
    // gain can come out of the fit
    let res = fit_two_point(2000, 500_000.0, 200_000.0);
    assert!(res.is_err());
  }

  #[test]
  fn weighted_mean_of_symmetric_cluster() {
    let mut energies = Vec::new();
    for k in 0..100 {
      energies.push(190_000.0 + 200.0 * k as f32);
    }
    let peak = find_peak_weighted_mean(&energies, 150_000.0, 250_000.0).unwrap();
    // cluster is symmetric around ~200k
    assert!((peak - 200_000.0).abs() < 1000.0);
  }

  #[test]
  fn weighted_mean_needs_events() {
    let energies = vec![10.0, 20.0];
    let res = find_peak_weighted_mean(&energies, 100.0, 200.0);
    assert_eq!(res, Err(CalibrationError::EmptyRegion));
  }

  #[test]
  fn weighted_mean_rejects_inverted_region() {
    let energies = vec![10.0, 20.0];
    let res = find_peak_weighted_mean(&energies, 200.0, 100.0);
    assert_eq!(res, Err(CalibrationError::InvalidRegion));
  }

  #[test]
  fn uncalibrated_apply_is_identity_free() {
    let cal = ChannelCalibration::new();
    assert_eq!(cal.apply(1000.0), 0.0);
  }
}
