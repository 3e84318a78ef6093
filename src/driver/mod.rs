//! Hardware-abstracted digitizer drivers
//!
//! The engine only ever talks to the [`DigitizerDriver`] trait.
//! Behind it sit the two vendor families (feature `picoscope`)
//! and a software digitizer for development and tests. Variant
//! selection is by probing in a fixed order, the first family
//! that answers wins.
//!
//! All calls are synchronous and the engine serializes them on
//! its worker thread - a driver is never shared between threads.

use std::fmt;

use crate::constants::{BATCH_SIZE_PS3000,
                       BATCH_SIZE_PS6000,
                       PRE_TRIGGER_NS,
                       POST_TRIGGER_NS};
use crate::errors::DriverError;
use crate::events::ChannelId;
use crate::trigger::{TriggerSpec, TriggerSummary};

pub mod sim;
#[cfg(feature = "picoscope")]
pub mod ffi;
#[cfg(feature = "picoscope")]
pub mod ps3000;
#[cfg(feature = "picoscope")]
pub mod ps6000;

/// The two supported device families
///
/// The family decides the vendor binding, the integer widths of
/// the sample counts and the rapid-block batch size.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum DeviceFamily {
  Ps3000,
  Ps6000,
}

impl DeviceFamily {
  /// Captures per rapid-block batch. A throughput knob, not a
  /// semantic one.
  pub fn batch_size(&self) -> u32 {
    match self {
      DeviceFamily::Ps3000 => BATCH_SIZE_PS3000,
      DeviceFamily::Ps6000 => BATCH_SIZE_PS6000,
    }
  }
}

impl fmt::Display for DeviceFamily {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      DeviceFamily::Ps3000 => "3000-series",
      DeviceFamily::Ps6000 => "6000-series",
    };
    write!(f, "{}", repr)
  }
}

/// Identity of an opened device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
  pub family  : DeviceFamily,
  pub variant : String,
  pub serial  : String,
  /// Maximum ADC code for the configured resolution
  pub max_adc : i16,
}

impl fmt::Display for DeviceInfo {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<DeviceInfo : {} {} (serial {}), max adc {}>",
           self.family, self.variant, self.serial, self.max_adc)
  }
}

/// The achieved acquisition configuration. Set once at startup
/// and frozen for the run.
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ScopeSettings {
  pub sample_interval_ns   : f32,
  pub pre_trigger_samples  : usize,
  pub post_trigger_samples : usize,
  pub total_samples        : usize,
  pub resolution_bits      : u8,
  pub voltage_range_mv     : f32,
  pub max_adc              : i16,
  /// Opaque device timebase index
  pub timebase             : u32,
}

impl fmt::Display for ScopeSettings {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<ScopeSettings :");
    repr += &(format!("\n  interval   : {} ns (timebase {})",
                      self.sample_interval_ns, self.timebase));
    repr += &(format!("\n  samples    : {} ({} pre + {} post)",
                      self.total_samples,
                      self.pre_trigger_samples,
                      self.post_trigger_samples));
    repr += &(format!("\n  range      : {} mV at {} bit (max adc {})>",
                      self.voltage_range_mv, self.resolution_bits, self.max_adc));
    write!(f, "{}", repr)
  }
}

/// Readiness of a running block capture
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PollStatus {
  Ready,
  NotReady,
}

/// Convert an ADC code to millivolts
pub fn adc_to_mv(code : i16, range_mv : f32, max_adc : i16) -> f32 {
  code as f32 * range_mv / max_adc as f32
}

/// Convert millivolts to the nearest ADC code, clamped to the
/// signed 16-bit range
pub fn mv_to_adc(mv : f32, range_mv : f32, max_adc : i16) -> i16 {
  let code = (mv * max_adc as f32 / range_mv).round();
  code.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Derive the capture sample counts from an achieved sample
/// interval
///
/// The total window is fixed (1 us pre + 2 us post); counts
/// are floored like the vendor examples do, so
/// total >= pre + post is maintained by deriving post as the
/// remainder.
///
/// # Returns
/// (total, pre, post)
pub fn derive_sample_counts(sample_interval_ns : f32) -> (usize, usize, usize) {
  let total = ((PRE_TRIGGER_NS + POST_TRIGGER_NS) / sample_interval_ns) as usize;
  let pre   = (PRE_TRIGGER_NS / sample_interval_ns) as usize;
  (total, pre, total - pre)
}

/// The driver surface the acquisition engine programs the
/// device through
///
/// Implementations hold the open device handle and whatever
/// family-specific state (range codes, channel flags, achieved
/// settings) the vendor calls need. Errors carry a concrete
/// [`DriverError`] kind.
pub trait DigitizerDriver : Send {
  /// Identity of the opened device
  fn info(&self) -> &DeviceInfo;

  /// Program all four channels: fixed range, DC coupling, full
  /// bandwidth. Fails `DeviceUnsupported` when the requested
  /// input impedance is not available - the caller then has to
  /// terminate externally.
  fn configure_channels(&mut self) -> Result<(), DriverError>;

  /// Find the fastest timebase that sustains all four channels
  /// over the capture window and freeze the achieved settings
  fn resolve_timebase(&mut self) -> Result<ScopeSettings, DriverError>;

  /// Program level, direction, hysteresis and the AND/OR logic
  fn configure_trigger(&mut self, spec : &TriggerSpec)
    -> Result<TriggerSummary, DriverError>;

  /// Split the capture memory into `count` segments
  fn allocate_segments(&mut self, count : u32) -> Result<(), DriverError>;

  /// Number of rapid captures per block, at most the allocated
  /// segment count
  fn set_capture_count(&mut self, count : u32) -> Result<(), DriverError>;

  /// Associate a contiguous int16 buffer with (channel,
  /// segment) for the bulk transfer
  ///
  /// # Safety
  ///
  /// `buffer` has to stay valid and unmoved until the next
  /// [`DigitizerDriver::allocate_segments`],
  /// [`DigitizerDriver::stop`] or [`DigitizerDriver::close`] -
  /// the device writes through the raw pointer during
  /// [`DigitizerDriver::bulk_download`]. The engine owns the
  /// buffers and guarantees this.
  unsafe fn bind_buffer(&mut self,
                        channel : ChannelId,
                        segment : u32,
                        buffer  : *mut i16,
                        len     : usize) -> Result<(), DriverError>;

  /// Start the block capture; nonblocking
  fn run_block(&mut self) -> Result<(), DriverError>;

  /// Poll whether all captures of the block are complete
  fn poll_ready(&mut self) -> Result<PollStatus, DriverError>;

  /// Copy the captured segments into the pre-bound buffers
  fn bulk_download(&mut self,
                   first_segment : u32,
                   last_segment  : u32) -> Result<(), DriverError>;

  /// Abort a running capture
  fn stop(&mut self) -> Result<(), DriverError>;

  fn close(&mut self) -> Result<(), DriverError>;
}

/// Probe for a supported device, 6000 family first
///
/// Only enabled backends take part: without the `picoscope`
/// feature there is nothing to probe and the result is
/// `DeviceNotFound`. The software digitizer is constructed
/// explicitly, it does not participate in probing.
pub fn probe() -> Result<Box<dyn DigitizerDriver>, DriverError> {
  #[cfg(feature = "picoscope")]
  {
    match ps6000::Ps6000Driver::open() {
      Ok(driver) => {
        info!("Found a 6000-series device: {}", driver.info());
        return Ok(Box::new(driver));
      }
      Err(DriverError::DeviceNotFound) => (),
      Err(err) => return Err(err),
    }
    match ps3000::Ps3000Driver::open() {
      Ok(driver) => {
        info!("Found a 3000-series device: {}", driver.info());
        return Ok(Box::new(driver));
      }
      Err(DriverError::DeviceNotFound) => (),
      Err(err) => return Err(err),
    }
  }
  error!("No supported digitizer answered the probe!");
  Err(DriverError::DeviceNotFound)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn adc_roundtrip_is_exact() {
    // documented property: code -> mV -> code round-trips for
    // any code within +- max_adc
    let max_adc  = 32512i16;
    let range_mv = 100.0f32;
    for code in [-32512i16, -32511, -1626, -1, 0, 1, 1626, 32511, 32512] {
      let mv   = adc_to_mv(code, range_mv, max_adc);
      let back = mv_to_adc(mv, range_mv, max_adc);
      assert_eq!(back, code);
    }
  }

  #[test]
  fn mv_to_adc_clamps() {
    assert_eq!(mv_to_adc(1e6, 100.0, 32512), i16::MAX);
    assert_eq!(mv_to_adc(-1e6, 100.0, 32512), i16::MIN);
  }

  #[test]
  fn sample_counts_at_800ps() {
    // the 6000 family at four channels achieves 0.8 ns; the
    // floored window math lands on 3749 = 1249 + 2500
    let (total, pre, post) = derive_sample_counts(0.8);
    assert_eq!(total, 3749);
    assert_eq!(pre, 1249);
    assert_eq!(post, 2500);
    assert_eq!(total, pre + post);
  }

  #[test]
  fn sample_counts_at_8ns() {
    let (total, pre, post) = derive_sample_counts(8.0);
    assert_eq!(total, 375);
    assert_eq!(pre, 125);
    assert_eq!(post, 250);
  }

  #[test]
  fn trigger_level_in_adc_counts() {
    // -5 mV at 100 mV range and max adc 32512
    assert_eq!(mv_to_adc(-5.0, 100.0, 32512), -1626);
  }
}
