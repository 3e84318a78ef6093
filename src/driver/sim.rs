//! Software digitizer
//!
//! Implements the full [`DigitizerDriver`] surface without any
//! hardware: every capture is a synthetic triggered waveform with
//! per-channel injectable pulses and Gaussian noise. The engine
//! can be exercised end to end against it, and the integration
//! tests do exactly that.
//!
//! The simulator follows the 6000-family behavior (stateless
//! timebase, 0.8 ns at four channels) unless constructed for the
//! 3000 family.

use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::distribution::Normal;
use rand::distributions::Distribution;

use crate::constants::{N_CHANNELS, VOLTAGE_RANGE_MV};
use crate::errors::DriverError;
use crate::events::ChannelId;
use crate::trigger::{TriggerSpec, TriggerSummary};

use super::{mv_to_adc,
            derive_sample_counts,
            DeviceFamily,
            DeviceInfo,
            DigitizerDriver,
            PollStatus,
            ScopeSettings};

/// A pulse template injected into every capture of one channel
#[derive(Debug, Copy, Clone)]
pub struct SimPulse {
  /// Peak value (mV), negative for a real-looking pulse
  pub peak_mv          : f32,
  /// Peak position in samples after the trigger point
  pub peak_offset      : usize,
  /// Length of the falling edge in samples
  pub rise_samples     : usize,
  /// Length of the recovery back to baseline in samples
  pub fall_samples     : usize,
  /// Gaussian jitter on the peak position (ns)
  pub jitter_ns        : f32,
}

impl SimPulse {
  pub fn new(peak_mv : f32, peak_offset : usize) -> Self {
    Self {
      peak_mv,
      peak_offset,
      rise_samples : 4,
      fall_samples : 40,
      jitter_ns    : 0.0,
    }
  }
}

/// Build plan for a [`SimDigitizer`]
#[derive(Debug, Clone)]
pub struct SimConfig {
  pub family         : DeviceFamily,
  /// Per-channel pulse template, `None` leaves the channel at
  /// baseline noise
  pub pulses         : [Option<SimPulse>; N_CHANNELS],
  /// Sigma of the baseline noise (mV)
  pub noise_sigma_mv : f32,
  pub seed           : u64,
  /// Fail `run_block` with `DownloadFailed` after this many
  /// successful blocks (fault injection for engine tests)
  pub fail_after_blocks : Option<u32>,
}

impl SimConfig {
  pub fn new() -> Self {
    Self {
      family            : DeviceFamily::Ps6000,
      pulses            : [None; N_CHANNELS],
      noise_sigma_mv    : 0.3,
      seed              : 1,
      fail_after_blocks : None,
    }
  }
}

impl Default for SimConfig {
  fn default() -> Self {
    Self::new()
  }
}

/// Bound buffer bookkeeping, mirrors what the vendor library
/// keeps per (channel, segment)
#[derive(Debug, Copy, Clone)]
struct BoundBuffer {
  ptr : *mut i16,
  len : usize,
}

/// The software digitizer
pub struct SimDigitizer {
  info          : DeviceInfo,
  config        : SimConfig,
  settings      : Option<ScopeSettings>,
  segments      : u32,
  captures      : u32,
  buffers       : Vec<Vec<Option<BoundBuffer>>>,
  running       : bool,
  polls_to_go   : u32,
  blocks_done   : u32,
  rng           : StdRng,
}

// The raw buffer pointers stay inside the acquisition thread
// together with the driver, see the bind_buffer contract.
unsafe impl Send for SimDigitizer {}

impl SimDigitizer {
  pub fn open(config : SimConfig) -> Self {
    let info = DeviceInfo {
      family  : config.family,
      variant : String::from("SIM"),
      serial  : String::from("SIM/0000"),
      max_adc : 32512,
    };
    let rng = StdRng::seed_from_u64(config.seed);
    Self {
      info,
      config,
      settings    : None,
      segments    : 0,
      captures    : 0,
      buffers     : Vec::new(),
      running     : false,
      polls_to_go : 0,
      blocks_done : 0,
      rng,
    }
  }

  fn settings(&self) -> Result<ScopeSettings, DriverError> {
    self.settings.ok_or(DriverError::ConfigurationInvalid)
  }

  /// Render one synthetic capture for one channel, in ADC
  /// counts
  fn render(&mut self, channel : usize) -> Vec<i16> {
    let settings = self.settings.expect("render before resolve_timebase");
    let noise    = Normal::new(0.0, self.config.noise_sigma_mv.max(1e-6) as f64)
                   .expect("noise sigma is positive");
    let mut wave_mv = vec![0.0f32; settings.total_samples];
    for sample in wave_mv.iter_mut() {
      *sample = noise.sample(&mut self.rng) as f32;
    }
    if let Some(pulse) = self.config.pulses[channel] {
      let jitter_samples = if pulse.jitter_ns > 0.0 {
        let jitter = Normal::new(0.0, pulse.jitter_ns as f64)
                     .expect("jitter sigma is positive");
        (jitter.sample(&mut self.rng) as f32
         / settings.sample_interval_ns).round() as i64
      } else {
        0
      };
      let peak_bin = (settings.pre_trigger_samples as i64
                      + pulse.peak_offset as i64
                      + jitter_samples) as usize;
      for n in 0..pulse.rise_samples {
        let idx = peak_bin + 1 + n - pulse.rise_samples;
        if idx < wave_mv.len() {
          wave_mv[idx] += pulse.peak_mv * (n + 1) as f32
                        / pulse.rise_samples as f32;
        }
      }
      for n in 1..pulse.fall_samples {
        let idx = peak_bin + n;
        if idx < wave_mv.len() {
          wave_mv[idx] += pulse.peak_mv * (pulse.fall_samples - n) as f32
                        / pulse.fall_samples as f32;
        }
      }
    }
    wave_mv.iter()
           .map(|mv| mv_to_adc(*mv, settings.voltage_range_mv, settings.max_adc))
           .collect()
  }
}

impl DigitizerDriver for SimDigitizer {
  fn info(&self) -> &DeviceInfo {
    &self.info
  }

  fn configure_channels(&mut self) -> Result<(), DriverError> {
    debug!("Simulated channel setup, {} mV range on all four channels",
           VOLTAGE_RANGE_MV);
    Ok(())
  }

  fn resolve_timebase(&mut self) -> Result<ScopeSettings, DriverError> {
    // fastest four-channel interval of the respective family
    let (interval, timebase) = match self.info.family {
      DeviceFamily::Ps6000 => (0.8, 2),
      DeviceFamily::Ps3000 => (8.0, 2),
    };
    let (total, pre, post) = derive_sample_counts(interval);
    let settings = ScopeSettings {
      sample_interval_ns   : interval,
      pre_trigger_samples  : pre,
      post_trigger_samples : post,
      total_samples        : total,
      resolution_bits      : 8,
      voltage_range_mv     : VOLTAGE_RANGE_MV,
      max_adc              : self.info.max_adc,
      timebase,
    };
    self.settings = Some(settings);
    Ok(settings)
  }

  fn configure_trigger(&mut self, spec : &TriggerSpec)
    -> Result<TriggerSummary, DriverError> {
    spec.validate()?;
    Ok(TriggerSummary::from_spec(spec))
  }

  fn allocate_segments(&mut self, count : u32) -> Result<(), DriverError> {
    if count == 0 {
      return Err(DriverError::ConfigurationInvalid);
    }
    self.settings()?;
    self.segments = count;
    self.buffers  = vec![vec![None; count as usize]; N_CHANNELS];
    Ok(())
  }

  fn set_capture_count(&mut self, count : u32) -> Result<(), DriverError> {
    if count == 0 || count > self.segments {
      return Err(DriverError::ConfigurationInvalid);
    }
    self.captures = count;
    Ok(())
  }

  unsafe fn bind_buffer(&mut self,
                        channel : ChannelId,
                        segment : u32,
                        buffer  : *mut i16,
                        len     : usize) -> Result<(), DriverError> {
    let settings = self.settings()?;
    if segment >= self.segments || len < settings.total_samples {
      return Err(DriverError::BufferBindingFailed);
    }
    self.buffers[channel.index()][segment as usize]
      = Some(BoundBuffer { ptr : buffer, len });
    Ok(())
  }

  fn run_block(&mut self) -> Result<(), DriverError> {
    if self.captures == 0 {
      return Err(DriverError::ConfigurationInvalid);
    }
    if let Some(limit) = self.config.fail_after_blocks {
      if self.blocks_done >= limit {
        return Err(DriverError::DownloadFailed);
      }
    }
    self.running = true;
    // one not-ready poll before the block completes, so the
    // engine's poll loop sees both answers
    self.polls_to_go = 1;
    Ok(())
  }

  fn poll_ready(&mut self) -> Result<PollStatus, DriverError> {
    if !self.running {
      return Err(DriverError::HardwareFailure);
    }
    if self.polls_to_go > 0 {
      self.polls_to_go -= 1;
      return Ok(PollStatus::NotReady);
    }
    Ok(PollStatus::Ready)
  }

  fn bulk_download(&mut self,
                   first_segment : u32,
                   last_segment  : u32) -> Result<(), DriverError> {
    if !self.running || last_segment >= self.segments
       || first_segment > last_segment {
      return Err(DriverError::DownloadFailed);
    }
    let total = self.settings()?.total_samples;
    for segment in first_segment..=last_segment {
      for ch in 0..N_CHANNELS {
        let bound = self.buffers[ch][segment as usize]
                    .ok_or(DriverError::DownloadFailed)?;
        let rendered = self.render(ch);
        // writes stay within the bound length, checked at bind
        // time against total_samples
        unsafe {
          std::ptr::copy_nonoverlapping(rendered.as_ptr(),
                                        bound.ptr,
                                        total.min(bound.len));
        }
      }
    }
    self.running = false;
    self.blocks_done += 1;
    Ok(())
  }

  fn stop(&mut self) -> Result<(), DriverError> {
    self.running = false;
    Ok(())
  }

  fn close(&mut self) -> Result<(), DriverError> {
    self.running = false;
    self.buffers.clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analysis::{analyze_waveform, PulseAnalysisConfig};
  use crate::driver::adc_to_mv;

  fn configured_sim(config : SimConfig) -> (SimDigitizer, ScopeSettings) {
    let mut sim = SimDigitizer::open(config);
    sim.configure_channels().unwrap();
    let settings = sim.resolve_timebase().unwrap();
    (sim, settings)
  }

  #[test]
  fn timebase_matches_the_family() {
    let (_, settings) = configured_sim(SimConfig::new());
    assert_eq!(settings.sample_interval_ns, 0.8);
    assert_eq!(settings.total_samples, 3749);
    assert_eq!(settings.pre_trigger_samples, 1249);
    let mut config = SimConfig::new();
    config.family = DeviceFamily::Ps3000;
    let (_, settings) = configured_sim(config);
    assert_eq!(settings.sample_interval_ns, 8.0);
    assert_eq!(settings.total_samples, 375);
  }

  #[test]
  fn capture_count_is_bounded_by_segments() {
    let (mut sim, _) = configured_sim(SimConfig::new());
    sim.allocate_segments(10).unwrap();
    assert!(sim.set_capture_count(10).is_ok());
    assert_eq!(sim.set_capture_count(11),
               Err(DriverError::ConfigurationInvalid));
  }

  #[test]
  fn rendered_pulse_survives_the_analyzer() {
    let mut config = SimConfig::new();
    config.pulses[0] = Some(SimPulse::new(-40.0, 60));
    let (mut sim, settings) = configured_sim(config);
    sim.allocate_segments(1).unwrap();
    sim.set_capture_count(1).unwrap();
    // all four channels have to be bound for the download
    let mut buffers = vec![vec![0i16; settings.total_samples]; 4];
    unsafe {
      for ch in ChannelId::ALL {
        let buffer = &mut buffers[ch.index()];
        sim.bind_buffer(ch, 0, buffer.as_mut_ptr(), buffer.len()).unwrap();
      }
    }
    sim.run_block().unwrap();
    assert_eq!(sim.poll_ready().unwrap(), PollStatus::NotReady);
    assert_eq!(sim.poll_ready().unwrap(), PollStatus::Ready);
    sim.bulk_download(0, 0).unwrap();
    let wave_mv : Vec<f32>
      = buffers[0].iter()
              .map(|code| adc_to_mv(*code, settings.voltage_range_mv,
                                    settings.max_adc))
              .collect();
    let pulse = analyze_waveform(&wave_mv, settings.pre_trigger_samples,
                                 settings.sample_interval_ns,
                                 &PulseAnalysisConfig::new());
    assert!(pulse.has_pulse);
    assert!((pulse.peak_mv - (-40.0)).abs() < 2.0);
    // peak 60 samples after the trigger, CFD at the half-rise
    let expected_ns = (60.0 - 2.0) * settings.sample_interval_ns;
    assert!((pulse.timing_ns - expected_ns).abs() < 4.0 * settings.sample_interval_ns);
  }

  #[test]
  fn fault_injection_fails_run_block() {
    let mut config = SimConfig::new();
    config.fail_after_blocks = Some(0);
    let (mut sim, _) = configured_sim(config);
    sim.allocate_segments(1).unwrap();
    sim.set_capture_count(1).unwrap();
    assert_eq!(sim.run_block(), Err(DriverError::DownloadFailed));
  }
}
