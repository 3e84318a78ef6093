//! 6000-series driver
//!
//! 8 bit at the resolutions used here, software-selectable 50
//! Ohm inputs, 64-bit sample counts and a stateless
//! minimum-timebase query instead of the iterative search.

use std::ffi::c_void;
use std::ptr;

use crate::constants::{N_CHANNELS, VOLTAGE_RANGE_MV};
use crate::constants::{TRIGGER_THRESHOLD_MV, TRIGGER_HYSTERESIS_ADC};
use crate::errors::DriverError;
use crate::events::ChannelId;
use crate::trigger::{TriggerSpec, TriggerSummary};

use super::ffi;
use super::ffi::PICO_STATUS;
use super::{derive_sample_counts,
            mv_to_adc,
            DeviceFamily,
            DeviceInfo,
            DigitizerDriver,
            PollStatus,
            ScopeSettings};

fn ok_or(status : PICO_STATUS) -> Result<(), DriverError> {
  if status == ffi::PICO_OK {
    return Ok(());
  }
  Err(ffi::status_to_error(status))
}

fn get_unit_info(handle : i16, info : i16) -> String {
  let mut buffer = [0i8; 256];
  let mut required = 0i16;
  let status = unsafe {
    ffi::ps6000aGetUnitInfo(handle, buffer.as_mut_ptr(),
                            buffer.len() as i16, &mut required, info)
  };
  if status != ffi::PICO_OK {
    warn!("GetUnitInfo({}) failed with status {:#x}", info, status);
    return String::from("unknown");
  }
  let bytes : Vec<u8> = buffer.iter()
                              .take_while(|b| **b != 0)
                              .map(|b| *b as u8)
                              .collect();
  String::from_utf8(bytes).unwrap_or(String::from("unknown"))
}

/// Driver for the 6000 family
pub struct Ps6000Driver {
  handle   : i16,
  info     : DeviceInfo,
  settings : Option<ScopeSettings>,
  segments : u32,
  /// Tracks whether a (channel, segment 0) binding already
  /// cleared the stale associations this cycle
  cleared  : [bool; N_CHANNELS],
}

impl Ps6000Driver {
  pub fn open() -> Result<Self, DriverError> {
    let mut handle = 0i16;
    let status = unsafe {
      ffi::ps6000aOpenUnit(&mut handle, ptr::null_mut(), ffi::PICO_DR_8BIT)
    };
    if status != ffi::PICO_OK {
      return Err(ffi::status_to_error(status));
    }
    let mut min_adc = 0i16;
    let mut max_adc = 0i16;
    ok_or(unsafe {
      ffi::ps6000aGetAdcLimits(handle, ffi::PICO_DR_8BIT,
                               &mut min_adc, &mut max_adc)
    })?;
    let info = DeviceInfo {
      family  : DeviceFamily::Ps6000,
      variant : get_unit_info(handle, ffi::PICO_VARIANT_INFO),
      serial  : get_unit_info(handle, ffi::PICO_BATCH_AND_SERIAL),
      max_adc,
    };
    info!("Opened {}", info);
    Ok(Self {
      handle,
      info,
      settings : None,
      segments : 0,
      cleared  : [false; N_CHANNELS],
    })
  }

  fn settings(&self) -> Result<ScopeSettings, DriverError> {
    self.settings.ok_or(DriverError::ConfigurationInvalid)
  }
}

impl DigitizerDriver for Ps6000Driver {
  fn info(&self) -> &DeviceInfo {
    &self.info
  }

  fn configure_channels(&mut self) -> Result<(), DriverError> {
    // 50 Ohm DC on all four channels; no silent fallback to 1
    // MOhm, a refusing device surfaces as DeviceUnsupported and
    // the setup needs external termination
    for ch in 0..N_CHANNELS as i32 {
      let status = unsafe {
        ffi::ps6000aSetChannelOn(self.handle,
                                 ffi::PICO_CHANNEL_A + ch,
                                 ffi::PICO_DC_50OHM,
                                 ffi::PICO_X1_PROBE_100MV,
                                 0.0,
                                 ffi::PICO_BW_FULL)
      };
      if status != ffi::PICO_OK {
        error!("Channel {} setup failed with status {:#x}", ch, status);
        return Err(ffi::status_to_error(status));
      }
    }
    debug!("All four channels at {} mV, DC, 50 Ohm", VOLTAGE_RANGE_MV);
    Ok(())
  }

  fn resolve_timebase(&mut self) -> Result<ScopeSettings, DriverError> {
    // stateless query for the fastest index with four channels
    let enabled_flags = 0b1111u32;
    let mut timebase  = 0u32;
    let mut interval_s = 0f64;
    ok_or(unsafe {
      ffi::ps6000aMinimumTimebaseStateless(self.handle, enabled_flags,
                                           &mut timebase, &mut interval_s,
                                           ffi::PICO_DR_8BIT)
    })?;
    // refine against the actual capture memory; the stateless
    // answer can disagree with the segmented configuration
    loop {
      let mut interval_ns = 0f64;
      let mut max_samples = 0u64;
      let status = unsafe {
        ffi::ps6000aGetTimebase(self.handle, timebase, 500,
                                &mut interval_ns, &mut max_samples, 0)
      };
      if status != ffi::PICO_OK {
        timebase += 1;
        if timebase > 100 {
          error!("No timebase sustains four channels over the capture window!");
          return Err(DriverError::TimebaseUnavailable);
        }
        continue;
      }
      let (total, pre, post) = derive_sample_counts(interval_ns as f32);
      if total as u64 > max_samples {
        timebase += 1;
        continue;
      }
      let settings = ScopeSettings {
        sample_interval_ns   : interval_ns as f32,
        pre_trigger_samples  : pre,
        post_trigger_samples : post,
        total_samples        : total,
        resolution_bits      : 8,
        voltage_range_mv     : VOLTAGE_RANGE_MV,
        max_adc              : self.info.max_adc,
        timebase,
      };
      info!("Timebase {} gives {} ns interval, {} samples",
            timebase, interval_ns, total);
      self.settings = Some(settings);
      return Ok(settings);
    }
  }

  fn configure_trigger(&mut self, spec : &TriggerSpec)
    -> Result<TriggerSummary, DriverError> {
    spec.validate()?;
    let settings      = self.settings()?;
    let threshold_adc = mv_to_adc(TRIGGER_THRESHOLD_MV,
                                  settings.voltage_range_mv,
                                  settings.max_adc);
    let participating = spec.participating_channels();

    let mut properties = Vec::<ffi::PICO_TRIGGER_CHANNEL_PROPERTIES>::new();
    for ch in &participating {
      properties.push(ffi::PICO_TRIGGER_CHANNEL_PROPERTIES {
        thresholdUpper           : threshold_adc,
        thresholdUpperHysteresis : TRIGGER_HYSTERESIS_ADC,
        thresholdLower           : threshold_adc,
        thresholdLowerHysteresis : TRIGGER_HYSTERESIS_ADC,
        channel                  : ffi::PICO_CHANNEL_A + ch.index() as i32,
      });
    }
    ok_or(unsafe {
      ffi::ps6000aSetTriggerChannelProperties(self.handle,
                                              properties.as_mut_ptr(),
                                              properties.len() as i16,
                                              0,
                                              spec.auto_trigger_ms() * 1000)
    })?;

    // the a-API takes a flat condition list; the first call
    // clears whatever logic was programmed before, further
    // conditions are added (ORed)
    let mut first = true;
    for condition in spec.active_conditions() {
      let mut sources = Vec::<ffi::PICO_CONDITION>::new();
      for ch in condition.channel_list() {
        sources.push(ffi::PICO_CONDITION {
          source    : ffi::PICO_CHANNEL_A + ch.index() as i32,
          condition : ffi::PICO_TRIGGER_STATE_TRUE,
        });
      }
      let action = if first {
        ffi::PICO_CLEAR_ALL | ffi::PICO_ADD
      } else {
        ffi::PICO_ADD
      };
      ok_or(unsafe {
        ffi::ps6000aSetTriggerChannelConditions(self.handle,
                                                sources.as_mut_ptr(),
                                                sources.len() as i16,
                                                action)
      })?;
      first = false;
    }

    let mut directions = Vec::<ffi::PICO_DIRECTION>::new();
    for ch in &participating {
      directions.push(ffi::PICO_DIRECTION {
        channel       : ffi::PICO_CHANNEL_A + ch.index() as i32,
        direction     : ffi::PICO_DIRECTION_FALLING,
        thresholdMode : ffi::PICO_LEVEL,
      });
    }
    ok_or(unsafe {
      ffi::ps6000aSetTriggerChannelDirections(self.handle,
                                              directions.as_mut_ptr(),
                                              directions.len() as i16)
    })?;
    let summary = TriggerSummary::from_spec(spec);
    info!("Programmed trigger: {}", summary);
    Ok(summary)
  }

  fn allocate_segments(&mut self, count : u32) -> Result<(), DriverError> {
    let mut max_samples = 0u64;
    ok_or(unsafe {
      ffi::ps6000aMemorySegments(self.handle, count as u64, &mut max_samples)
    })?;
    let settings = self.settings()?;
    if max_samples < settings.total_samples as u64 {
      error!("{} segments leave only {} samples each, {} needed!",
             count, max_samples, settings.total_samples);
      return Err(DriverError::ConfigurationInvalid);
    }
    self.segments = count;
    self.cleared  = [false; N_CHANNELS];
    Ok(())
  }

  fn set_capture_count(&mut self, count : u32) -> Result<(), DriverError> {
    if count > self.segments {
      return Err(DriverError::ConfigurationInvalid);
    }
    ok_or(unsafe { ffi::ps6000aSetNoOfCaptures(self.handle, count as u64) })
  }

  unsafe fn bind_buffer(&mut self,
                        channel : ChannelId,
                        segment : u32,
                        buffer  : *mut i16,
                        len     : usize) -> Result<(), DriverError> {
    // CLEAR_ALL drops stale buffer associations; issue it
    // together with the first ADD per channel and cycle
    let action = if self.cleared[channel.index()] {
      ffi::PICO_ADD
    } else {
      ffi::PICO_CLEAR_ALL | ffi::PICO_ADD
    };
    let status = ffi::ps6000aSetDataBuffer(self.handle,
                                           ffi::PICO_CHANNEL_A
                                           + channel.index() as i32,
                                           buffer as *mut c_void,
                                           len as i32,
                                           ffi::PICO_INT16_T,
                                           segment as u64,
                                           ffi::PICO_RATIO_MODE_RAW,
                                           action);
    if status != ffi::PICO_OK {
      error!("Binding channel {} segment {} failed with status {:#x}",
             channel, segment, status);
      return Err(DriverError::BufferBindingFailed);
    }
    self.cleared[channel.index()] = true;
    Ok(())
  }

  fn run_block(&mut self) -> Result<(), DriverError> {
    let settings = self.settings()?;
    ok_or(unsafe {
      ffi::ps6000aRunBlock(self.handle,
                           settings.pre_trigger_samples as u64,
                           settings.post_trigger_samples as u64,
                           settings.timebase,
                           ptr::null_mut(),
                           0,
                           ptr::null_mut::<c_void>(),
                           ptr::null_mut::<c_void>())
    })
  }

  fn poll_ready(&mut self) -> Result<PollStatus, DriverError> {
    let mut ready = 0i16;
    ok_or(unsafe { ffi::ps6000aIsReady(self.handle, &mut ready) })?;
    if ready != 0 {
      return Ok(PollStatus::Ready);
    }
    Ok(PollStatus::NotReady)
  }

  fn bulk_download(&mut self,
                   first_segment : u32,
                   last_segment  : u32) -> Result<(), DriverError> {
    let settings = self.settings()?;
    let n_captures = (last_segment - first_segment + 1) as usize;
    let mut no_of_samples = settings.total_samples as u64;
    let mut overflow = vec![0i16; n_captures];
    let status = unsafe {
      ffi::ps6000aGetValuesBulk(self.handle,
                                0,
                                &mut no_of_samples,
                                first_segment as u64,
                                last_segment as u64,
                                1,
                                ffi::PICO_RATIO_MODE_RAW,
                                overflow.as_mut_ptr())
    };
    if status != ffi::PICO_OK {
      error!("Bulk download failed with status {:#x}", status);
      return Err(DriverError::DownloadFailed);
    }
    Ok(())
  }

  fn stop(&mut self) -> Result<(), DriverError> {
    ok_or(unsafe { ffi::ps6000aStop(self.handle) })
  }

  fn close(&mut self) -> Result<(), DriverError> {
    self.stop().ok();
    ok_or(unsafe { ffi::ps6000aCloseUnit(self.handle) })
  }
}

impl Drop for Ps6000Driver {
  fn drop(&mut self) {
    unsafe {
      ffi::ps6000aStop(self.handle);
      ffi::ps6000aCloseUnit(self.handle);
    }
  }
}
