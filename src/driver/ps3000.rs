//! 3000-series driver
//!
//! 8 bit, 1 MOhm inputs, 32-bit sample counts. The timebase is
//! found iteratively: the vendor library only answers whether a
//! given index is valid for the requested sample count with the
//! enabled channels, so we walk up from the fastest index until
//! it is.

use std::ffi::c_void;
use std::ptr;

use crate::constants::{N_CHANNELS, VOLTAGE_RANGE_MV};
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

use crate::constants::{TRIGGER_THRESHOLD_MV, TRIGGER_HYSTERESIS_ADC};

const MAX_TIMEBASE_ATTEMPTS : u32 = 100;

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
    ffi::ps3000aGetUnitInfo(handle, buffer.as_mut_ptr(),
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

/// Driver for the 3000 family
pub struct Ps3000Driver {
  handle   : i16,
  info     : DeviceInfo,
  settings : Option<ScopeSettings>,
  segments : u32,
}

impl Ps3000Driver {
  /// Open the first 3000-series unit on the bus
  ///
  /// USB-powered units answer the open call with a power-state
  /// status that has to be acknowledged before the device is
  /// usable.
  pub fn open() -> Result<Self, DriverError> {
    let mut handle = 0i16;
    let status = unsafe { ffi::ps3000aOpenUnit(&mut handle, ptr::null_mut()) };
    match status {
      ffi::PICO_OK => (),
      ffi::PICO_POWER_SUPPLY_NOT_CONNECTED
      | ffi::PICO_USB3_0_DEVICE_NON_USB3_0_PORT => {
        // acknowledge running from USB power
        let ack = unsafe { ffi::ps3000aChangePowerSource(handle, status) };
        if ack != ffi::PICO_OK {
          error!("Power source handshake failed with status {:#x}", ack);
          return Err(DriverError::DevicePowerState);
        }
      }
      _ => return Err(ffi::status_to_error(status)),
    }
    let mut max_adc = 0i16;
    ok_or(unsafe { ffi::ps3000aMaximumValue(handle, &mut max_adc) })?;
    let info = DeviceInfo {
      family  : DeviceFamily::Ps3000,
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
    })
  }

  fn settings(&self) -> Result<ScopeSettings, DriverError> {
    self.settings.ok_or(DriverError::ConfigurationInvalid)
  }
}

impl DigitizerDriver for Ps3000Driver {
  fn info(&self) -> &DeviceInfo {
    &self.info
  }

  fn configure_channels(&mut self) -> Result<(), DriverError> {
    // inputs on this family are fixed at 1 MOhm; external 50
    // Ohm feed-through termination is the documented contract
    for ch in 0..N_CHANNELS as i32 {
      ok_or(unsafe {
        ffi::ps3000aSetChannel(self.handle,
                               ffi::PS3000A_CHANNEL_A + ch,
                               1,
                               ffi::PS3000A_DC,
                               ffi::PS3000A_100MV,
                               0.0)
      })?;
    }
    debug!("All four channels at {} mV, DC, 1 MOhm", VOLTAGE_RANGE_MV);
    Ok(())
  }

  fn resolve_timebase(&mut self) -> Result<ScopeSettings, DriverError> {
    // trial count for the validity check, the real counts are
    // derived from the achieved interval afterwards
    let trial_samples = 500i32;
    for timebase in 0..MAX_TIMEBASE_ATTEMPTS {
      let mut interval_ns = 0f32;
      let mut max_samples = 0i32;
      let status = unsafe {
        ffi::ps3000aGetTimebase2(self.handle, timebase, trial_samples,
                                 &mut interval_ns, 1, &mut max_samples, 0)
      };
      if status != ffi::PICO_OK {
        // index not usable with four channels, walk up
        continue;
      }
      let (total, pre, post) = derive_sample_counts(interval_ns);
      if total as i32 > max_samples {
        // too little capture memory at this speed
        continue;
      }
      let settings = ScopeSettings {
        sample_interval_ns   : interval_ns,
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
    error!("No timebase sustains four channels over the capture window!");
    Err(DriverError::TimebaseUnavailable)
  }

  fn configure_trigger(&mut self, spec : &TriggerSpec)
    -> Result<TriggerSummary, DriverError> {
    spec.validate()?;
    let settings      = self.settings()?;
    let threshold_adc = mv_to_adc(TRIGGER_THRESHOLD_MV,
                                  settings.voltage_range_mv,
                                  settings.max_adc);
    let participating = spec.participating_channels();

    // per-channel level and hysteresis
    let mut properties = Vec::<ffi::PS3000A_TRIGGER_CHANNEL_PROPERTIES>::new();
    for ch in &participating {
      properties.push(ffi::PS3000A_TRIGGER_CHANNEL_PROPERTIES {
        thresholdUpper           : threshold_adc,
        thresholdUpperHysteresis : TRIGGER_HYSTERESIS_ADC,
        thresholdLower           : threshold_adc,
        thresholdLowerHysteresis : TRIGGER_HYSTERESIS_ADC,
        channel                  : ffi::PS3000A_CHANNEL_A + ch.index() as i32,
        thresholdMode            : ffi::PS3000A_LEVEL,
      });
    }
    ok_or(unsafe {
      ffi::ps3000aSetTriggerChannelProperties(self.handle,
                                              properties.as_mut_ptr(),
                                              properties.len() as i16,
                                              0,
                                              spec.auto_trigger_ms() as i32)
    })?;

    // one conditions struct per ORed condition, channels inside
    // ANDed by setting them TRUE
    let mut conditions = Vec::<ffi::PS3000A_TRIGGER_CONDITIONS_V2>::new();
    for condition in spec.active_conditions() {
      let mut cond = ffi::PS3000A_TRIGGER_CONDITIONS_V2 {
        channelA            : ffi::PS3000A_CONDITION_DONT_CARE,
        channelB            : ffi::PS3000A_CONDITION_DONT_CARE,
        channelC            : ffi::PS3000A_CONDITION_DONT_CARE,
        channelD            : ffi::PS3000A_CONDITION_DONT_CARE,
        external            : ffi::PS3000A_CONDITION_DONT_CARE,
        aux                 : ffi::PS3000A_CONDITION_DONT_CARE,
        pulseWidthQualifier : ffi::PS3000A_CONDITION_DONT_CARE,
        digital             : ffi::PS3000A_CONDITION_DONT_CARE,
      };
      for ch in condition.channel_list() {
        match ch {
          ChannelId::A => cond.channelA = ffi::PS3000A_CONDITION_TRUE,
          ChannelId::B => cond.channelB = ffi::PS3000A_CONDITION_TRUE,
          ChannelId::C => cond.channelC = ffi::PS3000A_CONDITION_TRUE,
          ChannelId::D => cond.channelD = ffi::PS3000A_CONDITION_TRUE,
        }
      }
      conditions.push(cond);
    }
    ok_or(unsafe {
      ffi::ps3000aSetTriggerChannelConditionsV2(self.handle,
                                                conditions.as_mut_ptr(),
                                                conditions.len() as i16)
    })?;

    // falling edge on the participating channels; the external
    // input needs a concrete direction to pass the library's
    // validation even though it is unused
    let mut directions = [ffi::PS3000A_NONE; N_CHANNELS];
    for ch in &participating {
      directions[ch.index()] = ffi::PS3000A_FALLING;
    }
    ok_or(unsafe {
      ffi::ps3000aSetTriggerChannelDirections(self.handle,
                                              directions[0],
                                              directions[1],
                                              directions[2],
                                              directions[3],
                                              ffi::PS3000A_RISING,
                                              ffi::PS3000A_NONE)
    })?;
    let summary = TriggerSummary::from_spec(spec);
    info!("Programmed trigger: {}", summary);
    Ok(summary)
  }

  fn allocate_segments(&mut self, count : u32) -> Result<(), DriverError> {
    let mut max_samples = 0i32;
    ok_or(unsafe {
      ffi::ps3000aMemorySegments(self.handle, count, &mut max_samples)
    })?;
    let settings = self.settings()?;
    if (max_samples as usize) < settings.total_samples {
      error!("{} segments leave only {} samples each, {} needed!",
             count, max_samples, settings.total_samples);
      return Err(DriverError::ConfigurationInvalid);
    }
    self.segments = count;
    Ok(())
  }

  fn set_capture_count(&mut self, count : u32) -> Result<(), DriverError> {
    if count > self.segments {
      return Err(DriverError::ConfigurationInvalid);
    }
    ok_or(unsafe { ffi::ps3000aSetNoOfCaptures(self.handle, count) })
  }

  unsafe fn bind_buffer(&mut self,
                        channel : ChannelId,
                        segment : u32,
                        buffer  : *mut i16,
                        len     : usize) -> Result<(), DriverError> {
    let status = ffi::ps3000aSetDataBuffer(self.handle,
                                           ffi::PS3000A_CHANNEL_A
                                           + channel.index() as i32,
                                           buffer,
                                           len as i32,
                                           segment,
                                           ffi::PS3000A_RATIO_MODE_NONE);
    if status != ffi::PICO_OK {
      error!("Binding channel {} segment {} failed with status {:#x}",
             channel, segment, status);
      return Err(DriverError::BufferBindingFailed);
    }
    Ok(())
  }

  fn run_block(&mut self) -> Result<(), DriverError> {
    let settings = self.settings()?;
    ok_or(unsafe {
      ffi::ps3000aRunBlock(self.handle,
                           settings.pre_trigger_samples as i32,
                           settings.post_trigger_samples as i32,
                           settings.timebase,
                           1,
                           ptr::null_mut(),
                           0,
                           ptr::null_mut::<c_void>(),
                           ptr::null_mut::<c_void>())
    })
  }

  fn poll_ready(&mut self) -> Result<PollStatus, DriverError> {
    let mut ready = 0i16;
    ok_or(unsafe { ffi::ps3000aIsReady(self.handle, &mut ready) })?;
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
    let mut no_of_samples = settings.total_samples as u32;
    let mut overflow = vec![0i16; n_captures];
    let status = unsafe {
      ffi::ps3000aGetValuesBulk(self.handle,
                                &mut no_of_samples,
                                first_segment,
                                last_segment,
                                1,
                                ffi::PS3000A_RATIO_MODE_NONE,
                                overflow.as_mut_ptr())
    };
    if status != ffi::PICO_OK {
      error!("Bulk download failed with status {:#x}", status);
      return Err(DriverError::DownloadFailed);
    }
    Ok(())
  }

  fn stop(&mut self) -> Result<(), DriverError> {
    ok_or(unsafe { ffi::ps3000aStop(self.handle) })
  }

  fn close(&mut self) -> Result<(), DriverError> {
    self.stop().ok();
    ok_or(unsafe { ffi::ps3000aCloseUnit(self.handle) })
  }
}

impl Drop for Ps3000Driver {
  fn drop(&mut self) {
    unsafe {
      ffi::ps3000aStop(self.handle);
      ffi::ps3000aCloseUnit(self.handle);
    }
  }
}
