//! Raw vendor library bindings
//!
//! Hand-maintained declarations for the subset of the two driver
//! libraries this crate programs. Only compiled with the
//! `picoscope` feature; linking needs the vendor SDK on the
//! library search path.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(dead_code)]

use std::os::raw::{c_char, c_void};

use crate::errors::DriverError;

pub type PICO_STATUS = u32;

// status codes the call sequences in this crate discriminate on
pub const PICO_OK                             : PICO_STATUS = 0x0000;
pub const PICO_MAX_UNITS_OPENED               : PICO_STATUS = 0x0001;
pub const PICO_NOT_FOUND                      : PICO_STATUS = 0x0003;
pub const PICO_OPEN_OPERATION_IN_PROGRESS     : PICO_STATUS = 0x0005;
pub const PICO_NOT_RESPONDING                 : PICO_STATUS = 0x0007;
pub const PICO_INVALID_PARAMETER              : PICO_STATUS = 0x000D;
pub const PICO_INVALID_TIMEBASE               : PICO_STATUS = 0x000E;
pub const PICO_INVALID_VOLTAGE_RANGE          : PICO_STATUS = 0x000F;
pub const PICO_INVALID_CHANNEL                : PICO_STATUS = 0x0010;
pub const PICO_INVALID_TRIGGER_CHANNEL        : PICO_STATUS = 0x0011;
pub const PICO_INVALID_CONDITION_CHANNEL      : PICO_STATUS = 0x0012;
pub const PICO_SEGMENT_OUT_OF_RANGE           : PICO_STATUS = 0x0046;
pub const PICO_BUSY                           : PICO_STATUS = 0x0047;
pub const PICO_TOO_MANY_SEGMENTS              : PICO_STATUS = 0x0049;
pub const PICO_COUPLING_NOT_SUPPORTED         : PICO_STATUS = 0x011D;
pub const PICO_POWER_SUPPLY_NOT_CONNECTED     : PICO_STATUS = 0x011A;
pub const PICO_USB3_0_DEVICE_NON_USB3_0_PORT  : PICO_STATUS = 0x011E;

/// Map a vendor status code to the crate error taxonomy
pub fn status_to_error(status : PICO_STATUS) -> DriverError {
  match status {
    PICO_NOT_FOUND
    | PICO_NOT_RESPONDING               => DriverError::DeviceNotFound,
    PICO_MAX_UNITS_OPENED
    | PICO_OPEN_OPERATION_IN_PROGRESS
    | PICO_BUSY                         => DriverError::DeviceBusy,
    PICO_POWER_SUPPLY_NOT_CONNECTED
    | PICO_USB3_0_DEVICE_NON_USB3_0_PORT => DriverError::DevicePowerState,
    PICO_INVALID_PARAMETER
    | PICO_INVALID_VOLTAGE_RANGE
    | PICO_INVALID_CHANNEL
    | PICO_INVALID_TRIGGER_CHANNEL
    | PICO_INVALID_CONDITION_CHANNEL    => DriverError::ConfigurationInvalid,
    PICO_INVALID_TIMEBASE               => DriverError::TimebaseUnavailable,
    PICO_COUPLING_NOT_SUPPORTED         => DriverError::DeviceUnsupported,
    _                                   => DriverError::HardwareFailure,
  }
}

/// Unit-info field selectors (GetUnitInfo)
pub const PICO_VARIANT_INFO      : i16 = 3;
pub const PICO_BATCH_AND_SERIAL  : i16 = 4;

// ---- 3000A series ------------------------------------------

pub const PS3000A_CHANNEL_A : i32 = 0;
pub const PS3000A_DC        : i32 = 1;
pub const PS3000A_100MV     : i32 = 3;

pub const PS3000A_CONDITION_DONT_CARE : i32 = 0;
pub const PS3000A_CONDITION_TRUE      : i32 = 1;

pub const PS3000A_LEVEL   : i32 = 0;
pub const PS3000A_NONE    : i32 = 0;
pub const PS3000A_RISING  : i32 = 2;
pub const PS3000A_FALLING : i32 = 3;

pub const PS3000A_RATIO_MODE_NONE : i32 = 0;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct PS3000A_TRIGGER_CHANNEL_PROPERTIES {
  pub thresholdUpper           : i16,
  pub thresholdUpperHysteresis : u16,
  pub thresholdLower           : i16,
  pub thresholdLowerHysteresis : u16,
  pub channel                  : i32,
  pub thresholdMode            : i32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct PS3000A_TRIGGER_CONDITIONS_V2 {
  pub channelA            : i32,
  pub channelB            : i32,
  pub channelC            : i32,
  pub channelD            : i32,
  pub external            : i32,
  pub aux                 : i32,
  pub pulseWidthQualifier : i32,
  pub digital             : i32,
}

#[link(name = "ps3000a")]
extern "C" {
  pub fn ps3000aOpenUnit(handle : *mut i16, serial : *mut c_char) -> PICO_STATUS;
  pub fn ps3000aChangePowerSource(handle : i16, powerstate : PICO_STATUS) -> PICO_STATUS;
  pub fn ps3000aGetUnitInfo(handle : i16, string : *mut c_char,
                            string_length : i16, required_size : *mut i16,
                            info : i16) -> PICO_STATUS;
  pub fn ps3000aMaximumValue(handle : i16, value : *mut i16) -> PICO_STATUS;
  pub fn ps3000aSetChannel(handle : i16, channel : i32, enabled : i16,
                           coupling : i32, range : i32,
                           analogue_offset : f32) -> PICO_STATUS;
  pub fn ps3000aGetTimebase2(handle : i16, timebase : u32, no_samples : i32,
                             time_interval_ns : *mut f32, oversample : i16,
                             max_samples : *mut i32,
                             segment_index : u32) -> PICO_STATUS;
  pub fn ps3000aSetTriggerChannelProperties(
    handle : i16,
    channel_properties : *mut PS3000A_TRIGGER_CHANNEL_PROPERTIES,
    n_channel_properties : i16,
    aux_output_enable : i16,
    auto_trigger_milliseconds : i32) -> PICO_STATUS;
  pub fn ps3000aSetTriggerChannelConditionsV2(
    handle : i16,
    conditions : *mut PS3000A_TRIGGER_CONDITIONS_V2,
    n_conditions : i16) -> PICO_STATUS;
  pub fn ps3000aSetTriggerChannelDirections(
    handle : i16, channel_a : i32, channel_b : i32, channel_c : i32,
    channel_d : i32, ext : i32, aux : i32) -> PICO_STATUS;
  pub fn ps3000aMemorySegments(handle : i16, n_segments : u32,
                               n_max_samples : *mut i32) -> PICO_STATUS;
  pub fn ps3000aSetNoOfCaptures(handle : i16, n_captures : u32) -> PICO_STATUS;
  pub fn ps3000aSetDataBuffer(handle : i16, channel : i32, buffer : *mut i16,
                              buffer_length : i32, segment_index : u32,
                              mode : i32) -> PICO_STATUS;
  pub fn ps3000aRunBlock(handle : i16, no_of_pre_trigger_samples : i32,
                         no_of_post_trigger_samples : i32, timebase : u32,
                         oversample : i16, time_indisposed_ms : *mut i32,
                         segment_index : u32, ready : *mut c_void,
                         parameter : *mut c_void) -> PICO_STATUS;
  pub fn ps3000aIsReady(handle : i16, ready : *mut i16) -> PICO_STATUS;
  pub fn ps3000aGetValuesBulk(handle : i16, no_of_samples : *mut u32,
                              from_segment_index : u32, to_segment_index : u32,
                              down_sample_ratio : u32,
                              down_sample_ratio_mode : i32,
                              overflow : *mut i16) -> PICO_STATUS;
  pub fn ps3000aStop(handle : i16) -> PICO_STATUS;
  pub fn ps3000aCloseUnit(handle : i16) -> PICO_STATUS;
}

// ---- 6000 (a API) series -----------------------------------

pub const PICO_CHANNEL_A : i32 = 0;

pub const PICO_DC_50OHM : i32 = 50;
pub const PICO_DC       : i32 = 1;

pub const PICO_X1_PROBE_100MV : i32 = 3;

pub const PICO_BW_FULL : i32 = 0;

pub const PICO_DR_8BIT : i32 = 0;

pub const PICO_INT16_T : i32 = 1;

pub const PICO_RATIO_MODE_RAW : i32 = 0;

// buffer action flags, combinable
pub const PICO_CLEAR_ALL : u32 = 0x00000001;
pub const PICO_ADD       : u32 = 0x00000002;

pub const PICO_TRIGGER_STATE_DONT_CARE : i32 = 0;
pub const PICO_TRIGGER_STATE_TRUE      : i32 = 1;

pub const PICO_LEVEL            : i32 = 0;
pub const PICO_DIRECTION_NONE   : i32 = 0;
pub const PICO_DIRECTION_RISING : i32 = 2;
pub const PICO_DIRECTION_FALLING: i32 = 3;

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct PICO_TRIGGER_CHANNEL_PROPERTIES {
  pub thresholdUpper           : i16,
  pub thresholdUpperHysteresis : u16,
  pub thresholdLower           : i16,
  pub thresholdLowerHysteresis : u16,
  pub channel                  : i32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct PICO_CONDITION {
  pub source    : i32,
  pub condition : i32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct PICO_DIRECTION {
  pub channel       : i32,
  pub direction     : i32,
  pub thresholdMode : i32,
}

#[link(name = "ps6000a")]
extern "C" {
  pub fn ps6000aOpenUnit(handle : *mut i16, serial : *mut c_char,
                         resolution : i32) -> PICO_STATUS;
  pub fn ps6000aGetUnitInfo(handle : i16, string : *mut c_char,
                            string_length : i16, required_size : *mut i16,
                            info : i16) -> PICO_STATUS;
  pub fn ps6000aGetAdcLimits(handle : i16, resolution : i32,
                             min_value : *mut i16,
                             max_value : *mut i16) -> PICO_STATUS;
  pub fn ps6000aSetChannelOn(handle : i16, channel : i32, coupling : i32,
                             range : i32, analogue_offset : f64,
                             bandwidth : i32) -> PICO_STATUS;
  pub fn ps6000aSetChannelOff(handle : i16, channel : i32) -> PICO_STATUS;
  pub fn ps6000aMinimumTimebaseStateless(handle : i16,
                                         enabled_channel_flags : u32,
                                         timebase : *mut u32,
                                         time_interval : *mut f64,
                                         resolution : i32) -> PICO_STATUS;
  pub fn ps6000aGetTimebase(handle : i16, timebase : u32, no_samples : u64,
                            time_interval_ns : *mut f64,
                            max_samples : *mut u64,
                            segment_index : u64) -> PICO_STATUS;
  pub fn ps6000aSetTriggerChannelProperties(
    handle : i16,
    channel_properties : *mut PICO_TRIGGER_CHANNEL_PROPERTIES,
    n_channel_properties : i16,
    aux_output_enable : i16,
    auto_trigger_micro_seconds : u32) -> PICO_STATUS;
  pub fn ps6000aSetTriggerChannelConditions(
    handle : i16, conditions : *mut PICO_CONDITION, n_conditions : i16,
    action : u32) -> PICO_STATUS;
  pub fn ps6000aSetTriggerChannelDirections(
    handle : i16, directions : *mut PICO_DIRECTION,
    n_directions : i16) -> PICO_STATUS;
  pub fn ps6000aMemorySegments(handle : i16, n_segments : u64,
                               n_max_samples : *mut u64) -> PICO_STATUS;
  pub fn ps6000aSetNoOfCaptures(handle : i16, n_captures : u64) -> PICO_STATUS;
  pub fn ps6000aSetDataBuffer(handle : i16, channel : i32, buffer : *mut c_void,
                              n_samples : i32, data_type : i32,
                              waveform : u64, down_sample_ratio_mode : i32,
                              action : u32) -> PICO_STATUS;
  pub fn ps6000aRunBlock(handle : i16, no_of_pre_trigger_samples : u64,
                         no_of_post_trigger_samples : u64, timebase : u32,
                         time_indisposed_ms : *mut f64, segment_index : u64,
                         ready : *mut c_void,
                         parameter : *mut c_void) -> PICO_STATUS;
  pub fn ps6000aIsReady(handle : i16, ready : *mut i16) -> PICO_STATUS;
  pub fn ps6000aGetValuesBulk(handle : i16, start_index : u64,
                              no_of_samples : *mut u64,
                              from_segment_index : u64, to_segment_index : u64,
                              down_sample_ratio : u64,
                              down_sample_ratio_mode : i32,
                              overflow : *mut i16) -> PICO_STATUS;
  pub fn ps6000aStop(handle : i16) -> PICO_STATUS;
  pub fn ps6000aCloseUnit(handle : i16) -> PICO_STATUS;
}
