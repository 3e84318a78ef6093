//! Global constants for the acquisition pipeline
//!
//!

/// Number of analog channels. The pipeline is built around
/// four-fold coincidence setups, the channel order is fixed
/// as A,B,C,D everywhere.
pub const N_CHANNELS : usize = 4;

/// Full scale voltage range on all channels (mV)
pub const VOLTAGE_RANGE_MV : f32 = 100.0;

/// Pre-trigger capture window (ns). Used for the baseline
/// estimate, so it has to be long enough to average the noise
/// down but is otherwise dead time.
pub const PRE_TRIGGER_NS  : f32 = 1000.0;

/// Post-trigger capture window (ns). The pulse including its
/// tail has to fit in here, otherwise the charge integral
/// clips.
pub const POST_TRIGGER_NS : f32 = 2000.0;

/// Trigger level (mV). Pulses are negative, so this is a
/// falling-edge threshold.
pub const TRIGGER_THRESHOLD_MV : f32 = -5.0;

/// Trigger hysteresis in ADC counts
pub const TRIGGER_HYSTERESIS_ADC : u16 = 10;

/// Auto-trigger timeout (ms) when the auto trigger is enabled.
/// 0 disables the auto trigger entirely.
pub const AUTO_TRIGGER_MAX_MS : u32 = 60000;

/// Constant fraction for the CFD timing algorithm
pub const CFD_FRACTION : f32 = 0.5;

/// Minimum pulse amplitude (mV, baseline to peak) for the
/// pulse-presence decision. Same magnitude as the trigger
/// threshold but an independent knob.
pub const MIN_AMPLITUDE_MV : f32 = 5.0;

/// Default capacity of the event store.
///
/// An event is ~64 bytes (4 channel-pulse records plus id and
/// timestamp), so a full store at this capacity stays well
/// below 1 GiB.
pub const EVENT_STORE_CAPACITY : usize = 1_000_000;

/// Fill fraction above which the engine emits a storage warning
pub const STORAGE_WARN_FRACTION : f32 = 0.9;

/// Minimum interval between two representative waveform
/// emissions (ms). Keeps the consumer side at ~3 Hz no matter
/// how fast the batches come in.
pub const WAVEFORM_EMIT_INTERVAL_MS : u64 = 333;

/// Captures per rapid-block batch on the 3000 family
pub const BATCH_SIZE_PS3000 : u32 = 10;

/// Captures per rapid-block batch on the 6000 family
pub const BATCH_SIZE_PS6000 : u32 = 20;

/// Reference energy of the first calibration peak (keV,
/// positron annihilation)
pub const CAL_PEAK_1_KEV : f32 = 511.0;

/// Reference energy of the second calibration peak (keV,
/// Na-22 gamma)
pub const CAL_PEAK_2_KEV : f32 = 1275.0;

/// Minimum number of events with a pulse on the channel before
/// a calibration fit is accepted
pub const CAL_MIN_EVENTS : usize = 100;

/// Number of bins for the weighted-mean peak finder
pub const CAL_PEAK_FINDER_BINS : usize = 100;

/// Window length for the acquisition rate estimate (s)
pub const RATE_WINDOW_S : f64 = 5.0;
