//! End-to-end scenarios over the analysis chain: synthetic
//! waveforms through the pulse analyzer, calibration and the
//! spectrum operators.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand::distributions::Distribution;
use statrs::distribution::Normal;

use pals_daq::analysis::{analyze_capture,
                         analyze_waveform,
                         PulseAnalysisConfig};
use pals_daq::calibrations::{find_peak_weighted_mean, fit_two_point};
use pals_daq::constants::N_CHANNELS;
use pals_daq::events::{ChannelId, ChannelPulse, Event};
use pals_daq::spectra::{timing_differences, CoincidencePair, EnergyGate};
use pals_daq::storage::EventStore;

const TOTAL_SAMPLES : usize = 3749;
const PRE_SAMPLES   : usize = 1249;
const INTERVAL_NS   : f32   = 0.8;

fn gaussian_noise(rng : &mut StdRng, sigma_mv : f64, n : usize) -> Vec<f32> {
  let noise = Normal::new(0.0, sigma_mv).unwrap();
  (0..n).map(|_| noise.sample(rng) as f32).collect()
}

/// Scenario 1: baseline-only noise on all four channels leaves
/// every channel without a pulse
#[test]
fn noise_only_capture_has_no_pulses() {
  let mut rng = StdRng::seed_from_u64(11);
  let traces : [Vec<f32>; N_CHANNELS]
    = std::array::from_fn(|_| gaussian_noise(&mut rng, 0.3, TOTAL_SAMPLES));
  let pulses = analyze_capture(&traces, PRE_SAMPLES, INTERVAL_NS,
                               &PulseAnalysisConfig::new());
  for pulse in pulses {
    assert!(!pulse.has_pulse);
    assert!(pulse.timing_ns.is_nan());
    // the energy of a rejected channel is pinned to zero,
    // well inside the sigma * samples * interval noise bound
    assert!(pulse.energy.abs() <= 0.3 * TOTAL_SAMPLES as f32 * INTERVAL_NS);
    assert_eq!(pulse.energy, 0.0);
  }
}

/// Scenario 2: one clean negative pulse on channel A only
#[test]
fn single_clean_pulse_on_channel_a() {
  let mut traces : [Vec<f32>; N_CHANNELS]
    = std::array::from_fn(|_| vec![0.0f32; TOTAL_SAMPLES]);
  // triangular pulse peaking at -40 mV at sample 1300 with a
  // rise of 3 samples
  traces[0][1298] = -40.0 / 3.0;
  traces[0][1299] = -80.0 / 3.0;
  traces[0][1300] = -40.0;
  for n in 1..40 {
    traces[0][1300 + n] = -40.0 * (40 - n) as f32 / 40.0;
  }
  let pulses = analyze_capture(&traces, PRE_SAMPLES, INTERVAL_NS,
                               &PulseAnalysisConfig::new());
  assert!(pulses[0].has_pulse);
  assert!((pulses[0].peak_mv - (-40.0)).abs() < 1e-3);
  // CFD picks the half-rise: (1300 - 1 - 1249) * 0.8 ns
  assert!((pulses[0].timing_ns - 40.0).abs() <= 0.8);
  for ch in 1..N_CHANNELS {
    assert!(!pulses[ch].has_pulse);
  }
}

/// Scenario 3: equal-width rectangular pulses, double the
/// amplitude doubles the energy
#[test]
fn energy_is_linear_in_amplitude() {
  let mut wf_40 = vec![0.0f32; TOTAL_SAMPLES];
  let mut wf_80 = vec![0.0f32; TOTAL_SAMPLES];
  for n in 1400..1600 {
    wf_40[n] = -40.0;
    wf_80[n] = -80.0;
  }
  let cfg = PulseAnalysisConfig::new();
  let pulse_40 = analyze_waveform(&wf_40, PRE_SAMPLES, INTERVAL_NS, &cfg);
  let pulse_80 = analyze_waveform(&wf_80, PRE_SAMPLES, INTERVAL_NS, &cfg);
  assert!(pulse_40.has_pulse);
  assert!(pulse_80.has_pulse);
  let ratio = pulse_80.energy / pulse_40.energy;
  assert!((ratio - 2.0).abs() <= 0.01);
}

/// Scenario 4: two-point calibration from two synthetic peak
/// clusters on channel A
#[test]
fn two_point_calibration_from_clusters() {
  let mut rng = StdRng::seed_from_u64(42);
  let peak_1 = Normal::new(200_000.0, 2_000.0).unwrap();
  let peak_2 = Normal::new(500_000.0, 2_000.0).unwrap();
  let mut energies = Vec::<f32>::with_capacity(2000);
  for _ in 0..1000 {
    energies.push(peak_1.sample(&mut rng) as f32);
  }
  for _ in 0..1000 {
    energies.push(peak_2.sample(&mut rng) as f32);
  }
  let peak_1_raw
    = find_peak_weighted_mean(&energies, 150_000.0, 250_000.0).unwrap();
  let peak_2_raw
    = find_peak_weighted_mean(&energies, 450_000.0, 550_000.0).unwrap();
  assert!((peak_1_raw - 200_000.0).abs() < 1_000.0);
  assert!((peak_2_raw - 500_000.0).abs() < 1_000.0);

  let cal = fit_two_point(energies.len(), peak_1_raw, peak_2_raw).unwrap();
  let expected_gain = (1275.0 - 511.0) / 300_000.0;
  assert!((cal.gain - expected_gain).abs() < 1e-4);
  assert!((cal.apply(200_000.0) - 511.0).abs() <= 1.0);
  assert!((cal.apply(500_000.0) - 1275.0).abs() <= 1.0);
}

fn coincidence_event(t_a : f32, t_b : f32, raw_energy : f32) -> Event {
  let mut channels = [ChannelPulse::absent(); N_CHANNELS];
  channels[ChannelId::A.index()] = ChannelPulse {
    timing_ns : t_a,
    energy    : raw_energy,
    peak_mv   : -30.0,
    has_pulse : true,
  };
  channels[ChannelId::B.index()] = ChannelPulse {
    timing_ns : t_b,
    energy    : raw_energy,
    peak_mv   : -30.0,
    has_pulse : true,
  };
  Event::new(0.0, channels)
}

/// Scenario 5: gated coincidence timing difference of two
/// jittered channels
#[test]
fn coincidence_timing_difference() {
  let mut rng = StdRng::seed_from_u64(7);
  let jitter  = Normal::new(0.0, 0.5).unwrap();
  // raw 200k calibrates to 511 keV, inside the [300, 800] gates
  let mut events = Vec::<Event>::with_capacity(10_000);
  for _ in 0..10_000 {
    let t_a = 50.0 + jitter.sample(&mut rng) as f32;
    let t_b = 60.0 + jitter.sample(&mut rng) as f32;
    events.push(coincidence_event(t_a, t_b, 200_000.0));
  }
  let cal  = fit_two_point(10_000, 200_000.0, 500_000.0).unwrap();
  let pair = CoincidencePair {
    channel_a     : ChannelId::A,
    channel_b     : ChannelId::B,
    gate_a        : EnergyGate::new(300.0, 800.0),
    gate_b        : EnergyGate::new(300.0, 800.0),
    calibration_a : cal,
    calibration_b : cal,
  };
  let deltas = timing_differences(&events, &pair).unwrap();
  assert_eq!(deltas.len(), 10_000);
  let deltas_f64 : Vec<f64> = deltas.iter().map(|d| *d as f64).collect();
  let mean  = statistical::mean(&deltas_f64);
  let sigma = statistical::standard_deviation(&deltas_f64, Some(mean));
  assert!((mean - (-10.0)).abs() <= 0.05);
  let expected_sigma = (2.0f64).sqrt() * 0.5;
  assert!((sigma - expected_sigma).abs() <= 0.05);
}

/// Scenario 6: store backpressure with exactly one full
/// notification and a clean restart after clear
#[test]
fn store_backpressure() {
  let store = EventStore::new(1000);
  let mut notifications = 0usize;
  let mut refused       = 0usize;
  for _ in 0..12 {
    let append = store.add_batch(vec![Event::default(); 100]);
    refused += append.refused;
    if append.filled {
      notifications += 1;
    }
  }
  assert_eq!(store.len(), 1000);
  assert_eq!(refused, 200);
  assert_eq!(notifications, 1);
  let events = store.snapshot();
  assert_eq!(events.first().unwrap().event_id, 0);
  assert_eq!(events.last().unwrap().event_id, 999);

  store.clear();
  assert!(store.add(Event::default()));
  assert_eq!(store.snapshot()[0].event_id, 0);
}
