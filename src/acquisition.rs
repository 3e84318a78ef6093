//! The rapid-block acquisition engine
//!
//! One worker thread owns the digitizer handle and the write
//! side of the event store. Per iteration it runs a block of
//! `batch_size` captures, waits for readiness, bulk-downloads
//! into its own int16 buffers, converts to mV, runs the pulse
//! analyzer and appends the resulting events.
//!
//! External control (start/pause/resume/stop/restart) only ever
//! flips flags in the shared [`EngineControl`]; the worker
//! observes them at every poll tick and between iterations.
//! Everything the consumer side needs to know leaves the engine
//! as a typed [`EngineMessage`] on a crossbeam channel.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded,
                        Receiver,
                        Sender};

use crate::analysis::{analyze_capture, PulseAnalysisConfig};
use crate::constants::{N_CHANNELS,
                       RATE_WINDOW_S,
                       STORAGE_WARN_FRACTION,
                       WAVEFORM_EMIT_INTERVAL_MS};
use crate::driver::{adc_to_mv,
                    DigitizerDriver,
                    PollStatus,
                    ScopeSettings};
use crate::errors::DriverError;
use crate::events::Event;
use crate::storage::EventStore;

/// Idle sleep while the engine is not running
const IDLE_TICK : Duration = Duration::from_millis(10);
/// Readiness poll backoff bounds
const POLL_MIN  : Duration = Duration::from_micros(50);
const POLL_MAX  : Duration = Duration::from_millis(10);

/// Engine lifecycle states
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineState {
  Stopped,
  Running,
  Paused,
}

impl fmt::Display for EngineState {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      EngineState::Stopped => "Stopped",
      EngineState::Running => "Running",
      EngineState::Paused  => "Paused",
    };
    write!(f, "{}", repr)
  }
}

/// Auto-stop knobs. Elapsed time excludes paused intervals,
/// the two limits are independent.
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RunLimits {
  pub time_limit_s : Option<f64>,
  pub event_limit  : Option<u64>,
}

impl RunLimits {
  pub fn none() -> Self {
    Self {
      time_limit_s : None,
      event_limit  : None,
    }
  }
}

impl Default for RunLimits {
  fn default() -> Self {
    Self::none()
  }
}

/// The representative waveform of a batch (first segment),
/// already converted to mV with t = 0 at the trigger
#[derive(Debug, Clone)]
pub struct WaveformFrame {
  pub time_ns      : Vec<f32>,
  pub traces       : [Vec<f32>; N_CHANNELS],
  pub num_captures : usize,
}

/// Notifications leaving the engine, delivered in emission
/// order
#[derive(Debug, Clone)]
pub enum EngineMessage {
  StateChanged(EngineState),
  WaveformReady(WaveformFrame),
  BatchComplete {
    count   : usize,
    rate_hz : f32,
  },
  StorageWarning {
    fill_fraction : f32,
    full          : bool,
  },
  AcquisitionError(DriverError),
}

/// Shared control block, engine-side state machine input
#[derive(Debug, Copy, Clone)]
pub struct EngineControl {
  /// Where external callers want the engine to go
  pub desired           : EngineState,
  pub restart_requested : bool,
  /// Terminate the worker thread (process shutdown)
  pub shutdown          : bool,
  /// Where the engine actually is
  pub state             : EngineState,
}

impl EngineControl {
  pub fn new() -> Self {
    Self {
      desired           : EngineState::Stopped,
      restart_requested : false,
      shutdown          : false,
      state             : EngineState::Stopped,
    }
  }
}

impl Default for EngineControl {
  fn default() -> Self {
    Self::new()
  }
}

/// Handle to the acquisition worker
///
/// Dropping the handle shuts the worker down and joins it.
pub struct AcquisitionEngine {
  control : Arc<Mutex<EngineControl>>,
  handle  : Option<JoinHandle<()>>,
}

impl AcquisitionEngine {
  /// Spawn the worker thread around a fully configured driver
  ///
  /// The driver has to have channels, timebase and trigger
  /// programmed already; `settings` is what the timebase
  /// resolution returned.
  pub fn spawn(driver   : Box<dyn DigitizerDriver>,
               settings : ScopeSettings,
               store    : Arc<EventStore>,
               limits   : RunLimits,
               analysis : PulseAnalysisConfig)
    -> (Self, Receiver<EngineMessage>) {
    let control = Arc::new(Mutex::new(EngineControl::new()));
    let (sender, receiver) = unbounded::<EngineMessage>();
    let thread_control = Arc::clone(&control);
    let handle = thread::Builder::new()
      .name(String::from("acquisition"))
      .spawn(move || {
        let mut runner = RunLoop::new(driver, settings, store, limits,
                                      analysis, thread_control, sender);
        runner.run();
      })
      .expect("unable to spawn the acquisition thread");
    (Self {
      control,
      handle : Some(handle),
    }, receiver)
  }

  fn with_control<F>(&self, f : F)
    where F : FnOnce(&mut EngineControl) {
    match self.control.lock() {
      Ok(mut control) => f(&mut control),
      Err(err)        => error!("Engine control lock poisoned! {err}"),
    }
  }

  pub fn start(&self) {
    self.with_control(|c| c.desired = EngineState::Running);
  }

  pub fn pause(&self) {
    self.with_control(|c| c.desired = EngineState::Paused);
  }

  pub fn resume(&self) {
    self.start();
  }

  pub fn stop(&self) {
    self.with_control(|c| c.desired = EngineState::Stopped);
  }

  /// Stop, clear the store, start over with event id 0
  pub fn restart(&self) {
    self.with_control(|c| c.restart_requested = true);
  }

  /// The state the worker last reported
  pub fn state(&self) -> EngineState {
    match self.control.lock() {
      Ok(control) => control.state,
      Err(err)    => {
        error!("Engine control lock poisoned! {err}");
        EngineState::Stopped
      }
    }
  }
}

impl Drop for AcquisitionEngine {
  fn drop(&mut self) {
    self.with_control(|c| c.shutdown = true);
    if let Some(handle) = self.handle.take() {
      handle.join().ok();
    }
  }
}

/// What ended an iteration early
enum Interrupt {
  /// A control flag flipped mid-poll
  Cancelled,
  Driver(DriverError),
}

/// The worker-side run loop
struct RunLoop {
  driver           : Box<dyn DigitizerDriver>,
  settings         : ScopeSettings,
  store            : Arc<EventStore>,
  limits           : RunLimits,
  analysis         : PulseAnalysisConfig,
  control          : Arc<Mutex<EngineControl>>,
  sender           : Sender<EngineMessage>,
  batch_size       : u32,
  /// [channel][segment] capture buffers, bound to the device
  /// while armed
  buffers          : Vec<Vec<Vec<i16>>>,
  /// shared time axis for waveform frames
  time_axis        : Vec<f32>,
  armed            : bool,
  state            : EngineState,
  run_epoch        : Instant,
  paused_total     : Duration,
  pause_started    : Option<Instant>,
  events_this_run  : u64,
  last_frame       : Option<Instant>,
  warned_near_full : bool,
  rate_window      : VecDeque<(Instant, usize)>,
}

impl RunLoop {
  fn new(driver   : Box<dyn DigitizerDriver>,
         settings : ScopeSettings,
         store    : Arc<EventStore>,
         limits   : RunLimits,
         analysis : PulseAnalysisConfig,
         control  : Arc<Mutex<EngineControl>>,
         sender   : Sender<EngineMessage>) -> Self {
    let batch_size = driver.info().family.batch_size();
    let mut time_axis = Vec::<f32>::with_capacity(settings.total_samples);
    for k in 0..settings.total_samples {
      time_axis.push((k as f32 - settings.pre_trigger_samples as f32)
                     * settings.sample_interval_ns);
    }
    Self {
      driver,
      settings,
      store,
      limits,
      analysis,
      control,
      sender,
      batch_size,
      buffers          : Vec::new(),
      time_axis,
      armed            : false,
      state            : EngineState::Stopped,
      run_epoch        : Instant::now(),
      paused_total     : Duration::ZERO,
      pause_started    : None,
      events_this_run  : 0,
      last_frame       : None,
      warned_near_full : false,
      rate_window      : VecDeque::new(),
    }
  }

  fn send(&self, message : EngineMessage) {
    if self.sender.send(message).is_err() {
      trace!("No consumer on the engine message channel");
    }
  }

  fn set_state(&mut self, state : EngineState) {
    if state == self.state {
      return;
    }
    info!("Engine transition {} -> {}", self.state, state);
    self.state = state;
    match self.control.lock() {
      Ok(mut control) => control.state = state,
      Err(err)        => error!("Engine control lock poisoned! {err}"),
    }
    self.send(EngineMessage::StateChanged(state));
  }

  fn directives(&self) -> (EngineState, bool, bool) {
    match self.control.lock() {
      Ok(control) => (control.desired,
                      control.restart_requested,
                      control.shutdown),
      Err(err)    => {
        error!("Engine control lock poisoned! {err}");
        (EngineState::Stopped, false, true)
      }
    }
  }

  fn cancelled(&self) -> bool {
    let (desired, restart, shutdown) = self.directives();
    desired != EngineState::Running || restart || shutdown
  }

  /// Seconds of running time, paused intervals excluded
  fn run_elapsed(&self) -> f64 {
    let mut elapsed = self.run_epoch.elapsed();
    elapsed = elapsed.saturating_sub(self.paused_total);
    if let Some(since) = self.pause_started {
      elapsed = elapsed.saturating_sub(since.elapsed());
    }
    elapsed.as_secs_f64()
  }

  fn run(&mut self) {
    loop {
      let (desired, restart, shutdown) = self.directives();
      if shutdown {
        debug!("Shutdown flag seen, leaving the run loop");
        self.driver.stop().ok();
        self.driver.close().ok();
        self.set_state(EngineState::Stopped);
        break;
      }
      if restart {
        self.handle_restart();
        continue;
      }
      match desired {
        EngineState::Stopped => {
          if self.state != EngineState::Stopped {
            self.enter_stopped();
          }
          thread::sleep(IDLE_TICK);
        }
        EngineState::Paused => {
          if self.state == EngineState::Running {
            self.enter_paused();
          }
          thread::sleep(IDLE_TICK);
        }
        EngineState::Running => {
          if self.state != EngineState::Running {
            if let Err(err) = self.enter_running() {
              self.fail(err);
              continue;
            }
          }
          match self.iteration() {
            Ok(())                       => (),
            Err(Interrupt::Cancelled)    => (),
            Err(Interrupt::Driver(err))  => self.fail(err),
          }
        }
      }
    }
  }

  /// Restart = force Stopped, clear the store, go again from
  /// event id 0
  fn handle_restart(&mut self) {
    info!("Restart requested");
    self.enter_stopped();
    self.store.clear();
    match self.control.lock() {
      Ok(mut control) => {
        control.restart_requested = false;
        control.desired = EngineState::Running;
      }
      Err(err) => error!("Engine control lock poisoned! {err}"),
    }
  }

  fn enter_stopped(&mut self) {
    self.driver.stop().ok();
    self.armed = false;
    self.pause_started = None;
    self.set_state(EngineState::Stopped);
  }

  fn enter_paused(&mut self) {
    self.pause_started = Some(Instant::now());
    // the device stays programmed, resume re-enters the block
    // loop directly
    self.driver.stop().ok();
    self.set_state(EngineState::Paused);
  }

  fn enter_running(&mut self) -> Result<(), DriverError> {
    if self.state == EngineState::Paused {
      if let Some(since) = self.pause_started.take() {
        self.paused_total += since.elapsed();
      }
    } else {
      // fresh run
      self.run_epoch        = Instant::now();
      self.paused_total     = Duration::ZERO;
      self.pause_started    = None;
      self.events_this_run  = 0;
      self.warned_near_full = false;
      self.rate_window.clear();
    }
    if !self.armed {
      self.arm()?;
    }
    self.set_state(EngineState::Running);
    Ok(())
  }

  /// Program segments and captures and bind the capture
  /// buffers. One retry on a binding failure, then fatal.
  fn arm(&mut self) -> Result<(), DriverError> {
    debug!("Arming for {} captures of {} samples",
           self.batch_size, self.settings.total_samples);
    self.driver.allocate_segments(self.batch_size)?;
    self.driver.set_capture_count(self.batch_size)?;
    self.buffers = vec![vec![vec![0i16; self.settings.total_samples];
                             self.batch_size as usize];
                        N_CHANNELS];
    if let Err(err) = self.bind_all() {
      warn!("Buffer binding failed ({err}), retrying once");
      self.driver.allocate_segments(self.batch_size)?;
      self.driver.set_capture_count(self.batch_size)?;
      self.bind_all()?;
    }
    self.armed = true;
    Ok(())
  }

  fn bind_all(&mut self) -> Result<(), DriverError> {
    for ch in crate::events::ChannelId::ALL {
      for segment in 0..self.batch_size {
        let buffer = &mut self.buffers[ch.index()][segment as usize];
        let ptr = buffer.as_mut_ptr();
        let len = buffer.len();
        // the buffers live in self and are only replaced by the
        // next arm(), satisfying the bind contract
        unsafe {
          self.driver.bind_buffer(ch, segment, ptr, len)?;
        }
      }
    }
    Ok(())
  }

  /// One rapid-block batch
  fn iteration(&mut self) -> Result<(), Interrupt> {
    self.driver.run_block().map_err(Interrupt::Driver)?;

    // adaptive readiness poll, cancellation honored per tick
    let mut backoff = POLL_MIN;
    loop {
      if self.cancelled() {
        debug!("Cancelled mid-poll, draining the block");
        self.driver.stop().ok();
        return Err(Interrupt::Cancelled);
      }
      match self.driver.poll_ready().map_err(Interrupt::Driver)? {
        PollStatus::Ready    => break,
        PollStatus::NotReady => {
          thread::sleep(backoff);
          backoff = (backoff * 2).min(POLL_MAX);
        }
      }
    }

    // one retry on a failed transfer, then fatal for the run
    if let Err(err) = self.driver.bulk_download(0, self.batch_size - 1) {
      warn!("Bulk download failed ({err}), retrying once");
      self.driver.bulk_download(0, self.batch_size - 1)
                 .map_err(Interrupt::Driver)?;
    }

    let mut events = Vec::<Event>::with_capacity(self.batch_size as usize);
    for segment in 0..self.batch_size as usize {
      let mut traces : [Vec<f32>; N_CHANNELS]
        = std::array::from_fn(|_| Vec::new());
      for ch in 0..N_CHANNELS {
        traces[ch] = self.buffers[ch][segment]
                     .iter()
                     .map(|code| adc_to_mv(*code,
                                           self.settings.voltage_range_mv,
                                           self.settings.max_adc))
                     .collect();
      }
      if segment == 0 {
        self.maybe_emit_frame(&traces);
      }
      let pulses = analyze_capture(&traces,
                                   self.settings.pre_trigger_samples,
                                   self.settings.sample_interval_ns,
                                   &self.analysis);
      events.push(Event::new(self.run_elapsed(), pulses));
    }

    let append = self.store.add_batch(events);
    self.events_this_run += append.accepted as u64;
    let rate_hz = self.update_rate(append.accepted);
    self.send(EngineMessage::BatchComplete {
      count   : append.accepted,
      rate_hz,
    });

    let fill = self.store.fill_fraction();
    if append.filled {
      self.send(EngineMessage::StorageWarning {
        fill_fraction : fill,
        full          : true,
      });
    } else if fill >= STORAGE_WARN_FRACTION && !self.warned_near_full {
      self.warned_near_full = true;
      self.send(EngineMessage::StorageWarning {
        fill_fraction : fill,
        full          : false,
      });
    }
    if append.refused > 0 {
      // not an error: the store is kept, the user clears or
      // restarts
      warn!("Event store refused {} events, pausing", append.refused);
      self.request_pause();
      return Ok(());
    }

    self.check_auto_stop();
    Ok(())
  }

  fn maybe_emit_frame(&mut self, traces : &[Vec<f32>; N_CHANNELS]) {
    let due = match self.last_frame {
      None       => true,
      Some(last) => last.elapsed()
                    >= Duration::from_millis(WAVEFORM_EMIT_INTERVAL_MS),
    };
    if !due {
      return;
    }
    self.last_frame = Some(Instant::now());
    self.send(EngineMessage::WaveformReady(WaveformFrame {
      time_ns      : self.time_axis.clone(),
      traces       : traces.clone(),
      num_captures : self.batch_size as usize,
    }));
  }

  fn update_rate(&mut self, accepted : usize) -> f32 {
    let now = Instant::now();
    self.rate_window.push_back((now, accepted));
    while let Some(&(t, _)) = self.rate_window.front() {
      if now.duration_since(t).as_secs_f64() > RATE_WINDOW_S {
        self.rate_window.pop_front();
      } else {
        break;
      }
    }
    let total : usize = self.rate_window.iter().map(|(_, n)| n).sum();
    let span = match self.rate_window.front() {
      Some((t, _)) => now.duration_since(*t).as_secs_f64().max(1.0),
      None         => 1.0,
    };
    (total as f64 / span) as f32
  }

  fn request_pause(&mut self) {
    match self.control.lock() {
      Ok(mut control) => control.desired = EngineState::Paused,
      Err(err)        => error!("Engine control lock poisoned! {err}"),
    }
  }

  fn check_auto_stop(&mut self) {
    if let Some(limit) = self.limits.event_limit {
      if self.events_this_run >= limit {
        info!("Event limit of {} reached, pausing", limit);
        self.request_pause();
        return;
      }
    }
    if let Some(limit) = self.limits.time_limit_s {
      if self.run_elapsed() >= limit {
        info!("Time limit of {} s reached, pausing", limit);
        self.request_pause();
      }
    }
  }

  /// Driver trouble ends the run; the store is preserved
  fn fail(&mut self, err : DriverError) {
    error!("Acquisition failed! {err}");
    self.send(EngineMessage::AcquisitionError(err));
    match self.control.lock() {
      Ok(mut control) => control.desired = EngineState::Stopped,
      Err(lock_err)   => error!("Engine control lock poisoned! {lock_err}"),
    }
    self.enter_stopped();
  }
}
