//! Execution driver: one warm-up pass, then `iterations` measured passes
//! fired back-to-back, bracketed by full queue drains.
//!
//! ```text
//! Idle -> WarmingUp -> Measuring -> Draining -> Done
//! ```
//!
//! The start timestamp is taken only after the warm-up pass has retired, and
//! the end timestamp only after every measured pass has retired. Measured
//! submissions are never individually awaited: the span covers sustained
//! submission plus execution throughput, not per-call round trips.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::error::{BenchError, Result};

/// Driver states, in the only order they are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    WarmingUp,
    Measuring,
    Draining,
    Done,
}

/// One kernel dispatch as seen by a [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Warmup,
    Measured { index: u32, total: u32 },
}

/// The queue side of the protocol.
pub trait Dispatcher {
    /// Record and submit one dispatch of `workgroups` workgroups. Must not wait
    /// for the submission to complete.
    fn submit(&mut self, pass: Pass, workgroups: u32) -> Result<()>;

    /// Block until every submitted dispatch has retired.
    fn drain(&mut self) -> Result<()>;

    /// GPU-measured span of the measured passes, when the dispatcher captures one.
    fn gpu_elapsed(&mut self) -> Result<Option<Duration>> {
        Ok(None)
    }
}

/// Monotonic host time source.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// [`Clock`] backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Cooperative cancellation flag, honored only at state boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raw timings of one completed run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Host wall-clock span from after the warm-up drain to after the final drain.
    pub elapsed: Duration,
    pub iterations: u32,
    pub gpu_elapsed: Option<Duration>,
}

impl Measurement {
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1e3
    }

    pub fn gpu_elapsed_ms(&self) -> Option<f64> {
        self.gpu_elapsed.map(|d| d.as_secs_f64() * 1e3)
    }
}

/// Runs the warm-up/measure protocol against a [`Dispatcher`].
#[derive(Debug)]
pub struct ExecutionDriver<C = MonotonicClock> {
    clock: C,
    state: DriverState,
}

impl<C: Clock> ExecutionDriver<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, state: DriverState::Idle }
    }

    /// Current state. A failed run stays in the state it failed in.
    pub fn state(&self) -> DriverState {
        self.state
    }

    fn enter(&mut self, next: DriverState) {
        debug!(from = ?self.state, to = ?next, "driver state transition");
        self.state = next;
    }

    /// Drive one full run.
    ///
    /// Any submit or drain failure aborts the run with no partial result. A
    /// cancellation observed after work was submitted still drains the queue
    /// before returning [`BenchError::Cancelled`]. The GPU span is optional:
    /// if it cannot be read the measurement carries `None`, unless the device
    /// was lost.
    pub fn run<D: Dispatcher>(
        &mut self,
        dispatcher: &mut D,
        iterations: u32,
        workgroups: u32,
        cancel: &CancelToken,
    ) -> Result<Measurement> {
        if iterations == 0 {
            return Err(BenchError::MeasurementResolution(
                "iterations must be greater than zero".into(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(BenchError::Cancelled { completed: 0 });
        }

        self.enter(DriverState::WarmingUp);
        dispatcher.submit(Pass::Warmup, workgroups)?;
        dispatcher.drain()?;

        if cancel.is_cancelled() {
            return Err(BenchError::Cancelled { completed: 0 });
        }

        self.enter(DriverState::Measuring);
        let start = self.clock.now();
        for index in 0..iterations {
            if index > 0 && cancel.is_cancelled() {
                dispatcher.drain()?;
                info!(completed = index, "run cancelled, queue drained");
                return Err(BenchError::Cancelled { completed: index });
            }
            dispatcher.submit(Pass::Measured { index, total: iterations }, workgroups)?;
            trace!(index, "submitted measured pass");
        }

        self.enter(DriverState::Draining);
        dispatcher.drain()?;
        let end = self.clock.now();

        self.enter(DriverState::Done);
        let gpu_elapsed = match dispatcher.gpu_elapsed() {
            Ok(span) => span,
            Err(e @ BenchError::DeviceLost(_)) => return Err(e),
            Err(e) => {
                warn!(error = %e, "discarding GPU timestamp span, reporting host clock only");
                None
            }
        };
        let measurement =
            Measurement { elapsed: end.saturating_sub(start), iterations, gpu_elapsed };
        debug!(elapsed_ms = measurement.elapsed_ms(), iterations, "measurement complete");
        Ok(measurement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Submit(Pass),
        Drain,
        Now(u64),
        GpuElapsed,
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    /// Clock that advances 10 ms per read and logs each read.
    struct StepClock {
        log: Log,
        ms: Cell<u64>,
    }

    impl Clock for StepClock {
        fn now(&self) -> Duration {
            let ms = self.ms.get() + 10;
            self.ms.set(ms);
            self.log.borrow_mut().push(Event::Now(ms));
            Duration::from_millis(ms)
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        log: Log,
        fail_on_submit: Option<usize>,
        cancel_after_submits: Option<(usize, CancelToken)>,
        gpu: Option<Duration>,
        gpu_error: Option<fn() -> BenchError>,
        submits: usize,
    }

    impl Dispatcher for RecordingDispatcher {
        fn submit(&mut self, pass: Pass, _workgroups: u32) -> Result<()> {
            if self.fail_on_submit == Some(self.submits) {
                return Err(BenchError::DeviceLost("mock device lost".into()));
            }
            self.submits += 1;
            self.log.borrow_mut().push(Event::Submit(pass));
            if let Some((after, token)) = &self.cancel_after_submits {
                if self.submits == *after {
                    token.cancel();
                }
            }
            Ok(())
        }

        fn drain(&mut self) -> Result<()> {
            self.log.borrow_mut().push(Event::Drain);
            Ok(())
        }

        fn gpu_elapsed(&mut self) -> Result<Option<Duration>> {
            self.log.borrow_mut().push(Event::GpuElapsed);
            match self.gpu_error {
                Some(make) => Err(make()),
                None => Ok(self.gpu),
            }
        }
    }

    fn setup() -> (ExecutionDriver<StepClock>, RecordingDispatcher, Log) {
        let log: Log = Rc::default();
        let driver = ExecutionDriver::new(StepClock { log: log.clone(), ms: Cell::new(0) });
        let dispatcher = RecordingDispatcher { log: log.clone(), ..Default::default() };
        (driver, dispatcher, log)
    }

    fn measured(index: u32, total: u32) -> Event {
        Event::Submit(Pass::Measured { index, total })
    }

    #[test]
    fn full_run_event_order() {
        let (mut driver, mut dispatcher, log) = setup();
        let m = driver.run(&mut dispatcher, 3, 64, &CancelToken::new()).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                Event::Submit(Pass::Warmup),
                Event::Drain,
                Event::Now(10),
                measured(0, 3),
                measured(1, 3),
                measured(2, 3),
                Event::Drain,
                Event::Now(20),
                Event::GpuElapsed,
            ]
        );
        assert_eq!(m.elapsed, Duration::from_millis(10));
        assert_eq!(m.iterations, 3);
        assert_eq!(m.gpu_elapsed, None);
        assert_eq!(driver.state(), DriverState::Done);
    }

    #[test]
    fn zero_iterations_is_rejected_before_any_work() {
        let (mut driver, mut dispatcher, log) = setup();
        let err = driver.run(&mut dispatcher, 0, 64, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, BenchError::MeasurementResolution(_)));
        assert!(log.borrow().is_empty());
        assert_eq!(driver.state(), DriverState::Idle);
    }

    #[test]
    fn device_lost_mid_run_returns_no_measurement() {
        let (mut driver, mut dispatcher, log) = setup();
        // warm-up plus two measured passes succeed, the third fails
        dispatcher.fail_on_submit = Some(3);
        let err = driver.run(&mut dispatcher, 10, 64, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, BenchError::DeviceLost(_)));
        assert_eq!(driver.state(), DriverState::Measuring);
        // the clock was never read a second time
        let reads = log.borrow().iter().filter(|e| matches!(e, Event::Now(_))).count();
        assert_eq!(reads, 1);
    }

    #[test]
    fn cancel_before_start_submits_nothing() {
        let (mut driver, mut dispatcher, log) = setup();
        let token = CancelToken::new();
        token.cancel();
        let err = driver.run(&mut dispatcher, 5, 64, &token).unwrap_err();
        assert!(matches!(err, BenchError::Cancelled { completed: 0 }));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn cancel_during_warmup_stops_after_its_drain() {
        let (mut driver, mut dispatcher, log) = setup();
        let token = CancelToken::new();
        dispatcher.cancel_after_submits = Some((1, token.clone()));
        let err = driver.run(&mut dispatcher, 5, 64, &token).unwrap_err();
        assert!(matches!(err, BenchError::Cancelled { completed: 0 }));
        assert_eq!(*log.borrow(), vec![Event::Submit(Pass::Warmup), Event::Drain]);
    }

    #[test]
    fn cancel_mid_measurement_drains_before_returning() {
        let (mut driver, mut dispatcher, log) = setup();
        let token = CancelToken::new();
        // warm-up + 2 measured
        dispatcher.cancel_after_submits = Some((3, token.clone()));
        let err = driver.run(&mut dispatcher, 10, 64, &token).unwrap_err();
        assert!(matches!(err, BenchError::Cancelled { completed: 2 }));
        let log = log.borrow();
        assert_eq!(log.last(), Some(&Event::Drain));
        assert_eq!(log.iter().filter(|e| matches!(e, Event::Submit(_))).count(), 3);
    }

    #[test]
    fn gpu_span_is_passed_through() {
        let (mut driver, mut dispatcher, _log) = setup();
        dispatcher.gpu = Some(Duration::from_micros(1500));
        let m = driver.run(&mut dispatcher, 2, 8, &CancelToken::new()).unwrap();
        assert_eq!(m.gpu_elapsed_ms(), Some(1.5));
    }

    #[test]
    fn unreadable_gpu_span_keeps_host_measurement() {
        let (mut driver, mut dispatcher, _log) = setup();
        dispatcher.gpu_error =
            Some(|| BenchError::MeasurementResolution("unusable GPU timestamps".into()));
        let m = driver.run(&mut dispatcher, 4, 8, &CancelToken::new()).unwrap();
        assert_eq!(m.elapsed, Duration::from_millis(10));
        assert_eq!(m.gpu_elapsed, None);
        assert_eq!(driver.state(), DriverState::Done);
    }

    #[test]
    fn gpu_span_map_failure_is_not_fatal() {
        let (mut driver, mut dispatcher, _log) = setup();
        dispatcher.gpu_error = Some(|| BenchError::BufferMap("validation error".into()));
        let m = driver.run(&mut dispatcher, 2, 8, &CancelToken::new()).unwrap();
        assert_eq!(m.gpu_elapsed, None);
    }

    #[test]
    fn device_lost_while_reading_gpu_span_fails_the_run() {
        let (mut driver, mut dispatcher, _log) = setup();
        dispatcher.gpu_error = Some(|| BenchError::DeviceLost("Unknown: lost".into()));
        let err = driver.run(&mut dispatcher, 2, 8, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, BenchError::DeviceLost(_)));
    }

    #[test]
    fn measurement_ms_conversion() {
        let m = Measurement {
            elapsed: Duration::from_millis(250),
            iterations: 100,
            gpu_elapsed: None,
        };
        assert_eq!(m.elapsed_ms(), 250.0);
        assert_eq!(m.gpu_elapsed_ms(), None);
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    proptest! {
        #[test]
        fn start_follows_warmup_drain_and_end_follows_final_drain(iterations in 1u32..200) {
            let (mut driver, mut dispatcher, log) = setup();
            driver.run(&mut dispatcher, iterations, 16, &CancelToken::new()).unwrap();
            let log = log.borrow();

            let submits = log.iter().filter(|e| matches!(e, Event::Submit(_))).count();
            prop_assert_eq!(submits, iterations as usize + 1);

            // exactly two drains: after warm-up and after the last measured pass
            let drains: Vec<usize> = log
                .iter()
                .enumerate()
                .filter(|(_, e)| **e == Event::Drain)
                .map(|(i, _)| i)
                .collect();
            prop_assert_eq!(drains.len(), 2);

            let reads: Vec<usize> = log
                .iter()
                .enumerate()
                .filter(|(_, e)| matches!(e, Event::Now(_)))
                .map(|(i, _)| i)
                .collect();
            prop_assert_eq!(reads.len(), 2);
            prop_assert_eq!(reads[0], drains[0] + 1);
            prop_assert_eq!(reads[1], drains[1] + 1);
            prop_assert_eq!(log[0], Event::Submit(Pass::Warmup));
            prop_assert_eq!(log[drains[1] - 1], measured(iterations - 1, iterations));
        }
    }
}
