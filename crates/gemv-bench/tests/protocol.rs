//! End-to-end protocol tests through the public API, with a recording
//! dispatcher and a scripted clock standing in for the GPU.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use gemv_bench::{
    BenchError, CancelToken, Clock, Dispatcher, Pass, ProblemSize, RunMetrics, TimingStrategy,
    measure, reported_timing,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Submit(Pass, u32),
    Drain,
    Now,
}

type Log = Rc<RefCell<Vec<Event>>>;

/// Returns scripted times in order, then repeats the last one.
struct ScriptedClock {
    log: Log,
    times: RefCell<Vec<Duration>>,
}

impl ScriptedClock {
    fn new(log: Log, times_ms: &[u64]) -> Self {
        let mut times: Vec<Duration> = times_ms.iter().map(|&ms| Duration::from_millis(ms)).collect();
        times.reverse();
        Self { log, times: RefCell::new(times) }
    }
}

impl Clock for ScriptedClock {
    fn now(&self) -> Duration {
        self.log.borrow_mut().push(Event::Now);
        let mut times = self.times.borrow_mut();
        if times.len() > 1 { times.pop().unwrap() } else { times[0] }
    }
}

struct Recorder {
    log: Log,
    lose_device_at: Option<usize>,
    broken_timestamps: bool,
    submitted: usize,
}

impl Recorder {
    fn new(log: Log) -> Self {
        Self { log, lose_device_at: None, broken_timestamps: false, submitted: 0 }
    }
}

impl Dispatcher for Recorder {
    fn submit(&mut self, pass: Pass, workgroups: u32) -> gemv_bench::Result<()> {
        if self.lose_device_at == Some(self.submitted) {
            return Err(BenchError::DeviceLost("Unknown: mock context lost".into()));
        }
        self.submitted += 1;
        self.log.borrow_mut().push(Event::Submit(pass, workgroups));
        Ok(())
    }

    fn drain(&mut self) -> gemv_bench::Result<()> {
        self.log.borrow_mut().push(Event::Drain);
        Ok(())
    }

    fn gpu_elapsed(&mut self) -> gemv_bench::Result<Option<Duration>> {
        if self.broken_timestamps {
            return Err(BenchError::MeasurementResolution(
                "unusable GPU timestamps: begin 900, end 100, period 1 ns".into(),
            ));
        }
        Ok(None)
    }
}

#[test]
fn reference_run_produces_expected_metrics() {
    let log: Log = Rc::default();
    let clock = ScriptedClock::new(log.clone(), &[1_000, 1_250]);
    let mut recorder = Recorder::new(log.clone());
    let problem = ProblemSize::new(4096).unwrap();

    let (measurement, metrics) =
        measure(clock, &mut recorder, problem, 100, &CancelToken::new()).unwrap();

    assert_eq!(measurement.elapsed_ms(), 250.0);
    assert_eq!(metrics.average_latency_ms(), 2.5);
    assert_eq!(metrics, RunMetrics::compute(250.0, 100, problem).unwrap());

    // every dispatch covers the full problem: one workgroup per row
    let log = log.borrow();
    assert!(log.iter().all(|e| match e {
        Event::Submit(_, wg) => *wg == 4096,
        _ => true,
    }));
}

#[test]
fn warmup_is_excluded_from_measured_span() {
    let log: Log = Rc::default();
    let clock = ScriptedClock::new(log.clone(), &[5, 15]);
    let mut recorder = Recorder::new(log.clone());
    let problem = ProblemSize::new(64).unwrap();

    measure(clock, &mut recorder, problem, 4, &CancelToken::new()).unwrap();

    let log = log.borrow();
    let first_now = log.iter().position(|e| *e == Event::Now).unwrap();
    assert_eq!(&log[..first_now], &[Event::Submit(Pass::Warmup, 64), Event::Drain]);
    assert!(
        log[first_now..].iter().all(|e| !matches!(e, Event::Submit(Pass::Warmup, _))),
        "warm-up submitted inside the measured span"
    );
    assert_eq!(log.last(), Some(&Event::Now));
    assert_eq!(log[log.len() - 2], Event::Drain);
}

#[test]
fn frozen_clock_is_a_resolution_error() {
    let log: Log = Rc::default();
    let clock = ScriptedClock::new(log.clone(), &[42]);
    let mut recorder = Recorder::new(log);
    let problem = ProblemSize::new(64).unwrap();

    let err = measure(clock, &mut recorder, problem, 10, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, BenchError::MeasurementResolution(_)), "{err}");
}

#[test]
fn lost_device_yields_no_metrics() {
    let log: Log = Rc::default();
    let clock = ScriptedClock::new(log.clone(), &[0, 100]);
    let mut recorder = Recorder::new(log);
    recorder.lose_device_at = Some(5);
    let problem = ProblemSize::new(64).unwrap();

    let err = measure(clock, &mut recorder, problem, 10, &CancelToken::new()).unwrap_err();
    match err {
        BenchError::DeviceLost(msg) => assert!(msg.contains("context lost")),
        other => panic!("expected DeviceLost, got {other:?}"),
    }
}

#[test]
fn pre_cancelled_run_touches_nothing() {
    let log: Log = Rc::default();
    let clock = ScriptedClock::new(log.clone(), &[0, 100]);
    let mut recorder = Recorder::new(log.clone());
    let token = CancelToken::new();
    token.cancel();

    let err = measure(clock, &mut recorder, ProblemSize::new(64).unwrap(), 10, &token).unwrap_err();
    assert!(matches!(err, BenchError::Cancelled { completed: 0 }));
    assert!(log.borrow().is_empty());
}

#[test]
fn unusable_gpu_timestamps_fall_back_to_host_metrics() {
    let log: Log = Rc::default();
    let clock = ScriptedClock::new(log.clone(), &[1_000, 1_250]);
    let mut recorder = Recorder::new(log);
    recorder.broken_timestamps = true;
    let problem = ProblemSize::new(4096).unwrap();

    let (measurement, metrics) =
        measure(clock, &mut recorder, problem, 100, &CancelToken::new()).unwrap();

    assert_eq!(measurement.gpu_elapsed, None);
    assert_eq!(metrics.average_latency_ms(), 2.5);
    assert!((metrics.throughput_tflops() - 0.013_421_772_8).abs() < 1e-12);
    assert_eq!(
        reported_timing(TimingStrategy::HostClockWithGpuTimestamps, &measurement),
        TimingStrategy::HostClock
    );
}
