//! Periodic capture trigger.
//!
//! Every tick tries to take the processing lock; a busy tick is dropped, never
//! queued. In `detect` mode a cheap presence check decides whether the full
//! recognition pipeline runs; in `continuous` mode every free tick runs it.

use crate::engine::{RecognitionPipeline, RecognitionReport};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Presence check first; recognize only when a face is there.
    Detect,
    /// Recognize on every tick.
    Continuous,
}

impl FromStr for ScheduleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detect" => Ok(ScheduleMode::Detect),
            "continuous" => Ok(ScheduleMode::Continuous),
            other => Err(format!("unknown schedule mode: {other}")),
        }
    }
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScheduleMode::Detect => "detect",
            ScheduleMode::Continuous => "continuous",
        })
    }
}

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// An attempt was already running.
    Busy,
    NoFace,
    /// Presence check failed or the tick task died; logged, lock released.
    Failed,
    /// A recognition attempt now owns the lock.
    Triggered(JoinHandle<RecognitionReport>),
}

/// One scheduler tick. Never blocks on a busy lock.
pub async fn run_tick(pipeline: &Arc<RecognitionPipeline>, mode: ScheduleMode) -> TickOutcome {
    let Some(guard) = pipeline.lock().try_acquire() else {
        tracing::debug!(stage = ?pipeline.lock().stage(), "attempt in progress; tick skipped");
        return TickOutcome::Busy;
    };

    if mode == ScheduleMode::Detect {
        match pipeline.face_present(&guard).await {
            Ok(true) => {}
            Ok(false) => return TickOutcome::NoFace,
            Err(err) => {
                tracing::warn!(error = %err, "presence check failed");
                return TickOutcome::Failed;
            }
        }
    }

    let runner = Arc::clone(pipeline);
    TickOutcome::Triggered(tokio::spawn(async move { runner.run(guard).await }))
}

/// [`run_tick`] in its own task, so a panicking collaborator costs one tick
/// and not the loop.
async fn spawn_tick(pipeline: &Arc<RecognitionPipeline>, mode: ScheduleMode) -> TickOutcome {
    let pipeline = Arc::clone(pipeline);
    match tokio::spawn(async move { run_tick(&pipeline, mode).await }).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(error = %err, "tick task failed");
            TickOutcome::Failed
        }
    }
}

struct Timer {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Start/stop wrapper around the tick loop.
pub struct CaptureScheduler {
    pipeline: Arc<RecognitionPipeline>,
    period: Duration,
    mode: ScheduleMode,
    timer: Mutex<Option<Timer>>,
}

impl CaptureScheduler {
    /// A zero `period` is replaced by [`DEFAULT_TICK_INTERVAL`].
    pub fn new(pipeline: Arc<RecognitionPipeline>, period: Duration, mode: ScheduleMode) -> Self {
        let period = if period.is_zero() {
            tracing::warn!(
                default_ms = DEFAULT_TICK_INTERVAL.as_millis() as u64,
                "zero tick interval; using default"
            );
            DEFAULT_TICK_INTERVAL
        } else {
            period
        };
        Self {
            pipeline,
            period,
            mode,
            timer: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    /// Arm a fresh timer. Returns false if one is already running.
    ///
    /// The first tick fires one period from now; ticks missed while stopped
    /// are not replayed.
    pub fn start(&self) -> bool {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.as_ref().is_some_and(|t| !t.task.is_finished()) {
            return false;
        }

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(tick_loop(
            Arc::clone(&self.pipeline),
            self.period,
            self.mode,
            stop_rx,
        ));
        *timer = Some(Timer { stop, task });

        tracing::info!(
            period_ms = self.period.as_millis() as u64,
            mode = %self.mode,
            "capture scheduler started"
        );
        true
    }

    /// Disarm the timer. An attempt already in flight runs to completion.
    /// Returns false if the scheduler was not running.
    pub fn stop(&self) -> bool {
        let Some(timer) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };

        // The loop may have exited already.
        let _ = timer.stop.send(());
        tracing::info!("capture scheduler stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.task.is_finished())
    }
}

async fn tick_loop(
    pipeline: Arc<RecognitionPipeline>,
    period: Duration,
    mode: ScheduleMode,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }

        match spawn_tick(&pipeline, mode).await {
            TickOutcome::Triggered(_) => tracing::debug!("recognition attempt started"),
            TickOutcome::NoFace => tracing::trace!("no face present"),
            TickOutcome::Busy | TickOutcome::Failed => {}
        }
    }

    tracing::debug!("tick loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Outcome;
    use crate::testing::{Describe, StubModel, StubSource};
    use facewatch_core::MatcherSlot;
    use std::sync::atomic::Ordering;
    use tokio::time::sleep;

    const PERIOD: Duration = Duration::from_millis(1500);

    fn pipeline_with(model: Arc<StubModel>, source: Arc<StubSource>) -> Arc<RecognitionPipeline> {
        Arc::new(RecognitionPipeline::new(
            source,
            model,
            Arc::new(MatcherSlot::new()),
        ))
    }

    fn slow_face_model() -> Arc<StubModel> {
        let mut model = StubModel::with_face(&[0.1, 0.2]);
        model.delay = Some(Duration::from_secs(5));
        Arc::new(model)
    }

    #[test]
    fn test_schedule_mode_parse() {
        assert_eq!("Detect".parse::<ScheduleMode>(), Ok(ScheduleMode::Detect));
        assert_eq!("continuous".parse::<ScheduleMode>(), Ok(ScheduleMode::Continuous));
        assert!("hourly".parse::<ScheduleMode>().is_err());
    }

    #[tokio::test]
    async fn test_tick_while_locked_does_nothing() {
        let model = Arc::new(StubModel::with_face(&[0.1, 0.2]));
        let source = Arc::new(StubSource::default());
        let pipeline = pipeline_with(model.clone(), source.clone());

        let guard = pipeline.lock().try_acquire().unwrap();
        guard.advance(crate::engine::Stage::Matching);

        assert!(matches!(run_tick(&pipeline, ScheduleMode::Detect).await, TickOutcome::Busy));
        assert_eq!(source.captures.load(Ordering::SeqCst), 0);
        assert_eq!(model.presence_calls(), 0);
        assert_eq!(pipeline.lock().stage(), crate::engine::Stage::Matching);
        assert!(pipeline.last_report().is_none());
    }

    #[tokio::test]
    async fn test_tick_without_face_releases_lock() {
        let model = Arc::new(StubModel::new(false, Describe::NoFace));
        let pipeline = pipeline_with(model.clone(), Arc::new(StubSource::default()));

        assert!(matches!(run_tick(&pipeline, ScheduleMode::Detect).await, TickOutcome::NoFace));
        assert!(!pipeline.lock().is_held());
        assert_eq!(model.describe_calls(), 0);
    }

    #[tokio::test]
    async fn test_tick_with_face_runs_pipeline() {
        let model = Arc::new(StubModel::with_face(&[0.1, 0.2]));
        let pipeline = pipeline_with(model.clone(), Arc::new(StubSource::default()));

        let TickOutcome::Triggered(task) = run_tick(&pipeline, ScheduleMode::Detect).await else {
            panic!("expected a recognition attempt");
        };
        let report = task.await.unwrap();

        assert!(matches!(report.outcome, Outcome::Unavailable));
        assert_eq!(model.presence_calls(), 1);
        assert_eq!(model.describe_calls(), 1);
        assert!(!pipeline.lock().is_held());
    }

    #[tokio::test]
    async fn test_presence_failure_releases_lock() {
        let mut model = StubModel::with_face(&[0.1, 0.2]);
        model.presence_fails = true;
        let pipeline = pipeline_with(Arc::new(model), Arc::new(StubSource::default()));

        assert!(matches!(run_tick(&pipeline, ScheduleMode::Detect).await, TickOutcome::Failed));
        assert!(!pipeline.lock().is_held());
    }

    #[tokio::test]
    async fn test_camera_failure_on_tick_releases_lock() {
        let source = Arc::new(StubSource {
            fail: true,
            ..Default::default()
        });
        let pipeline = pipeline_with(Arc::new(StubModel::with_face(&[0.1, 0.2])), source);

        assert!(matches!(run_tick(&pipeline, ScheduleMode::Detect).await, TickOutcome::Failed));
        assert!(!pipeline.lock().is_held());
    }

    #[tokio::test]
    async fn test_continuous_mode_skips_presence_check() {
        let model = Arc::new(StubModel::new(false, Describe::NoFace));
        let pipeline = pipeline_with(model.clone(), Arc::new(StubSource::default()));

        let TickOutcome::Triggered(task) = run_tick(&pipeline, ScheduleMode::Continuous).await
        else {
            panic!("continuous mode must always trigger");
        };
        assert!(matches!(task.await.unwrap().outcome, Outcome::NoFace));
        assert_eq!(model.presence_calls(), 0);
        assert_eq!(model.describe_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let model = Arc::new(StubModel::new(false, Describe::NoFace));
        let scheduler = CaptureScheduler::new(
            pipeline_with(model, Arc::new(StubSource::default())),
            PERIOD,
            ScheduleMode::Detect,
        );

        assert!(!scheduler.is_running());
        assert!(!scheduler.stop());
        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.is_running());
        assert!(scheduler.stop());
        assert!(!scheduler.stop());
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_period_and_stop() {
        let model = Arc::new(StubModel::new(false, Describe::NoFace));
        let scheduler = CaptureScheduler::new(
            pipeline_with(model.clone(), Arc::new(StubSource::default())),
            PERIOD,
            ScheduleMode::Detect,
        );

        scheduler.start();
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(model.presence_calls(), 0);
        sleep(Duration::from_millis(3600)).await; // t = 4.6 s
        assert_eq!(model.presence_calls(), 3);

        scheduler.stop();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(model.presence_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_does_not_replay_missed_ticks() {
        let model = Arc::new(StubModel::new(false, Describe::NoFace));
        let scheduler = CaptureScheduler::new(
            pipeline_with(model.clone(), Arc::new(StubSource::default())),
            PERIOD,
            ScheduleMode::Detect,
        );

        scheduler.start();
        sleep(Duration::from_millis(1600)).await;
        assert_eq!(model.presence_calls(), 1);
        scheduler.stop();

        sleep(Duration::from_secs(30)).await;
        assert!(scheduler.start());
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(model.presence_calls(), 1);
        sleep(Duration::from_millis(600)).await;
        assert_eq!(model.presence_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_ticks_are_dropped() {
        let model = slow_face_model();
        let source = Arc::new(StubSource::default());
        let pipeline = pipeline_with(model.clone(), source.clone());
        let scheduler = CaptureScheduler::new(pipeline.clone(), PERIOD, ScheduleMode::Detect);

        scheduler.start();
        // First tick at 1.5 s; the attempt holds the lock until 6.5 s.
        sleep(Duration::from_millis(6000)).await;
        assert!(pipeline.lock().is_held());
        assert_eq!(model.presence_calls(), 1);
        assert_eq!(source.captures.load(Ordering::SeqCst), 2);

        sleep(Duration::from_millis(1000)).await; // t = 7.0 s
        assert!(!pipeline.lock().is_held());
        assert!(pipeline.last_report().is_some());
        assert_eq!(model.presence_calls(), 1);

        sleep(Duration::from_millis(600)).await; // t = 7.6 s
        assert_eq!(model.presence_calls(), 2);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_attempt_finish() {
        let model = slow_face_model();
        let pipeline = pipeline_with(model.clone(), Arc::new(StubSource::default()));
        let scheduler = CaptureScheduler::new(pipeline.clone(), PERIOD, ScheduleMode::Detect);

        scheduler.start();
        sleep(Duration::from_millis(1600)).await;
        assert!(pipeline.lock().is_held());
        scheduler.stop();

        sleep(Duration::from_secs(10)).await;
        assert!(!pipeline.lock().is_held());
        assert!(pipeline.last_report().is_some());
        assert_eq!(model.describe_calls(), 1);
        assert_eq!(model.presence_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_panicking_presence_check() {
        let mut model = StubModel::new(false, Describe::NoFace);
        model.presence_panics_once = true;
        let model = Arc::new(model);
        let pipeline = pipeline_with(model.clone(), Arc::new(StubSource::default()));
        let scheduler = CaptureScheduler::new(pipeline.clone(), PERIOD, ScheduleMode::Detect);

        scheduler.start();
        sleep(Duration::from_millis(1600)).await;
        assert_eq!(model.presence_calls(), 1);
        assert!(!pipeline.lock().is_held());

        sleep(Duration::from_millis(8400)).await; // t = 10 s
        assert_eq!(model.presence_calls(), 6);
        assert!(scheduler.is_running());
        assert!(!pipeline.lock().is_held());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_falls_back_to_default() {
        let model = Arc::new(StubModel::new(false, Describe::NoFace));
        let scheduler = CaptureScheduler::new(
            pipeline_with(model.clone(), Arc::new(StubSource::default())),
            Duration::ZERO,
            ScheduleMode::Detect,
        );
        assert_eq!(scheduler.period(), DEFAULT_TICK_INTERVAL);

        assert!(scheduler.start());
        sleep(Duration::from_millis(1600)).await;
        assert!(scheduler.is_running());
        assert_eq!(model.presence_calls(), 1);
        scheduler.stop();
    }
}
