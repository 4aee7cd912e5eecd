use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Local;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::dedup_gate::{DedupGate, GateDecision};
use crate::frame_transformer::transform;
use crate::liveness::LivenessTracker;
use crate::meter_client::{FetchError, FrameSource};
use crate::publisher::{MessageBus, PublishError, SamplePublisher};
use crate::sml_decoder::{DecodeError, FrameDecoder};

/// How a cycle that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Sample published; watermark and liveness advanced
    Accepted { sample_time: i64, time_diff: i64 },
    /// Same meter time as the last published sample
    Duplicate,
    /// Frame had no `1.8.0` timestamp
    Undated,
}

/// Per-cycle failure. None of these stop the loop.
#[derive(thiserror::Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl CycleError {
    pub fn stage(&self) -> &'static str {
        match self {
            CycleError::Fetch(_) => "fetch",
            CycleError::Decode(_) => "decode",
            CycleError::Publish(_) => "publish",
        }
    }
}

/// Drives fetch → decode → transform → dedupe → publish on a fixed period.
pub struct PollLoop<S, D, B> {
    source: S,
    decoder: D,
    publisher: SamplePublisher<B>,
    gate: DedupGate,
    liveness: Arc<LivenessTracker>,
    poll_interval: Duration,
}

impl<S, D, B> PollLoop<S, D, B>
where
    S: FrameSource + 'static,
    D: FrameDecoder + 'static,
    B: MessageBus + 'static,
{
    pub fn new(
        source: S,
        decoder: D,
        publisher: SamplePublisher<B>,
        liveness: Arc<LivenessTracker>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            decoder,
            publisher,
            gate: DedupGate::new(),
            liveness,
            poll_interval,
        }
    }

    pub fn last_accepted_time(&self) -> Option<i64> {
        self.gate.last_accepted_time()
    }

    /// Runs one complete cycle. State only changes when the publish succeeds.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let body = self.source.fetch().await?;
        let registers = self.decoder.decode(&body)?;
        let sample = transform(&registers);

        let (sample_time, time_diff) = match self.gate.check(sample.sample_time) {
            GateDecision::Accept {
                sample_time,
                time_diff,
            } => (sample_time, time_diff),
            GateDecision::Duplicate => return Ok(CycleOutcome::Duplicate),
            GateDecision::Undated => return Ok(CycleOutcome::Undated),
        };

        let system_time = iso_timestamp();
        self.publisher
            .publish(&sample, time_diff, &system_time)
            .await?;

        self.gate.commit(sample_time);
        self.liveness.record_success(SystemTime::now());

        info!(
            sample_time,
            time_diff,
            total_consumption = ?sample.total_consumption,
            registers = sample.readings.len(),
            "data sent to MQTT"
        );
        Ok(CycleOutcome::Accepted {
            sample_time,
            time_diff,
        })
    }

    /// Loops forever. A slow cycle pushes the next tick back instead of
    /// overlapping with it.
    pub async fn run(&mut self) {
        info!(interval = ?self.poll_interval, "starting poll loop");
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.run_cycle().await {
                Ok(CycleOutcome::Accepted { .. }) => {}
                Ok(CycleOutcome::Duplicate) => {
                    debug!(
                        sample_time = ?self.gate.last_accepted_time(),
                        "meter time unchanged, nothing to publish"
                    );
                }
                Ok(CycleOutcome::Undated) => {
                    warn!("frame has no 1.8.0 timestamp, not publishing");
                }
                Err(e) => {
                    warn!(stage = e.stage(), error = %e, "poll cycle failed");
                }
            }
        }
    }

    /// Spawns the loop on its own task
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }
}

/// Local wall-clock time, ISO-8601 with microseconds and no offset.
fn iso_timestamp() -> String {
    Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}
