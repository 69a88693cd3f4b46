//! The node's single cooperative loop.
//!
//! Every cycle measures, classifies, then gives each periodic activity (time
//! sync, ambient refresh, upload) a chance to run if its timer has elapsed.
//! All state lives in [`NodeState`], owned here and mutated only by the loop.

use crate::ambient::{AmbientReading, AmbientSource, AmbientUpdate};
use crate::clock::{TimeSource, Timestamp};
use crate::config::NodeConfig;
use crate::metrics::{
    AMBIENT_FAILURES_TOTAL, CYCLES_TOTAL, LAST_DISTANCE_CM, RANGING_TIMEOUTS_TOTAL,
    TIME_SYNC_FAILURES_TOTAL, UPLOADS_SKIPPED_TOTAL, UPLOADS_TOTAL, UPLOAD_FAILURES_TOTAL,
    UPLOAD_LATENCY_SECONDS,
};
use crate::link::Link;
use crate::occupancy::{classify_outcome, OccupancyStatus};
use crate::ranging::{RangeFinder, RangingOutcome};
use crate::telemetry::TelemetryRecord;
use crate::timer::IntervalTimer;
use crate::uploader::Uploader;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Latest ambient knowledge.
#[derive(Debug, Clone, PartialEq)]
pub enum AmbientState {
    /// Never read, or no ambient source configured.
    Unknown,
    Valid(AmbientReading),
    /// The local sensor's last read was untrustworthy.
    Invalid,
}

impl AmbientState {
    fn reading(&self) -> Option<&AmbientReading> {
        match self {
            AmbientState::Valid(reading) => Some(reading),
            _ => None,
        }
    }
}

impl fmt::Display for AmbientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmbientState::Unknown => f.write_str("-"),
            AmbientState::Invalid => f.write_str("invalid"),
            AmbientState::Valid(reading) => {
                match reading.temperature_c {
                    Some(t) => write!(f, "{:.2}°C", t)?,
                    None => f.write_str("?°C")?,
                }
                match reading.humidity_pct {
                    Some(h) => write!(f, " {:.2}%", h)?,
                    None => f.write_str(" ?%")?,
                }
                if let Some(description) = &reading.description {
                    write!(f, " {}", description)?;
                }
                Ok(())
            }
        }
    }
}

/// Everything the loop remembers between cycles.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub last_outcome: Option<RangingOutcome>,
    pub status: OccupancyStatus,
    pub ambient: AmbientState,
    pub upload_timer: IntervalTimer,
    pub ambient_timer: IntervalTimer,
    pub sync_timer: IntervalTimer,
    pub cycles: u64,
}

impl NodeState {
    pub fn new(upload_interval: Duration, ambient_interval: Duration, sync_interval: Duration) -> Self {
        Self {
            last_outcome: None,
            status: OccupancyStatus::Free,
            ambient: AmbientState::Unknown,
            upload_timer: IntervalTimer::new(upload_interval),
            ambient_timer: IntervalTimer::new(ambient_interval),
            sync_timer: IntervalTimer::new(sync_interval),
            cycles: 0,
        }
    }
}

/// What a periodic activity did during one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    NotDue,
    SkippedNoLink,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    NotDue,
    SkippedNoLink,
    SkippedInvalidAmbient,
    Sent(u16),
    Failed(String),
}

impl UploadOutcome {
    /// Whether an HTTP request was made.
    pub fn attempted(&self) -> bool {
        matches!(self, UploadOutcome::Sent(_) | UploadOutcome::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub outcome: RangingOutcome,
    pub status: OccupancyStatus,
    pub timestamp: Timestamp,
    pub sync: Activity,
    pub ambient: Activity,
    pub upload: UploadOutcome,
}

pub struct Scheduler<R, L> {
    ranger: R,
    link: L,
    ambient: AmbientSource,
    clock: TimeSource,
    uploader: Uploader,
    threshold_cm: f32,
    cycle_delay: Duration,
    state: NodeState,
}

impl<R, L> Scheduler<R, L>
where
    R: RangeFinder,
    L: Link,
{
    pub fn new(
        config: &NodeConfig,
        ranger: R,
        link: L,
        ambient: AmbientSource,
        clock: TimeSource,
        uploader: Uploader,
    ) -> Self {
        Self {
            ranger,
            link,
            ambient,
            clock,
            uploader,
            threshold_cm: config.occupancy_threshold_cm,
            cycle_delay: config.cycle_delay,
            state: NodeState::new(
                config.upload_interval,
                config.ambient_interval,
                config.sync_interval,
            ),
        }
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    /// Run cycles until the future is dropped.
    pub async fn run(&mut self) {
        info!(
            "Scheduler started, uploading to {} every {:?}",
            self.uploader.url(),
            self.state.upload_timer.interval()
        );
        loop {
            self.run_cycle().await;
            tokio::time::sleep(self.cycle_delay).await;
        }
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        self.state.cycles += 1;
        CYCLES_TOTAL.inc();

        let outcome = self.ranger.measure();
        let status = classify_outcome(&outcome, self.threshold_cm);
        match outcome {
            RangingOutcome::Distance(sample) => LAST_DISTANCE_CM.set(sample.distance_cm as f64),
            RangingOutcome::Timeout => {
                RANGING_TIMEOUTS_TOTAL.inc();
                LAST_DISTANCE_CM.set(-1.0);
            }
        }
        self.state.last_outcome = Some(outcome);
        self.state.status = status;

        let sync = self.sync_step().await;
        let ambient = self.ambient_step().await;
        let timestamp = self.clock.now();
        let upload = self.upload_step(timestamp, outcome, status).await;

        let distance = match outcome.distance_cm() {
            Some(d) => format!("{:.2} cm", d),
            None => "no echo".to_string(),
        };
        info!(
            "Distance: {} | Status: {} | Time: {} | Ambient: {}",
            distance, status, timestamp, self.state.ambient
        );

        CycleReport {
            outcome,
            status,
            timestamp,
            sync,
            ambient,
            upload,
        }
    }

    /// A sync skipped for lack of link leaves the timer alone, so it runs as
    /// soon as the link appears.
    async fn sync_step(&mut self) -> Activity {
        if !self.state.sync_timer.is_due(Instant::now()) {
            return Activity::NotDue;
        }
        if !self.link.is_connected() {
            debug!("Time sync skipped, not connected");
            return Activity::SkippedNoLink;
        }

        let activity = match self.clock.sync().await {
            Ok(()) => {
                debug!("Time synchronized");
                Activity::Done
            }
            Err(e) => {
                TIME_SYNC_FAILURES_TOTAL.inc();
                warn!("Time sync failed: {}", e);
                Activity::Failed
            }
        };
        self.state.sync_timer.mark(Instant::now());
        activity
    }

    /// A local sensor is also read in every upload slot, so one bad read
    /// withholds only the record of that slot.
    async fn ambient_step(&mut self) -> Activity {
        let now = Instant::now();
        let due = self.state.ambient_timer.is_due(now)
            || (self.ambient.is_local() && self.state.upload_timer.is_due(now));
        if !self.ambient.is_enabled() || !due {
            return Activity::NotDue;
        }
        if self.ambient.needs_link() && !self.link.is_connected() {
            debug!("Ambient refresh skipped, not connected");
            return Activity::SkippedNoLink;
        }

        let activity = match self.ambient.read().await {
            Ok(AmbientUpdate::Fresh(reading)) => {
                self.state.ambient = AmbientState::Valid(reading);
                Activity::Done
            }
            Ok(AmbientUpdate::Stale(reading)) => {
                AMBIENT_FAILURES_TOTAL.inc();
                self.state.ambient = AmbientState::Valid(reading);
                Activity::Failed
            }
            Err(e) => {
                AMBIENT_FAILURES_TOTAL.inc();
                warn!("Ambient read failed: {}", e);
                self.state.ambient = AmbientState::Invalid;
                Activity::Failed
            }
        };
        self.state.ambient_timer.mark(Instant::now());
        activity
    }

    async fn upload_step(
        &mut self,
        timestamp: Timestamp,
        outcome: RangingOutcome,
        status: OccupancyStatus,
    ) -> UploadOutcome {
        if !self.state.upload_timer.is_due(Instant::now()) {
            return UploadOutcome::NotDue;
        }

        let result = if !self.link.is_connected() {
            UPLOADS_SKIPPED_TOTAL.inc();
            info!("Upload skipped — not connected");
            UploadOutcome::SkippedNoLink
        } else if self.state.ambient == AmbientState::Invalid {
            UPLOADS_SKIPPED_TOTAL.inc();
            warn!("Upload skipped, ambient reading invalid");
            UploadOutcome::SkippedInvalidAmbient
        } else {
            let record = TelemetryRecord::new(
                timestamp,
                outcome.distance_cm(),
                status,
                self.state.ambient.reading(),
            );
            self.upload(&record).await
        };

        self.state.upload_timer.mark(Instant::now());
        result
    }

    async fn upload(&self, record: &TelemetryRecord) -> UploadOutcome {
        let payload = match record.encode() {
            Ok(payload) => payload,
            Err(e) => {
                UPLOAD_FAILURES_TOTAL.inc();
                error!("Failed to encode telemetry: {}", e);
                return UploadOutcome::Failed(e.to_string());
            }
        };
        debug!("Uploading {}", payload.as_str());

        let timer = UPLOAD_LATENCY_SECONDS.start_timer();
        let result = self.uploader.upload(&payload).await;
        timer.observe_duration();

        match result {
            Ok(code) => {
                UPLOADS_TOTAL.inc();
                info!("Record uploaded ({})", code);
                UploadOutcome::Sent(code.as_u16())
            }
            Err(e) => {
                UPLOAD_FAILURES_TOTAL.inc();
                if e.is_network() {
                    warn!("Upload failed, record discarded: {}", e);
                } else {
                    error!("Upload failed, record discarded: {}", e);
                }
                UploadOutcome::Failed(e.to_string())
            }
        }
    }
}
