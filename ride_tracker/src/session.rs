//! The start/stop state machine of a single ride, free of any I/O.
//!
//! A session waits until the rider is moving, records accepted samples while
//! riding, and trims the slow tail off the route once stopped. Persistence and
//! event delivery are left to [`crate::engine`], which drives this type.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use ride_tracker_lib::{location_sample::LocationSample, trip_summary::{ProgressEvent, TripSummary}};

use crate::{config::TrackerConfig, error::{TrackerError, TrackerResult}};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripPhase {
    Idle,
    WaitingForMovement,
    Recording,
    Stopped,
}

/// The most recent speed readings, oldest evicted first.
#[derive(Debug, Clone)]
pub struct SpeedWindow {
    speeds: VecDeque<f64>,
    capacity: usize,
}

impl SpeedWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            speeds: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, speed: f64) {
        if self.speeds.len() == self.capacity {
            self.speeds.pop_front();
        }
        self.speeds.push_back(speed);
    }

    pub fn is_full(&self) -> bool {
        self.speeds.len() == self.capacity
    }

    /// Arithmetic mean, only once the window is full.
    pub fn mean(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        Some(self.speeds.iter().sum::<f64>() / self.capacity as f64)
    }

    pub fn clear(&mut self) {
        self.speeds.clear();
    }
}

/// What the caller has to do with a sample after [`TripSession::intake`].
#[derive(Debug, Clone, PartialEq)]
pub enum Intake {
    /// Accuracy too poor. Dropped.
    Rejected,
    /// The session is stopped. Dropped.
    Frozen,
    /// Still waiting for movement. Nothing to persist.
    Waiting(ProgressEvent),
    /// Movement detected. Every buffered sample must be recorded, in order.
    Started(Vec<LocationSample>),
    Record(LocationSample),
}

pub struct TripSession {
    config: TrackerConfig,
    phase: TripPhase,
    trip_id: i64,
    session_start: DateTime<Utc>,
    actual_start: Option<DateTime<Utc>>,
    speed_window: SpeedWindow,
    provisional: VecDeque<LocationSample>,
    accepted: Vec<LocationSample>,
    total_distance_m: f64,
    max_speed_mps: f64,
    last_accepted: Option<LocationSample>,
    summary: Option<TripSummary>,
}

impl TripSession {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            speed_window: SpeedWindow::new(config.speed_window),
            provisional: VecDeque::with_capacity(config.provisional_capacity),
            config,
            phase: TripPhase::Idle,
            trip_id: -1,
            session_start: DateTime::<Utc>::MIN_UTC,
            actual_start: None,
            accepted: Vec::new(),
            total_distance_m: 0.,
            max_speed_mps: 0.,
            last_accepted: None,
            summary: None,
        }
    }

    pub fn phase(&self) -> TripPhase {
        self.phase
    }

    pub fn trip_id(&self) -> i64 {
        self.trip_id
    }

    pub fn total_distance_m(&self) -> f64 {
        self.total_distance_m
    }

    pub fn max_speed_mps(&self) -> f64 {
        self.max_speed_mps
    }

    pub fn accepted(&self) -> &[LocationSample] {
        &self.accepted
    }

    pub fn actual_start(&self) -> Option<DateTime<Utc>> {
        self.actual_start
    }

    pub fn begin(&mut self, trip_id: i64, now: DateTime<Utc>) -> TrackerResult<()> {
        if self.phase != TripPhase::Idle {
            return Err(TrackerError::InvalidStateTransition { from: self.phase, action: "start" });
        }

        self.trip_id = trip_id;
        self.session_start = now;
        self.actual_start = None;
        self.speed_window.clear();
        self.provisional.clear();
        self.accepted.clear();
        self.total_distance_m = 0.;
        self.max_speed_mps = 0.;
        self.last_accepted = None;
        self.summary = None;
        self.phase = TripPhase::WaitingForMovement;

        tracing::info!("Trip {} waiting for movement", trip_id);
        Ok(())
    }

    /// Filters the sample and decides which samples, if any, are to be recorded.
    /// `now` becomes the actual start time if this sample starts the ride.
    pub fn intake(&mut self, sample: LocationSample, now: DateTime<Utc>) -> TrackerResult<Intake> {
        match self.phase {
            TripPhase::Idle => return Err(TrackerError::InvalidStateTransition { from: self.phase, action: "ingest" }),
            TripPhase::Stopped => {
                tracing::debug!("Trip {} is stopped, dropping sample", self.trip_id);
                return Ok(Intake::Frozen);
            },
            TripPhase::WaitingForMovement | TripPhase::Recording => {},
        }

        if sample.accuracy > self.config.max_accuracy_m {
            tracing::debug!("Inaccurate sample filtered out: {} m", sample.accuracy);
            return Ok(Intake::Rejected);
        }

        if self.phase == TripPhase::Recording {
            return Ok(Intake::Record(sample));
        }

        if self.provisional.len() >= self.config.provisional_capacity {
            self.provisional.pop_front();
        }
        self.provisional.push_back(sample);
        self.speed_window.push(sample.speed);

        match self.speed_window.mean() {
            Some(mean) if mean >= self.config.start_speed_mps => {
                self.phase = TripPhase::Recording;
                self.actual_start = Some(now);
                tracing::info!("Trip {} started moving at {} (mean speed {:.2} m/s)", self.trip_id, now, mean);
                Ok(Intake::Started(self.provisional.drain(..).collect()))
            },
            _ => Ok(Intake::Waiting(self.progress(sample, true))),
        }
    }

    /// Adds the sample's contribution to distance and peak speed. Runs before
    /// the sample is persisted and is not undone if persisting fails.
    pub fn accumulate(&mut self, sample: &LocationSample) {
        if let Some(last) = &self.last_accepted {
            let delta = last.distance_to(sample);
            if delta > self.config.noise_floor_m {
                self.total_distance_m += delta;
            }
        }

        if sample.speed > self.max_speed_mps {
            self.max_speed_mps = sample.speed;
        }
    }

    /// Appends a persisted sample and makes it the reference for the next delta.
    pub fn commit(&mut self, sample: LocationSample) -> ProgressEvent {
        self.accepted.push(sample);
        self.last_accepted = Some(sample);
        self.progress(sample, false)
    }

    /// [`Self::accumulate`] and [`Self::commit`] with nothing in between.
    pub fn record(&mut self, sample: LocationSample) -> ProgressEvent {
        self.accumulate(&sample);
        self.commit(sample)
    }

    fn progress(&self, latest_point: LocationSample, is_waiting: bool) -> ProgressEvent {
        ProgressEvent {
            latest_point,
            cumulative_distance_m: self.total_distance_m,
            max_speed_mps: self.max_speed_mps,
            accepted_point_count: self.accepted.len(),
            is_waiting,
        }
    }

    /// Freezes the session, trims the tail and produces the summary. Calling
    /// it again returns the same summary.
    pub fn finish(&mut self, now: DateTime<Utc>) -> TrackerResult<TripSummary> {
        match self.phase {
            TripPhase::Idle => return Err(TrackerError::InvalidStateTransition { from: self.phase, action: "stop" }),
            TripPhase::Stopped => {
                if let Some(summary) = &self.summary {
                    return Ok(summary.clone());
                }
            },
            TripPhase::WaitingForMovement | TripPhase::Recording => {},
        }

        self.phase = TripPhase::Stopped;
        self.provisional.clear();

        let trimmed = self.trim_end();
        if trimmed > 0 {
            tracing::debug!("Trimmed {} slow samples off the end of trip {}", trimmed, self.trip_id);
        }

        let summary = TripSummary {
            trip_id: self.trip_id,
            total_distance_m: self.total_distance_m,
            max_speed_mps: self.max_speed_mps,
            accepted_sample_count: self.accepted.len(),
            session_start: self.session_start,
            actual_start: self.actual_start.unwrap_or(self.session_start),
            actual_end: self.accepted.last().map(|sample| sample.timestamp).unwrap_or(now),
            route: self.accepted.clone(),
        };

        tracing::info!("Trip {} stopped: {:.1} m, max {:.2} m/s, {} points", self.trip_id, summary.total_distance_m, summary.max_speed_mps, summary.accepted_sample_count);

        self.summary = Some(summary.clone());
        Ok(summary)
    }

    /// Pops the trailing run of samples slower than the trim speed, taking the
    /// distance each popped sample added back off the total.
    /// Returns the number of samples removed.
    fn trim_end(&mut self) -> usize {
        let mut trimmed = 0;

        while let Some(last) = self.accepted.last() {
            if last.speed >= self.config.trim_speed_mps {
                break;
            }

            let Some(popped) = self.accepted.pop() else { break };
            if let Some(previous) = self.accepted.last() {
                let delta = previous.distance_to(&popped);
                if delta > self.config.noise_floor_m {
                    self.total_distance_m -= delta;
                }
            }
            trimmed += 1;
        }

        if trimmed > 0 {
            self.max_speed_mps = self.accepted.iter().map(|sample| sample.speed).fold(0., f64::max);
            self.last_accepted = self.accepted.last().copied();
        }

        trimmed
    }
}
