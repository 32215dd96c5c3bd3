use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use ride_tracker_data_management::TripStore;
use ride_tracker_lib::{location_sample::LocationSample, trip_summary::{ProgressEvent, TripSummary}};
use tokio::{sync::{broadcast, watch}, task::JoinHandle};

use crate::{config::{ClockMode, TrackerConfig}, error::{TrackerError, TrackerResult}, sample_source::SampleSource, session::{Intake, TripPhase, TripSession}};

const EVENT_CAPACITY: usize = 100;

/// Hands out ride sessions, at most one live at a time.
pub struct Tracker<S: TripStore> {
    store: Arc<S>,
    config: TrackerConfig,
    active: Mutex<Weak<SessionInner<S>>>,
}

struct SessionInner<S: TripStore> {
    trip_id: i64,
    store: Arc<S>,
    clock: ClockMode,
    // Held for the whole of an ingestion, persistence included
    state: tokio::sync::Mutex<SessionState>,
    phase: watch::Sender<TripPhase>,
    events: broadcast::Sender<ProgressEvent>,
}

struct SessionState {
    session: TripSession,
    finalized: bool,
    last_arrival: Option<DateTime<Utc>>,
}

/// A live ride. Clones share the same session.
pub struct SessionHandle<S: TripStore> {
    inner: Arc<SessionInner<S>>,
}

impl<S: TripStore> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: TripStore + 'static> Tracker<S> {
    pub fn new(store: Arc<S>, config: TrackerConfig) -> Self {
        Self {
            store,
            config,
            active: Mutex::new(Weak::new()),
        }
    }

    /// Phase of the live session, `Idle` if there is none.
    pub fn phase(&self) -> TripPhase {
        let active = self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match active.upgrade() {
            Some(inner) => match *inner.phase.borrow() {
                TripPhase::Stopped => TripPhase::Idle,
                phase => phase,
            },
            None => TripPhase::Idle,
        }
    }

    pub fn start(&self, trip_id: i64) -> TrackerResult<SessionHandle<S>> {
        self.start_at(trip_id, self.config.clock.now(None))
    }

    /// Starts a session for an already created trip.
    pub fn start_at(&self, trip_id: i64, session_start: DateTime<Utc>) -> TrackerResult<SessionHandle<S>> {
        let mut active = self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(current) = active.upgrade() {
            let phase = *current.phase.borrow();
            if phase != TripPhase::Stopped {
                tracing::warn!("Refusing to start trip {} while trip {} is {:?}", trip_id, current.trip_id, phase);
                return Err(TrackerError::InvalidStateTransition { from: phase, action: "start" });
            }
        }

        let mut session = TripSession::new(self.config.clone());
        session.begin(trip_id, session_start)?;

        let (phase, _) = watch::channel(session.phase());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(SessionInner {
            trip_id,
            store: self.store.clone(),
            clock: self.config.clock,
            state: tokio::sync::Mutex::new(SessionState {
                session,
                finalized: false,
                last_arrival: None,
            }),
            phase,
            events,
        });

        *active = Arc::downgrade(&inner);
        Ok(SessionHandle { inner })
    }

    /// Creates the trip in the store, then starts a session for it.
    pub async fn start_new_trip(&self) -> TrackerResult<SessionHandle<S>> {
        let phase = self.phase();
        if phase != TripPhase::Idle {
            return Err(TrackerError::InvalidStateTransition { from: phase, action: "start" });
        }

        let session_start = self.config.clock.now(None);
        let trip_id = self.store.create_trip(session_start).await?;

        match self.start_at(trip_id, session_start) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                // Another session got started while the trip was being created
                if let Err(delete_err) = self.store.delete_trip(trip_id).await {
                    tracing::error!("Failed to delete orphaned trip {}: {}", trip_id, delete_err);
                }
                Err(err)
            },
        }
    }

    /// Starts the source, then the session, and pumps samples into the session
    /// on a separate task until the source runs dry or the session is stopped.
    pub async fn start_with_source<Src: SampleSource + 'static>(&self, trip_id: i64, mut source: Src) -> TrackerResult<(SessionHandle<S>, JoinHandle<TrackerResult<usize>>)> {
        source.start().await?;

        let handle = match self.start(trip_id) {
            Ok(handle) => handle,
            Err(err) => {
                source.stop().await;
                return Err(err);
            },
        };

        let pump = handle.clone();
        let task = tokio::spawn(async move { pump.run(source).await });

        Ok((handle, task))
    }
}

impl<S: TripStore + 'static> SessionHandle<S> {
    pub fn trip_id(&self) -> i64 {
        self.inner.trip_id
    }

    pub fn phase(&self) -> TripPhase {
        *self.inner.phase.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.events.subscribe()
    }

    /// Processes one sample. Calls are serialized: a sample is only looked at
    /// once the previous one has been persisted or has failed to.
    pub async fn ingest(&self, sample: LocationSample) -> TrackerResult<Option<ProgressEvent>> {
        let mut state = self.inner.state.lock().await;
        let now = self.inner.clock.now(Some(&sample));

        let to_record = match state.session.intake(sample, now)? {
            Intake::Rejected | Intake::Frozen => return Ok(None),
            Intake::Waiting(event) => {
                state.last_arrival = Some(now);
                self.publish(&event);
                return Ok(Some(event));
            },
            Intake::Started(replay) => {
                self.inner.phase.send_replace(TripPhase::Recording);
                replay
            },
            Intake::Record(sample) => vec![sample],
        };
        state.last_arrival = Some(now);

        let mut last_event = None;
        let mut failure = None;

        for sample in to_record {
            state.session.accumulate(&sample);

            match self.inner.store.append_sample(self.inner.trip_id, &sample).await {
                Ok(()) => {
                    let event = state.session.commit(sample);
                    self.publish(&event);
                    last_event = Some(event);
                },
                Err(err) => {
                    tracing::error!("Failed to persist sample for trip {}: {}", self.inner.trip_id, err);
                    failure.get_or_insert(err);
                },
            }
        }

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(last_event),
        }
    }

    /// Stops the session and finalizes the trip. Waits for an in-flight
    /// ingestion first. Repeated calls return the same summary, and retry the
    /// finalize if it failed before.
    pub async fn stop(&self) -> TrackerResult<TripSummary> {
        let mut state = self.inner.state.lock().await;

        let now = match self.inner.clock {
            ClockMode::Sample => state.last_arrival.unwrap_or_else(Utc::now),
            ClockMode::Wall => Utc::now(),
        };
        let summary = state.session.finish(now)?;
        self.inner.phase.send_replace(TripPhase::Stopped);

        if !state.finalized {
            self.inner.store.finalize_trip(self.inner.trip_id, &summary).await?;
            state.finalized = true;
        }

        Ok(summary)
    }

    /// Feeds the source into the session until it runs dry or the session
    /// stops. Returns the number of samples taken from the source.
    pub async fn run<Src: SampleSource>(&self, mut source: Src) -> TrackerResult<usize> {
        let result = self.pump(&mut source).await;
        source.stop().await;

        if let Err(err) = &result {
            tracing::error!("Session for trip {} aborted: {}", self.inner.trip_id, err);
        }
        result
    }

    async fn pump<Src: SampleSource>(&self, source: &mut Src) -> TrackerResult<usize> {
        let mut phase = self.inner.phase.subscribe();
        let mut delivered = 0;

        loop {
            tokio::select! {
                _ = wait_until_stopped(&mut phase) => break,
                sample = source.next_sample() => {
                    let Some(sample) = sample else {
                        tracing::info!("Location source for trip {} ended", self.inner.trip_id);
                        break;
                    };
                    delivered += 1;
                    self.ingest(sample).await?;
                },
            }
        }

        Ok(delivered)
    }

    fn publish(&self, event: &ProgressEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event.clone());
    }
}

async fn wait_until_stopped(phase: &mut watch::Receiver<TripPhase>) {
    let _ = phase.wait_for(|phase| *phase == TripPhase::Stopped).await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use chrono::TimeZone;
    use ride_tracker_data_management::{write_gpx, DataManager, DataManagerError};
    use ride_tracker_lib::geodesy::EARTH_RADIUS_M;

    use crate::sample_source::{sample_channel, GpxReplaySource};

    use super::*;

    /// Keeps everything in memory. Sample writes can be made to fail.
    #[derive(Default)]
    struct MemoryStore {
        next_id: AtomicUsize,
        sample_attempts: AtomicUsize,
        samples: Mutex<Vec<(i64, LocationSample)>>,
        deleted: Mutex<Vec<i64>>,
        finalized: Mutex<Vec<TripSummary>>,
        fail_samples: AtomicBool,
        fail_finalize: AtomicBool,
    }

    impl MemoryStore {
        fn sample_count(&self) -> usize {
            self.samples.lock().unwrap().len()
        }

        fn finalize_count(&self) -> usize {
            self.finalized.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl TripStore for MemoryStore {
        async fn create_trip(&self, _start_time: DateTime<Utc>) -> Result<i64, DataManagerError> {
            tokio::task::yield_now().await;
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1)
        }

        async fn append_sample(&self, trip_id: i64, sample: &LocationSample) -> Result<(), DataManagerError> {
            tokio::task::yield_now().await;
            self.sample_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_samples.load(Ordering::SeqCst) {
                return Err(DataManagerError::Database("disk full".to_string()));
            }
            self.samples.lock().unwrap().push((trip_id, *sample));
            Ok(())
        }

        async fn finalize_trip(&self, _trip_id: i64, summary: &TripSummary) -> Result<(), DataManagerError> {
            if self.fail_finalize.load(Ordering::SeqCst) {
                return Err(DataManagerError::Database("disk full".to_string()));
            }
            self.finalized.lock().unwrap().push(summary.clone());
            Ok(())
        }

        async fn delete_trip(&self, trip_id: i64) -> Result<(), DataManagerError> {
            self.deleted.lock().unwrap().push(trip_id);
            Ok(())
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sample(secs: i64, meters_north: f64, speed: f64) -> LocationSample {
        let lat = 56.15 + (meters_north / EARTH_RADIUS_M).to_degrees();
        LocationSample::new(t(secs), lat, 10.2, speed, 5., 0.)
    }

    fn replay_config() -> TrackerConfig {
        TrackerConfig { clock: ClockMode::Sample, ..TrackerConfig::default() }
    }

    fn tracker() -> (Arc<MemoryStore>, Tracker<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        (store.clone(), Tracker::new(store, replay_config()))
    }

    #[tokio::test]
    async fn waiting_samples_are_persisted_only_once_moving() {
        let (store, tracker) = tracker();
        let handle = tracker.start(1).unwrap();
        let mut events = handle.subscribe();

        for (i, speed) in [0.5, 1.8, 2.6, 2.7].into_iter().enumerate() {
            let event = handle.ingest(sample(i as i64 * 5, i as f64 * 11.12, speed)).await.unwrap().unwrap();
            assert!(event.is_waiting);
        }
        assert_eq!(store.sample_count(), 0);
        assert_eq!(handle.phase(), TripPhase::WaitingForMovement);

        let event = handle.ingest(sample(20, 4. * 11.12, 2.8)).await.unwrap().unwrap();
        assert!(!event.is_waiting);
        assert_eq!(event.accepted_point_count, 5);
        assert_eq!(store.sample_count(), 5);
        assert_eq!(handle.phase(), TripPhase::Recording);

        // 4 waiting events, then one per replayed sample
        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        assert_eq!(received.len(), 9);
        assert!(received[..4].iter().all(|event| event.is_waiting));
        assert_eq!(received[8], event);

        let summary = handle.stop().await.unwrap();
        assert_eq!(summary.actual_start, t(20));
        assert_eq!(summary.accepted_sample_count, 5);
        assert!((summary.total_distance_m - 44.48).abs() < 0.05);
    }

    #[tokio::test]
    async fn only_one_live_session() {
        let (_store, tracker) = tracker();
        let handle = tracker.start(1).unwrap();
        assert_eq!(tracker.phase(), TripPhase::WaitingForMovement);

        assert!(matches!(tracker.start(2), Err(TrackerError::InvalidStateTransition { action: "start", .. })));

        handle.stop().await.unwrap();
        assert_eq!(tracker.phase(), TripPhase::Idle);
        assert!(tracker.start(2).is_ok());
    }

    #[tokio::test]
    async fn dropped_session_frees_tracker() {
        let (_store, tracker) = tracker();
        drop(tracker.start(1).unwrap());
        assert!(tracker.start(2).is_ok());
    }

    #[tokio::test]
    async fn stop_twice_finalizes_once() {
        let (store, tracker) = tracker();
        let handle = tracker.start(1).unwrap();
        for i in 0..4 {
            handle.ingest(sample(i, i as f64 * 10., 4.)).await.unwrap();
        }

        let first = handle.stop().await.unwrap();
        let second = handle.stop().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.finalize_count(), 1);
        assert_eq!(handle.ingest(sample(10, 500., 4.)).await.unwrap(), None);
        assert_eq!(store.sample_count(), 4);
    }

    #[tokio::test]
    async fn failed_finalize_is_retried_by_next_stop() {
        let (store, tracker) = tracker();
        let handle = tracker.start(1).unwrap();
        store.fail_finalize.store(true, Ordering::SeqCst);

        assert!(matches!(handle.stop().await, Err(TrackerError::PersistenceFailure(_))));
        assert_eq!(handle.phase(), TripPhase::Stopped);

        store.fail_finalize.store(false, Ordering::SeqCst);
        handle.stop().await.unwrap();
        handle.stop().await.unwrap();
        assert_eq!(store.finalize_count(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_keeps_totals() {
        let (store, tracker) = tracker();
        let handle = tracker.start(1).unwrap();
        for i in 0..3 {
            handle.ingest(sample(i, 0., 4.)).await.unwrap();
        }

        store.fail_samples.store(true, Ordering::SeqCst);
        let result = handle.ingest(sample(3, 100., 9.)).await;
        assert!(matches!(result, Err(TrackerError::PersistenceFailure(_))));

        store.fail_samples.store(false, Ordering::SeqCst);
        let event = handle.ingest(sample(4, 100., 4.)).await.unwrap().unwrap();

        // The failed sample still counted, but is neither stored nor the reference point
        assert_eq!(event.max_speed_mps, 9.);
        assert_eq!(event.accepted_point_count, 4);
        assert!((event.cumulative_distance_m - 200.).abs() < 1e-6, "got {}", event.cumulative_distance_m);
        assert_eq!(store.sample_count(), 4);
    }

    #[tokio::test]
    async fn failed_replay_attempts_every_buffered_sample() {
        let (store, tracker) = tracker();
        let handle = tracker.start(1).unwrap();
        handle.ingest(sample(0, 0., 4.)).await.unwrap();
        handle.ingest(sample(1, 0., 4.)).await.unwrap();

        store.fail_samples.store(true, Ordering::SeqCst);
        let result = handle.ingest(sample(2, 50., 6.)).await;
        assert!(matches!(result, Err(TrackerError::PersistenceFailure(_))));
        assert_eq!(handle.phase(), TripPhase::Recording);
        assert_eq!(store.sample_attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.sample_count(), 0);

        store.fail_samples.store(false, Ordering::SeqCst);
        let event = handle.ingest(sample(3, 100., 4.)).await.unwrap().unwrap();

        // Peak speed saw the failed replay, the route and reference point did not
        assert_eq!(event.max_speed_mps, 6.);
        assert_eq!(event.accepted_point_count, 1);
        assert_eq!(event.cumulative_distance_m, 0.);
        assert_eq!(store.sample_count(), 1);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_ingestion() {
        let (store, tracker) = tracker();
        let handle = tracker.start(1).unwrap();
        for i in 0..3 {
            handle.ingest(sample(i, 0., 4.)).await.unwrap();
        }

        let ingesting = handle.clone();
        let in_flight = tokio::spawn(async move { ingesting.ingest(sample(3, 50., 4.)).await });
        tokio::task::yield_now().await;
        let summary = handle.stop().await.unwrap();
        let ingested = in_flight.await.unwrap().unwrap();

        // Whichever got the session first, the summary never sees half a sample
        match ingested {
            Some(_) => {
                assert_eq!(summary.accepted_sample_count, 4);
                assert!((summary.total_distance_m - 50.).abs() < 1e-6);
            },
            None => {
                assert_eq!(summary.accepted_sample_count, 3);
                assert_eq!(summary.total_distance_m, 0.);
            },
        }
        assert_eq!(store.sample_count(), summary.accepted_sample_count);
    }

    #[tokio::test]
    async fn pump_feeds_channel_until_stopped() {
        let (store, tracker) = tracker();
        let (sender, source) = sample_channel(16);
        let (handle, task) = tracker.start_with_source(1, source).await.unwrap();
        let mut events = handle.subscribe();

        for i in 0..5 {
            sender.send(sample(i, i as f64 * 20., 5.)).await.unwrap();
        }
        while events.recv().await.unwrap().accepted_point_count < 5 {}

        let summary = handle.stop().await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), 5);
        assert_eq!(summary.accepted_sample_count, 5);
        assert!((summary.total_distance_m - 80.).abs() < 1e-6);
        assert_eq!(store.finalize_count(), 1);
        assert!(sender.send(sample(9, 0., 5.)).await.is_err());
    }

    #[tokio::test]
    async fn denied_source_starts_nothing() {
        let (_store, tracker) = tracker();
        let (sender, source) = sample_channel(1);
        drop(sender);

        let result = tracker.start_with_source(1, source).await;
        assert!(matches!(result, Err(TrackerError::PermissionDenied(_))));
        assert_eq!(tracker.phase(), TripPhase::Idle);
    }

    #[tokio::test]
    async fn gpx_replay_into_database() {
        let route: Vec<LocationSample> = (0..20)
            .map(|i| {
                // 20 m every 4 s, then crawling 3 m every 4 s
                let (meters, speed) = if i < 16 { (i as f64 * 20., 5.) } else { (300. + (i - 15) as f64 * 3., 0.75) };
                sample(i * 4, meters, speed)
            })
            .collect();
        let path = std::env::temp_dir().join(format!("ride_tracker_replay_{}.gpx", std::process::id()));
        write_gpx(&path, "replay", &route).unwrap();

        let data_manager = Arc::new(DataManager::in_memory().await.unwrap());
        let tracker = Tracker::new(data_manager.clone(), replay_config());
        let trip_id = data_manager.create_trip(t(0)).await.unwrap();

        let (handle, task) = tracker.start_with_source(trip_id, GpxReplaySource::new(path.clone())).await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), 20);
        let summary = handle.stop().await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(summary.accepted_sample_count, 16);
        assert!((summary.total_distance_m - 300.).abs() < 0.01, "got {}", summary.total_distance_m);
        assert_eq!(summary.actual_start, t(8));
        assert_eq!(summary.actual_end, t(60));

        let trip = data_manager.get_trip(trip_id).await.unwrap();
        assert_eq!(trip.point_count, 16);
        assert_eq!(trip.duration_s, 52);
        assert_eq!(data_manager.get_trip_samples(trip_id).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn start_new_trip_creates_it() {
        let (_store, tracker) = tracker();
        let first = tracker.start_new_trip().await.unwrap();
        assert_eq!(first.trip_id(), 1);
        assert!(tracker.start_new_trip().await.is_err());
        first.stop().await.unwrap();
        assert_eq!(tracker.start_new_trip().await.unwrap().trip_id(), 2);
    }

    #[tokio::test]
    async fn racing_start_new_trip_deletes_losing_trip() {
        let (store, tracker) = tracker();
        let (first, second) = tokio::join!(tracker.start_new_trip(), tracker.start_new_trip());

        let (winner, loser) = match (first, second) {
            (Ok(handle), Err(err)) | (Err(err), Ok(handle)) => (handle, err),
            _ => panic!("exactly one start should win"),
        };
        assert!(matches!(loser, TrackerError::InvalidStateTransition { action: "start", .. }));

        let deleted = store.deleted.lock().unwrap().clone();
        assert_eq!(deleted.len(), 1);
        assert_ne!(deleted[0], winner.trip_id());
    }
}
