use std::{collections::VecDeque, path::PathBuf};

use chrono::{DateTime, Utc};
use ride_tracker_data_management::import_gpx;
use ride_tracker_lib::location_sample::LocationSample;
use tokio::sync::mpsc;

use crate::error::{TrackerError, TrackerResult};

/// A stream of location fixes, pulled one at a time.
#[async_trait::async_trait]
pub trait SampleSource: Send {
    /// Fails with [`TrackerError::PermissionDenied`] if no samples can be delivered.
    async fn start(&mut self) -> TrackerResult<()> {
        Ok(())
    }

    /// `None` once the source is exhausted. Must be cancel safe, the session
    /// pump races it against stop.
    async fn next_sample(&mut self) -> Option<LocationSample>;

    async fn stop(&mut self) {}

    /// Best-effort single fix, outside of any session.
    async fn current_position(&mut self) -> Option<LocationSample> {
        None
    }
}

/// Adapts a push-based location provider. The provider keeps the sender and
/// pushes from whatever context it runs on.
pub struct ChannelSource {
    receiver: mpsc::Receiver<LocationSample>,
    latest: Option<LocationSample>,
}

pub fn sample_channel(capacity: usize) -> (mpsc::Sender<LocationSample>, ChannelSource) {
    let (sender, receiver) = mpsc::channel(capacity);
    (sender, ChannelSource { receiver, latest: None })
}

#[async_trait::async_trait]
impl SampleSource for ChannelSource {
    async fn start(&mut self) -> TrackerResult<()> {
        if self.receiver.is_closed() && self.receiver.is_empty() {
            return Err(TrackerError::PermissionDenied("location provider is gone".to_string()));
        }
        Ok(())
    }

    async fn next_sample(&mut self) -> Option<LocationSample> {
        let sample = self.receiver.recv().await?;
        self.latest = Some(sample);
        Some(sample)
    }

    async fn stop(&mut self) {
        self.receiver.close();
    }

    async fn current_position(&mut self) -> Option<LocationSample> {
        self.latest
    }
}

/// Plays back the track points of a GPX file as fast as they are consumed.
pub struct GpxReplaySource {
    path: PathBuf,
    samples: VecDeque<LocationSample>,
}

impl GpxReplaySource {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            samples: VecDeque::new(),
        }
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.samples.front().map(|sample| sample.timestamp)
    }
}

#[async_trait::async_trait]
impl SampleSource for GpxReplaySource {
    async fn start(&mut self) -> TrackerResult<()> {
        let samples = import_gpx(&self.path)
            .map_err(|err| TrackerError::PermissionDenied(err.to_string()))?;
        tracing::info!("Loaded {} samples from {:?}", samples.len(), self.path);
        self.samples = samples.into();
        Ok(())
    }

    async fn next_sample(&mut self) -> Option<LocationSample> {
        self.samples.pop_front()
    }

    async fn stop(&mut self) {
        self.samples.clear();
    }

    async fn current_position(&mut self) -> Option<LocationSample> {
        self.samples.front().copied()
    }
}
