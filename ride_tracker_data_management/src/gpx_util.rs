use std::{fs::File, io::{BufReader, BufWriter}, path::Path, str::FromStr};

use chrono::{DateTime, Utc};
use gpx::{Gpx, GpxVersion, Track, TrackSegment, Waypoint};
use ride_tracker_lib::location_sample::LocationSample;
use time::OffsetDateTime;

use crate::{DataManager, DataManagerError};

/// Meters of horizontal error per unit of HDOP.
const METERS_PER_HDOP: f64 = 5.;

impl DataManager {
    pub async fn export_gpx(&self, trip_id: i64, path: &Path) -> Result<usize, DataManagerError> {
        let samples = self.get_trip_samples(trip_id).await?;
        write_gpx(path, &format!("Ride {trip_id}"), &samples)?;
        tracing::info!("Exported {} points of trip {} to {:?}", samples.len(), trip_id, path);
        Ok(samples.len())
    }
}

/// Reads every track point of a GPX file as a location sample, in file order.
pub fn import_gpx(path: &Path) -> Result<Vec<LocationSample>, DataManagerError> {
    let file = File::open(path)
        .map_err(|err| DataManagerError::Io(format!("Failed to open {:?}: {err}", path)))?;
    let gpx = gpx::read(BufReader::new(file))
        .map_err(|err| DataManagerError::Gpx(format!("Failed to parse {:?}: {err}", path)))?;

    samples_from_gpx(gpx)
}

pub(crate) fn samples_from_gpx(gpx: Gpx) -> Result<Vec<LocationSample>, DataManagerError> {
    let mut samples: Vec<LocationSample> = Vec::new();
    for track in gpx.tracks {
        for segment in track.segments {
            for point in segment.points {
                let Some(time) = point.time else {
                    tracing::warn!("Skipping GPX point without time");
                    continue;
                };
                let formatted = time.format()
                    .map_err(|err| DataManagerError::Gpx(format!("Bad point time: {err}")))?;
                let timestamp = DateTime::<Utc>::from_str(&formatted)
                    .map_err(|err| DataManagerError::Gpx(format!("Bad point time {formatted}: {err}")))?;

                let position = point.point();
                let mut sample = LocationSample::new(
                    timestamp,
                    position.y(),
                    position.x(),
                    0.,
                    point.hdop.map(|hdop| hdop * METERS_PER_HDOP).unwrap_or(0.),
                    point.elevation.unwrap_or(0.),
                );

                sample.speed = match (point.speed, samples.last()) {
                    (Some(speed), _) => speed,
                    (None, Some(previous)) => derived_speed(previous, &sample),
                    (None, None) => 0.,
                };

                samples.push(sample);
            }
        }
    }

    Ok(samples)
}

fn derived_speed(previous: &LocationSample, current: &LocationSample) -> f64 {
    let elapsed = (current.timestamp - previous.timestamp).num_milliseconds() as f64 / 1000.;
    if elapsed <= 0. {
        return 0.;
    }
    previous.distance_to(current) / elapsed
}

pub fn write_gpx(path: &Path, name: &str, samples: &[LocationSample]) -> Result<(), DataManagerError> {
    let gpx = gpx_from_samples(name, samples)?;

    let file = File::create(path)
        .map_err(|err| DataManagerError::Io(format!("Failed to create {:?}: {err}", path)))?;
    gpx::write(&gpx, BufWriter::new(file))
        .map_err(|err| DataManagerError::Gpx(format!("Failed to write {:?}: {err}", path)))
}

pub(crate) fn gpx_from_samples(name: &str, samples: &[LocationSample]) -> Result<Gpx, DataManagerError> {
    let mut segment = TrackSegment::new();
    for sample in samples {
        let nanos = sample.timestamp.timestamp_nanos_opt()
            .ok_or_else(|| DataManagerError::Gpx(format!("Timestamp out of range: {}", sample.timestamp)))?;
        let time = OffsetDateTime::from_unix_timestamp_nanos(nanos as i128)
            .map_err(|err| DataManagerError::Gpx(format!("Timestamp out of range: {err}")))?;

        let mut waypoint = Waypoint::new(sample.point());
        waypoint.elevation = Some(sample.altitude);
        waypoint.speed = Some(sample.speed);
        waypoint.time = Some(time.into());
        waypoint.hdop = Some(sample.accuracy / METERS_PER_HDOP);
        segment.points.push(waypoint);
    }

    let mut track = Track::new();
    track.name = Some(name.to_string());
    track.segments.push(segment);

    Ok(Gpx {
        version: GpxVersion::Gpx11,
        creator: Some("ride_tracker".to_string()),
        tracks: vec![track],
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn samples_survive_gpx() {
        let samples = vec![
            LocationSample::new(t(0), 56.1, 10.2, 3.5, 10., 12.),
            LocationSample::new(t(5), 56.1002, 10.2, 4., 5., 13.),
        ];

        let gpx = gpx_from_samples("test", &samples).unwrap();
        let read = samples_from_gpx(gpx).unwrap();

        assert_eq!(read.len(), 2);
        assert_eq!(read[0].timestamp, t(0));
        assert_eq!(read[1].latitude, 56.1002);
        assert_eq!(read[1].speed, 4.);
        assert!((read[0].accuracy - 10.).abs() < 1e-9);
    }

    #[test]
    fn missing_speed_is_derived() {
        let samples = vec![
            LocationSample::new(t(0), 56.1, 10.2, 0., 5., 0.),
            LocationSample::new(t(10), 56.1001, 10.2, 0., 5., 0.),
        ];
        let mut gpx = gpx_from_samples("test", &samples).unwrap();
        for point in gpx.tracks[0].segments[0].points.iter_mut() {
            point.speed = None;
        }

        let read = samples_from_gpx(gpx).unwrap();
        assert_eq!(read[0].speed, 0.);
        // ~11.1 m over 10 s
        assert!((read[1].speed - 1.112).abs() < 0.01, "got {}", read[1].speed);
    }

    #[tokio::test]
    async fn export_writes_file() {
        let data_manager = DataManager::in_memory().await.unwrap();
        let trip_id = data_manager.create_trip(t(0)).await.unwrap();
        data_manager.append_sample(trip_id, &LocationSample::new(t(0), 56.1, 10.2, 3., 5., 0.)).await.unwrap();

        let path = std::env::temp_dir().join(format!("ride_tracker_export_{}.gpx", std::process::id()));
        assert_eq!(data_manager.export_gpx(trip_id, &path).await.unwrap(), 1);

        let read = import_gpx(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].timestamp, t(0));
    }
}
