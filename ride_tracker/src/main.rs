use std::{fs::OpenOptions, path::PathBuf, sync::Arc};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use ride_tracker::{config::{ClockMode, TrackerConfig}, sample_source::{GpxReplaySource, SampleSource}, Tracker, TrackerError, TrackerResult};
use ride_tracker_data_management::DataManager;
use ride_tracker_lib::{calculations::{calculate_time_savings_value, format_currency, format_distance, format_duration}, geodesy::{meters_to_miles, mps_to_mph}, trip::Trip, trip_summary::TripSummary};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ride_tracker")]
#[command(about = "Records scooter rides from GPS tracks and inspects stored rides", long_about = None)]
struct Cli {
    /// Tracker settings, `key = value` per line
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a GPX track through the tracker and store the ride
    Record { gpx_file: PathBuf },
    /// List stored rides, newest first
    List,
    /// Show a single ride
    Show {
        trip_id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Totals over all finished rides
    Stats,
    /// Delete a ride and its points
    Delete { trip_id: i64 },
    /// Set the notes of a ride
    Notes { trip_id: i64, notes: String },
    /// Write the recorded points of a ride to a GPX file
    ExportGpx { trip_id: i64, out: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    let config = match &cli.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };

    let data_manager = match &config.database {
        Some(path) => DataManager::open(path).await?,
        None => DataManager::start().await?,
    };

    match cli.command {
        Commands::Record { gpx_file } => record(data_manager, config, gpx_file).await?,
        Commands::List => {
            for trip in data_manager.get_trips().await? {
                println!("{}", trip_line(&trip));
            }
        },
        Commands::Show { trip_id, json } => {
            let trip = data_manager.get_trip(trip_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&trip)?);
            } else {
                print_trip(&trip);
            }
        },
        Commands::Stats => {
            let stats = data_manager.get_total_stats().await?;
            println!("Rides:        {}", stats.total_trips);
            println!("Distance:     {}", format_distance(meters_to_miles(stats.total_distance_m)));
            println!("Time riding:  {}", format_duration(stats.total_duration_s));
            println!("Rental cost:  {}", format_currency(stats.total_cost_saved));
            println!("Time saved:   {} ({})", format_duration(stats.total_time_saved_s), format_currency(calculate_time_savings_value(stats.total_time_saved_s)));
            println!("Avg speed:    {:.1} mph", stats.overall_avg_speed_mph);
        },
        Commands::Delete { trip_id } => {
            data_manager.delete_trip(trip_id).await?;
            println!("Deleted ride {trip_id}");
        },
        Commands::Notes { trip_id, notes } => {
            data_manager.set_trip_notes(trip_id, &notes).await?;
        },
        Commands::ExportGpx { trip_id, out } => {
            let count = data_manager.export_gpx(trip_id, &out).await?;
            println!("Wrote {count} points to {}", out.display());
        },
    }

    Ok(())
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=trace,ride_tracker_data_management=info", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

/// Replays the file as a ride. Rides shorter than the configured minimum are discarded.
async fn record(data_manager: DataManager, mut config: TrackerConfig, gpx_file: PathBuf) -> anyhow::Result<()> {
    config.clock = ClockMode::Sample;
    let min_distance = config.min_trip_distance_m;

    let data_manager = Arc::new(data_manager);
    let tracker = Tracker::new(data_manager.clone(), config);

    let mut source = GpxReplaySource::new(gpx_file);
    source.start().await?;
    let start_time = source.first_timestamp().unwrap_or_else(Utc::now);

    let trip_id = data_manager.create_trip(start_time).await?;
    let handle = tracker.start_at(trip_id, start_time)?;

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.is_waiting => tracing::debug!("Waiting, {:.1} mph", mps_to_mph(event.latest_point.speed)),
                Ok(event) => tracing::debug!("{:.0} m, {} points", event.cumulative_distance_m, event.accepted_point_count),
                Err(RecvError::Lagged(skipped)) => tracing::debug!("Skipped {} progress events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let run = handle.run(source).await;
    let stopped = handle.stop().await;

    let discard = discard_reason(&run, &stopped, min_distance);
    if let Some(reason) = &discard {
        data_manager.delete_trip(trip_id).await?;
        tracing::info!("Deleted trip {}: {}", trip_id, reason);
    }
    run?;
    stopped?;

    match discard {
        Some(reason) => println!("Ride discarded, {reason}"),
        None => print_trip(&data_manager.get_trip(trip_id).await?),
    }
    Ok(())
}

/// Why a recorded trip should not be kept, if it should not.
fn discard_reason(run: &TrackerResult<usize>, stopped: &TrackerResult<TripSummary>, min_distance_m: f64) -> Option<String> {
    match (run, stopped) {
        (Err(err), _) => Some(format!("recording aborted: {err}")),
        (_, Err(err)) => Some(format!("finalizing failed: {err}")),
        (Ok(_), Ok(summary)) if summary.total_distance_m < min_distance_m => {
            Some(format!("too short ({:.0} m)", summary.total_distance_m))
        },
        _ => None,
    }
}

fn trip_line(trip: &Trip) -> String {
    let state = if trip.is_finished() { "." } else { "A" };
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        trip.trip_id,
        state,
        trip.start_time.format("%d/%m/%Y %H:%M"),
        format_distance(meters_to_miles(trip.distance_m)),
        format_duration(trip.duration_s),
        trip.notes.as_deref().unwrap_or(""),
    )
}

fn print_trip(trip: &Trip) {
    println!("Ride {}", trip.trip_id);
    println!("Started:     {}", trip.actual_start_time.unwrap_or(trip.start_time).format("%d/%m/%Y %H:%M:%S"));
    println!("Distance:    {}", format_distance(meters_to_miles(trip.distance_m)));
    println!("Duration:    {}", format_duration(trip.duration_s));
    println!("Avg speed:   {:.1} mph", trip.avg_speed_mph);
    println!("Max speed:   {:.1} mph", mps_to_mph(trip.max_speed_mps));
    println!("Rental cost: {}", format_currency(trip.cost_saved));
    println!("Time saved:  {} ({})", format_duration(trip.time_saved_s), format_currency(calculate_time_savings_value(trip.time_saved_s)));
    println!("Points:      {}", trip.point_count);
    if let Some(notes) = &trip.notes {
        println!("Notes:       {notes}");
    }
}
