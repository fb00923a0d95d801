//! Stream poses from the simulated tracking service to stdout.
//!
//! Usage: cargo run --example stream
//! Runs for 10 seconds; set AREA_LEARNING_SIM_RATE_HZ to change the pose rate.

use area_learning::sim::{SimConfig, SimService};
use area_learning::{AreaLearningApp, SessionConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let service = Arc::new(SimService::new(SimConfig::from_env()));
    let app = AreaLearningApp::new(service);

    println!("Version:  {}", app.version_string());

    if let Err(e) = app.setup_config(SessionConfig::default()) {
        eprintln!("Failed to configure session: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = app.connect() {
        eprintln!("Failed to connect: {}", e);
        std::process::exit(1);
    }

    println!("Streaming poses for 10s...");

    let start = Instant::now();
    let mut last_report = Instant::now();
    let mut last_count = 0;

    while start.elapsed() < Duration::from_secs(10) {
        std::thread::sleep(Duration::from_millis(100));

        let count = app.pose_store().sample_count();
        if count != last_count {
            if let Some(p) = app.latest_pose() {
                println!(
                    "ts={:<10.3}  pos=[{:+.4}, {:+.4}, {:+.4}]  quat=[{:+.3}, {:+.3}, {:+.3}, {:+.3}]  {}",
                    p.timestamp,
                    p.translation[0], p.translation[1], p.translation[2],
                    p.orientation[0], p.orientation[1], p.orientation[2], p.orientation[3],
                    p.status,
                );
            }
            last_count = count;
        }

        let now = Instant::now();
        if now.duration_since(last_report) >= Duration::from_secs(3) {
            let elapsed = start.elapsed().as_secs_f64();
            println!("--- {} samples in {:.1}s ({:.1} Hz) ---", count, elapsed, count as f64 / elapsed);
            last_report = now;
        }
    }

    app.disconnect();

    let elapsed = start.elapsed().as_secs_f64();
    let count = app.pose_store().sample_count();
    println!(
        "\nTotal: {} samples in {:.1}s ({:.1} Hz), dropped callbacks: {}",
        count,
        elapsed,
        count as f64 / elapsed,
        app.bridge().dropped_count()
    );
}
