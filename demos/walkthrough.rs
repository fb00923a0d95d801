//! Learn an area, save it, name it, then relocalize against it in a second session.
//!
//! Usage: cargo run --example walkthrough

use area_learning::sim::{SimConfig, SimService};
use area_learning::{AreaLearningApp, ProgressSink, SessionConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct PrintProgress;

impl ProgressSink for PrintProgress {
    fn on_saving_progress(&self, progress: u8) {
        println!("saving: {:>3}%", progress);
    }
}

fn run() -> area_learning::Result<()> {
    let service = Arc::new(SimService::new(SimConfig::from_env()));
    let app = AreaLearningApp::new(service);
    app.attach_activity(Arc::new(PrintProgress));

    if !app.check_version(10000) {
        eprintln!("Tracking service is out of date");
        std::process::exit(1);
    }

    // Session 1: learn and save.
    app.setup_config(SessionConfig::default().with_area_learning(true))?;
    app.connect()?;
    std::thread::sleep(Duration::from_millis(500));
    println!("{}", app.pose_string());

    let id = app.adfs().save()?;
    app.adfs().set_metadata(&id, "name", "office")?;
    println!("saved {} as '{}'", id, app.adfs().get_metadata(&id, "name")?);
    app.disconnect();

    // Session 2: load the most recent map and wait for relocalization.
    app.setup_config(SessionConfig::default().with_existing_map(true))?;
    app.connect()?;
    println!("loaded ADF: {}", app.loaded_adf_string());

    let deadline = Instant::now() + Duration::from_secs(5);
    while !app.is_relocalized() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    println!("relocalized: {}", app.is_relocalized());
    print!("{}", app.event_string());

    app.disconnect();
    app.activity_destroyed();
    println!("all ADFs: {}", app.adfs().joined_ids()?);
    Ok(())
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
