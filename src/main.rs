use std::env;
use std::process::ExitCode;

use cityscout::{init_tracing, PoiEngine};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let city = match env::args().nth(1) {
        Some(city) => city,
        None => {
            eprintln!("usage: cityscout <city>");
            return ExitCode::FAILURE;
        }
    };

    let engine = match PoiEngine::from_env() {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("failed to initialize: {err}");
            return ExitCode::FAILURE;
        }
    };

    match engine.generate_for_city(&city).await {
        Ok(summary) => {
            println!(
                "{}: {} POIs ({} with coordinates)",
                summary.city,
                summary.pois.len(),
                summary.stats.resolved_coordinates
            );
            for poi in &summary.pois {
                let location = match poi.coordinate {
                    Some(c) => format!("{:.5}, {:.5}", c.latitude, c.longitude),
                    None => "unresolved".to_string(),
                };
                println!("  {} [{}] {} image(s)", poi.name, location, poi.images.len());
            }
            if let Some(store_error) = summary.store_error {
                eprintln!("warning: batch not persisted: {store_error}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("generation failed: {err}");
            ExitCode::FAILURE
        }
    }
}
