//! canvae-ids entrypoint: trains on the benign rows of a CAN capture,
//! calibrates the threshold, evaluates on the full capture and prints the
//! classification report. Optionally writes run events and a checkpoint.

use canvae_ids::{
    config::DetectorConfig,
    detector::CanAnomalyDetector,
    features::CanDataset,
    logging::{RunEvent, StructuredLogger},
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = std::env::var("CANVAE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    let mut config = DetectorConfig::load(&config_path)?;
    if let Some(csv) = std::env::args().nth(1) {
        config.data.csv_path = PathBuf::from(csv);
    }

    StructuredLogger::init(config.log.json, &config.log.level);
    let run_id = Uuid::new_v4();
    info!(%run_id, csv = ?config.data.csv_path, "canvae-ids starting");

    let dataset = CanDataset::load_csv(&config.data.csv_path, &config.data)?;
    let benign = dataset.benign_rows();
    info!(
        rows = dataset.len(),
        benign = benign.nrows(),
        attack_families = dataset.attack_breakdown().len(),
        "dataset loaded"
    );

    let mut events: Option<BufWriter<File>> = match &config.output.events_path {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };

    let (detector, history) = CanAnomalyDetector::train_with(&config, &benign, |record| {
        if let Some(w) = events.as_mut() {
            if let Err(e) = StructuredLogger::emit_json(&RunEvent::new(run_id, "epoch", record), w) {
                warn!(error = %e, "failed to write epoch event");
            }
        }
    })?;
    info!(
        epochs = history.epochs.len(),
        best_epoch = history.best_epoch,
        stopped_early = history.stopped_early,
        "training complete"
    );
    println!("Threshold for anomaly detection: {}", detector.threshold().value);

    let report = detector.evaluate(&dataset)?;
    println!("{}", report);

    if let Some(w) = events.as_mut() {
        StructuredLogger::emit_json(&RunEvent::new(run_id, "threshold", detector.threshold()), w)?;
        StructuredLogger::emit_json(&RunEvent::new(run_id, "report", &report), w)?;
        w.flush()?;
    }

    if let Some(path) = &config.output.checkpoint_path {
        let checkpoint = detector.to_checkpoint();
        checkpoint.save(path)?;
        info!(path = ?path, model_id = %checkpoint.model_id, "checkpoint written");
    }

    info!("canvae-ids run complete");
    Ok(())
}
