use anyhow::{Context, Result};
use burn::prelude::*;
use burn::module::AutodiffModule;
use clap::Parser;

use fashion_attrs::backend::{devices, InferenceBackend, TrainingBackend};
use fashion_attrs::config::Args;
use fashion_attrs::inference::predict;
use fashion_attrs::logging::init_logging;
use fashion_attrs::pretrained::{load_checkpoint, load_or_pretrained};
use fashion_attrs::training::train;

fn main() -> Result<()> {
    let args = Args::parse();
    let experiment_dir = args.experiment_dir();
    init_logging(Some(&experiment_dir), args.verbose)?;

    let config = args.training_config()?;
    config
        .save(experiment_dir.join("config.json"))
        .context("Config should be saved successfully")?;

    let devices = devices(args.num_gpus);
    tracing::info!("Use context {:?}", devices);

    let task = args.task;
    let checkpoint = args.checkpoint_stem();
    let device = devices[0].clone();

    let model = if args.predict_only {
        load_checkpoint::<InferenceBackend>(args.model, task.num_classes(), &checkpoint, &device)
            .context("--predict-only needs saved parameters")?
    } else {
        let model = load_or_pretrained::<TrainingBackend>(
            args.model,
            task.num_classes(),
            &checkpoint,
            &args.weights_dir,
            &device,
        )?;
        let (model, report) = train(&config, model, &args.data_dir, &checkpoint, &devices)?;
        tracing::info!(
            "Trained {} epoch(s), best validation loss {:.4}",
            report.epochs,
            report.best_val_loss
        );
        model.valid()
    };

    predict(&model, task, &args.data_dir, &args.submission_dir, &device)?;

    Ok(())
}
