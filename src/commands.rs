use crate::data;
use crate::{EvaluateArgs, PredictArgs, TrainArgs};

use anyhow::{Context, Result};
use linfa::ParamGuard;
use log::info;
use ndarray::{Axis, stack};
use ndarray_npy::write_npy;
use serde::Serialize;
use ssegp_gp::{
    FeatureScaler, GpMetrics, GpPredictor, GpTrainer, KernelKind, Metric, Positivity, SavedGp,
    TrainOptions, convert_index_points,
};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Train a GP on training data, tracking metrics on validation data
pub(crate) fn train(args: TrainArgs) -> Result<()> {
    let features = data::read_features(&args.features)?;
    let targets = data::read_targets(&args.targets)?;

    let scaler = match data::scaling_factor(&args.scaling)? {
        Some(factor) => FeatureScaler::new(factor)?,
        None => FeatureScaler::fit(&features)?,
    };
    info!("Scaling factor: {}", scaler.factor());
    if let Some(path) = &args.scaling_out {
        data::write_scaling_file(path, &scaler)?;
    }

    let index_points = convert_index_points(&scaler.transform(&features))?;
    let val_points = data::read_index_points(&args.val_features, &scaler)?;
    let val_targets = data::read_targets(&args.val_targets)?;

    let positivity = if args.log_transform {
        Positivity::LogTransform
    } else {
        Positivity::Unconstrained
    };
    let params = GpTrainer::params()
        .kernel(args.kernel.parse::<KernelKind>()?)
        .learning_rate(args.learning_rate)
        .positivity(positivity)
        .checkpoint_dir(args.checkpoint_dir.as_ref())
        .check()?;
    let mut trainer = GpTrainer::with_params(params, index_points, targets)?;

    let options = TrainOptions::new()
        .epochs(args.epochs)
        .patience(args.patience)
        .save_dir(args.save_dir.as_ref())
        .save_format(args.format)
        .metrics(&args.metrics);

    let mut out = match &args.metrics_out {
        Some(path) => Some(BufWriter::new(File::create(path).with_context(|| {
            format!("cannot create metrics file {}", path.display())
        })?)),
        None => None,
    };
    let mut epochs = 0;
    for epoch in trainer.train_model(&val_points, &val_targets, options)? {
        let epoch = epoch?;
        if let Some(out) = out.as_mut() {
            serde_json::to_writer(&mut *out, &epoch)?;
            writeln!(out)?;
        }
        epochs += 1;
    }
    if let Some(out) = out.as_mut() {
        out.flush()?;
    }

    info!(
        "Trained {} epochs ({} steps), loss = {}, {}",
        epochs,
        trainer.training_steps(),
        trainer.loss(),
        trainer.kernel()
    );
    for (metric, value) in trainer.metrics() {
        info!("{metric} = {value}");
    }
    Ok(())
}

#[derive(Serialize)]
struct Predictions {
    mean: Vec<f64>,
    stddev: Vec<f64>,
}

/// Predict mean and standard deviation at the given features with a saved model
pub(crate) fn predict(args: PredictArgs) -> Result<()> {
    let gp = SavedGp::load(&args.model_dir)?;
    let scaler = data::supplied_scaler(&args.scaling)?;
    let index_points = data::read_index_points(&args.features, &scaler)?;
    let (mean, stddev) = gp.predict(&index_points)?;

    match &args.output {
        Some(path) => {
            let out = stack(Axis(1), &[mean.view(), stddev.view()])?;
            write_npy(path, &out)
                .with_context(|| format!("cannot write predictions to {}", path.display()))?;
            info!("{} predictions written to {}", out.nrows(), path.display());
        }
        None => {
            let predictions = Predictions {
                mean: mean.to_vec(),
                stddev: stddev.to_vec(),
            };
            println!("{}", serde_json::to_string_pretty(&predictions)?);
        }
    }
    Ok(())
}

/// Evaluate a saved model against held-out data
pub(crate) fn evaluate(args: EvaluateArgs) -> Result<()> {
    let gp = SavedGp::load(&args.model_dir)?;
    let scaler = data::supplied_scaler(&args.scaling)?;
    let index_points = data::read_index_points(&args.features, &scaler)?;
    let targets = data::read_targets(&args.targets)?;

    let metrics = GpMetrics::new(&gp, &index_points, &targets)?;
    let mut scalars = BTreeMap::new();
    for metric in Metric::SCALARS {
        if let Some(value) = metrics.compute(metric)?.as_scalar() {
            scalars.insert(metric, value);
        }
    }
    println!("{}", serde_json::to_string_pretty(&scalars)?);

    write_report(&args.sharpness_report, &metrics.sharpness_report())?;
    write_report(&args.calibration_report, &metrics.calibration_report())?;
    Ok(())
}

fn write_report<T: Serialize>(dest: &Option<Option<PathBuf>>, report: &T) -> Result<()> {
    match dest {
        None => {}
        Some(None) => println!("{}", serde_json::to_string_pretty(report)?),
        Some(Some(path)) => {
            fs::write(path, serde_json::to_vec_pretty(report)?)
                .with_context(|| format!("cannot write report to {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
    }
    Ok(())
}
