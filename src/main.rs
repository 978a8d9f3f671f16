//! Command line front end of the GP trainer.
//!
//! Feature vectors are read from `.npy` files holding `(N, D)` arrays of embeddings
//! extracted beforehand, targets from `.npy` files holding `(N,)` arrays.

mod commands;
mod data;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Train and evaluate a Gaussian process regression head over fixed embeddings
#[derive(Parser)]
#[command(name = "ssegp", version)]
#[command(
    about = "Gaussian process regression with calibrated uncertainty over fixed embeddings",
    long_about = None
)]
struct Cli {
    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize kernel hyperparameters on training data
    Train(TrainArgs),
    /// Predict mean and standard deviation with a saved model
    Predict(PredictArgs),
    /// Compute validation metrics and plot reports of a saved model
    Evaluate(EvaluateArgs),
}

/// Feature scaling: factor given directly, read from a file or fitted on training features
#[derive(Args)]
struct ScalingArgs {
    /// Scaling factor features are divided by
    #[arg(long, conflicts_with = "scaling_file")]
    scaling_factor: Option<f64>,

    /// File holding the scaling factor as text
    #[arg(long)]
    scaling_file: Option<PathBuf>,
}

#[derive(Args)]
struct TrainArgs {
    /// Training features (.npy, N x D)
    #[arg(long)]
    features: PathBuf,

    /// Training targets (.npy, N)
    #[arg(long)]
    targets: PathBuf,

    /// Validation features (.npy, M x D)
    #[arg(long)]
    val_features: PathBuf,

    /// Validation targets (.npy, M)
    #[arg(long)]
    val_targets: PathBuf,

    #[command(flatten)]
    scaling: ScalingArgs,

    /// Where to write the scaling factor fitted on training features
    #[arg(long)]
    scaling_out: Option<PathBuf>,

    /// Kernel family (MaternOneHalf, MaternThreeHalves, MaternFiveHalves, ExponentiatedQuadratic)
    #[arg(long, default_value = "MaternOneHalf")]
    kernel: String,

    /// Adam learning rate
    #[arg(long, default_value_t = ssegp_gp::GP_DEFAULT_LEARNING_RATE)]
    learning_rate: f64,

    /// Optimize hyperparameters logarithms to keep them positive
    #[arg(long)]
    log_transform: bool,

    /// Maximum number of training epochs
    #[arg(long, default_value_t = ssegp_gp::GP_DEFAULT_EPOCHS)]
    epochs: usize,

    /// Stop after this many epochs without validation NLL improvement
    #[arg(long)]
    patience: Option<usize>,

    /// Directory holding the latest checkpoint
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Directory the trained model is saved to
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Saved model format (json, binary)
    #[arg(long, default_value = "json")]
    format: ssegp_gp::GpFileFormat,

    /// Validation metrics computed after each epoch
    #[arg(long, value_delimiter = ',', default_values = ["nll", "mae"])]
    metrics: Vec<String>,

    /// Where to write per epoch metrics as JSON lines
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

#[derive(Args)]
struct PredictArgs {
    /// Directory of the saved model
    #[arg(long)]
    model_dir: PathBuf,

    /// Features (.npy, N x D)
    #[arg(long)]
    features: PathBuf,

    #[command(flatten)]
    scaling: ScalingArgs,

    /// Where to write predictions (.npy, N x 2: mean and standard deviation),
    /// printed as JSON if omitted
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct EvaluateArgs {
    /// Directory of the saved model
    #[arg(long)]
    model_dir: PathBuf,

    /// Features (.npy, N x D)
    #[arg(long)]
    features: PathBuf,

    /// Targets (.npy, N)
    #[arg(long)]
    targets: PathBuf,

    #[command(flatten)]
    scaling: ScalingArgs,

    /// Write the sharpness report to the given JSON file, or print it if no file is given
    #[arg(long, num_args = 0..=1)]
    sharpness_report: Option<Option<PathBuf>>,

    /// Write the calibration report to the given JSON file, or print it if no file is given
    #[arg(long, num_args = 0..=1)]
    calibration_report: Option<Option<PathBuf>>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Command::Train(args) => commands::train(args),
        Command::Predict(args) => commands::predict(args),
        Command::Evaluate(args) => commands::evaluate(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_train() {
        let cli = Cli::try_parse_from([
            "ssegp",
            "train",
            "--features",
            "x.npy",
            "--targets",
            "y.npy",
            "--val-features",
            "xv.npy",
            "--val-targets",
            "yv.npy",
            "--metrics",
            "nll,sharpness,pis",
            "--patience",
            "5",
            "--format",
            "binary",
        ])
        .unwrap();
        match cli.command {
            Command::Train(args) => {
                assert_eq!(vec!["nll", "sharpness", "pis"], args.metrics);
                assert_eq!(Some(5), args.patience);
                assert_eq!(ssegp_gp::GpFileFormat::Binary, args.format);
                assert_eq!(1000, args.epochs);
            }
            _ => panic!("train subcommand expected"),
        }
    }

    #[test]
    fn test_parse_evaluate_reports() {
        let cli = Cli::try_parse_from([
            "ssegp",
            "evaluate",
            "--model-dir",
            "model",
            "--features",
            "x.npy",
            "--targets",
            "y.npy",
            "--scaling-factor",
            "2.5",
            "--sharpness-report",
            "--calibration-report",
            "calibration.json",
        ])
        .unwrap();
        match cli.command {
            Command::Evaluate(args) => {
                assert_eq!(Some(2.5), args.scaling.scaling_factor);
                assert_eq!(Some(None), args.sharpness_report);
                assert_eq!(
                    Some(Some(PathBuf::from("calibration.json"))),
                    args.calibration_report
                );
            }
            _ => panic!("evaluate subcommand expected"),
        }
    }

    #[test]
    fn test_scaling_conflict() {
        assert!(Cli::try_parse_from([
            "ssegp",
            "predict",
            "--model-dir",
            "model",
            "--features",
            "x.npy",
            "--scaling-factor",
            "2",
            "--scaling-file",
            "sf.txt",
        ])
        .is_err());
    }
}
