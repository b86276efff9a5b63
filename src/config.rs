use std::path::PathBuf;

use burn::{
    optim::{decay::WeightDecayConfig, momentum::MomentumConfig, SgdConfig},
    prelude::*,
};
use clap::Parser;

use crate::error::{FashionError, Result};
use crate::model::Backbone;
use crate::tasks::FashionTask;

/// Fine-tune an ImageNet backbone on one FashionAI attribute task, then
/// write the task's submission file.
#[derive(Parser, Debug, Clone)]
#[command(name = "fashion-attrs", version)]
pub struct Args {
    /// Name of the classification task
    #[arg(long, default_value = "skirt_length_labels")]
    pub task: FashionTask,

    /// Distinguishes different experiments on the same task
    #[arg(long, default_value = "")]
    pub suffix: String,

    /// Saved parameter file, overrides `<output-dir>/<task><suffix>/<task><suffix>`
    #[arg(long)]
    pub parameter: Option<PathBuf>,

    /// Backbone architecture
    #[arg(long, default_value = "resnet50")]
    pub model: Backbone,

    /// Number of preprocessing workers
    #[arg(short = 'j', long, visible_alias = "num_workers", default_value_t = 4)]
    pub num_workers: usize,

    /// Number of GPUs to use, 0 indicates CPU only
    #[arg(long, default_value_t = 0)]
    pub num_gpus: usize,

    /// Number of training epochs
    #[arg(long, default_value_t = 40)]
    pub epochs: usize,

    /// Log running loss every N batches, 0 disables
    #[arg(long, visible_alias = "log_interval", default_value_t = 0)]
    pub log_interval: usize,

    /// Mini-batch size per device
    #[arg(short = 'b', long, default_value_t = 64)]
    pub batch_size: usize,

    /// Initial learning rate
    #[arg(long = "lr", visible_alias = "learning-rate", default_value_t = 0.001)]
    pub lr: f64,

    /// SGD momentum
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    /// Weight decay
    #[arg(long = "weight-decay", visible_alias = "wd", default_value_t = 1e-4)]
    pub wd: f64,

    /// Learning rate decay ratio
    #[arg(long, default_value_t = 0.75)]
    pub lr_factor: f64,

    /// Comma separated epochs at which the learning rate decays
    #[arg(long, default_value = "10,20,30")]
    pub lr_steps: String,

    /// Best validation loss reached by a previous run
    #[arg(long, visible_alias = "best_val_loss", default_value_t = f64::INFINITY)]
    pub best_val_loss: f64,

    /// Root holding `train_valid/` and `rank/`
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Where experiment directories (checkpoints, logs) are created
    #[arg(long, default_value = "train")]
    pub output_dir: PathBuf,

    /// Cache for downloaded ImageNet weights
    #[arg(long, default_value = "models")]
    pub weights_dir: PathBuf,

    /// Where submission CSVs are written
    #[arg(long, default_value = "submission")]
    pub submission_dir: PathBuf,

    /// Seed for shuffling and initialisation
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Skip training and predict with the saved parameters
    #[arg(long)]
    pub predict_only: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// `<task><suffix>`, the experiment name.
    pub fn experiment(&self) -> String {
        format!("{}{}", self.task, self.suffix)
    }

    pub fn experiment_dir(&self) -> PathBuf {
        self.output_dir.join(self.experiment())
    }

    /// Checkpoint path without the recorder's extension.
    pub fn checkpoint_stem(&self) -> PathBuf {
        self.parameter
            .as_ref()
            .map(|path| path.with_extension(""))
            .unwrap_or_else(|| self.experiment_dir().join(self.experiment()))
    }

    pub fn training_config(&self) -> Result<TrainingConfig> {
        let optimizer = SgdConfig::new()
            .with_momentum(Some(MomentumConfig {
                momentum: self.momentum,
                dampening: 0.,
                nesterov: false,
            }))
            .with_weight_decay(Some(WeightDecayConfig::new(self.wd)));

        Ok(
            TrainingConfig::new(optimizer, self.task, self.model, parse_lr_steps(&self.lr_steps)?)
                .with_num_epochs(self.epochs)
                .with_batch_size(self.batch_size * self.num_gpus.max(1))
                .with_num_workers(self.num_workers)
                .with_num_gpus(self.num_gpus)
                .with_log_interval(self.log_interval)
                .with_seed(self.seed)
                .with_learning_rate(self.lr)
                .with_lr_factor(self.lr_factor)
                .with_best_val_loss(
                    self.best_val_loss
                        .is_finite()
                        .then_some(self.best_val_loss),
                ),
        )
    }
}

/// Parse `"10,20,30"` into epochs. Blank entries are ignored.
pub fn parse_lr_steps(steps: &str) -> Result<Vec<usize>> {
    steps
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| FashionError::InvalidLrStep(s.to_string()))
        })
        .collect()
}

#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer: SgdConfig,
    pub task: FashionTask,
    pub backbone: Backbone,
    pub lr_steps: Vec<usize>,
    #[config(default = 40)]
    pub num_epochs: usize,
    /// Total batch size across devices.
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 0)]
    pub num_gpus: usize,
    #[config(default = 0)]
    pub log_interval: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 0.001)]
    pub learning_rate: f64,
    #[config(default = 0.75)]
    pub lr_factor: f64,
    /// Loss a new checkpoint has to beat; `None` accepts the first epoch.
    pub best_val_loss: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lr_steps_parse() {
        assert_eq!(parse_lr_steps("10,20,30").unwrap(), vec![10, 20, 30]);
        assert_eq!(parse_lr_steps(" 5 , 15,").unwrap(), vec![5, 15]);
        assert!(parse_lr_steps("").unwrap().is_empty());
        assert!(matches!(
            parse_lr_steps("10,abc"),
            Err(FashionError::InvalidLrStep(s)) if s == "abc"
        ));
    }

    #[test]
    fn default_arguments() {
        let args = Args::parse_from(["fashion-attrs"]);
        assert_eq!(args.task, FashionTask::SkirtLength);
        assert_eq!(args.model, Backbone::ResNet50);
        assert_eq!(args.epochs, 40);
        assert_eq!(args.batch_size, 64);
        assert!(args.best_val_loss.is_infinite());
        assert_eq!(
            args.checkpoint_stem(),
            PathBuf::from("train/skirt_length_labels/skirt_length_labels")
        );
    }

    #[test]
    fn batch_size_scales_with_gpus() {
        let args = Args::parse_from([
            "fashion-attrs",
            "--task",
            "coat_length_labels",
            "--suffix",
            "_r18",
            "--num-gpus",
            "2",
            "-b",
            "32",
            "--wd",
            "0.0005",
            "--learning-rate",
            "0.01",
        ]);
        let config = args.training_config().unwrap();
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.task, FashionTask::CoatLength);
        assert_eq!(config.learning_rate, 0.01);
        assert_eq!(config.lr_steps, vec![10, 20, 30]);
        assert_eq!(args.experiment(), "coat_length_labels_r18");
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Args::parse_from(["fashion-attrs"]).training_config().unwrap();
        assert_eq!(config.best_val_loss, None);
        config.save(&path).unwrap();
        let loaded = TrainingConfig::load(&path).unwrap();
        assert_eq!(loaded.best_val_loss, None);
        assert_eq!(loaded.lr_steps, vec![10, 20, 30]);
        assert_eq!(loaded.task, FashionTask::SkirtLength);

        let args = Args::parse_from(["fashion-attrs", "--best-val-loss", "0.42"]);
        let config = args.training_config().unwrap();
        config.save(&path).unwrap();
        assert_eq!(TrainingConfig::load(&path).unwrap().best_val_loss, Some(0.42));
    }

    #[test]
    fn explicit_parameter_overrides_checkpoint() {
        let args = Args::parse_from(["fashion-attrs", "--parameter", "runs/best.mpk"]);
        assert_eq!(args.checkpoint_stem(), PathBuf::from("runs/best"));
    }
}
