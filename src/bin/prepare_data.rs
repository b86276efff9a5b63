use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use fashion_attrs::tasks::FashionTask;

/// Split the FashionAI annotations into per-task image folders:
/// `<data-dir>/train_valid/<task>/{train,val}/<class>/`.
#[derive(Parser, Debug)]
#[command(name = "prepare_data")]
struct Cli {
    /// Root holding `base/Annotations/label.csv`
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Fraction of each task held out for validation
    #[arg(long, default_value_t = 0.1)]
    val_ratio: f64,

    /// Seed for the train/val shuffle
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Only prepare this task
    #[arg(long)]
    task: Option<FashionTask>,
}

/// Class index of a label string such as `nnnynn`: the position of `y`.
fn label_index(label: &str) -> Option<usize> {
    label.find('y')
}

fn parse_annotations(content: &str) -> Result<BTreeMap<String, Vec<(String, usize)>>> {
    let mut by_task: BTreeMap<String, Vec<(String, usize)>> = BTreeMap::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts = line.split(',').collect::<Vec<_>>();
        if parts.len() != 3 {
            bail!("Invalid annotation format at line {}", i + 1);
        }
        let Some(label) = label_index(parts[2]) else {
            bail!("No positive class in label `{}` at line {}", parts[2], i + 1);
        };
        by_task
            .entry(parts[1].to_string())
            .or_default()
            .push((parts[0].to_string(), label));
    }
    Ok(by_task)
}

fn split_items<T>(mut items: Vec<T>, val_ratio: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    items.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_val = (items.len() as f64 * val_ratio).round() as usize;
    let train = items.split_off(n_val.min(items.len()));
    (train, items)
}

fn copy_split(base_dir: &Path, target: &Path, items: &[(String, usize)]) -> Result<()> {
    let copied = AtomicUsize::new(0);
    items.par_iter().try_for_each(|(path, label)| -> Result<()> {
        let src = base_dir.join(path);
        let class_dir = target.join(label.to_string());
        fs::create_dir_all(&class_dir)?;
        let file_name = src
            .file_name()
            .with_context(|| format!("No file name in {}", src.display()))?;
        fs::copy(&src, class_dir.join(file_name))
            .with_context(|| format!("Failed to copy {}", src.display()))?;
        copied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    })?;
    tracing::info!(
        "Copied {} images to {}",
        copied.load(Ordering::Relaxed),
        target.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().compact().with_target(false).init();
    let cli = Cli::parse();

    let base_dir = cli.data_dir.join("base");
    let label_file = base_dir.join("Annotations").join("label.csv");
    let content = fs::read_to_string(&label_file)
        .with_context(|| format!("Failed to read {}", label_file.display()))?;

    for (task_name, items) in parse_annotations(&content)? {
        let task = match task_name.parse::<FashionTask>() {
            Ok(task) => task,
            Err(err) => {
                tracing::warn!("Skipping annotations: {err}");
                continue;
            }
        };
        if cli.task.is_some_and(|only| only != task) {
            continue;
        }

        if let Some((path, label)) = items.iter().find(|(_, l)| *l >= task.num_classes()) {
            bail!("{path}: class {label} out of range for {task}");
        }

        let (train, val) = split_items(items, cli.val_ratio, cli.seed);
        tracing::info!("{task}: {} train, {} val", train.len(), val.len());

        // Every class gets a directory in both splits, even when empty, so
        // class indices agree between them.
        let task_dir = cli.data_dir.join("train_valid").join(task.name());
        for split in ["train", "val"] {
            for class in 0..task.num_classes() {
                fs::create_dir_all(task_dir.join(split).join(class.to_string()))?;
            }
        }
        copy_split(&base_dir, &task_dir.join("train"), &train)?;
        copy_split(&base_dir, &task_dir.join("val"), &val)?;
    }

    Ok(())
}
