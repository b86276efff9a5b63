use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use burn::{prelude::*, tensor::activation::softmax};
use image::ImageReader;

use crate::{
    augment::predict_transform,
    data::ClassificationBatcher,
    error::{FashionError, Result},
    model::ResNet,
    tasks::FashionTask,
    training::output_rows,
};

/// One line of the question manifest: `path,task,placeholder`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Question {
    pub path: String,
    pub task: String,
}

pub fn manifest_path(data_dir: &Path) -> PathBuf {
    data_dir.join("rank").join("Tests").join("question.csv")
}

pub fn parse_manifest<R: BufRead>(reader: R) -> Result<Vec<Question>> {
    let mut questions = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split(',');
        match (parts.next(), parts.next()) {
            (Some(path), Some(task)) if !path.is_empty() => questions.push(Question {
                path: path.to_string(),
                task: task.to_string(),
            }),
            _ => {
                return Err(FashionError::Manifest {
                    line: i + 1,
                    content: line.to_string(),
                })
            }
        }
    }
    Ok(questions)
}

/// `path,task,p0;p1;...` with eight decimals per probability.
pub fn format_line(path: &str, task: &str, probs: &[f32]) -> String {
    let probs = probs
        .iter()
        .map(|p| format!("{p:.8}"))
        .collect::<Vec<_>>()
        .join(";");
    format!("{path},{task},{probs}")
}

/// Class probabilities averaged over the ten crops of the image at `path`.
pub fn predict_image<B: Backend>(
    model: &ResNet<B>,
    batcher: &ClassificationBatcher<B>,
    path: &Path,
) -> Result<Vec<f32>> {
    let img = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|source| FashionError::Image {
            path: path.to_path_buf(),
            source,
        })?;

    let crops = predict_transform(img)?;
    let images = batcher.images(&crops);

    let output = softmax(model.forward(images), 1).mean_dim(0);

    Ok(output_rows(output)?.into_iter().next().unwrap_or_default())
}

/// Predict every manifest image belonging to `task` and write
/// `<submission_dir>/<task>.csv`. Returns the number of lines written.
pub fn predict<B: Backend>(
    model: &ResNet<B>,
    task: FashionTask,
    data_dir: &Path,
    submission_dir: &Path,
    device: &B::Device,
) -> Result<usize> {
    tracing::info!("Training Finished. Starting Prediction.");

    let manifest = BufReader::new(File::open(manifest_path(data_dir))?);
    let questions = parse_manifest(manifest)?
        .into_iter()
        .filter(|q| q.task == task.name())
        .collect::<Vec<_>>();

    fs::create_dir_all(submission_dir)?;
    let out_path = submission_dir.join(format!("{task}.csv"));
    let mut out = BufWriter::new(File::create(&out_path)?);

    let batcher = ClassificationBatcher::<B>::new(device.clone());
    let n = questions.len();
    let report_every = (n / 20).max(1);

    for (i, question) in questions.iter().enumerate() {
        let probs = predict_image(model, &batcher, &data_dir.join("rank").join(&question.path))?;
        writeln!(out, "{}", format_line(&question.path, &question.task, &probs))?;

        if (i + 1) % report_every == 0 || i + 1 == n {
            tracing::info!(
                "Predicted {}/{} ({:.0}%)",
                i + 1,
                n,
                100.0 * (i + 1) as f64 / n as f64
            );
        }
    }
    out.flush()?;

    tracing::info!("Wrote {n} predictions to {}", out_path.display());
    Ok(n)
}
