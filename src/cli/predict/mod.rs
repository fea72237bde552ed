//! Predict command - classify one image offline

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use crate::domain::prediction::to_csv;
use crate::domain::preprocessing::{decode_image, preprocess};
use crate::domain::{
    ClassLabels, ClassificationReport, ColorMode, ImageSize, ModelInfo, PreprocessingConfig,
};

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Keras model file (.h5 / .hdf5)
    #[arg(long, short)]
    pub model: PathBuf,

    /// Image to classify (.jpg, .jpeg, .png, .bmp)
    #[arg(long, short)]
    pub image: PathBuf,

    /// Square edge the image is resized to: 128, 224, 256 or 299
    #[arg(long, short, default_value_t = 128)]
    pub size: u32,

    /// Channel layout fed to the model: grayscale or rgb
    #[arg(long, default_value = "grayscale")]
    pub color_mode: String,

    /// Comma-separated class names; defaults to "Class i" per model output
    #[arg(long, short)]
    pub labels: Option<String>,

    /// Also write the ranking to this CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

pub async fn run(args: PredictArgs) -> anyhow::Result<()> {
    super::bootstrap();

    let settings = PreprocessingConfig::new(
        ImageSize::new(args.size)?,
        args.color_mode.parse::<ColorMode>()?,
    );

    let handle = super::load_model_file(&args.model).await?;
    let labels = resolve_labels(args.labels.as_deref(), handle.info())?;

    let image_bytes = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("Failed to read image {}", args.image.display()))?;

    let probabilities = tokio::task::spawn_blocking(move || {
        let (image, image_info) = decode_image(&image_bytes)?;
        info!(
            width = image_info.width,
            height = image_info.height,
            mode = %image_info.mode,
            "Image decoded"
        );
        handle.predict(&preprocess(&image, &settings))
    })
    .await??;

    let report = ClassificationReport::build(&probabilities, &labels)?;
    print!("{}", render(&report));

    if let Some(path) = &args.csv {
        tokio::fs::write(path, to_csv(&report)?)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("\nSaved ranking to {}", path.display());
    }

    Ok(())
}

/// Labels from the command line, or defaults sized to the model output
fn resolve_labels(labels: Option<&str>, info: &ModelInfo) -> anyhow::Result<ClassLabels> {
    let labels = match labels {
        Some(list) => ClassLabels::from_names(
            list.split(',').map(|name| name.trim().to_string()).collect(),
        )?,
        None => match info.num_outputs() {
            Some(outputs) => ClassLabels::with_defaults(outputs)?,
            None => ClassLabels::default(),
        },
    };

    Ok(labels)
}

fn render(report: &ClassificationReport) -> String {
    let width = report
        .ranking
        .iter()
        .map(|row| row.label.len())
        .max()
        .unwrap_or(0);

    let mut out = format!(
        "Prediction: {} ({})\n\n",
        report.predicted_label, report.confidence_display
    );
    for row in &report.ranking {
        out.push_str(&format!(
            "{:>3}. {:<width$}  {:>7.2}%\n",
            row.rank,
            row.label,
            row.probability * 100.0
        ));
    }
    out
}
