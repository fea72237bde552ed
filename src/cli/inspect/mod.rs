//! Inspect command - print a model's metadata and summary

use std::path::PathBuf;

use clap::Args;

use crate::domain::ModelInfo;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Keras model file (.h5 / .hdf5)
    #[arg(long, short)]
    pub model: PathBuf,
}

pub async fn run(args: InspectArgs) -> anyhow::Result<()> {
    super::bootstrap();

    let handle = super::load_model_file(&args.model).await?;
    print!("{}", render(handle.info()));

    Ok(())
}

fn render(info: &ModelInfo) -> String {
    format!(
        "File: {}\nInput shape: {}\nOutput shape: {}\n\n{}",
        info.file_name,
        info.input_shape,
        info.output_shape,
        info.summary_text()
    )
}
