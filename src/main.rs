use clap::Parser;
use image_classifier_studio::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => cli::serve::run(args).await,
        Command::Predict(args) => cli::predict::run(args).await,
        Command::Inspect(args) => cli::inspect::run(args).await,
    }
}
