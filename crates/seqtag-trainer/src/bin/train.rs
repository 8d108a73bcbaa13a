//! Train a BERT tagger on a BIO TSV or JSON Lines dataset.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use seqtag_core::LearnerConfig;
use seqtag_core::tagging::LabelSpace;
use seqtag_trainer::{BertPipeline, load_documents, validate_documents};

/// CLI arguments
#[derive(Parser)]
#[command(name = "train")]
#[command(about = "Fine-tune a transformer NER tagger")]
#[command(version)]
struct Cli {
    /// Training data (`.jsonl` for JSON Lines, otherwise BIO TSV)
    #[arg(short, long)]
    data: PathBuf,

    /// Output directory for the trained model
    #[arg(short, long)]
    output: PathBuf,

    /// JSON file with learner hyperparameters
    #[arg(short, long, env = "SEQTAG_CONFIG")]
    config: Option<PathBuf>,

    /// Entity types (inferred from the data when omitted)
    #[arg(short, long, value_delimiter = ',')]
    entities: Vec<String>,

    /// Hub id or local directory of the pretrained checkpoint
    #[arg(long, env = "SEQTAG_PRETRAINED_MODEL")]
    pretrained_model: Option<String>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    epochs: Option<usize>,

    /// -1 for CPU
    #[arg(long, env = "SEQTAG_CUDA_DEVICE", allow_negative_numbers = true)]
    cuda_device: Option<i32>,

    /// Use a CRF tag decoder
    #[arg(long)]
    crf: bool,
}

impl Cli {
    fn learner_config(&self) -> Result<LearnerConfig> {
        let mut config = match &self.config {
            Some(path) => LearnerConfig::from_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => LearnerConfig::default(),
        };
        if let Some(model) = &self.pretrained_model {
            config = config.with_pretrained_model(model.clone());
        }
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if let Some(learning_rate) = self.learning_rate {
            config = config.with_learning_rate(learning_rate);
        }
        if let Some(epochs) = self.epochs {
            config = config.with_epochs(epochs);
        }
        if let Some(device) = self.cuda_device {
            config = config.with_cuda_device(device);
        }
        if self.crf {
            config = config.with_crf(true);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = cli.learner_config()?;
    let documents = load_documents(&cli.data)
        .with_context(|| format!("loading {}", cli.data.display()))?;

    let entities: Vec<String> = if cli.entities.is_empty() {
        LabelSpace::from_documents(&documents)?
            .entity_types()
            .into_iter()
            .map(str::to_string)
            .collect()
    } else {
        cli.entities.clone()
    };
    info!(?entities, documents = documents.len(), "Starting training");

    let pipeline = BertPipeline::new(entities.as_slice(), config)?;
    validate_documents(&documents, pipeline.labels())?;

    let (name, mut learner) = pipeline.learner().context("building learner")?;
    info!(pipeline = pipeline.name(), learner = name, "Pipeline ready");

    let report = learner.train_with_backoff(&documents)?;
    info!(
        steps = report.steps,
        batch_size = report.batch_size,
        truncated_documents = report.truncated_documents,
        final_loss = ?report.final_loss(),
        "Training finished"
    );

    learner
        .save(&cli.output)
        .with_context(|| format!("saving model to {}", cli.output.display()))?;
    info!(output = %cli.output.display(), "Model saved");
    Ok(())
}
