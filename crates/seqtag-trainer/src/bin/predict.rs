//! Tag raw text with a trained model, one JSON annotation per input line.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use seqtag_core::text::WordTokenizer;
use seqtag_trainer::{Learner, annotate_batch};

/// CLI arguments
#[derive(Parser)]
#[command(name = "predict")]
#[command(about = "Annotate text with a trained NER tagger")]
#[command(version)]
struct Cli {
    /// Directory written by `train`
    #[arg(short, long, env = "SEQTAG_MODEL")]
    model: PathBuf,

    /// Text file with one document per line (stdin when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Override the saved device; -1 for CPU
    #[arg(long, env = "SEQTAG_CUDA_DEVICE", allow_negative_numbers = true)]
    cuda_device: Option<i32>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();
    let cli = Cli::parse();

    let learner = Learner::load_with_device(&cli.model, cli.cuda_device)
        .with_context(|| format!("loading model from {}", cli.model.display()))?;

    let reader: Box<dyn BufRead> = match &cli.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let lines = reader.lines().collect::<io::Result<Vec<String>>>()?;

    let annotations = annotate_batch(&learner, &WordTokenizer::new(), &lines)?;
    let mut out = BufWriter::new(io::stdout().lock());
    for annotation in &annotations {
        serde_json::to_writer(&mut out, annotation)?;
        writeln!(out)?;
    }
    out.flush()?;

    info!(documents = annotations.len(), "Annotated");
    Ok(())
}
