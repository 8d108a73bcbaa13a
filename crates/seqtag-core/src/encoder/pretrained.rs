//! Pretrained checkpoint resolution and weight import.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::Tensor;
use candle_nn::VarMap;
use tracing::{debug, info, warn};

use crate::error::{Result, SeqTagError};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

/// Files making up a transformer checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PretrainedFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl PretrainedFiles {
    /// Resolve `model` as a local directory, or else as a Hugging Face Hub id.
    ///
    /// A string that can only be a filesystem path but names no directory is
    /// an error rather than a download attempt.
    pub fn resolve(model: &str) -> Result<Self> {
        let dir = Path::new(model);
        if dir.is_dir() {
            return Self::from_dir(dir);
        }
        if dir.exists() || !is_hub_id(model) {
            return Err(SeqTagError::ModelLoad(format!(
                "{model} is not a checkpoint directory"
            )));
        }
        Self::from_hub(model)
    }

    /// Checkpoint stored in a local directory.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let files = Self {
            config: dir.join(CONFIG_FILE),
            tokenizer: dir.join(TOKENIZER_FILE),
            weights: dir.join(WEIGHTS_FILE),
        };
        for path in [&files.config, &files.tokenizer, &files.weights] {
            if !path.is_file() {
                return Err(SeqTagError::ModelLoad(format!(
                    "missing checkpoint file {}",
                    path.display()
                )));
            }
        }
        debug!(dir = %dir.display(), "Resolved local checkpoint");
        Ok(files)
    }

    /// Download (or reuse the cached copy of) a Hub checkpoint.
    pub fn from_hub(model_id: &str) -> Result<Self> {
        use hf_hub::api::sync::Api;

        let api = Api::new()
            .map_err(|e| SeqTagError::ModelLoad(format!("Hugging Face API: {e}")))?;
        let repo = api.model(model_id.to_string());
        let fetch = |name: &str| {
            repo.get(name).map_err(|e| {
                SeqTagError::ModelLoad(format!("failed to download {name} for {model_id}: {e}"))
            })
        };

        let files = Self {
            config: fetch(CONFIG_FILE)?,
            tokenizer: fetch(TOKENIZER_FILE)?,
            weights: fetch(WEIGHTS_FILE)?,
        };
        info!(model = model_id, "Resolved Hub checkpoint");
        Ok(files)
    }

    /// Parsed `config.json`.
    pub fn read_config(&self) -> Result<serde_json::Value> {
        let contents = std::fs::read_to_string(&self.config)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// `name` or `org/name`, as the Hub spells repository ids.
fn is_hub_id(model: &str) -> bool {
    let mut parts = model.split('/');
    let valid = |part: &str| {
        !part.is_empty()
            && !part.starts_with('.')
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => valid(name),
        (Some(org), Some(name), None) => valid(org) && valid(name),
        _ => false,
    }
}

/// Outcome of a weight import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Parameters overwritten from the checkpoint
    pub loaded: usize,
    /// Parameters left at their fresh initialisation
    pub initialised: Vec<String>,
}

/// Canonical parameter name: no `bert.` prefix, `weight`/`bias` layer norms.
fn normalize(name: &str) -> String {
    let name = name.strip_prefix("bert.").unwrap_or(name);
    if let Some(stem) = name.strip_suffix(".gamma") {
        format!("{stem}.weight")
    } else if let Some(stem) = name.strip_suffix(".beta") {
        format!("{stem}.bias")
    } else {
        name.to_string()
    }
}

/// Overwrite the variables under `prefix` with matching checkpoint tensors.
///
/// Variables outside `prefix` (the tag decoder) and those absent from the
/// checkpoint keep their initial values.
pub fn copy_pretrained(varmap: &VarMap, weights: &Path, prefix: &str) -> Result<LoadSummary> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| SeqTagError::ModelLoad("parameter map lock poisoned".into()))?;
    let Some(device) = data.values().next().map(|var| var.device().clone()) else {
        return Ok(LoadSummary::default());
    };

    let checkpoint: HashMap<String, Tensor> = candle_core::safetensors::load(weights, &device)?
        .into_iter()
        .map(|(name, tensor)| (normalize(&name), tensor))
        .collect();

    let mut summary = LoadSummary::default();
    let mut names: Vec<&String> = data.keys().filter(|n| n.starts_with(prefix)).collect();
    names.sort();
    for name in names {
        let var = &data[name];
        let key = normalize(&name[prefix.len()..]);
        match checkpoint.get(&key) {
            Some(tensor) if tensor.dims() == var.dims() => {
                var.set(&tensor.to_dtype(var.dtype())?)?;
                summary.loaded += 1;
            }
            Some(tensor) => {
                warn!(
                    name = name.as_str(),
                    expected = ?var.dims(),
                    found = ?tensor.dims(),
                    "Checkpoint tensor shape mismatch"
                );
                summary.initialised.push(name.clone());
            }
            None => summary.initialised.push(name.clone()),
        }
    }

    info!(
        loaded = summary.loaded,
        initialised = summary.initialised.len(),
        "Imported pretrained weights"
    );
    Ok(summary)
}
