//! Checkpoints and their on-disk safetensors representation.
//!
//! A checkpoint is a single `.safetensors` file. Parameters are the tensors;
//! everything else lives in the string-valued `__metadata__` header:
//!
//! | key | meaning | default |
//! |---|---|---|
//! | `sr` | sample rate, `40000` or `40k` | required |
//! | `f0` | pitch guidance flag, `1`/`0` | `1` |
//! | `version` | model version tag | `v1` |
//! | `vocoder` | vocoder name | `HiFi-GAN` |
//! | `config` | synthesizer config, JSON | `null` |
//! | `info` | free-form provenance | none |
//! | `layout` | `inference` or `training` | `inference` |
//! | `parameter_order` | JSON array of parameter names | sorted names |
//!
//! The container sorts tensors on write, so insertion order is carried in
//! `parameter_order`.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use safetensors::tensor::TensorView;
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{BlendError, Result, StoragePrecision, Tensor};

/// Vocoder assumed for checkpoints that do not name one.
pub const DEFAULT_VOCODER: &str = "HiFi-GAN";

/// Version tag assumed for checkpoints that do not carry one.
pub const DEFAULT_VERSION: &str = "v1";

/// Parameters containing this marker belong to the posterior encoder, which
/// only exists in training snapshots.
pub const TRAINING_ONLY_MARKER: &str = "enc_q";

mod keys {
    pub const SAMPLE_RATE: &str = "sr";
    pub const PITCH_GUIDANCE: &str = "f0";
    pub const VERSION: &str = "version";
    pub const VOCODER: &str = "vocoder";
    pub const CONFIG: &str = "config";
    pub const INFO: &str = "info";
    pub const LAYOUT: &str = "layout";
    pub const PARAMETER_ORDER: &str = "parameter_order";
}

/// What kind of snapshot a checkpoint file holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointLayout {
    /// Inference weights only.
    #[default]
    Inference,
    /// Full training snapshot including the posterior encoder.
    Training,
}

impl CheckpointLayout {
    /// Name stored in the `layout` metadata key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inference => "inference",
            Self::Training => "training",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "inference" => Ok(Self::Inference),
            "training" => Ok(Self::Training),
            other => Err(BlendError::Malformed(format!("unknown layout '{other}'"))),
        }
    }
}

/// Scalar metadata carried alongside the parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointMetadata {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Model version tag.
    pub version: String,
    /// Whether the model uses pitch (f0) features.
    pub pitch_guidance: bool,
    /// Vocoder name; `None` means [`DEFAULT_VOCODER`].
    pub vocoder: Option<String>,
    /// Opaque synthesizer configuration, copied verbatim.
    pub config: serde_json::Value,
    /// Provenance text.
    pub info: Option<String>,
    /// Snapshot layout.
    pub layout: CheckpointLayout,
}

impl CheckpointMetadata {
    /// Metadata for an inference checkpoint at `sample_rate` with defaults elsewhere.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            version: DEFAULT_VERSION.to_string(),
            pitch_guidance: true,
            vocoder: None,
            config: serde_json::Value::Null,
            info: None,
            layout: CheckpointLayout::Inference,
        }
    }

    /// Vocoder name, falling back to [`DEFAULT_VOCODER`].
    pub fn vocoder(&self) -> &str {
        self.vocoder.as_deref().unwrap_or(DEFAULT_VOCODER)
    }

    fn from_header(header: &HashMap<String, String>) -> Result<Self> {
        let sample_rate = header
            .get(keys::SAMPLE_RATE)
            .ok_or_else(|| BlendError::Malformed("missing metadata key 'sr'".to_string()))
            .and_then(|s| parse_sample_rate(s))?;

        let pitch_guidance = match header.get(keys::PITCH_GUIDANCE) {
            Some(value) => parse_flag(value)?,
            None => true,
        };

        let config = match header.get(keys::CONFIG) {
            Some(json) => serde_json::from_str(json)?,
            None => serde_json::Value::Null,
        };

        let layout = match header.get(keys::LAYOUT) {
            Some(value) => CheckpointLayout::parse(value)?,
            None => CheckpointLayout::Inference,
        };

        Ok(Self {
            sample_rate,
            version: header
                .get(keys::VERSION)
                .cloned()
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            pitch_guidance,
            vocoder: header.get(keys::VOCODER).cloned(),
            config,
            info: header.get(keys::INFO).cloned(),
            layout,
        })
    }

    fn to_header(&self) -> Result<HashMap<String, String>> {
        let mut header = HashMap::new();
        header.insert(keys::SAMPLE_RATE.to_string(), self.sample_rate.to_string());
        header.insert(
            keys::PITCH_GUIDANCE.to_string(),
            if self.pitch_guidance { "1" } else { "0" }.to_string(),
        );
        header.insert(keys::VERSION.to_string(), self.version.clone());
        if let Some(vocoder) = &self.vocoder {
            header.insert(keys::VOCODER.to_string(), vocoder.clone());
        }
        header.insert(keys::CONFIG.to_string(), serde_json::to_string(&self.config)?);
        if let Some(info) = &self.info {
            header.insert(keys::INFO.to_string(), info.clone());
        }
        header.insert(keys::LAYOUT.to_string(), self.layout.as_str().to_string());
        Ok(header)
    }
}

/// Parse a sample rate written as Hz (`48000`) or kHz shorthand (`48k`).
pub fn parse_sample_rate(value: &str) -> Result<u32> {
    let value = value.trim();
    let invalid = || BlendError::Malformed(format!("invalid sample rate '{value}'"));

    match value.strip_suffix(['k', 'K']) {
        Some(khz) => khz
            .parse::<u32>()
            .ok()
            .and_then(|k| k.checked_mul(1000))
            .ok_or_else(invalid),
        None => value.parse::<u32>().map_err(|_| invalid()),
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim() {
        "1" | "true" | "True" => Ok(true),
        "0" | "false" | "False" => Ok(false),
        other => Err(BlendError::Malformed(format!("invalid f0 flag '{other}'"))),
    }
}

/// Named, ordered parameters plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Parameters in insertion order.
    pub parameters: IndexMap<String, Tensor>,
    /// Scalar metadata.
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Create an empty checkpoint.
    pub fn new(metadata: CheckpointMetadata) -> Self {
        Self {
            parameters: IndexMap::new(),
            metadata,
        }
    }

    /// Append a parameter, builder style.
    pub fn with_parameter(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.parameters.insert(name.into(), tensor);
        self
    }

    /// Parameter by name.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.parameters.get(name)
    }

    /// Parameter names in order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Whether the checkpoint has no parameters.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Reduce a training snapshot to its inference weights.
    ///
    /// Returns the number of parameters removed. Inference checkpoints are
    /// left untouched.
    pub fn extract_inference_weights(&mut self) -> usize {
        if self.metadata.layout != CheckpointLayout::Training {
            return 0;
        }
        let before = self.parameters.len();
        self.parameters
            .retain(|name, _| !name.contains(TRAINING_ONLY_MARKER));
        self.metadata.layout = CheckpointLayout::Inference;
        before - self.parameters.len()
    }

    /// Parse a checkpoint from safetensors bytes.
    pub fn from_safetensors_bytes(bytes: &[u8]) -> Result<Self> {
        let (_, header) = SafeTensors::read_metadata(bytes)?;
        let header = header.metadata().clone().unwrap_or_default();
        let metadata = CheckpointMetadata::from_header(&header)?;

        let tensors = SafeTensors::deserialize(bytes)?;
        let mut sorted: Vec<String> = tensors.names().into_iter().cloned().collect();
        sorted.sort();

        let order = match header.get(keys::PARAMETER_ORDER) {
            Some(json) => ordered_names(serde_json::from_str(json)?, sorted)?,
            None => sorted,
        };

        let mut parameters = IndexMap::with_capacity(order.len());
        for name in order {
            let view = tensors.tensor(&name)?;
            let precision = StoragePrecision::from_dtype(view.dtype()).ok_or_else(|| {
                BlendError::Malformed(format!(
                    "unsupported dtype {:?} for tensor {}",
                    view.dtype(),
                    name
                ))
            })?;
            let tensor = Tensor::from_le_bytes(precision, view.shape(), view.data())?;
            parameters.insert(name, tensor);
        }

        Ok(Self {
            parameters,
            metadata,
        })
    }

    /// Serialize to safetensors bytes.
    pub fn to_safetensors_bytes(&self) -> Result<Vec<u8>> {
        let mut header = self.metadata.to_header()?;
        let order: Vec<&str> = self.parameters.keys().map(String::as_str).collect();
        header.insert(
            keys::PARAMETER_ORDER.to_string(),
            serde_json::to_string(&order)?,
        );

        let buffers: Vec<(&str, &Tensor, Vec<u8>)> = self
            .parameters
            .iter()
            .map(|(name, tensor)| (name.as_str(), tensor, tensor.to_le_bytes()))
            .collect();

        let views = buffers
            .iter()
            .map(|(name, tensor, bytes)| {
                TensorView::new(tensor.precision().dtype(), tensor.shape().to_vec(), bytes)
                    .map(|view| (*name, view))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(safetensors::serialize(views, &Some(header))?)
    }
}

/// Apply a stored parameter order to the names actually present.
fn ordered_names(listed: Vec<String>, mut present: Vec<String>) -> Result<Vec<String>> {
    let available: HashSet<&String> = present.iter().collect();
    if let Some(missing) = listed.iter().find(|name| !available.contains(name)) {
        return Err(BlendError::Malformed(format!(
            "parameter_order names '{missing}' which is not in the file"
        )));
    }

    let listed_set: HashSet<&String> = listed.iter().collect();
    present.retain(|name| !listed_set.contains(name));

    let mut seen = HashSet::new();
    let mut order: Vec<String> = listed
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect();
    order.extend(present);
    Ok(order)
}

/// Loads and persists checkpoints.
pub trait CheckpointStore: Send + Sync {
    /// Read the checkpoint at `path`.
    ///
    /// Fails with [`BlendError::LoadFailure`] on unreadable or malformed input.
    fn load(&self, path: &Path) -> Result<Checkpoint>;

    /// Write `checkpoint` to `path`, creating parent directories.
    ///
    /// Fails with [`BlendError::SaveFailure`] on write errors.
    fn save(&self, checkpoint: &Checkpoint, path: &Path) -> Result<()>;
}

/// Store for single-file safetensors checkpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetensorsStore;

impl SafetensorsStore {
    /// Create a store.
    pub fn new() -> Self {
        Self
    }
}

impl CheckpointStore for SafetensorsStore {
    fn load(&self, path: &Path) -> Result<Checkpoint> {
        info!("Loading checkpoint from {:?}", path);
        let load = || -> Result<Checkpoint> {
            let bytes = std::fs::read(path)?;
            let mut checkpoint = Checkpoint::from_safetensors_bytes(&bytes)?;
            let stripped = checkpoint.extract_inference_weights();
            if stripped > 0 {
                debug!("Dropped {} training-only parameters", stripped);
            }
            Ok(checkpoint)
        };

        load().map_err(|e| BlendError::LoadFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn save(&self, checkpoint: &Checkpoint, path: &Path) -> Result<()> {
        info!("Saving checkpoint to {:?}", path);
        write_atomically(checkpoint, path).map_err(|e| BlendError::SaveFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Write through a temporary sibling file so a failed save leaves nothing behind.
fn write_atomically(checkpoint: &Checkpoint, path: &Path) -> Result<()> {
    let bytes = checkpoint.to_safetensors_bytes()?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut file = tempfile::NamedTempFile::new_in(&dir)?;
    file.write_all(&bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    debug!("Wrote {} bytes to {:?}", bytes.len(), path);
    Ok(())
}
