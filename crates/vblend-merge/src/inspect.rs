//! Human-readable checkpoint summaries.

use std::fmt;

use crate::{Checkpoint, CheckpointLayout, StoragePrecision};

/// One parameter line of a [`CheckpointSummary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSummary {
    /// Parameter name.
    pub name: String,
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Storage precision.
    pub precision: StoragePrecision,
}

/// Structure of a checkpoint without its numeric contents.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointSummary {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Model version tag.
    pub version: String,
    /// Pitch guidance flag.
    pub pitch_guidance: bool,
    /// Vocoder name, defaulted when absent.
    pub vocoder: String,
    /// Synthesizer configuration.
    pub config: serde_json::Value,
    /// Provenance text, if any.
    pub info: Option<String>,
    /// Snapshot layout.
    pub layout: CheckpointLayout,
    /// Parameters in order.
    pub parameters: Vec<ParameterSummary>,
}

impl CheckpointSummary {
    /// Summarize `checkpoint`.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let metadata = &checkpoint.metadata;
        Self {
            sample_rate: metadata.sample_rate,
            version: metadata.version.clone(),
            pitch_guidance: metadata.pitch_guidance,
            vocoder: metadata.vocoder().to_string(),
            config: metadata.config.clone(),
            info: metadata.info.clone(),
            layout: metadata.layout,
            parameters: checkpoint
                .parameters
                .iter()
                .map(|(name, tensor)| ParameterSummary {
                    name: name.clone(),
                    shape: tensor.shape().to_vec(),
                    precision: tensor.precision(),
                })
                .collect(),
        }
    }

    /// Total number of scalar values across all parameters.
    pub fn total_elements(&self) -> usize {
        self.parameters
            .iter()
            .map(|p| p.shape.iter().product::<usize>())
            .sum()
    }
}

impl fmt::Display for CheckpointSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sr: {}", self.sample_rate)?;
        writeln!(f, "version: {}", self.version)?;
        writeln!(f, "f0: {}", u8::from(self.pitch_guidance))?;
        writeln!(f, "vocoder: {}", self.vocoder)?;
        writeln!(f, "layout: {}", self.layout.as_str())?;
        writeln!(f, "config: {}", self.config)?;
        if let Some(info) = &self.info {
            writeln!(f, "info: {info}")?;
        }
        writeln!(
            f,
            "parameters: {} ({} values)",
            self.parameters.len(),
            self.total_elements()
        )?;
        for p in &self.parameters {
            writeln!(f, "  {}: {:?} {}", p.name, p.shape, p.precision)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CheckpointMetadata, Tensor};

    #[test]
    fn test_summary_lists_parameters_in_order() {
        let mut metadata = CheckpointMetadata::new(48000);
        metadata.config = serde_json::json!([1025, 32, 192, {"upsample_rates": [10, 8]}]);
        metadata.info = Some("Blended a (sid:0) and b (sid:1) with 0 layer-specific rules".into());
        let checkpoint = Checkpoint::new(metadata)
            .with_parameter("enc_p.emb_phone.weight", Tensor::from_shape_vec(&[2, 3], vec![0.0; 6]).unwrap())
            .with_parameter(
                "emb_g.weight",
                Tensor::from_f32(
                    Tensor::from_shape_vec(&[4], vec![0.0; 4]).unwrap().to_f32(),
                    StoragePrecision::F16,
                ),
            );

        let summary = CheckpointSummary::from_checkpoint(&checkpoint);
        assert_eq!(summary.total_elements(), 10);
        assert_eq!(summary.vocoder, "HiFi-GAN");

        let text = summary.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "sr: 48000");
        assert!(lines.contains(&r#"config: [1025,32,192,{"upsample_rates":[10,8]}]"#));
        assert!(lines.contains(&"parameters: 2 (10 values)"));
        let enc = lines.iter().position(|l| l.contains("enc_p.emb_phone.weight")).unwrap();
        let emb = lines.iter().position(|l| l.contains("emb_g.weight")).unwrap();
        assert!(enc < emb);
        assert!(lines[emb].ends_with(&StoragePrecision::F16.to_string()));
    }
}
