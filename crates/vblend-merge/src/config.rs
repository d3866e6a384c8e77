//! Blend request configuration, typically loaded from YAML.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::reconcile::SPEAKER_EMBEDDING;
use crate::{BlendError, BlendRule, Result, StoragePrecision};

/// A source checkpoint and the nominal speaker it represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    /// Path to the checkpoint file.
    pub path: PathBuf,

    /// Speaker (identity) index, used only for provenance text.
    #[serde(default, alias = "sid")]
    pub identity_index: i64,
}

impl ModelRef {
    /// Create a model reference.
    pub fn new(path: impl Into<PathBuf>, identity_index: i64) -> Self {
        Self {
            path: path.into(),
            identity_index,
        }
    }
}

/// Everything one blend call needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendRequest {
    /// Where the blended checkpoint is written.
    pub output_path: PathBuf,

    /// Primary model; a coefficient of 1.0 keeps it exclusively.
    #[serde(alias = "model1")]
    pub primary: ModelRef,

    /// Secondary model.
    #[serde(alias = "model2")]
    pub secondary: ModelRef,

    /// Ordered layer rules, later rules overriding earlier ones.
    #[serde(default, alias = "blend_rules")]
    pub rules: Vec<BlendRule>,

    /// Coefficient for layers no rule matches, clamped into `[0, 1]`.
    #[serde(default = "default_weight")]
    pub default_weight: f32,

    /// Storage format of the blended parameters.
    #[serde(default)]
    pub precision: StoragePrecision,

    /// Blend layers on the rayon thread pool.
    #[serde(default)]
    pub parallel: bool,

    /// Parameters whose leading dimension may differ between the models.
    #[serde(default = "default_variable_cardinality")]
    pub variable_cardinality: Vec<String>,
}

fn default_weight() -> f32 {
    0.5
}

fn default_variable_cardinality() -> Vec<String> {
    vec![SPEAKER_EMBEDDING.to_string()]
}

impl BlendRequest {
    /// Create a request with default weight, precision and designations.
    pub fn new(output_path: impl Into<PathBuf>, primary: ModelRef, secondary: ModelRef) -> Self {
        Self {
            output_path: output_path.into(),
            primary,
            secondary,
            rules: Vec::new(),
            default_weight: default_weight(),
            precision: StoragePrecision::default(),
            parallel: false,
            variable_cardinality: default_variable_cardinality(),
        }
    }

    /// Load a request from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a request from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validate the request.
    ///
    /// Out-of-range default weights are not an error here; they are clamped
    /// when coefficients are resolved.
    pub fn validate(&self) -> Result<()> {
        if self.output_path.as_os_str().is_empty() {
            return Err(BlendError::InvalidConfig("output_path is empty".to_string()));
        }
        for (label, model) in [("primary", &self.primary), ("secondary", &self.secondary)] {
            if model.path.as_os_str().is_empty() {
                return Err(BlendError::InvalidConfig(format!("{label} model path is empty")));
            }
        }
        if !self.default_weight.is_finite() {
            return Err(BlendError::InvalidConfig(format!(
                "default_weight must be finite, got {}",
                self.default_weight
            )));
        }
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.pattern.is_empty() {
                return Err(BlendError::InvalidConfig(format!(
                    "rule {} has an empty pattern",
                    idx + 1
                )));
            }
            if !rule.weight.is_finite() {
                return Err(BlendError::InvalidConfig(format!(
                    "rule {} ('{}') has a non-finite weight",
                    idx + 1,
                    rule.pattern
                )));
            }
        }
        Ok(())
    }
}

/// Builder for creating blend requests programmatically.
#[derive(Debug, Default)]
pub struct BlendBuilder {
    output_path: Option<PathBuf>,
    primary: Option<ModelRef>,
    secondary: Option<ModelRef>,
    rules: Vec<BlendRule>,
    default_weight: Option<f32>,
    precision: StoragePrecision,
    parallel: bool,
    variable_cardinality: Option<Vec<String>>,
}

impl BlendBuilder {
    /// Start an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the primary model.
    pub fn primary(mut self, path: impl Into<PathBuf>, identity_index: i64) -> Self {
        self.primary = Some(ModelRef::new(path, identity_index));
        self
    }

    /// Set the secondary model.
    pub fn secondary(mut self, path: impl Into<PathBuf>, identity_index: i64) -> Self {
        self.secondary = Some(ModelRef::new(path, identity_index));
        self
    }

    /// Set the output path.
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Append a layer rule.
    pub fn rule(mut self, pattern: impl Into<String>, weight: f32) -> Self {
        self.rules.push(BlendRule::new(pattern, weight));
        self
    }

    /// Set the default weight.
    pub fn default_weight(mut self, weight: f32) -> Self {
        self.default_weight = Some(weight);
        self
    }

    /// Set the storage precision.
    pub fn precision(mut self, precision: StoragePrecision) -> Self {
        self.precision = precision;
        self
    }

    /// Enable or disable parallel layer blending.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Replace the variable-cardinality parameter set.
    pub fn variable_cardinality<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variable_cardinality = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Build and validate the request.
    pub fn build(self) -> Result<BlendRequest> {
        let output_path = self
            .output_path
            .ok_or_else(|| BlendError::InvalidConfig("Output path is required".to_string()))?;
        let primary = self
            .primary
            .ok_or_else(|| BlendError::InvalidConfig("Primary model is required".to_string()))?;
        let secondary = self
            .secondary
            .ok_or_else(|| BlendError::InvalidConfig("Secondary model is required".to_string()))?;

        let request = BlendRequest {
            output_path,
            primary,
            secondary,
            rules: self.rules,
            default_weight: self.default_weight.unwrap_or_else(default_weight),
            precision: self.precision,
            parallel: self.parallel,
            variable_cardinality: self
                .variable_cardinality
                .unwrap_or_else(default_variable_cardinality),
        };
        request.validate()?;
        Ok(request)
    }
}
