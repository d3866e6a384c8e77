//! Blend rules and per-layer coefficient resolution.
//!
//! Rules are applied in order and every later match overwrites an earlier
//! one, so a broad rule followed by a narrow one gives the narrow rule the
//! final say, while the reverse order lets the broad rule win.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::observer::{BlendEvent, BlendObserver, MATCH_SAMPLE_LEN};
use crate::pattern::LayerPattern;
use crate::{BlendError, Result};

/// A (pattern, weight) pair controlling the primary model's share for the
/// parameters it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendRule {
    /// Glob over parameter names.
    #[serde(alias = "layers")]
    pub pattern: String,
    /// Primary model contribution (0.0 = all secondary, 1.0 = all primary).
    pub weight: f32,
}

impl BlendRule {
    /// Create a rule.
    pub fn new(pattern: impl Into<String>, weight: f32) -> Self {
        Self {
            pattern: pattern.into(),
            weight,
        }
    }
}

/// Clamp a default weight into `[0, 1]`.
///
/// Returns the clamped value and whether clamping changed it.
pub fn clamp_default_weight(weight: f32) -> Result<(f32, bool)> {
    if !weight.is_finite() {
        return Err(BlendError::InvalidConfig(format!(
            "default_weight must be a finite number, got {weight}"
        )));
    }
    let clamped = weight.clamp(0.0, 1.0);
    Ok((clamped, clamped != weight))
}

/// Resolved interpolation coefficient for every primary parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientMap {
    alphas: IndexMap<String, f32>,
    explicit: usize,
    default_weight: f32,
}

impl CoefficientMap {
    /// Resolve coefficients for `keys` from ordered `rules`.
    ///
    /// Names touched by no rule get the clamped `default_weight`. A rule
    /// matching nothing is reported but otherwise has no effect.
    pub fn resolve(
        keys: &[String],
        rules: &[BlendRule],
        default_weight: f32,
        observer: &dyn BlendObserver,
    ) -> Result<Self> {
        let requested = default_weight;
        let (default_weight, was_clamped) = clamp_default_weight(requested)?;
        if was_clamped {
            observer.on_event(&BlendEvent::DefaultWeightClamped {
                requested,
                clamped: default_weight,
            });
        }

        let mut assigned: IndexMap<&str, f32> = IndexMap::new();
        for (index, rule) in rules.iter().enumerate() {
            let pattern = LayerPattern::new(&rule.pattern)?;
            if !(0.0..=1.0).contains(&rule.weight) {
                observer.on_event(&BlendEvent::RuleWeightOutOfRange {
                    pattern: rule.pattern.clone(),
                    weight: rule.weight,
                });
            }

            let mut matched = 0;
            let mut sample = Vec::with_capacity(MATCH_SAMPLE_LEN);
            for key in keys.iter().filter(|k| pattern.matches(k)) {
                assigned.insert(key.as_str(), rule.weight);
                if sample.len() < MATCH_SAMPLE_LEN {
                    sample.push(key.clone());
                }
                matched += 1;
            }

            observer.on_event(&BlendEvent::RuleApplied {
                index,
                pattern: rule.pattern.clone(),
                weight: rule.weight,
                matched,
                sample,
            });
        }

        let explicit = assigned.len();
        let alphas: IndexMap<String, f32> = keys
            .iter()
            .map(|key| {
                let alpha = assigned.get(key.as_str()).copied().unwrap_or(default_weight);
                (key.clone(), alpha)
            })
            .collect();

        observer.on_event(&BlendEvent::CoefficientsResolved {
            explicit,
            defaulted: alphas.len() - explicit,
            default_weight,
        });

        Ok(Self {
            alphas,
            explicit,
            default_weight,
        })
    }

    /// Coefficient for `name`, if it is a primary parameter.
    pub fn get(&self, name: &str) -> Option<f32> {
        self.alphas.get(name).copied()
    }

    /// Number of parameters with a rule-assigned coefficient.
    pub fn explicit_count(&self) -> usize {
        self.explicit
    }

    /// Default weight after clamping.
    pub fn default_weight(&self) -> f32 {
        self.default_weight
    }

    /// Number of parameters covered.
    pub fn len(&self) -> usize {
        self.alphas.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.alphas.is_empty()
    }

    /// Iterate `(name, alpha)` in primary parameter order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.alphas.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
