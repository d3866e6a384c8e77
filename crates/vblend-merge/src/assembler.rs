//! Checkpoint assembly state machine.
//!
//! ```text
//! Unchecked ──verify_sample_rate──▶ SampleRateVerified ──blend──▶ Blending ──▶ Complete
//!     │                                                              │
//!     └──────────────────────────▶ Failed ◀──────────────────────────┘
//! ```
//!
//! The assembler owns both source checkpoints and consumes them while
//! blending; nothing of either source survives past [`CheckpointAssembler::finish`].

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::observer::{BlendEvent, BlendObserver};
use crate::{
    BlendError, BlendRule, Checkpoint, CheckpointMetadata, CoefficientMap, Result,
    ShapeReconciler, Tensor, TensorBlender,
};

/// Where an assembler is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssemblyState {
    /// Sources loaded, nothing checked yet.
    Unchecked,
    /// Sample rates agree and metadata has been captured.
    SampleRateVerified,
    /// Layers are being blended.
    Blending,
    /// All layers blended; ready to produce the result.
    Complete,
    /// A step failed; the assembler can no longer be used.
    Failed,
}

/// Counters describing a finished assembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    /// Layers written to the result.
    pub blended: usize,
    /// Layers whose shapes had to be reconciled.
    pub reconciled: usize,
    /// Secondary-only layers that were discarded.
    pub dropped: usize,
    /// Layers whose coefficient came from a rule.
    pub explicit: usize,
}

struct LayerPair {
    index: usize,
    name: String,
    primary: Tensor,
    secondary: Tensor,
    alpha: f32,
}

/// Blends two checkpoints into a new one.
pub struct CheckpointAssembler<'o> {
    primary: Option<Checkpoint>,
    secondary: Option<Checkpoint>,
    state: AssemblyState,
    metadata: Option<CheckpointMetadata>,
    blended: IndexMap<String, Tensor>,
    stats: AssemblyStats,
    reconciler: ShapeReconciler,
    blender: TensorBlender,
    parallel: bool,
    observer: &'o dyn BlendObserver,
}

impl<'o> CheckpointAssembler<'o> {
    /// Create an assembler over two loaded checkpoints.
    pub fn new(primary: Checkpoint, secondary: Checkpoint, observer: &'o dyn BlendObserver) -> Self {
        Self {
            primary: Some(primary),
            secondary: Some(secondary),
            state: AssemblyState::Unchecked,
            metadata: None,
            blended: IndexMap::new(),
            stats: AssemblyStats::default(),
            reconciler: ShapeReconciler::default(),
            blender: TensorBlender::default(),
            parallel: false,
            observer,
        }
    }

    /// Use a custom shape reconciler.
    pub fn with_reconciler(mut self, reconciler: ShapeReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Use a custom tensor blender.
    pub fn with_blender(mut self, blender: TensorBlender) -> Self {
        self.blender = blender;
        self
    }

    /// Blend layers on the rayon thread pool.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Current state.
    pub fn state(&self) -> AssemblyState {
        self.state
    }

    fn expect_state(&self, operation: &'static str, expected: AssemblyState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BlendError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn sources(&self) -> Result<(&Checkpoint, &Checkpoint)> {
        match (&self.primary, &self.secondary) {
            (Some(primary), Some(secondary)) => Ok((primary, secondary)),
            _ => Err(BlendError::InvalidState {
                operation: "access sources",
                state: self.state,
            }),
        }
    }

    /// Check that both checkpoints share a sample rate and capture the
    /// primary's metadata.
    pub fn verify_sample_rate(&mut self) -> Result<()> {
        self.expect_state("verify_sample_rate", AssemblyState::Unchecked)?;

        let (primary, secondary) = self.sources()?;
        let (primary_sr, secondary_sr) =
            (primary.metadata.sample_rate, secondary.metadata.sample_rate);

        if primary_sr != secondary_sr {
            self.observer.on_event(&BlendEvent::SampleRateMismatch {
                primary: primary_sr,
                secondary: secondary_sr,
            });
            self.state = AssemblyState::Failed;
            return Err(BlendError::IncompatibleSampleRate {
                primary: primary_sr,
                secondary: secondary_sr,
            });
        }

        let source = &primary.metadata;
        let metadata = CheckpointMetadata {
            sample_rate: source.sample_rate,
            version: source.version.clone(),
            pitch_guidance: source.pitch_guidance,
            vocoder: Some(source.vocoder().to_string()),
            config: source.config.clone(),
            info: None,
            layout: Default::default(),
        };
        info!(
            "Version: {}, F0: {}, Vocoder: {}",
            metadata.version,
            metadata.pitch_guidance,
            metadata.vocoder()
        );

        self.metadata = Some(metadata);
        self.observer.on_event(&BlendEvent::SampleRateVerified {
            sample_rate: primary_sr,
        });
        self.state = AssemblyState::SampleRateVerified;
        Ok(())
    }

    /// Resolve coefficients and blend every primary layer.
    pub fn blend(&mut self, rules: &[BlendRule], default_weight: f32) -> Result<()> {
        self.expect_state("blend", AssemblyState::SampleRateVerified)?;
        self.state = AssemblyState::Blending;

        match self.blend_layers(rules, default_weight) {
            Ok(()) => {
                self.state = AssemblyState::Complete;
                Ok(())
            }
            Err(e) => {
                self.blended.clear();
                self.state = AssemblyState::Failed;
                Err(e)
            }
        }
    }

    fn blend_layers(&mut self, rules: &[BlendRule], default_weight: f32) -> Result<()> {
        let (primary, mut secondary) = match (self.primary.take(), self.secondary.take()) {
            (Some(primary), Some(secondary)) => (primary, secondary),
            _ => {
                return Err(BlendError::InvalidState {
                    operation: "blend",
                    state: self.state,
                })
            }
        };

        info!("Model 1 has {} layers", primary.len());
        info!("Model 2 has {} layers", secondary.len());

        let keys = primary.parameter_names();
        let coefficients = CoefficientMap::resolve(&keys, rules, default_weight, self.observer)?;

        let mut pairs = Vec::with_capacity(primary.len());
        for (index, (name, tensor)) in primary.parameters.into_iter().enumerate() {
            let Some(other) = secondary.parameters.swap_remove(&name) else {
                return Err(BlendError::MissingLayer(name));
            };
            let alpha = coefficients
                .get(&name)
                .unwrap_or_else(|| coefficients.default_weight());
            pairs.push(LayerPair {
                index,
                name,
                primary: tensor,
                secondary: other,
                alpha,
            });
        }

        let dropped = secondary.len();
        drop(secondary);
        if dropped > 0 {
            self.observer
                .on_event(&BlendEvent::SecondaryLayersDropped { count: dropped });
        }

        let total = pairs.len();
        let reconciler = &self.reconciler;
        let blender = &self.blender;
        let observer = self.observer;
        let blend_pair = |pair: LayerPair| -> Result<(String, Tensor, bool)> {
            let reshaped = pair.primary.shape() != pair.secondary.shape();
            let (a, b) = reconciler.reconcile(&pair.name, pair.primary, pair.secondary, observer)?;
            let tensor = blender.blend(&pair.name, &a, &b, pair.alpha)?;
            observer.on_event(&BlendEvent::LayerBlended {
                name: pair.name.clone(),
                alpha: pair.alpha,
                index: pair.index,
                total,
            });
            Ok((pair.name, tensor, reshaped))
        };

        let results: Vec<(String, Tensor, bool)> = if self.parallel {
            debug!("Blending {} layers in parallel", total);
            // Every layer runs; the reported failure is the first in parameter order.
            let outcomes: Vec<Result<(String, Tensor, bool)>> =
                pairs.into_par_iter().map(blend_pair).collect();
            outcomes.into_iter().collect::<Result<_>>()?
        } else {
            pairs.into_iter().map(blend_pair).collect::<Result<_>>()?
        };

        let mut reconciled = 0;
        let mut blended = IndexMap::with_capacity(results.len());
        for (name, tensor, reshaped) in results {
            reconciled += usize::from(reshaped);
            blended.insert(name, tensor);
        }

        info!(
            "Blending complete! Processed {} layers ({} with special handling)",
            blended.len(),
            reconciled
        );

        self.stats = AssemblyStats {
            blended: blended.len(),
            reconciled,
            dropped,
            explicit: coefficients.explicit_count(),
        };
        self.blended = blended;
        Ok(())
    }

    /// Produce the result checkpoint, attaching `provenance` as its info text.
    pub fn finish(mut self, provenance: impl Into<String>) -> Result<(Checkpoint, AssemblyStats)> {
        self.expect_state("finish", AssemblyState::Complete)?;
        let mut metadata = self.metadata.take().ok_or(BlendError::InvalidState {
            operation: "finish",
            state: self.state,
        })?;
        metadata.info = Some(provenance.into());

        let checkpoint = Checkpoint {
            parameters: std::mem::take(&mut self.blended),
            metadata,
        };
        Ok((checkpoint, self.stats))
    }
}
