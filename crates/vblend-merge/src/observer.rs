//! Structured blend diagnostics.
//!
//! Every notable step of a blend is reported as a [`BlendEvent`] to a
//! [`BlendObserver`]. Front ends pick what to do with them:
//!
//! - [`TracingObserver`] - forwards events to `tracing`
//! - [`RecordingObserver`] - keeps events in memory for later inspection
//! - [`NullObserver`] - discards everything

use std::path::PathBuf;

use parking_lot::Mutex;

/// Number of matched names carried in [`BlendEvent::RuleApplied`].
pub const MATCH_SAMPLE_LEN: usize = 3;

/// A diagnostic emitted during a blend.
#[derive(Debug, Clone, PartialEq)]
pub enum BlendEvent {
    /// A blend call started.
    Started {
        /// Output path.
        output: PathBuf,
        /// Number of blend rules.
        rules: usize,
    },
    /// A source checkpoint finished loading.
    CheckpointLoaded {
        /// Source path.
        path: PathBuf,
        /// Number of parameters after load.
        parameters: usize,
    },
    /// The default weight was outside `[0, 1]` and got clamped.
    DefaultWeightClamped {
        /// Requested weight.
        requested: f32,
        /// Weight actually used.
        clamped: f32,
    },
    /// Sample rates matched.
    SampleRateVerified {
        /// Shared sample rate in Hz.
        sample_rate: u32,
    },
    /// Sample rates differ; nothing will be blended.
    SampleRateMismatch {
        /// Primary sample rate in Hz.
        primary: u32,
        /// Secondary sample rate in Hz.
        secondary: u32,
    },
    /// A blend rule was matched against the primary parameters.
    RuleApplied {
        /// Position of the rule in the request.
        index: usize,
        /// Rule pattern.
        pattern: String,
        /// Rule weight.
        weight: f32,
        /// Number of parameters matched.
        matched: usize,
        /// First few matched names.
        sample: Vec<String>,
    },
    /// A rule weight lies outside `[0, 1]` and will extrapolate.
    RuleWeightOutOfRange {
        /// Rule pattern.
        pattern: String,
        /// Rule weight.
        weight: f32,
    },
    /// Coefficients are resolved.
    CoefficientsResolved {
        /// Parameters with a rule-assigned coefficient.
        explicit: usize,
        /// Parameters falling back to the default weight.
        defaulted: usize,
        /// Effective default weight.
        default_weight: f32,
    },
    /// Mismatched leading dimensions were truncated.
    ShapeReconciled {
        /// Parameter name.
        name: String,
        /// Primary shape before truncation.
        primary: Vec<usize>,
        /// Secondary shape before truncation.
        secondary: Vec<usize>,
        /// Rows kept on both sides.
        rows: usize,
    },
    /// One parameter was blended.
    LayerBlended {
        /// Parameter name.
        name: String,
        /// Coefficient used.
        alpha: f32,
        /// Position in primary parameter order.
        index: usize,
        /// Total parameters to blend.
        total: usize,
    },
    /// Parameters present only in the secondary checkpoint were discarded.
    SecondaryLayersDropped {
        /// Number of discarded parameters.
        count: usize,
    },
    /// The result checkpoint was written.
    Saved {
        /// Output path.
        path: PathBuf,
        /// Provenance string attached to the result.
        provenance: String,
    },
    /// The blend failed.
    Failed {
        /// Human-readable reason.
        reason: String,
    },
}

/// Receiver for blend diagnostics.
///
/// Observers may be called from worker threads when parallel blending is
/// enabled, hence the `Send + Sync` bound and `&self` receiver.
pub trait BlendObserver: Send + Sync {
    /// Called for every event.
    fn on_event(&self, event: &BlendEvent);
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl BlendObserver for NullObserver {
    fn on_event(&self, _event: &BlendEvent) {}
}

/// Observer that logs events with `tracing`.
#[derive(Debug, Clone, Copy)]
pub struct TracingObserver {
    progress_every: usize,
}

impl TracingObserver {
    /// Create an observer that logs blend progress every `progress_every` layers.
    pub fn new(progress_every: usize) -> Self {
        Self {
            progress_every: progress_every.max(1),
        }
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new(50)
    }
}

impl BlendObserver for TracingObserver {
    fn on_event(&self, event: &BlendEvent) {
        match event {
            BlendEvent::Started { output, rules } => {
                tracing::info!(output = ?output, rules = rules, "Starting blend operation");
            }
            BlendEvent::CheckpointLoaded { path, parameters } => {
                tracing::info!(path = ?path, parameters = parameters, "Checkpoint loaded");
            }
            BlendEvent::DefaultWeightClamped { requested, clamped } => {
                tracing::warn!(
                    requested = requested,
                    clamped = clamped,
                    "default_weight was not in range 0 to 1, clamped"
                );
            }
            BlendEvent::SampleRateVerified { sample_rate } => {
                tracing::info!(sample_rate = sample_rate, "Sample rates match");
            }
            BlendEvent::SampleRateMismatch { primary, secondary } => {
                tracing::error!(primary = primary, secondary = secondary, "Sample rate mismatch");
            }
            BlendEvent::RuleApplied {
                index,
                pattern,
                weight,
                matched,
                sample,
            } => {
                let more = if *matched > sample.len() { "..." } else { "" };
                tracing::info!(
                    rule = index + 1,
                    pattern = %pattern,
                    weight = weight,
                    matched = matched,
                    "Rule matched {:?}{}",
                    sample,
                    more
                );
            }
            BlendEvent::RuleWeightOutOfRange { pattern, weight } => {
                tracing::warn!(pattern = %pattern, weight = weight, "Rule weight outside 0 to 1 extrapolates");
            }
            BlendEvent::CoefficientsResolved {
                explicit,
                defaulted,
                default_weight,
            } => {
                tracing::info!(
                    explicit = explicit,
                    defaulted = defaulted,
                    default_weight = default_weight,
                    "Coefficients resolved"
                );
            }
            BlendEvent::ShapeReconciled {
                name,
                primary,
                secondary,
                rows,
            } => {
                tracing::warn!(
                    layer = %name,
                    "Shape mismatch {:?} vs {:?}, truncated to {} rows",
                    primary,
                    secondary,
                    rows
                );
            }
            BlendEvent::LayerBlended {
                name,
                alpha,
                index,
                total,
            } => {
                tracing::debug!(layer = %name, alpha = alpha, "Layer blended");
                let done = index + 1;
                if done % self.progress_every == 0 {
                    tracing::info!("Processed {}/{} layers", done, total);
                }
            }
            BlendEvent::SecondaryLayersDropped { count } => {
                tracing::info!(count = count, "Dropped layers present only in the secondary model");
            }
            BlendEvent::Saved { path, provenance } => {
                tracing::info!(path = ?path, "{}", provenance);
            }
            BlendEvent::Failed { reason } => {
                tracing::error!("An error occurred blending the models: {}", reason);
            }
        }
    }
}

/// Observer that stores every event it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<BlendEvent>>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<BlendEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events satisfying `predicate`.
    pub fn count(&self, predicate: impl Fn(&BlendEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl BlendObserver for RecordingObserver {
    fn on_event(&self, event: &BlendEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer_keeps_order() {
        let observer = RecordingObserver::new();
        observer.on_event(&BlendEvent::SampleRateVerified { sample_rate: 40000 });
        observer.on_event(&BlendEvent::SecondaryLayersDropped { count: 2 });

        let events = observer.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], BlendEvent::SampleRateVerified { sample_rate: 40000 });
        assert_eq!(
            observer.count(|e| matches!(e, BlendEvent::SecondaryLayersDropped { .. })),
            1
        );
    }

    #[test]
    fn test_observers_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TracingObserver>();
        assert_send_sync::<RecordingObserver>();
        assert_send_sync::<NullObserver>();
        assert_send_sync::<Box<dyn BlendObserver>>();
    }
}
