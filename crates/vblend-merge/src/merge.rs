//! Blend orchestration.
//!
//! This module provides the high-level API for running a blend.
//! It coordinates loading both checkpoints, assembling the result and saving it.

use std::path::PathBuf;

use tracing::info;

use crate::observer::{BlendEvent, BlendObserver, TracingObserver};
use crate::{
    BlendRequest, Checkpoint, CheckpointAssembler, CheckpointStore, ModelRef, Result,
    SafetensorsStore, ShapeReconciler, TensorBlender,
};

/// Outcome of a successful blend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlendReport {
    /// Where the result was written.
    pub output_path: PathBuf,
    /// Provenance text stored in the result.
    pub provenance: String,
    /// Number of layers in the result.
    pub layers_blended: usize,
    /// Layers that went through shape reconciliation.
    pub layers_reconciled: usize,
    /// Layers matched by at least one rule.
    pub layers_with_rules: usize,
    /// Secondary-only layers that were discarded.
    pub dropped_secondary: usize,
}

/// Human-readable description of how a checkpoint was produced.
pub fn provenance(primary: &ModelRef, secondary: &ModelRef, rule_count: usize) -> String {
    format!(
        "Blended {} (sid:{}) and {} (sid:{}) with {} layer-specific rules",
        primary.path.display(),
        primary.identity_index,
        secondary.path.display(),
        secondary.identity_index,
        rule_count
    )
}

/// Blend two already loaded checkpoints according to `request`.
///
/// The output path of the request is ignored; nothing is written.
pub fn blend_checkpoints(
    primary: Checkpoint,
    secondary: Checkpoint,
    request: &BlendRequest,
    observer: &dyn BlendObserver,
) -> Result<(Checkpoint, BlendReport)> {
    let mut assembler = CheckpointAssembler::new(primary, secondary, observer)
        .with_reconciler(ShapeReconciler::new(request.variable_cardinality.iter().cloned()))
        .with_blender(TensorBlender::new(request.precision))
        .parallel(request.parallel);

    assembler.verify_sample_rate()?;
    assembler.blend(&request.rules, request.default_weight)?;

    let text = provenance(&request.primary, &request.secondary, request.rules.len());
    let (checkpoint, stats) = assembler.finish(text.clone())?;

    let report = BlendReport {
        output_path: request.output_path.clone(),
        provenance: text,
        layers_blended: stats.blended,
        layers_reconciled: stats.reconciled,
        layers_with_rules: stats.explicit,
        dropped_secondary: stats.dropped,
    };
    Ok((checkpoint, report))
}

/// Main entry point for running a blend.
///
/// Loads both models through `store`, blends them and saves the result to
/// `request.output_path`. On any failure nothing is written and a
/// [`BlendEvent::Failed`] is reported before the error is returned.
pub fn run_blend(
    request: &BlendRequest,
    store: &dyn CheckpointStore,
    observer: &dyn BlendObserver,
) -> Result<BlendReport> {
    let result = execute(request, store, observer);
    if let Err(e) = &result {
        observer.on_event(&BlendEvent::Failed {
            reason: e.to_string(),
        });
    }
    result
}

fn execute(
    request: &BlendRequest,
    store: &dyn CheckpointStore,
    observer: &dyn BlendObserver,
) -> Result<BlendReport> {
    request.validate()?;
    observer.on_event(&BlendEvent::Started {
        output: request.output_path.clone(),
        rules: request.rules.len(),
    });

    let load = |model: &ModelRef| -> Result<Checkpoint> {
        let checkpoint = store.load(&model.path)?;
        observer.on_event(&BlendEvent::CheckpointLoaded {
            path: model.path.clone(),
            parameters: checkpoint.len(),
        });
        Ok(checkpoint)
    };
    let primary = load(&request.primary)?;
    let secondary = load(&request.secondary)?;

    let (checkpoint, report) = blend_checkpoints(primary, secondary, request, observer)?;

    store.save(&checkpoint, &request.output_path)?;
    observer.on_event(&BlendEvent::Saved {
        path: request.output_path.clone(),
        provenance: report.provenance.clone(),
    });
    info!("Blend complete! Output saved to: {:?}", request.output_path);

    Ok(report)
}

/// Blend with the safetensors store, logging through `tracing`.
pub fn blend_models(request: &BlendRequest) -> Result<BlendReport> {
    run_blend(request, &SafetensorsStore::new(), &TracingObserver::default())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;

    use parking_lot::Mutex;

    use super::*;
    use crate::observer::RecordingObserver;
    use crate::{BlendError, BlendRule, CheckpointMetadata, Tensor};

    /// Keeps checkpoints in memory, keyed by path.
    #[derive(Default)]
    struct MemoryStore {
        files: Mutex<HashMap<PathBuf, Checkpoint>>,
    }

    impl MemoryStore {
        fn with(self, path: &str, checkpoint: Checkpoint) -> Self {
            self.files.lock().insert(PathBuf::from(path), checkpoint);
            self
        }

        fn contains(&self, path: &str) -> bool {
            self.files.lock().contains_key(Path::new(path))
        }
    }

    impl CheckpointStore for MemoryStore {
        fn load(&self, path: &Path) -> Result<Checkpoint> {
            self.files
                .lock()
                .get(path)
                .cloned()
                .ok_or_else(|| BlendError::LoadFailure {
                    path: path.to_path_buf(),
                    reason: "not found".to_string(),
                })
        }

        fn save(&self, checkpoint: &Checkpoint, path: &Path) -> Result<()> {
            self.files
                .lock()
                .insert(path.to_path_buf(), checkpoint.clone());
            Ok(())
        }
    }

    fn model(sample_rate: u32, fill: f32) -> Checkpoint {
        let t = |shape: &[usize]| {
            let n: usize = shape.iter().product();
            Tensor::from_shape_vec(shape, vec![fill; n]).unwrap()
        };
        Checkpoint::new(CheckpointMetadata::new(sample_rate))
            .with_parameter("enc_p.emb_phone.weight", t(&[4, 2]))
            .with_parameter("dec.cond.weight", t(&[2, 2]))
            .with_parameter("emb_g.weight", t(&[3, 2]))
    }

    fn request() -> BlendRequest {
        BlendRequest::new(
            "out.safetensors",
            ModelRef::new("alpha.safetensors", 0),
            ModelRef::new("beta.safetensors", 2),
        )
    }

    #[test]
    fn test_provenance_format() {
        let text = provenance(
            &ModelRef::new("a.pth", 0),
            &ModelRef::new("b.pth", 5),
            2,
        );
        assert_eq!(text, "Blended a.pth (sid:0) and b.pth (sid:5) with 2 layer-specific rules");
    }

    #[test]
    fn test_run_blend_saves_result() {
        let store = MemoryStore::default()
            .with("alpha.safetensors", model(40000, 1.0))
            .with("beta.safetensors", model(40000, 0.0));
        let observer = RecordingObserver::new();

        let mut request = request();
        request.rules.push(BlendRule::new("dec.*", 0.25));
        let report = run_blend(&request, &store, &observer).unwrap();

        assert_eq!(report.layers_blended, 3);
        assert_eq!(report.layers_with_rules, 1);
        assert_eq!(
            report.provenance,
            "Blended alpha.safetensors (sid:0) and beta.safetensors (sid:2) with 1 layer-specific rules"
        );

        let saved = store.load(Path::new("out.safetensors")).unwrap();
        assert_eq!(saved.metadata.info.as_deref(), Some(report.provenance.as_str()));
        assert!(saved.get("dec.cond.weight").unwrap().to_f32().iter().all(|v| *v == 0.25));
        assert!(saved
            .get("enc_p.emb_phone.weight")
            .unwrap()
            .to_f32()
            .iter()
            .all(|v| *v == 0.5));

        let events = observer.events();
        assert!(matches!(events.first(), Some(BlendEvent::Started { rules: 1, .. })));
        assert!(matches!(events.last(), Some(BlendEvent::Saved { .. })));
    }

    #[test]
    fn test_sample_rate_mismatch_writes_nothing() {
        let store = MemoryStore::default()
            .with("alpha.safetensors", model(40000, 1.0))
            .with("beta.safetensors", model(48000, 0.0));
        let observer = RecordingObserver::new();

        let err = run_blend(&request(), &store, &observer).unwrap_err();
        assert!(matches!(err, BlendError::IncompatibleSampleRate { .. }));
        assert!(!store.contains("out.safetensors"));
        assert!(matches!(observer.events().last(), Some(BlendEvent::Failed { .. })));
    }

    #[test]
    fn test_load_failure_reported() {
        let store = MemoryStore::default().with("alpha.safetensors", model(40000, 1.0));
        let observer = RecordingObserver::new();

        let err = run_blend(&request(), &store, &observer).unwrap_err();
        assert!(matches!(err, BlendError::LoadFailure { .. }));
        assert_eq!(
            observer.count(|e| matches!(e, BlendEvent::CheckpointLoaded { .. })),
            1
        );
    }

    #[test]
    fn test_invalid_request_rejected_before_loading() {
        let store = MemoryStore::default();
        let observer = RecordingObserver::new();
        let mut request = request();
        request.default_weight = f32::NAN;

        let err = run_blend(&request, &store, &observer).unwrap_err();
        assert!(matches!(err, BlendError::InvalidConfig(_)));
        assert_eq!(observer.count(|e| matches!(e, BlendEvent::Started { .. })), 0);
    }
}
