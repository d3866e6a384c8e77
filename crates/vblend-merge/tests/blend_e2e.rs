//! End-to-end blend tests against real safetensors files.
//!
//! These tests cover the full path a CLI invocation takes:
//! - Save two source checkpoints with the safetensors store
//! - Blend them with rules, a default weight and speaker table reconciliation
//! - Load the result back and check values, order and metadata

use std::path::Path;

use tempfile::TempDir;
use vblend_merge::{
    run_blend, BlendBuilder, BlendError, BlendErrorKind, BlendEvent, BlendRequest, Checkpoint,
    CheckpointLayout, CheckpointMetadata, CheckpointStore, RecordingObserver, SafetensorsStore,
    StoragePrecision, Tensor,
};

const SPEAKER_ROWS_A: usize = 100;
const SPEAKER_ROWS_B: usize = 80;
const HIDDEN: usize = 8;

fn ramp(shape: &[usize], scale: f32) -> Tensor {
    let n: usize = shape.iter().product();
    let data = (0..n).map(|i| (i % 17) as f32 * scale).collect();
    Tensor::from_shape_vec(shape, data).unwrap()
}

fn synth_checkpoint(sample_rate: u32, speakers: usize, scale: f32) -> Checkpoint {
    let mut metadata = CheckpointMetadata::new(sample_rate);
    metadata.version = "v2".to_string();
    metadata.config = serde_json::json!([1025, 32, 192, 192, 768, 2, 6, 3, 0, "1", sample_rate]);

    Checkpoint::new(metadata)
        .with_parameter("enc_p.emb_phone.weight", ramp(&[HIDDEN, 4], scale))
        .with_parameter("enc_p.encoder.attn_layers.0.conv_q.weight", ramp(&[4, 4, 1], scale))
        .with_parameter("dec.conv_pre.weight", ramp(&[4, 4, 7], scale))
        .with_parameter("dec.cond.weight", ramp(&[4, 2, 1], scale))
        .with_parameter("flow.flows.0.pre.weight", ramp(&[2, 2, 1], scale))
        .with_parameter("emb_g.weight", ramp(&[speakers, HIDDEN], scale))
}

fn write(dir: &TempDir, name: &str, checkpoint: &Checkpoint) -> std::path::PathBuf {
    let path = dir.path().join(name);
    SafetensorsStore::new().save(checkpoint, &path).unwrap();
    path
}

fn load(path: &Path) -> Checkpoint {
    SafetensorsStore::new().load(path).unwrap()
}

fn assert_close(actual: &Tensor, expected: &[f32], tolerance: f32) {
    let actual = actual.to_f32();
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= tolerance, "{a} vs {e}");
    }
}

#[test]
fn test_blend_with_rules_and_reconciliation() {
    let dir = TempDir::new().unwrap();
    let primary = synth_checkpoint(40000, SPEAKER_ROWS_A, 0.1);
    let secondary = synth_checkpoint(40000, SPEAKER_ROWS_B, -0.05);
    let model1 = write(&dir, "alpha.safetensors", &primary);
    let model2 = write(&dir, "beta.safetensors", &secondary);
    let output = dir.path().join("blends").join("alpha_beta.safetensors");

    let request = BlendBuilder::new()
        .primary(&model1, 0)
        .secondary(&model2, 3)
        .output(&output)
        .rule("dec.*", 0.2)
        .rule("dec.cond.weight", 0.9)
        .rule("emb_g.weight", 0.7)
        .rule("no.such.layer.*", 0.1)
        .default_weight(0.5)
        .build()
        .unwrap();

    let observer = RecordingObserver::new();
    let report = run_blend(&request, &SafetensorsStore::new(), &observer).unwrap();
    assert_eq!(report.layers_blended, 6);
    assert_eq!(report.layers_reconciled, 1);

    let result = load(&output);
    assert_eq!(result.parameter_names(), primary.parameter_names());
    assert_eq!(result.metadata.sample_rate, 40000);
    assert_eq!(result.metadata.version, "v2");
    assert_eq!(result.metadata.config, primary.metadata.config);
    assert_eq!(result.metadata.vocoder.as_deref(), Some("HiFi-GAN"));
    assert_eq!(
        result.metadata.info.as_deref(),
        Some(
            format!(
                "Blended {} (sid:0) and {} (sid:3) with 4 layer-specific rules",
                model1.display(),
                model2.display()
            )
            .as_str()
        )
    );

    let tolerance = 1e-2;
    let coefficient_of = |name: &str| match name {
        "dec.cond.weight" => 0.9,
        "dec.conv_pre.weight" => 0.2,
        "emb_g.weight" => 0.7,
        _ => 0.5,
    };
    for name in primary.parameter_names() {
        let alpha = coefficient_of(&name);
        let blended = result.get(&name).unwrap();
        assert_eq!(blended.precision(), StoragePrecision::F16);

        let rows = blended.shape()[0];
        let a = primary.get(&name).unwrap().truncate_rows(rows).to_f32();
        let b = secondary.get(&name).unwrap().truncate_rows(rows).to_f32();
        let expected: Vec<f32> = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| alpha * x + (1.0 - alpha) * y)
            .collect();
        assert_close(blended, &expected, tolerance);
    }

    assert_eq!(result.get("emb_g.weight").unwrap().shape(), &[SPEAKER_ROWS_B, HIDDEN]);
    assert!(observer.events().iter().any(|e| matches!(
        e,
        BlendEvent::RuleApplied { pattern, matched: 0, .. } if pattern == "no.such.layer.*"
    )));
}

#[test]
fn test_sample_rate_mismatch_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let model1 = write(&dir, "a.safetensors", &synth_checkpoint(40000, 4, 1.0));
    let model2 = write(&dir, "b.safetensors", &synth_checkpoint(48000, 4, 1.0));
    let output = dir.path().join("out.safetensors");

    let request = BlendBuilder::new()
        .primary(&model1, 0)
        .secondary(&model2, 0)
        .output(&output)
        .build()
        .unwrap();

    let err = run_blend(&request, &SafetensorsStore::new(), &RecordingObserver::new()).unwrap_err();
    assert_eq!(err.kind(), BlendErrorKind::IncompatibleSampleRate);
    assert!(err
        .to_string()
        .starts_with("The sample rates of the two models are not the same"));
    assert!(!output.exists());
}

#[test]
fn test_self_blend_reproduces_original() {
    let dir = TempDir::new().unwrap();
    let mut original = synth_checkpoint(48000, 12, 0.37);
    for tensor in original.parameters.values_mut() {
        *tensor = Tensor::from_f32(tensor.to_f32(), StoragePrecision::F16);
    }
    let model = write(&dir, "self.safetensors", &original);
    let output = dir.path().join("self_blend.safetensors");

    let mut request = BlendRequest::new(
        &output,
        vblend_merge::ModelRef::new(&model, 0),
        vblend_merge::ModelRef::new(&model, 0),
    );
    request.default_weight = 1.0;
    request.parallel = true;
    vblend_merge::blend_models(&request).unwrap();

    let result = load(&output);
    assert_eq!(result.parameters, original.parameters);
}

#[test]
fn test_missing_layer_and_unsupported_shape() {
    let dir = TempDir::new().unwrap();
    let primary = synth_checkpoint(40000, 4, 1.0);

    let mut missing = primary.clone();
    missing.parameters.shift_remove("flow.flows.0.pre.weight");
    let model1 = write(&dir, "a.safetensors", &primary);
    let model2 = write(&dir, "b.safetensors", &missing);
    let output = dir.path().join("out.safetensors");

    let request = BlendBuilder::new()
        .primary(&model1, 0)
        .secondary(&model2, 0)
        .output(&output)
        .build()
        .unwrap();
    let err = run_blend(&request, &SafetensorsStore::new(), &RecordingObserver::new()).unwrap_err();
    assert!(matches!(err, BlendError::MissingLayer(ref name) if name == "flow.flows.0.pre.weight"));
    assert!(!output.exists());

    let mut reshaped = primary.clone();
    reshaped
        .parameters
        .insert("dec.conv_pre.weight".to_string(), ramp(&[4, 4, 5], 1.0));
    let model3 = write(&dir, "c.safetensors", &reshaped);
    let request = BlendBuilder::new()
        .primary(&model1, 0)
        .secondary(&model3, 0)
        .output(&output)
        .build()
        .unwrap();
    let err = run_blend(&request, &SafetensorsStore::new(), &RecordingObserver::new()).unwrap_err();
    assert_eq!(err.kind(), BlendErrorKind::ShapeMismatchUnsupported);
    assert!(!output.exists());
}

#[test]
fn test_training_snapshot_is_reduced_on_load() {
    let dir = TempDir::new().unwrap();
    let mut snapshot = synth_checkpoint(40000, 4, 1.0)
        .with_parameter("enc_q.pre.weight", ramp(&[2, 2], 1.0))
        .with_parameter("enc_q.proj.bias", ramp(&[2], 1.0));
    snapshot.metadata.layout = CheckpointLayout::Training;
    let path = write(&dir, "G_2333.safetensors", &snapshot);

    let loaded = load(&path);
    assert_eq!(loaded.metadata.layout, CheckpointLayout::Inference);
    assert_eq!(loaded.len(), 6);
    assert!(loaded.parameter_names().iter().all(|n| !n.contains("enc_q")));
}
