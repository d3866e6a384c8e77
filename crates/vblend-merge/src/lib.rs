//! Two-checkpoint blending for voice-conversion synthesizers.
//!
//! This crate interpolates the parameters of two trained checkpoints into a
//! new one, with per-layer control over how much of each source survives.
//!
//! # Pipeline
//!
//! - **Rules**: ordered glob patterns with weights resolve to one coefficient
//!   per parameter; later rules override earlier ones, everything else gets
//!   the default weight
//! - **Reconciliation**: speaker embedding tables that differ in row count
//!   are truncated to the rows both models share
//! - **Blending**: `alpha * primary + (1 - alpha) * secondary` in `f32`,
//!   stored at reduced precision (half by default)
//! - **Assembly**: metadata comes from the primary model and a provenance
//!   string records how the result was made
//!
//! # Example
//!
//! ```ignore
//! use vblend_merge::{BlendBuilder, blend_models};
//!
//! let request = BlendBuilder::new()
//!     .primary("models/alpha.safetensors", 0)
//!     .secondary("models/beta.safetensors", 0)
//!     .output("blends/alpha_beta.safetensors")
//!     .rule("emb_g.weight", 0.7)
//!     .rule("dec.*", 0.2)
//!     .default_weight(0.5)
//!     .build()?;
//!
//! let report = blend_models(&request)?;
//! println!("{}", report.provenance);
//! ```

#![warn(missing_docs)]

mod assembler;
mod blend;
mod checkpoint;
mod config;
mod error;
mod inspect;
mod merge;
pub mod observer;
mod pattern;
mod reconcile;
mod rules;
mod tensor;

pub use assembler::*;
pub use blend::*;
pub use checkpoint::*;
pub use config::*;
pub use error::*;
pub use inspect::*;
pub use merge::*;
pub use pattern::*;
pub use reconcile::*;
pub use rules::*;
pub use tensor::*;

pub use observer::{BlendEvent, BlendObserver, NullObserver, RecordingObserver, TracingObserver};
