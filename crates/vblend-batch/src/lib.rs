//! Table-driven batch runs.
//!
//! Each row of a CSV, TSV or spreadsheet table describes one job. Two job
//! kinds are supported:
//!
//! - **CLI rows**: cells become `--column value` flags appended to a base
//!   command, which is run once per row
//! - **Blend rows**: cells describe a [`vblend_merge::BlendRequest`]
//!   (`output_path`, `model1_path`, `model1_sid`, `model2_path`, `model2_sid`,
//!   `blend_rules`, `default_weight`, `precision`, `parallel`)
//!
//! # Example
//!
//! ```ignore
//! use vblend_batch::{read_table, BatchRunner};
//! use vblend_merge::{SafetensorsStore, TracingObserver};
//!
//! let table = read_table("blends.xlsx")?;
//! let report = BatchRunner::new()
//!     .run_blends(&table, &SafetensorsStore::new(), &TracingObserver::default());
//! println!("{report}");
//! ```

#![warn(missing_docs)]

mod command;
mod error;
mod job;
mod runner;
mod table;

pub use command::*;
pub use error::*;
pub use job::*;
pub use runner::*;
pub use table::*;
