//! Shape reconciliation for parameters whose row count may differ.
//!
//! Speaker embedding tables carry one row per identity, so two models trained
//! on different speaker sets disagree on the leading dimension. Those tables
//! are truncated to the rows both sides share; every other mismatch is an
//! error.

use std::collections::BTreeSet;

use crate::observer::{BlendEvent, BlendObserver};
use crate::{BlendError, Result, Tensor};

/// Speaker embedding table of RVC-style synthesizers.
pub const SPEAKER_EMBEDDING: &str = "emb_g.weight";

/// Reconciles shapes of parameter pairs before blending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeReconciler {
    variable_cardinality: BTreeSet<String>,
}

impl ShapeReconciler {
    /// Create a reconciler with an explicit set of variable-cardinality names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            variable_cardinality: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `name` may legitimately differ in its leading dimension.
    pub fn is_variable_cardinality(&self, name: &str) -> bool {
        self.variable_cardinality.contains(name)
    }

    /// Bring `a` and `b` to a common shape.
    ///
    /// Identical shapes pass through untouched. Designated parameters whose
    /// shapes differ only in the leading dimension are both cut down to the
    /// smaller row count.
    pub fn reconcile(
        &self,
        name: &str,
        a: Tensor,
        b: Tensor,
        observer: &dyn BlendObserver,
    ) -> Result<(Tensor, Tensor)> {
        if a.shape() == b.shape() {
            return Ok((a, b));
        }

        let unsupported = || BlendError::ShapeMismatchUnsupported {
            name: name.to_string(),
            primary: a.shape().to_vec(),
            secondary: b.shape().to_vec(),
        };

        if !self.is_variable_cardinality(name) || !differs_only_in_rows(a.shape(), b.shape()) {
            return Err(unsupported());
        }

        let rows = a.shape()[0].min(b.shape()[0]);
        observer.on_event(&BlendEvent::ShapeReconciled {
            name: name.to_string(),
            primary: a.shape().to_vec(),
            secondary: b.shape().to_vec(),
            rows,
        });

        Ok((a.truncate_rows(rows), b.truncate_rows(rows)))
    }
}

impl Default for ShapeReconciler {
    fn default() -> Self {
        Self::new([SPEAKER_EMBEDDING])
    }
}

fn differs_only_in_rows(a: &[usize], b: &[usize]) -> bool {
    !a.is_empty() && a.len() == b.len() && a[1..] == b[1..]
}
