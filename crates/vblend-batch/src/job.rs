//! Turning table rows into blend requests.

use std::str::FromStr;

use vblend_merge::{BlendRequest, BlendRule, ModelRef, StoragePrecision};

use crate::{BatchError, Result, TableRow};

/// Column names understood by [`request_from_row`].
pub mod columns {
    /// Destination checkpoint path.
    pub const OUTPUT_PATH: &str = "output_path";
    /// Primary checkpoint path.
    pub const MODEL1_PATH: &str = "model1_path";
    /// Primary speaker index.
    pub const MODEL1_SID: &str = "model1_sid";
    /// Secondary checkpoint path.
    pub const MODEL2_PATH: &str = "model2_path";
    /// Secondary speaker index.
    pub const MODEL2_SID: &str = "model2_sid";
    /// JSON list of `{"layers": PATTERN, "weight": W}` objects.
    pub const BLEND_RULES: &str = "blend_rules";
    /// Coefficient for unmatched layers.
    pub const DEFAULT_WEIGHT: &str = "default_weight";
    /// Storage precision name.
    pub const PRECISION: &str = "precision";
    /// Parallel blending flag.
    pub const PARALLEL: &str = "parallel";
}

fn required<'a>(row: &'a TableRow, column: &str) -> Result<&'a str> {
    row.get(column).ok_or_else(|| {
        BatchError::InvalidRow(format!("line {}: missing '{}'", row.line, column))
    })
}

fn invalid(row: &TableRow, column: &str, value: &str, reason: impl std::fmt::Display) -> BatchError {
    BatchError::InvalidRow(format!(
        "line {}: bad {} '{}': {}",
        row.line, column, value, reason
    ))
}

fn parse_sid(row: &TableRow, column: &str) -> Result<i64> {
    let Some(value) = row.get(column) else {
        return Ok(0);
    };
    if let Ok(sid) = value.parse::<i64>() {
        return Ok(sid);
    }
    // Spreadsheets sometimes store whole numbers as "3.0".
    match value.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.is_finite() => Ok(f as i64),
        _ => Err(invalid(row, column, value, "expected an integer")),
    }
}

fn parse_flag(row: &TableRow, column: &str) -> Result<bool> {
    match row.get(column).map(str::to_ascii_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes") => Ok(true),
        Some("0" | "false" | "no") => Ok(false),
        Some(other) => Err(invalid(row, column, other, "expected true or false")),
    }
}

/// Build a blend request from a row.
///
/// `output_path`, `model1_path` and `model2_path` are required. Speaker
/// indices default to 0, rules to none and the default weight to 0.5.
pub fn request_from_row(row: &TableRow) -> Result<BlendRequest> {
    let primary = ModelRef::new(
        required(row, columns::MODEL1_PATH)?,
        parse_sid(row, columns::MODEL1_SID)?,
    );
    let secondary = ModelRef::new(
        required(row, columns::MODEL2_PATH)?,
        parse_sid(row, columns::MODEL2_SID)?,
    );
    let mut request = BlendRequest::new(required(row, columns::OUTPUT_PATH)?, primary, secondary);

    if let Some(rules) = row.get(columns::BLEND_RULES) {
        request.rules = serde_json::from_str::<Vec<BlendRule>>(rules)
            .map_err(|e| invalid(row, columns::BLEND_RULES, rules, e))?;
    }
    if let Some(weight) = row.get(columns::DEFAULT_WEIGHT) {
        request.default_weight = weight
            .parse()
            .map_err(|e| invalid(row, columns::DEFAULT_WEIGHT, weight, e))?;
    }
    if let Some(precision) = row.get(columns::PRECISION) {
        request.precision = StoragePrecision::from_str(precision)
            .map_err(|e| invalid(row, columns::PRECISION, precision, e))?;
    }
    request.parallel = parse_flag(row, columns::PARALLEL)?;

    request.validate()?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn row(cells: &[(&str, &str)]) -> TableRow {
        TableRow {
            line: 7,
            values: cells
                .iter()
                .map(|(k, v)| (k.to_string(), (!v.is_empty()).then(|| v.to_string())))
                .collect(),
        }
    }

    #[test]
    fn test_full_row() {
        let request = request_from_row(&row(&[
            ("output_path", "blends/ab.safetensors"),
            ("model1_path", "a.safetensors"),
            ("model1_sid", "0"),
            ("model2_path", "b.safetensors"),
            ("model2_sid", "4.0"),
            ("blend_rules", r#"[{"layers": "emb_g.weight", "weight": 0.7}, {"pattern": "dec.*", "weight": 0.2}]"#),
            ("default_weight", "0.4"),
            ("precision", "bf16"),
            ("parallel", "TRUE"),
        ]))
        .unwrap();

        assert_eq!(request.output_path, PathBuf::from("blends/ab.safetensors"));
        assert_eq!(request.secondary.identity_index, 4);
        assert_eq!(
            request.rules,
            vec![BlendRule::new("emb_g.weight", 0.7), BlendRule::new("dec.*", 0.2)]
        );
        assert_eq!(request.default_weight, 0.4);
        assert_eq!(request.precision, StoragePrecision::BF16);
        assert!(request.parallel);
    }

    #[test]
    fn test_minimal_row_defaults() {
        let request = request_from_row(&row(&[
            ("output_path", "out.safetensors"),
            ("model1_path", "a.safetensors"),
            ("model2_path", "b.safetensors"),
            ("blend_rules", ""),
        ]))
        .unwrap();

        assert!(request.rules.is_empty());
        assert_eq!(request.primary.identity_index, 0);
        assert_eq!(request.default_weight, 0.5);
        assert_eq!(request.precision, StoragePrecision::F16);
        assert!(!request.parallel);
    }

    #[test]
    fn test_bad_rows() {
        let err = request_from_row(&row(&[("model1_path", "a"), ("model2_path", "b")])).unwrap_err();
        assert!(err.to_string().contains("line 7: missing 'output_path'"));

        let base = [
            ("output_path", "o"),
            ("model1_path", "a"),
            ("model2_path", "b"),
        ];
        for extra in [
            ("blend_rules", "dec.*=0.2"),
            ("default_weight", "half"),
            ("model1_sid", "1.5"),
            ("precision", "int8"),
            ("parallel", "maybe"),
        ] {
            let mut cells = base.to_vec();
            cells.push(extra);
            assert!(
                matches!(request_from_row(&row(&cells)), Err(BatchError::InvalidRow(_))),
                "{extra:?} should be rejected"
            );
        }
    }
}
