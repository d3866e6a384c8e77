//! Glob matching of parameter names.
//!
//! Patterns follow shell glob rules over the whole name: `*` matches any run of
//! characters (dots included), `?` a single character, and `[...]` / `[!...]`
//! a character class. Matching is case-sensitive and never matches substrings.

use glob::{MatchOptions, Pattern};

use crate::{BlendError, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled layer pattern.
#[derive(Debug, Clone)]
pub struct LayerPattern {
    source: String,
    pattern: Pattern,
}

impl LayerPattern {
    /// Compile a glob pattern.
    ///
    /// A run of `*` is the same as a single `*`.
    pub fn new(pattern: &str) -> Result<Self> {
        let compiled = Pattern::new(&collapse_stars(pattern)).map_err(|e| BlendError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.msg.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            pattern: compiled,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `name` matches the whole pattern.
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.matches_with(name, MATCH_OPTIONS)
    }
}

// `glob` reserves `**` for recursive path components, which names never have.
fn collapse_stars(pattern: &str) -> String {
    let mut collapsed = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == '*' && collapsed.ends_with('*') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed
}

/// Return every name matching `pattern`, in enumeration order.
pub fn find_matching_layers<'a, I>(names: I, pattern: &str) -> Result<Vec<String>>
where
    I: IntoIterator<Item = &'a String>,
{
    let pattern = LayerPattern::new(pattern)?;
    Ok(names
        .into_iter()
        .filter(|name| pattern.matches(name))
        .cloned()
        .collect())
}
