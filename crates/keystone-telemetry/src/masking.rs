//! Masking of sensitive fields in logged payloads.
//!
//! Rules are keyed by JSON field name and apply at any nesting depth:
//!
//! - [`MaskRule::All`] replaces every character of the value with `*`.
//! - [`MaskRule::Pattern`] keeps the captured groups of a regex and masks
//!   only the groups named `MASK`.
//! - [`MaskRule::Keep`] leaves the value untouched.
//!
//! Only string values are masked. Values that do not match a pattern rule
//! are left as they are.
//!
//! # Example
//!
//! ```
//! use keystone_telemetry::masking::SensitiveFields;
//! use serde_json::json;
//!
//! let fields = SensitiveFields::new()
//!     .mask_all("password")
//!     .pattern("card", r"^(?P<MASK>\d{12})(\d{4})$")
//!     .unwrap();
//!
//! let mut value = json!({"password": "hunter2", "card": "4111111111111111"});
//! fields.mask(&mut value);
//! assert_eq!(value, json!({"password": "*******", "card": "************1111"}));
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

const MASK_GROUP: &str = "MASK";

/// How a sensitive field is masked.
#[derive(Debug, Clone)]
pub enum MaskRule {
    /// Leave the value as is.
    Keep,
    /// Replace every character.
    All,
    /// Keep capture groups, masking those named `MASK`.
    Pattern(Regex),
}

/// A set of masking rules keyed by field name.
#[derive(Debug, Clone, Default)]
pub struct SensitiveFields {
    rules: HashMap<String, MaskRule>,
}

impl SensitiveFields {
    /// Creates an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a rule set from `field -> spec` pairs.
    ///
    /// An empty spec keeps the value, `MASKALL` masks it entirely, anything
    /// else is compiled as a pattern rule.
    pub fn from_specs<I, K, V>(specs: I) -> TelemetryResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut fields = Self::new();
        for (field, spec) in specs {
            let field = field.into();
            let rule = match spec.as_ref() {
                "" => MaskRule::Keep,
                "MASKALL" => MaskRule::All,
                pattern => compile(&field, pattern)?,
            };
            fields.rules.insert(field, rule);
        }
        Ok(fields)
    }

    /// Adds a full-mask rule.
    #[must_use]
    pub fn mask_all(mut self, field: impl Into<String>) -> Self {
        self.rules.insert(field.into(), MaskRule::All);
        self
    }

    /// Adds a pattern rule.
    pub fn pattern(mut self, field: impl Into<String>, pattern: &str) -> TelemetryResult<Self> {
        let field = field.into();
        let rule = compile(&field, pattern)?;
        self.rules.insert(field, rule);
        Ok(self)
    }

    /// Returns `true` when no rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Masks matching fields of `value` in place, recursing into objects and arrays.
    pub fn mask(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if let Value::String(s) = child {
                        if let Some(rule) = self.rules.get(key) {
                            *s = apply(rule, s);
                        }
                    } else {
                        self.mask(child);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.mask(item);
                }
            }
            _ => {}
        }
    }

    /// Masks a JSON document given as bytes and renders it back to a string.
    ///
    /// Non-JSON input is fully masked.
    #[must_use]
    pub fn mask_json_bytes(&self, bytes: &[u8]) -> String {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(mut value) => {
                self.mask(&mut value);
                value.to_string()
            }
            Err(_) => mask_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

/// Returns a copy of `value` with the fields named in `rules` masked.
#[must_use]
pub fn mask_sensitive(value: &Value, rules: &SensitiveFields) -> Value {
    let mut masked = value.clone();
    rules.mask(&mut masked);
    masked
}

/// Replaces every character of `s` with `*`.
#[must_use]
pub fn mask_str(s: &str) -> String {
    "*".repeat(s.chars().count())
}

fn compile(field: &str, pattern: &str) -> TelemetryResult<MaskRule> {
    Regex::new(pattern)
        .map(MaskRule::Pattern)
        .map_err(|e| TelemetryError::InvalidMaskRule {
            field: field.to_string(),
            source: e,
        })
}

fn apply(rule: &MaskRule, value: &str) -> String {
    match rule {
        MaskRule::Keep => value.to_string(),
        MaskRule::All => mask_str(value),
        MaskRule::Pattern(re) => {
            let Some(caps) = re.captures(value) else {
                return value.to_string();
            };
            let mut out = String::with_capacity(value.len());
            for (i, name) in re.capture_names().enumerate().skip(1) {
                let part = caps.get(i).map_or("", |m| m.as_str());
                if name == Some(MASK_GROUP) {
                    out.push_str(&mask_str(part));
                } else {
                    out.push_str(part);
                }
            }
            out
        }
    }
}
