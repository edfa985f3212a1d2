//! Pattern-driven sanitization of values prior to canonicalization (C1).

use crate::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum recursion depth the redactor will walk into a `Value` tree.
///
/// Pathological caller-constructed nesting is bounded here rather than
/// tracked through true cycle detection; see `Value::for_each_string_mut`.
const MAX_DEPTH: usize = 64;

/// Default replacement token for a matched pattern.
pub const DEFAULT_REPLACEMENT: &str = "[REDACTED]";

/// A single named redaction rule.
#[derive(Clone)]
pub struct RedactionRule {
    pub name: String,
    pub pattern: Regex,
    pub replacement: Option<String>,
}

impl RedactionRule {
    /// Build a custom rule from a regex pattern string.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            pattern: Regex::new(pattern)?,
            replacement: None,
        })
    }

    /// Override this rule's replacement token.
    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = Some(replacement.into());
        self
    }
}

// Built-in patterns, compiled once. `once_cell::sync::Lazy` is the same
// one-time-initialization mechanism the signing context uses for its
// `secp256k1::Secp256k1` context.
static SSN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static CREDIT_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:4[0-9]{12}(?:[0-9]{3})?|5[1-5][0-9]{14}|3[47][0-9]{13}|6(?:011|5[0-9]{2})[0-9]{12})\b").unwrap());
static API_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:sk|pk|api)[-_][A-Za-z0-9]{16,}\b").unwrap());
static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());
static BEARER_JWT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:[Bb]earer\s+)?eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\b").unwrap());
static PRIVATE_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b0x[0-9a-fA-F]{64}\b").unwrap());

fn builtin_rules() -> Vec<RedactionRule> {
    vec![
        RedactionRule { name: "ssn".into(), pattern: SSN.clone(), replacement: None },
        RedactionRule { name: "credit-card".into(), pattern: CREDIT_CARD.clone(), replacement: None },
        RedactionRule { name: "api-key".into(), pattern: API_KEY.clone(), replacement: None },
        RedactionRule { name: "email".into(), pattern: EMAIL.clone(), replacement: None },
        RedactionRule { name: "bearer-jwt".into(), pattern: BEARER_JWT.clone(), replacement: None },
        RedactionRule { name: "private-key".into(), pattern: PRIVATE_KEY.clone(), replacement: None },
    ]
}

/// Structural sanitizer applied to captured arguments and results.
pub struct Redactor {
    enabled: bool,
    rules: Vec<RedactionRule>,
    default_replacement: String,
}

/// Options controlling which rules a `Redactor` is built with.
pub struct RedactorConfig {
    pub enabled: bool,
    pub use_builtins: bool,
    pub extra_rules: Vec<RedactionRule>,
    pub default_replacement: String,
}

impl Default for RedactorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_builtins: true,
            extra_rules: Vec::new(),
            default_replacement: DEFAULT_REPLACEMENT.to_owned(),
        }
    }
}

impl Redactor {
    pub fn new(config: RedactorConfig) -> Self {
        let mut rules = if config.use_builtins { builtin_rules() } else { Vec::new() };
        rules.extend(config.extra_rules);
        Self {
            enabled: config.enabled,
            rules,
            default_replacement: config.default_replacement,
        }
    }

    /// Redact a value in place, returning the sanitized tree.
    ///
    /// Patterns are applied in definition order; every match of a pattern is
    /// replaced before the next pattern is tried. Non-string scalars pass
    /// through unchanged.
    pub fn redact(&self, mut value: Value) -> Value {
        if !self.enabled || self.rules.is_empty() {
            return value;
        }
        value.for_each_string_mut(0, MAX_DEPTH, &mut |s| {
            for rule in &self.rules {
                let replacement = rule.replacement.as_deref().unwrap_or(&self.default_replacement);
                if rule.pattern.is_match(s) {
                    *s = rule.pattern.replace_all(s, replacement).into_owned();
                }
            }
        });
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_ssn_leaving_surrounding_text_intact() {
        let redactor = Redactor::new(RedactorConfig::default());
        let input = Value::String("id 123-45-6789 ok".into());
        let out = redactor.redact(input);
        assert_eq!(out, Value::String("id [REDACTED] ok".into()));
    }

    #[test]
    fn custom_pattern_uses_its_own_replacement() {
        let rule = RedactionRule::new("ssn-custom", r"\d{3}-\d{2}-\d{4}")
            .unwrap()
            .with_replacement("[SSN]");
        let redactor = Redactor::new(RedactorConfig {
            use_builtins: false,
            extra_rules: vec![rule],
            ..RedactorConfig::default()
        });
        let input = Value::String("id 123-45-6789 ok".into());
        let out = redactor.redact(input);
        assert_eq!(out, Value::String("id [SSN] ok".into()));
    }

    #[test]
    fn non_string_scalars_pass_through() {
        let redactor = Redactor::new(RedactorConfig::default());
        let input = Value::Number(crate::value::Number::Int(42));
        assert_eq!(redactor.redact(input.clone()), input);
    }

    #[test]
    fn disabled_redactor_is_a_no_op() {
        let redactor = Redactor::new(RedactorConfig { enabled: false, ..RedactorConfig::default() });
        let input = Value::String("123-45-6789".into());
        assert_eq!(redactor.redact(input.clone()), input);
    }

    #[test]
    fn walks_nested_arrays_and_objects() {
        let redactor = Redactor::new(RedactorConfig::default());
        let mut obj = std::collections::BTreeMap::new();
        obj.insert("note".to_string(), Value::String("ssn 123-45-6789".into()));
        let input = Value::Array(vec![Value::Object(obj)]);
        let out = redactor.redact(input);
        match out {
            Value::Array(items) => match &items[0] {
                Value::Object(map) => {
                    assert_eq!(map.get("note"), Some(&Value::String("ssn [REDACTED]".into())));
                }
                _ => panic!("expected object"),
            },
            _ => panic!("expected array"),
        }
    }
}
