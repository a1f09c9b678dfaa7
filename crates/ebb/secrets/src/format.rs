//! Secret value formats
//!
//! A format is used twice: to validate a value before anything is built, and
//! to tokenize a served bundle when looking for the value's fingerprint.

use crate::error::SecretsError;
use ebb_cloud::SecretValue;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Declared format of a secret class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecretFormat {
    /// Exactly `length` ASCII letters and digits
    FixedAlphanumeric { length: usize },

    /// Any value fully matching `regex`
    Pattern { regex: String },
}

impl SecretFormat {
    pub fn compile(&self, secret: &str) -> Result<CompiledFormat, SecretsError> {
        match self {
            SecretFormat::FixedAlphanumeric { length } => {
                Ok(CompiledFormat::FixedAlphanumeric { length: *length })
            }
            SecretFormat::Pattern { regex } => {
                let invalid = |e: regex::Error| SecretsError::InvalidPattern {
                    secret: secret.to_string(),
                    message: e.to_string(),
                };
                Ok(CompiledFormat::Pattern {
                    full: Regex::new(&format!("^(?:{})$", regex)).map_err(invalid)?,
                    scan: Regex::new(regex).map_err(invalid)?,
                })
            }
        }
    }
}

/// A format ready to validate and scan
#[derive(Debug, Clone)]
pub enum CompiledFormat {
    FixedAlphanumeric { length: usize },
    Pattern { full: Regex, scan: Regex },
}

impl CompiledFormat {
    /// Check a value; the returned reason never contains the value itself
    pub fn validate(&self, value: &SecretValue) -> Result<(), String> {
        let raw = value.expose();
        match self {
            CompiledFormat::FixedAlphanumeric { length } => {
                if raw.chars().count() != *length {
                    return Err(format!(
                        "expected {} characters, got {}",
                        length,
                        raw.chars().count()
                    ));
                }
                if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err("expected only ASCII letters and digits".to_string());
                }
                Ok(())
            }
            CompiledFormat::Pattern { full, .. } => {
                if full.is_match(raw) {
                    Ok(())
                } else {
                    Err(format!(
                        "value of {} characters does not match the declared pattern",
                        raw.chars().count()
                    ))
                }
            }
        }
    }

    /// Candidate tokens in a served body that could be a value of this format
    pub fn tokens<'a>(&self, body: &'a str) -> Vec<&'a str> {
        match self {
            CompiledFormat::FixedAlphanumeric { length } => body
                .split(|c: char| !c.is_ascii_alphanumeric())
                .filter(|run| run.len() == *length)
                .collect(),
            CompiledFormat::Pattern { scan, .. } => {
                scan.find_iter(body).map(|m| m.as_str()).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn client_id() -> CompiledFormat {
        SecretFormat::FixedAlphanumeric { length: 32 }
            .compile("auth-client-id")
            .unwrap()
    }

    #[test]
    fn test_fixed_length_rejects_31_chars() {
        let value = SecretValue::new("a".repeat(31));
        let reason = client_id().validate(&value).unwrap_err();
        assert_eq!(reason, "expected 32 characters, got 31");
        assert!(client_id().validate(&SecretValue::new("a".repeat(32))).is_ok());
    }

    #[test]
    fn test_fixed_length_rejects_symbols() {
        let value = SecretValue::new(format!("{}-", "a".repeat(31)));
        assert!(client_id().validate(&value).is_err());
    }

    #[test]
    fn test_pattern_is_anchored_for_validation() {
        let format = SecretFormat::Pattern {
            regex: "sk_[a-z0-9]{8}".into(),
        }
        .compile("api-key")
        .unwrap();
        assert!(format.validate(&SecretValue::new("sk_abcd1234")).is_ok());
        assert!(format.validate(&SecretValue::new("xsk_abcd1234")).is_err());

        let body = "const a=\"sk_abcd1234\";const b=\"sk_zzzz9999\";";
        assert_eq!(format.tokens(body), vec!["sk_abcd1234", "sk_zzzz9999"]);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = SecretFormat::Pattern { regex: "(".into() }
            .compile("api-key")
            .unwrap_err();
        assert!(matches!(err, SecretsError::InvalidPattern { .. }));
    }

    #[test]
    fn test_reason_never_contains_value() {
        let format = SecretFormat::Pattern {
            regex: "[0-9]+".into(),
        }
        .compile("pin")
        .unwrap();
        let reason = format.validate(&SecretValue::new("hunter2")).unwrap_err();
        assert!(!reason.contains("hunter2"));
    }

    proptest! {
        #[test]
        fn prop_embedded_value_is_found(value in "[a-zA-Z0-9]{32}", prefix in "[ ;=\"]{1,4}") {
            let body = format!("window.X{}\"{}\";", prefix, value);
            prop_assert!(client_id().tokens(&body).contains(&value.as_str()));
        }
    }
}
