use std::env;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::FactFluxError;

static REDACTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
            .expect("invalid api_key regex"),
        Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        Regex::new(r"((?:sk|fc)-[A-Za-z0-9\-_]{16,})").expect("invalid token regex"),
    ]
});

/// Wrapper around sensitive values to reduce accidental logging.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wraps a credential, rejecting empty or whitespace-only values.
    pub fn new(name: &str, value: impl Into<String>) -> Result<Self, FactFluxError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(FactFluxError::MissingSecret(name.to_string()));
        }
        Ok(Self(value.trim().to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, FactFluxError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => SecretValue::new(var, value),
        _ => Err(FactFluxError::MissingSecret(var.to_string())),
    }
}

/// Non-failing variant of [`require_env`] for credential discovery.
pub fn optional_env(var: &str) -> Option<SecretValue> {
    require_env(var).ok()
}

/// The two credentials a research run needs.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub llm_api_key: SecretValue,
    pub research_api_key: SecretValue,
}

impl Credentials {
    pub fn new(llm_api_key: SecretValue, research_api_key: SecretValue) -> Self {
        Self {
            llm_api_key,
            research_api_key,
        }
    }
}

/// Credentials as gathered from the outside world, before validation.
#[derive(Clone, Default)]
pub struct CredentialInputs {
    pub llm_api_key: Option<String>,
    pub research_api_key: Option<String>,
}

impl CredentialInputs {
    pub fn new(llm_api_key: Option<String>, research_api_key: Option<String>) -> Self {
        Self {
            llm_api_key,
            research_api_key,
        }
    }

    /// Keep values already present, filling gaps from `fallback`.
    pub fn or(self, fallback: CredentialInputs) -> Self {
        Self {
            llm_api_key: non_blank(self.llm_api_key).or(non_blank(fallback.llm_api_key)),
            research_api_key: non_blank(self.research_api_key)
                .or(non_blank(fallback.research_api_key)),
        }
    }

    pub fn is_complete(&self) -> bool {
        non_blank(self.llm_api_key.clone()).is_some()
            && non_blank(self.research_api_key.clone()).is_some()
    }

    /// Validate both values. `names` label the missing credential in the error.
    pub fn resolve(&self, names: (&str, &str)) -> Result<Credentials, FactFluxError> {
        let llm = self
            .llm_api_key
            .as_deref()
            .ok_or_else(|| FactFluxError::MissingSecret(names.0.to_string()))
            .and_then(|value| SecretValue::new(names.0, value))?;
        let research = self
            .research_api_key
            .as_deref()
            .ok_or_else(|| FactFluxError::MissingSecret(names.1.to_string()))
            .and_then(|value| SecretValue::new(names.1, value))?;
        Ok(Credentials::new(llm, research))
    }
}

impl std::fmt::Debug for CredentialInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |value: &Option<String>| value.as_ref().map(|_| "***redacted***");
        f.debug_struct("CredentialInputs")
            .field("llm_api_key", &mask(&self.llm_api_key))
            .field("research_api_key", &mask(&self.research_api_key))
            .finish()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Mask credential-looking substrings before text is shown to a user.
pub fn redact(input: &str) -> String {
    let mut output = input.to_string();
    for regex in REDACTION_PATTERNS.iter() {
        output = regex
            .replace_all(&output, |caps: &Captures| {
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_env_success() {
        unsafe {
            std::env::set_var("FACTFLUX_TEST_SECRET", "value");
        }
        let secret = require_env("FACTFLUX_TEST_SECRET").expect("secret should load");
        assert_eq!(secret.expose(), "value");
    }

    #[test]
    fn require_env_missing() {
        unsafe {
            std::env::remove_var("FACTFLUX_TEST_SECRET_MISSING");
        }
        let err = require_env("FACTFLUX_TEST_SECRET_MISSING").unwrap_err();
        assert!(matches!(err, FactFluxError::MissingSecret(_)));
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = SecretValue::new("KEY", "sk-live").unwrap();
        assert_eq!(format!("{secret:?}"), "***redacted***");
    }

    #[test]
    fn resolve_rejects_blank_credentials() {
        let inputs = CredentialInputs::new(Some("sk-abc".into()), Some("   ".into()));
        let err = inputs
            .resolve(("OPENAI_API_KEY", "FIRECRAWL_API_KEY"))
            .unwrap_err();
        match err {
            FactFluxError::MissingSecret(name) => assert_eq!(name, "FIRECRAWL_API_KEY"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!inputs.is_complete());
    }

    #[test]
    fn explicit_inputs_take_precedence() {
        let explicit = CredentialInputs::new(Some("explicit".into()), None);
        let env = CredentialInputs::new(Some("from-env".into()), Some("fc-env".into()));
        let merged = explicit.or(env);
        assert_eq!(merged.llm_api_key.as_deref(), Some("explicit"));
        assert_eq!(merged.research_api_key.as_deref(), Some("fc-env"));
        assert!(merged.is_complete());
    }

    #[test]
    fn redact_masks_tokens() {
        let text = "request failed: api_key=abcd1234 Bearer XYZ sk-abcdef1234567890abcd";
        let redacted = redact(text);
        assert!(!redacted.contains("abcd1234"));
        assert!(!redacted.contains("XYZ"));
        assert!(!redacted.contains("sk-abcdef1234567890abcd"));
        assert!(redacted.contains("[REDACTED]"));
    }
}
