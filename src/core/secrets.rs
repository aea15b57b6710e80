//! Secret placeholders and output redaction.
//!
//! Placeholders have the form `${{ secrets.NAME }}` (whitespace inside the
//! braces is optional).

use std::collections::HashMap;

use thiserror::Error;

pub const REDACTED: &str = "****";

const OPEN: &str = "${{";
const CLOSE: &str = "}}";
const SECRETS_PREFIX: &str = "secrets.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("unknown secret '{0}'")]
    Unknown(String),

    #[error("unterminated secret placeholder")]
    Unterminated,
}

/// Replace every `${{ secrets.NAME }}` in `value` with the named secret.
///
/// Expressions that do not reference `secrets.` are left untouched.
pub fn resolve_placeholders(
    value: &str,
    secrets: &HashMap<String, String>,
) -> Result<String, SecretError> {
    let mut resolved = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find(OPEN) {
        resolved.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open.find(CLOSE).ok_or(SecretError::Unterminated)?;
        let expr = after_open[..end].trim();

        match expr.strip_prefix(SECRETS_PREFIX) {
            Some(name) => {
                let secret = secrets
                    .get(name.trim())
                    .ok_or_else(|| SecretError::Unknown(name.trim().to_string()))?;
                resolved.push_str(secret);
            }
            None => {
                resolved.push_str(&rest[start..start + OPEN.len() + end + CLOSE.len()]);
            }
        }

        rest = &after_open[end + CLOSE.len()..];
    }

    resolved.push_str(rest);
    Ok(resolved)
}

/// Masks secret values in captured output
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    // Longest first so a secret containing another is masked whole
    values: Vec<String>,
}

impl Redactor {
    pub fn new<'a>(values: impl IntoIterator<Item = &'a String>) -> Self {
        let mut values: Vec<String> = values
            .into_iter()
            .filter(|v| !v.is_empty())
            .cloned()
            .collect();
        values.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        values.dedup();
        Self { values }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut text = text.to_string();
        for value in &self.values {
            if text.contains(value.as_str()) {
                text = text.replace(value.as_str(), REDACTED);
            }
        }
        text
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> HashMap<String, String> {
        HashMap::from([
            ("TOKEN".to_string(), "abc123".to_string()),
            ("LONG".to_string(), "abc123-suffix".to_string()),
        ])
    }

    #[test]
    fn test_resolve_placeholders() {
        let resolved =
            resolve_placeholders("Bearer ${{ secrets.TOKEN }}/${{secrets.LONG}}", &secrets())
                .unwrap();
        assert_eq!(resolved, "Bearer abc123/abc123-suffix");
    }

    #[test]
    fn test_non_secret_expressions_are_kept() {
        let resolved = resolve_placeholders("${{ env.HOME }}", &secrets()).unwrap();
        assert_eq!(resolved, "${{ env.HOME }}");
    }

    #[test]
    fn test_unknown_and_unterminated() {
        assert_eq!(
            resolve_placeholders("${{ secrets.NOPE }}", &secrets()),
            Err(SecretError::Unknown("NOPE".into()))
        );
        assert_eq!(
            resolve_placeholders("${{ secrets.TOKEN", &secrets()),
            Err(SecretError::Unterminated)
        );
    }

    #[test]
    fn test_redacts_longest_first() {
        let secrets = secrets();
        let redactor = Redactor::new(secrets.values());

        assert_eq!(
            redactor.redact("token=abc123-suffix short=abc123"),
            "token=**** short=****"
        );
    }

    #[test]
    fn test_empty_values_are_not_redacted() {
        let values = vec![String::new()];
        let redactor = Redactor::new(&values);
        assert!(redactor.is_empty());
        assert_eq!(redactor.redact("unchanged"), "unchanged");
    }
}
