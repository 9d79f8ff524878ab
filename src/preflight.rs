//! Environment gate run before any provider is contacted.
//!
//! Every required variable must be non-empty. The Google credential may come
//! from either a file path or an inline JSON payload; when the path variable
//! is set the file has to exist and hold a JSON object with a `type` field.

use crate::config::{FAL_KEY_VAR, GOOGLE_CREDENTIALS_FILE_VAR, GOOGLE_CREDENTIALS_JSON_VAR};
use crate::{logi, logok, logw};
use std::path::Path;

const MASK_PREFIX_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarStatus {
    Present { masked: String },
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarCheck {
    pub name: String,
    pub required: bool,
    pub status: VarStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsCheck {
    File { path: String },
    FileMissing { path: String },
    FileInvalid { path: String, reason: String },
    Inline,
    Absent,
}

impl CredentialsCheck {
    pub fn passed(&self) -> bool {
        matches!(self, CredentialsCheck::File { .. } | CredentialsCheck::Inline)
    }
}

#[derive(Debug, Clone)]
pub struct Preflight {
    pub required: Vec<String>,
    pub credentials_file_var: String,
    pub credentials_inline_var: String,
}

impl Default for Preflight {
    fn default() -> Self {
        Self {
            required: vec![FAL_KEY_VAR.to_string()],
            credentials_file_var: GOOGLE_CREDENTIALS_FILE_VAR.to_string(),
            credentials_inline_var: GOOGLE_CREDENTIALS_JSON_VAR.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub vars: Vec<VarCheck>,
    pub credentials: CredentialsCheck,
}

impl PreflightReport {
    pub fn passed(&self) -> bool {
        self.missing().is_empty() && self.credentials.passed()
    }

    /// Names of required variables that were unset or blank.
    pub fn missing(&self) -> Vec<&str> {
        self.vars
            .iter()
            .filter(|v| v.required && v.status == VarStatus::Missing)
            .map(|v| v.name.as_str())
            .collect()
    }

    pub fn log(&self) {
        logi("Checking required environment variables...");
        for var in &self.vars {
            match &var.status {
                VarStatus::Present { masked } => logok(format!("{}: {}", var.name, masked)),
                VarStatus::Missing if var.required => logw(format!("{}: NOT SET", var.name)),
                VarStatus::Missing => logi(format!("{}: not set (optional)", var.name)),
            }
        }

        match &self.credentials {
            CredentialsCheck::File { path } => logok(format!("Credentials file is valid: {}", path)),
            CredentialsCheck::FileMissing { path } => {
                logw(format!("Credentials file does not exist: {}", path))
            }
            CredentialsCheck::FileInvalid { path, reason } => {
                logw(format!("Credentials file is not usable ({}): {}", reason, path))
            }
            CredentialsCheck::Inline => logok("Credentials provided inline via environment"),
            CredentialsCheck::Absent => logw("No Google Cloud credentials found"),
        }

        let missing = self.missing();
        if !missing.is_empty() {
            logw(format!("Missing required environment variables: {}", missing.join(", ")));
        }
        if self.passed() {
            logok("All credentials are configured.");
        } else {
            logw("Credential preflight FAILED.");
        }
    }
}

impl Preflight {
    pub fn run_from_env(&self) -> PreflightReport {
        self.run_with(|name| std::env::var(name).ok())
    }

    /// Evaluates the gate over an arbitrary variable lookup.
    pub fn run_with<F>(&self, lookup: F) -> PreflightReport
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut vars: Vec<VarCheck> = self
            .required
            .iter()
            .map(|name| VarCheck {
                name: name.clone(),
                required: true,
                status: status_of(get(name)),
            })
            .collect();

        let file_value = get(&self.credentials_file_var);
        let inline_value = get(&self.credentials_inline_var);
        let either_present = file_value.is_some() || inline_value.is_some();

        vars.push(VarCheck {
            name: self.credentials_file_var.clone(),
            required: !either_present,
            status: status_of(file_value.clone()),
        });
        vars.push(VarCheck {
            name: self.credentials_inline_var.clone(),
            required: !either_present,
            status: status_of(inline_value.clone()),
        });

        let credentials = match (file_value, inline_value) {
            (Some(path), _) => check_credentials_file(Path::new(&path)),
            (None, Some(_)) => CredentialsCheck::Inline,
            (None, None) => CredentialsCheck::Absent,
        };

        PreflightReport { vars, credentials }
    }
}

fn status_of(value: Option<String>) -> VarStatus {
    match value {
        Some(v) => VarStatus::Present { masked: mask(&v) },
        None => VarStatus::Missing,
    }
}

fn mask(value: &str) -> String {
    if value.chars().count() > MASK_PREFIX_CHARS {
        let prefix: String = value.chars().take(MASK_PREFIX_CHARS).collect();
        format!("{}...", prefix)
    } else {
        value.to_string()
    }
}

fn check_credentials_file(path: &Path) -> CredentialsCheck {
    let display = path.display().to_string();
    if !path.is_file() {
        return CredentialsCheck::FileMissing { path: display };
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            return CredentialsCheck::FileInvalid {
                path: display,
                reason: err.to_string(),
            }
        }
    };

    match serde_json::from_str::<serde_json::Value>(&content) {
        Ok(serde_json::Value::Object(map)) if map.contains_key("type") => {
            CredentialsCheck::File { path: display }
        }
        Ok(_) => CredentialsCheck::FileInvalid {
            path: display,
            reason: "expected a JSON object with a \"type\" field".to_string(),
        },
        Err(err) => CredentialsCheck::FileInvalid {
            path: display,
            reason: format!("invalid JSON: {}", err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn run(vars: &HashMap<String, String>) -> PreflightReport {
        Preflight::default().run_with(|name| vars.get(name).cloned())
    }

    #[test]
    fn reports_exactly_the_missing_variable() {
        let vars = env(&[(GOOGLE_CREDENTIALS_JSON_VAR, r#"{"type":"service_account"}"#)]);
        let report = run(&vars);

        assert!(!report.passed());
        assert_eq!(report.missing(), vec![FAL_KEY_VAR]);
        assert_eq!(report.credentials, CredentialsCheck::Inline);
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let vars = env(&[
            (FAL_KEY_VAR, "   "),
            (GOOGLE_CREDENTIALS_JSON_VAR, r#"{"type":"service_account"}"#),
        ]);
        assert_eq!(run(&vars).missing(), vec![FAL_KEY_VAR]);
    }

    #[test]
    fn valid_credentials_file_passes() {
        let dir = tempfile::tempdir().unwrap();
        let creds = dir.path().join("sa.json");
        std::fs::write(&creds, r#"{"type":"service_account","project_id":"demo"}"#).unwrap();

        let vars = env(&[
            (FAL_KEY_VAR, "fal-0123456789abcdef"),
            (GOOGLE_CREDENTIALS_FILE_VAR, creds.to_str().unwrap()),
        ]);
        let report = run(&vars);

        assert!(report.passed(), "{:?}", report);
        assert!(report.missing().is_empty());
        let fal = report.vars.iter().find(|v| v.name == FAL_KEY_VAR).unwrap();
        assert_eq!(
            fal.status,
            VarStatus::Present {
                masked: "fal-012345...".to_string()
            }
        );
    }

    #[test]
    fn nonexistent_credentials_file_fails() {
        let vars = env(&[
            (FAL_KEY_VAR, "k"),
            (GOOGLE_CREDENTIALS_FILE_VAR, "/nonexistent/sa.json"),
        ]);
        let report = run(&vars);

        assert!(!report.passed());
        assert!(report.missing().is_empty());
        assert!(matches!(report.credentials, CredentialsCheck::FileMissing { .. }));
    }

    #[test]
    fn credentials_file_without_type_fails() {
        let dir = tempfile::tempdir().unwrap();
        let creds = dir.path().join("sa.json");
        std::fs::write(&creds, r#"{"project_id":"demo"}"#).unwrap();

        let vars = env(&[
            (FAL_KEY_VAR, "k"),
            (GOOGLE_CREDENTIALS_FILE_VAR, creds.to_str().unwrap()),
        ]);
        assert!(matches!(
            run(&vars).credentials,
            CredentialsCheck::FileInvalid { .. }
        ));
    }

    #[test]
    fn no_google_credentials_marks_both_required() {
        let vars = env(&[(FAL_KEY_VAR, "k")]);
        let report = run(&vars);

        assert!(!report.passed());
        assert_eq!(report.credentials, CredentialsCheck::Absent);
        assert_eq!(
            report.missing(),
            vec![GOOGLE_CREDENTIALS_FILE_VAR, GOOGLE_CREDENTIALS_JSON_VAR]
        );
    }

    #[test]
    fn short_values_are_not_masked() {
        assert_eq!(mask("abc"), "abc");
        assert_eq!(mask("0123456789"), "0123456789");
        assert_eq!(mask("0123456789X"), "0123456789...");
    }
}
