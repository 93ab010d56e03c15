use std::{collections::HashMap, fmt};

use crate::core::domain::Provider;

pub const COPILOT_ENV_VAR: &str = "GITHUB_COPILOT_TOKEN";
const COPILOT_PREFIXES: [&str; 3] = ["ghp_", "github_pat_", "mock-copilot-"];

/// Credential handed to the child through its environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub env_var: String,
    pub value: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("env_var", &self.env_var)
            .field("value", &"<redacted>")
            .finish()
    }
}

pub fn is_copilot_token(token: &str) -> bool {
    COPILOT_PREFIXES
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// Snapshot of the provider variables, taken once and owned by the engine.
#[derive(Clone, Default)]
pub struct CredentialStore {
    vars: HashMap<String, String>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.vars.keys().collect();
        names.sort();
        f.debug_struct("CredentialStore")
            .field("configured", &names)
            .finish()
    }
}

impl CredentialStore {
    pub fn from_env() -> Self {
        Self::from_pairs(tracked_vars().filter_map(|name| {
            std::env::var(name)
                .ok()
                .map(|value| (name.to_string(), value))
        }))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        Self { vars }
    }

    pub fn get(&self, env_var: &str) -> Option<&str> {
        self.vars.get(env_var).map(String::as_str)
    }

    /// Preflight lookup. `None` means the execution must not be attempted.
    pub fn resolve(
        &self,
        explicit_key: Option<&str>,
        provider: Option<Provider>,
    ) -> Option<Credential> {
        if let Some(key) = explicit_key.filter(|key| !key.trim().is_empty()) {
            return Some(Credential {
                env_var: self.env_var_for_explicit_key(key, provider).to_string(),
                value: key.to_string(),
            });
        }

        let candidates: Vec<&str> = match provider {
            Some(provider) => vec![provider.env_var()],
            None => Provider::PRIORITY
                .iter()
                .map(Provider::env_var)
                .chain(std::iter::once(COPILOT_ENV_VAR))
                .collect(),
        };

        candidates.into_iter().find_map(|env_var| {
            self.get(env_var).map(|value| Credential {
                env_var: env_var.to_string(),
                value: value.to_string(),
            })
        })
    }

    fn env_var_for_explicit_key(&self, key: &str, provider: Option<Provider>) -> &'static str {
        if is_copilot_token(key) {
            return COPILOT_ENV_VAR;
        }
        if let Some(provider) = provider {
            return provider.env_var();
        }
        Provider::PRIORITY
            .iter()
            .map(Provider::env_var)
            .find(|env_var| self.get(env_var).is_some())
            .unwrap_or(Provider::Anthropic.env_var())
    }

    /// Message for `api_key_missing`, listing what can be configured.
    pub fn missing_message(&self, provider: Option<Provider>) -> String {
        let providers: Vec<Provider> = match provider {
            Some(provider) => vec![provider],
            None => Provider::ALL.to_vec(),
        };

        let mut message =
            String::from("API key not found. Please configure at least one provider:");
        for provider in &providers {
            message.push_str(&format!(
                "\n  - {}: {}",
                provider.display_name(),
                provider.env_var()
            ));
        }
        if provider.is_none() {
            message.push_str(&format!("\n  - GitHub Copilot: {}", COPILOT_ENV_VAR));
        }

        let mut configured: Vec<&str> = tracked_vars().filter(|v| self.get(v).is_some()).collect();
        configured.dedup();
        if !configured.is_empty() {
            message.push_str(&format!(
                "\n\nCurrently configured: {}",
                configured.join(", ")
            ));
        }

        message
    }
}

fn tracked_vars() -> impl Iterator<Item = &'static str> {
    Provider::ALL
        .iter()
        .map(Provider::env_var)
        .chain(std::iter::once(COPILOT_ENV_VAR))
}
