//! Credential selection for the agent runtime.

use anyhow::{Result, anyhow};
use clap::ValueEnum;

pub const OAUTH_TOKEN_VAR: &str = "CLAUDE_CODE_OAUTH_TOKEN";
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AuthMethod {
    /// Claude subscription via `claude setup-token`.
    #[default]
    Subscription,
    /// Pay-per-use Anthropic API key.
    ApiKey,
}

impl AuthMethod {
    pub fn env_var(self) -> &'static str {
        match self {
            Self::Subscription => OAUTH_TOKEN_VAR,
            Self::ApiKey => API_KEY_VAR,
        }
    }

    /// Variables that must not reach the agent process under this method.
    pub fn scrubbed_vars(self) -> &'static [&'static str] {
        match self {
            Self::Subscription => &[API_KEY_VAR],
            Self::ApiKey => &[],
        }
    }
}

/// A credential that was found, with a preview safe to print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStatus {
    pub var: &'static str,
    pub preview: String,
}

/// Look up the credential for `method` using `lookup` (normally `std::env::var`).
pub fn check_credentials(
    method: AuthMethod,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<CredentialStatus> {
    let var = method.env_var();
    let value = lookup(var)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| match method {
            AuthMethod::Subscription => anyhow!(
                "{var} is not set; run `claude setup-token` and export the token (or add it to .env)"
            ),
            AuthMethod::ApiKey => anyhow!("{var} is not set; export an Anthropic API key"),
        })?;
    let preview = match method {
        AuthMethod::Subscription => mask(&value, 20, 10),
        AuthMethod::ApiKey => mask(&value, 10, 5),
    };
    Ok(CredentialStatus { var, preview })
}

fn mask(secret: &str, head: usize, tail: usize) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= head + tail {
        return "***".to_string();
    }
    let start: String = chars[..head].iter().collect();
    let end: String = chars[chars.len() - tail..].iter().collect();
    format!("{start}...{end}")
}
