//! Process configuration, read from the environment at startup, plus the
//! per-request credential accessor.

/// Environment variable holding the Gemini API key.
pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
const DEFAULT_LOG_FILTER: &str = "geminitor=debug,tower_http=debug";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port bound on all interfaces (`PORT`, default 8080).
    pub port: u16,
    /// Gemini model identifier (`GEMINI_MODEL`).
    pub model: String,
    /// Optional endpoint override (`GEMINI_API_BASE_URL`).
    pub gemini_base_url: Option<String>,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub default_log_filter: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: parse_env("PORT", 8080),
            model: env_or("GEMINI_MODEL", DEFAULT_MODEL),
            gemini_base_url: std::env::var("GEMINI_API_BASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            default_log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

/// Narrow accessor for the upstream credential.
///
/// Consulted on every request so a rotated key is picked up without a
/// restart. An empty value counts as missing.
pub trait CredentialSource: Send + Sync {
    fn api_key(&self) -> Option<String>;

    /// Name reported when the credential is missing.
    fn name(&self) -> &'static str {
        API_KEY_VAR
    }
}

/// Reads the credential from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredential;

impl CredentialSource for EnvCredential {
    fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_VAR).ok().filter(|key| !key.is_empty())
    }
}

/// Fixed credential for tests.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct FixedCredential(pub Option<String>);

#[cfg(test)]
impl CredentialSource for FixedCredential {
    fn api_key(&self) -> Option<String> {
        self.0.clone().filter(|key| !key.is_empty())
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
