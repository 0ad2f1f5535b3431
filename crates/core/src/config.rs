use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RELAY_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("RELAY_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            storage: StorageConfig::from_env_profiled(p),
            llm: LlmConfig::from_env_profiled(p),
            agent: AgentConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:  {}:{}", self.server.host, self.server.port);
        tracing::info!("  storage: data_dir={}", self.storage.data_dir.display());
        tracing::info!(
            "  llm:     provider={}, model={}, configured={}",
            self.llm.provider,
            self.llm.anthropic_model,
            self.llm.is_configured()
        );
        tracing::info!(
            "  agent:   max_turns={}, turn_timeout={}s, request_timeout={}s",
            self.agent.max_turns,
            self.agent.turn_timeout_secs,
            self.agent.request_timeout_secs
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "PORT", 3001),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
        }
    }
}

// ── LLM (Anthropic) ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "anthropic" (alias "claude")
    pub provider: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub anthropic_base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "LLM_PROVIDER", "anthropic"),
            anthropic_api_key: profiled_env_opt(p, "ANTHROPIC_API_KEY"),
            anthropic_model: profiled_env_or(p, "ANTHROPIC_MODEL", "claude-sonnet-4-5-20250929"),
            anthropic_base_url: profiled_env_or(p, "ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
            temperature: profiled_env_parse(p, "LLM_TEMPERATURE", 1.0),
            max_tokens: profiled_env_parse(p, "LLM_MAX_TOKENS", 4096),
        }
    }

    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "anthropic" | "claude" => self.anthropic_api_key.is_some(),
            _ => false,
        }
    }
}

// ── Agentic loop limits ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Turn-count ceiling for one request.
    pub max_turns: usize,
    pub turn_timeout_secs: u64,
    /// Maximum silence between two provider chunks.
    pub idle_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub max_frame_buffer_bytes: usize,
    pub channel_capacity: usize,
}

impl AgentConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_turns: profiled_env_parse(p, "AGENT_MAX_TURNS", 10),
            turn_timeout_secs: profiled_env_parse(p, "AGENT_TURN_TIMEOUT_SECS", 120),
            idle_timeout_secs: profiled_env_parse(p, "AGENT_IDLE_TIMEOUT_SECS", 60),
            request_timeout_secs: profiled_env_parse(p, "AGENT_REQUEST_TIMEOUT_SECS", 300),
            tool_timeout_secs: profiled_env_parse(p, "AGENT_TOOL_TIMEOUT_SECS", 30),
            max_frame_buffer_bytes: profiled_env_parse(p, "AGENT_MAX_FRAME_BUFFER_BYTES", 1024 * 1024),
            channel_capacity: profiled_env_parse(p, "AGENT_CHANNEL_CAPACITY", 256),
        }
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            turn_timeout_secs: 120,
            idle_timeout_secs: 60,
            request_timeout_secs: 300,
            tool_timeout_secs: 30,
            max_frame_buffer_bytes: 1024 * 1024,
            channel_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiled_key_wins_over_plain_key() {
        env::set_var("RELAYTEST_AGENT_MAX_TURNS", "3");
        env::set_var("AGENT_MAX_TURNS", "7");
        let config = Config::for_profile("relaytest");
        assert_eq!(config.profile, "RELAYTEST");
        assert_eq!(config.agent.max_turns, 3);
        env::remove_var("RELAYTEST_AGENT_MAX_TURNS");
        env::remove_var("AGENT_MAX_TURNS");
    }

    #[test]
    fn unparsable_values_fall_back_to_default() {
        env::set_var("BADPROFILE_AGENT_TOOL_TIMEOUT_SECS", "soon");
        let config = Config::for_profile("badprofile");
        assert_eq!(config.agent.tool_timeout_secs, 30);
        env::remove_var("BADPROFILE_AGENT_TOOL_TIMEOUT_SECS");
    }

    #[test]
    fn llm_requires_key_for_anthropic() {
        let mut llm = LlmConfig::from_env_profiled("NOKEYPROFILE");
        llm.provider = "anthropic".into();
        llm.anthropic_api_key = None;
        assert!(!llm.is_configured());
        llm.anthropic_api_key = Some("sk-test".into());
        assert!(llm.is_configured());
    }

    #[test]
    fn default_profile_label() {
        let config = Config::for_profile("");
        assert_eq!(config.profile_label(), "default");
    }
}
