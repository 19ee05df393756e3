//! Adapter configuration
//!
//! The library surface takes the provider map and knobs directly; reading
//! the environment is the binary's concern. A provider is registered iff its
//! API key is present.

use bronte_providers::{DriverSettings, ReasoningEffort, ServiceTier};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api.anthropic.com";

pub struct AdapterConfig {
    /// Loopback port; 0 asks the kernel for one.
    pub port: u16,
    pub providers: BTreeMap<String, DriverSettings>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub service_tier: Option<ServiceTier>,
    /// Emit `thinking` blocks in responses.
    pub send_reasoning: bool,
    /// Error-report directory; `None` disables the debug sink.
    pub debug_dir: Option<PathBuf>,
    /// 1 = file per error, 2 = additionally buffer stream chunks.
    pub debug_level: u8,
    /// Passthrough target for non-`/v1/messages` traffic.
    pub upstream_base_url: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            providers: BTreeMap::new(),
            reasoning_effort: None,
            service_tier: None,
            send_reasoning: true,
            debug_dir: None,
            debug_level: 1,
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
        }
    }
}

impl AdapterConfig {
    /// Assemble configuration from environment variables.
    ///
    /// `PORT`, `{PROVIDER}_API_KEY` / `{PROVIDER}_BASE_URL` per provider,
    /// `BRONTE_REASONING_EFFORT`, `BRONTE_SERVICE_TIER`. `BRONTE_DEBUG=1`
    /// enables the error sink at the default location; `BRONTE_DEBUG_DIR`
    /// overrides the directory and `BRONTE_DEBUG_LEVEL` the verbosity.
    pub fn from_env() -> Self {
        let mut providers = BTreeMap::new();

        for (name, key_var, url_var) in [
            ("openai", "OPENAI_API_KEY", "OPENAI_BASE_URL"),
            ("google", "GOOGLE_API_KEY", "GOOGLE_BASE_URL"),
            ("xai", "XAI_API_KEY", "XAI_BASE_URL"),
            ("azure", "AZURE_API_KEY", "AZURE_BASE_URL"),
            ("anthropic", "ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL"),
        ] {
            let Ok(key) = env::var(key_var) else { continue };
            if key.is_empty() {
                continue;
            }
            let mut settings = DriverSettings::new(name, key);
            if let Ok(url) = env::var(url_var) {
                settings = settings.with_base_url(url);
            }
            if name == "azure" && settings.base_url.is_none() {
                tracing::warn!("AZURE_API_KEY set but AZURE_BASE_URL missing; skipping azure");
                continue;
            }
            providers.insert(name.to_string(), settings);
        }

        let reasoning_effort = env::var("BRONTE_REASONING_EFFORT")
            .ok()
            .and_then(|v| match v.parse::<ReasoningEffort>() {
                Ok(effort) => Some(effort),
                Err(e) => {
                    tracing::warn!("ignoring BRONTE_REASONING_EFFORT: {e}");
                    None
                }
            });
        let service_tier =
            env::var("BRONTE_SERVICE_TIER")
                .ok()
                .and_then(|v| match v.parse::<ServiceTier>() {
                    Ok(tier) => Some(tier),
                    Err(e) => {
                        tracing::warn!("ignoring BRONTE_SERVICE_TIER: {e}");
                        None
                    }
                });

        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8787),
            providers,
            reasoning_effort,
            service_tier,
            send_reasoning: true,
            debug_dir: debug_dir_from_env(),
            debug_level: env::var("BRONTE_DEBUG_LEVEL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            upstream_base_url: env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_UPSTREAM_BASE_URL.to_string()),
        }
    }
}

/// Sink directory: `BRONTE_DEBUG_DIR` when set, otherwise the platform data
/// directory when `BRONTE_DEBUG` is truthy, otherwise disabled.
fn debug_dir_from_env() -> Option<PathBuf> {
    if let Ok(dir) = env::var("BRONTE_DEBUG_DIR") {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    let enabled = env::var("BRONTE_DEBUG")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if !enabled {
        return None;
    }
    let mut dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("bronte");
    dir.push("errors");
    Some(dir)
}
