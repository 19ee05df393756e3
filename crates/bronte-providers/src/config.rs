//! Driver configuration and registry
//!
//! The caller hands the adapter a map `provider name -> settings`; the
//! registry turns each entry into a concrete driver at construction time.
//! Unknown driver kinds are rejected there, not at request time. Once built,
//! the registry is immutable and shared across requests.

use bronte_protocol::ProviderKind;
use secrecy::SecretString;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::{AnthropicDriver, DriverError, GeminiDriver, OpenAiDriver, ProviderDriver};

/// Settings for one provider entry.
pub struct DriverSettings {
    /// Driver kind name: `openai`, `google`, `xai`, `azure`, or `anthropic`.
    pub kind: String,
    pub api_key: SecretString,
    pub base_url: Option<String>,
}

impl DriverSettings {
    pub fn new(kind: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            api_key: SecretString::from(api_key.into()),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Immutable name -> driver map.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn ProviderDriver>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DriverRegistry {
    /// Build drivers for every configured provider.
    pub fn build(settings: BTreeMap<String, DriverSettings>) -> Result<Self, DriverError> {
        let mut registry = Self::default();
        for (name, entry) in settings {
            let kind: ProviderKind = entry
                .kind
                .parse()
                .map_err(DriverError::Configuration)?;

            let driver: Arc<dyn ProviderDriver> = match kind {
                ProviderKind::OpenAI => {
                    Arc::new(OpenAiDriver::openai(name.as_str(), entry.api_key, entry.base_url))
                }
                ProviderKind::Xai => {
                    Arc::new(OpenAiDriver::xai(name.as_str(), entry.api_key, entry.base_url))
                }
                ProviderKind::Azure => {
                    let base_url = entry.base_url.ok_or_else(|| {
                        DriverError::Configuration(format!(
                            "provider '{name}': azure requires a base URL"
                        ))
                    })?;
                    Arc::new(OpenAiDriver::azure(name.as_str(), entry.api_key, base_url))
                }
                ProviderKind::Google => {
                    Arc::new(GeminiDriver::new(name.as_str(), entry.api_key, entry.base_url))
                }
                ProviderKind::Anthropic => {
                    Arc::new(AnthropicDriver::new(name.as_str(), entry.api_key, entry.base_url))
                }
            };
            registry.drivers.insert(name, driver);
        }
        Ok(registry)
    }

    /// Register a pre-built driver (used by tests to inject stubs).
    pub fn insert(&mut self, name: impl Into<String>, driver: Arc<dyn ProviderDriver>) {
        self.drivers.insert(name.into(), driver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderDriver>> {
        self.drivers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
