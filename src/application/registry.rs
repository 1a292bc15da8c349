//! Provider Registry
//!
//! Maps coin symbols to the adapter that serves them. Built once at startup
//! in two phases: every configured provider is constructed exactly once
//! (with its own throttle), then coins are bound to providers by name.
//! A shared adapter bound to several coins keeps one throttle for all.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::adapters::providers::ProviderSettings;
use crate::adapters::throttle::Throttle;
use crate::config::{Config, ConfigError, ThrottlePolicy};
use crate::ports::{BalanceProvider, ProviderError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No provider adapter bound to coin {0}")]
    UnknownCoinAdapter(String),

    #[error("Coin {coin} references unregistered provider {provider}")]
    UnknownProvider { coin: String, provider: String },

    #[error("Failed to build provider {provider}: {source}")]
    Build {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn BalanceProvider>>,
    /// coin -> provider name
    bindings: BTreeMap<String, String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured provider, then bind the configured coins
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        for (name, section) in &config.providers {
            let throttle = match section.throttle_policy()? {
                ThrottlePolicy::Tiered(limits) => Throttle::tiered(limits),
                ThrottlePolicy::Cooldown(interval) => Throttle::cooldown(interval),
                ThrottlePolicy::Unbounded => {
                    tracing::warn!("Provider {} has no rate policy; requests are unthrottled", name);
                    Throttle::unbounded()
                }
            };

            let settings = ProviderSettings::new(section.base_url())
                .with_api_key(section.resolved_api_key(name))
                .with_timeout(section.timeout());

            let provider = section
                .kind
                .build(settings, throttle)
                .map_err(|source| RegistryError::Build {
                    provider: name.clone(),
                    source,
                })?;

            registry.register(name, provider);
        }

        for (coin, section) in &config.coins {
            registry.bind(coin, &section.provider)?;
        }

        Ok(registry)
    }

    /// Register an adapter under `name`. Returns false and keeps the first
    /// adapter if the name is already taken.
    pub fn register(&mut self, name: &str, provider: Arc<dyn BalanceProvider>) -> bool {
        if self.providers.contains_key(name) {
            tracing::debug!("Provider {} already registered; keeping the first instance", name);
            return false;
        }
        self.providers.insert(name.to_string(), provider);
        tracing::info!("Registered provider {}", name);
        true
    }

    /// Route `coin` to the provider registered as `provider`
    pub fn bind(&mut self, coin: &str, provider: &str) -> Result<(), RegistryError> {
        if !self.providers.contains_key(provider) {
            return Err(RegistryError::UnknownProvider {
                coin: coin.to_string(),
                provider: provider.to_string(),
            });
        }
        self.bindings
            .insert(coin.to_ascii_lowercase(), provider.to_string());
        Ok(())
    }

    pub fn adapter_for(&self, coin: &str) -> Result<Arc<dyn BalanceProvider>, RegistryError> {
        self.bindings
            .get(&coin.to_ascii_lowercase())
            .and_then(|name| self.providers.get(name))
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCoinAdapter(coin.to_string()))
    }

    /// Name of the provider serving `coin`
    pub fn provider_name(&self, coin: &str) -> Option<&str> {
        self.bindings.get(&coin.to_ascii_lowercase()).map(String::as_str)
    }

    /// Fails on the first coin in `coins` without a bound adapter
    pub fn ensure_bound<'a>(&self, coins: impl IntoIterator<Item = &'a str>) -> Result<(), RegistryError> {
        for coin in coins {
            self.adapter_for(coin)?;
        }
        Ok(())
    }

    pub fn coins(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("bindings", &self.bindings)
            .finish()
    }
}
