/*!
 * Provider registry: validated, immutable provider configuration.
 *
 * Raw configuration arrives as loosely-typed JSON; this module parses it into
 * validated [`Provider`] values, dropping unusable entries instead of
 * propagating partially-typed data, and resolves which providers participate
 * in a dispatch (one in serial mode, the selected set in parallel mode).
 */

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use url::Url;

/// Default model when the raw entry leaves it blank
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

/// Default sampling temperature
fn default_temperature() -> f32 {
    0.7
}

/// Raw provider entry as it appears in configuration
///
/// Every field is defaulted so a malformed or missing field never aborts
/// parsing of the surrounding document; validation decides what is usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProviderConfig {
    /// Stable provider identifier
    #[serde(default)]
    pub id: String,

    /// Human-readable provider name
    #[serde(default)]
    pub name: String,

    /// Base URL of the OpenAI-compatible API
    #[serde(default)]
    pub api_base_url: String,

    /// API key for authentication
    #[serde(default)]
    pub api_key: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Requests-per-minute cap; non-finite or <= 0 means unlimited
    #[serde(default)]
    pub requests_per_minute: Option<f64>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

/// Validated, immutable translation provider. Identity is `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Provider {
    /// Stable provider identifier
    pub id: String,
    /// Human-readable provider name
    pub name: String,
    /// Base URL of the OpenAI-compatible API
    pub api_base_url: String,
    /// API key for authentication
    pub api_key: String,
    /// Model name
    pub model: String,
    /// Requests-per-minute cap; `None` means unlimited
    pub rate_limit: Option<u32>,
    /// Sampling temperature
    pub temperature: f32,
}

/// Top-level registry configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Raw provider entries, in registration order
    #[serde(default)]
    pub providers: Vec<RawProviderConfig>,

    /// Ids of the providers selected for dispatch
    #[serde(default)]
    pub selection: Vec<String>,

    /// Whether the selection runs in parallel (one worker per provider)
    #[serde(default)]
    pub parallel: bool,
}

impl RegistryConfig {
    /// Parse a registry configuration from a JSON document
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("failed to parse provider registry configuration")
    }
}

/// Normalize a raw requests-per-minute value into an enforceable cap.
///
/// Non-finite or non-positive values mean unlimited. Fractional values below
/// one request per minute clamp to 1 rather than truncating to a
/// permanently-blocking zero.
fn normalize_rpm(raw: Option<f64>) -> Option<u32> {
    match raw {
        Some(rpm) if rpm.is_finite() && rpm > 0.0 => Some(rpm.round().max(1.0) as u32),
        _ => None,
    }
}

/// Validate one raw entry into a usable provider, or drop it
fn validate(raw: &RawProviderConfig) -> Option<Provider> {
    let id = raw.id.trim();
    let name = raw.name.trim();
    let api_base_url = raw.api_base_url.trim().trim_end_matches('/');

    if id.is_empty() || name.is_empty() || api_base_url.is_empty() {
        warn!("Dropping provider entry with missing id, name or api_base_url (id='{}')", raw.id);
        return None;
    }
    if Url::parse(api_base_url).is_err() {
        warn!("Dropping provider '{}': invalid api_base_url '{}'", id, api_base_url);
        return None;
    }

    let temperature = if raw.temperature.is_finite() && (0.0..=2.0).contains(&raw.temperature) {
        raw.temperature
    } else {
        default_temperature()
    };

    Some(Provider {
        id: id.to_string(),
        name: name.to_string(),
        api_base_url: api_base_url.to_string(),
        api_key: raw.api_key.trim().to_string(),
        model: if raw.model.trim().is_empty() { default_model() } else { raw.model.trim().to_string() },
        rate_limit: normalize_rpm(raw.requests_per_minute),
        temperature,
    })
}

/// Resolve the ordered set of providers participating in a dispatch.
///
/// Pure function with no side effects and no network access. Unusable entries
/// are dropped. In serial mode the result holds the single active provider;
/// in parallel mode it holds every selected provider in selection order. An
/// empty selection, or one referencing no known provider, falls back to the
/// first registered provider.
pub fn resolve(config: &RegistryConfig) -> Vec<Provider> {
    let registered: Vec<Provider> = config.providers.iter().filter_map(validate).collect();
    if registered.is_empty() {
        return Vec::new();
    }

    let mut selected: Vec<Provider> = Vec::new();
    for id in &config.selection {
        if selected.iter().any(|p| &p.id == id) {
            continue;
        }
        if let Some(provider) = registered.iter().find(|p| &p.id == id) {
            selected.push(provider.clone());
        }
    }

    if selected.is_empty() {
        return vec![registered[0].clone()];
    }
    if config.parallel {
        selected
    } else {
        vec![selected[0].clone()]
    }
}

/// One reusable prompt fragment for the system message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt label, rendered in brackets before the content
    #[serde(default)]
    pub name: String,

    /// Prompt body
    #[serde(default)]
    pub content: String,
}

/// Concatenate the selected prompts into a single system message.
///
/// Each prompt contributes its content prefixed by a bracketed label; prompts
/// with empty content are skipped. Returns `None` when nothing remains.
pub fn render_system_prompt(prompts: &[Prompt]) -> Option<String> {
    let parts: Vec<String> = prompts
        .iter()
        .filter(|p| !p.content.trim().is_empty())
        .map(|p| format!("[{}]\n{}", p.name.trim(), p.content.trim()))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}
