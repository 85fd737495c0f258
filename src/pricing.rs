//! Pricing lookup collaborator.
//!
//! Wraps the LiteLLM pricing table behind a pure `cost(tokens, model)`
//! function. Consumed by the aggregator and the live monitor; the engine
//! itself never depends on how the table was obtained.
//!
//! Offline mode serves a built-in fallback table and never touches the
//! network; online mode fetches the table and falls back on any failure.

use crate::models::TokenCounts;
#[cfg(feature = "pricing")]
use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;

#[cfg(feature = "pricing")]
const LITELLM_PRICING_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

/// How per-event cost is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostMode {
    /// Use the record's pre-computed cost when present, otherwise compute
    /// from tokens.
    #[default]
    Auto,
    /// Always compute from tokens, ignoring pre-computed costs.
    Calculate,
    /// Only use pre-computed costs; events without one cost zero.
    Display,
}

impl CostMode {
    /// True when this mode may need token-based computation, i.e. a pricing
    /// table must be loaded.
    pub fn needs_pricing(&self) -> bool {
        !matches!(self, CostMode::Display)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelPricing {
    #[serde(default)]
    pub input_cost_per_token: Option<f64>,
    #[serde(default)]
    pub output_cost_per_token: Option<f64>,
    #[serde(default)]
    pub cache_creation_input_token_cost: Option<f64>,
    #[serde(default)]
    pub cache_read_input_token_cost: Option<f64>,
}

/// Explicitly constructed, explicitly passed pricing handle. Owned by the
/// component that needs it and released on drop; never a process global.
#[derive(Debug, Clone, Default)]
pub struct PricingCache {
    models: HashMap<String, ModelPricing>,
}

impl PricingCache {
    /// Built-in table used in offline mode and as the online fallback.
    pub fn offline() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "claude-sonnet-4-20250514".to_string(),
            ModelPricing {
                input_cost_per_token: Some(3e-6),
                output_cost_per_token: Some(1.5e-5),
                cache_creation_input_token_cost: Some(3.75e-6),
                cache_read_input_token_cost: Some(3e-7),
            },
        );
        models.insert(
            "claude-opus-4-20250514".to_string(),
            ModelPricing {
                input_cost_per_token: Some(1.5e-5),
                output_cost_per_token: Some(7.5e-5),
                cache_creation_input_token_cost: Some(1.875e-5),
                cache_read_input_token_cost: Some(1.5e-6),
            },
        );
        models.insert(
            "claude-3-5-haiku-20241022".to_string(),
            ModelPricing {
                input_cost_per_token: Some(8e-7),
                output_cost_per_token: Some(4e-6),
                cache_creation_input_token_cost: Some(1e-6),
                cache_read_input_token_cost: Some(8e-8),
            },
        );
        Self { models }
    }

    /// Fetch the LiteLLM table, keeping only Claude models. Any failure
    /// falls back to the built-in table; aggregation never crashes on an
    /// unavailable upstream.
    #[cfg(feature = "pricing")]
    pub async fn fetch() -> Self {
        match Self::try_fetch().await {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(error = %e, "Pricing fetch failed, using built-in table");
                Self::offline()
            }
        }
    }

    #[cfg(feature = "pricing")]
    async fn try_fetch() -> Result<Self> {
        let client = reqwest::Client::new();
        let response = client.get(LITELLM_PRICING_URL).send().await?;
        let all: HashMap<String, serde_json::Value> = response.json().await?;

        let mut models = HashMap::new();
        for (name, value) in all {
            if !name.starts_with("claude-") {
                continue;
            }
            if let Ok(pricing) = serde_json::from_value::<ModelPricing>(value) {
                models.insert(name, pricing);
            }
        }

        tracing::info!(model_count = models.len(), "Fetched model pricing");
        Ok(Self { models })
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Cost of one event's token usage for the given model. Unknown models
    /// cost zero rather than failing the run.
    pub fn cost(&self, tokens: &TokenCounts, model: &str) -> f64 {
        let Some(pricing) = self.models.get(model) else {
            return 0.0;
        };

        let mut cost = 0.0;
        if let Some(per_token) = pricing.input_cost_per_token {
            cost += tokens.input as f64 * per_token;
        }
        if let Some(per_token) = pricing.output_cost_per_token {
            cost += tokens.output as f64 * per_token;
        }
        // Cache tokens bill at the input rate when no dedicated rate exists.
        let cache_creation = pricing
            .cache_creation_input_token_cost
            .or(pricing.input_cost_per_token);
        if let Some(per_token) = cache_creation {
            cost += tokens.cache_creation as f64 * per_token;
        }
        let cache_read = pricing
            .cache_read_input_token_cost
            .or(pricing.input_cost_per_token);
        if let Some(per_token) = cache_read {
            cost += tokens.cache_read as f64 * per_token;
        }
        cost
    }

    /// Resolve one event's cost under the given mode.
    pub fn event_cost(&self, mode: CostMode, precomputed: Option<f64>, tokens: &TokenCounts, model: Option<&str>) -> f64 {
        match mode {
            CostMode::Auto => precomputed
                .unwrap_or_else(|| model.map(|m| self.cost(tokens, m)).unwrap_or(0.0)),
            CostMode::Calculate => model.map(|m| self.cost(tokens, m)).unwrap_or(0.0),
            CostMode::Display => precomputed.unwrap_or(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: u64, output: u64) -> TokenCounts {
        TokenCounts {
            input,
            output,
            ..Default::default()
        }
    }

    #[test]
    fn computes_token_cost() {
        let cache = PricingCache::offline();
        let cost = cache.cost(&tokens(1_000_000, 1_000_000), "claude-sonnet-4-20250514");
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_costs_zero() {
        let cache = PricingCache::offline();
        assert_eq!(cache.cost(&tokens(100, 100), "gpt-nonexistent"), 0.0);
    }

    #[test]
    fn auto_mode_prefers_precomputed() {
        let cache = PricingCache::offline();
        let t = tokens(1_000_000, 0);
        let c = cache.event_cost(CostMode::Auto, Some(0.5), &t, Some("claude-sonnet-4-20250514"));
        assert_eq!(c, 0.5);
        let c = cache.event_cost(CostMode::Calculate, Some(0.5), &t, Some("claude-sonnet-4-20250514"));
        assert!((c - 3.0).abs() < 1e-9);
        let c = cache.event_cost(CostMode::Display, None, &t, Some("claude-sonnet-4-20250514"));
        assert_eq!(c, 0.0);
    }

    #[test]
    fn display_mode_needs_no_pricing() {
        assert!(!CostMode::Display.needs_pricing());
        assert!(CostMode::Auto.needs_pricing());
    }
}
