//! Model token limits and registry.
//!
//! [`ModelLimits`] stores the token constraints of one model, and
//! [`ModelRegistry`] looks them up by model name with prefix matching.
//! The history window sent upstream never exceeds the effective input budget
//! of the active chat model, whatever the configured token capacity says.

use std::collections::HashMap;

/// Each model has a maximum context window (input tokens) and maximum output tokens.
/// The effective input budget accounts for output reservation and a safety margin.
///
/// # Example
///
/// ```
/// use dalibot_context::ModelLimits;
///
/// let limits = ModelLimits::new(128_000, 16_384);
/// assert_eq!(limits.context_window(), 128_000);
///
/// // Effective budget = context_window - max_output - 5% safety margin
/// assert!(limits.effective_input_budget() < 128_000 - 16_384);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLimits {
    /// Maximum input context window in tokens.
    context_window: u32,
    /// Maximum output tokens the model can generate.
    max_output: u32,
}

impl ModelLimits {
    #[must_use]
    pub const fn new(context_window: u32, max_output: u32) -> Self {
        Self {
            context_window,
            max_output,
        }
    }

    /// Returns `context_window - max_output - 5% safety margin`.
    ///
    /// The margin absorbs token counting inaccuracies and per-request overhead.
    #[must_use]
    pub fn effective_input_budget(&self) -> u32 {
        let available = self.context_window.saturating_sub(self.max_output);
        let safety_margin = available / 20; // 5% = 1/20
        available.saturating_sub(safety_margin)
    }

    #[must_use]
    pub const fn context_window(&self) -> u32 {
        self.context_window
    }

    #[must_use]
    pub const fn max_output(&self) -> u32 {
        self.max_output
    }
}

/// Where model limits came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelLimitsSource {
    /// Exact match from an override.
    Override,
    /// Matched a known prefix (the matched prefix).
    Prefix(&'static str),
    /// Fell back to `DEFAULT_LIMITS` because no match was found.
    DefaultFallback,
}

/// Result of looking up model limits.
///
/// This makes the "fallback OR real data" decision explicit at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedModelLimits {
    limits: ModelLimits,
    source: ModelLimitsSource,
}

impl ResolvedModelLimits {
    #[must_use]
    pub const fn new(limits: ModelLimits, source: ModelLimitsSource) -> Self {
        Self { limits, source }
    }

    #[must_use]
    pub const fn limits(self) -> ModelLimits {
        self.limits
    }

    #[must_use]
    pub const fn source(self) -> ModelLimitsSource {
        self.source
    }
}

/// Default fallback limits for unknown models.
const DEFAULT_LIMITS: ModelLimits = ModelLimits::new(8192, 4096);

/// Known model prefixes and their limits.
///
/// Ordered by specificity (more specific prefixes first) so that
/// `gpt-4o-mini` is not claimed by `gpt-4o`, nor `gpt-4-turbo` by `gpt-4`.
const KNOWN_MODELS: &[(&str, ModelLimits)] = &[
    ("gpt-4o-mini", ModelLimits::new(128_000, 16_384)),
    ("gpt-4o", ModelLimits::new(128_000, 16_384)),
    ("gpt-4-turbo", ModelLimits::new(128_000, 4096)),
    ("gpt-4-vision", ModelLimits::new(128_000, 4096)),
    ("gpt-4", ModelLimits::new(8192, 2048)),
    ("gpt-3.5-turbo", ModelLimits::new(16_385, 4096)),
];

/// Registry of model limits with optional exact-name overrides.
///
/// Lookup order:
/// 1. Exact match in overrides
/// 2. Prefix match against known models (`gpt-4o-2024-08-06` matches `gpt-4o`)
/// 3. `DEFAULT_LIMITS` with an explicit `DefaultFallback` source
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    overrides: HashMap<String, ModelLimits>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an exact-name override, e.g. for a self-hosted deployment.
    #[must_use]
    pub fn with_override(mut self, model: impl Into<String>, limits: ModelLimits) -> Self {
        self.overrides.insert(model.into(), limits);
        self
    }

    #[must_use]
    pub fn get(&self, model: &str) -> ResolvedModelLimits {
        if let Some(limits) = self.overrides.get(model) {
            return ResolvedModelLimits::new(*limits, ModelLimitsSource::Override);
        }

        for (prefix, limits) in KNOWN_MODELS {
            if model.starts_with(prefix) {
                return ResolvedModelLimits::new(*limits, ModelLimitsSource::Prefix(prefix));
            }
        }

        ResolvedModelLimits::new(DEFAULT_LIMITS, ModelLimitsSource::DefaultFallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod model_limits {
        use super::*;

        #[test]
        fn effective_input_budget_subtracts_output_and_safety_margin() {
            let limits = ModelLimits::new(128_000, 16_384);
            // available = 111_616, safety = 5_580, effective = 106_036
            assert_eq!(limits.effective_input_budget(), 106_036);
        }

        #[test]
        fn effective_input_budget_with_small_values() {
            let limits = ModelLimits::new(8192, 4096);
            // available = 4096, safety = 204 (integer division)
            assert_eq!(limits.effective_input_budget(), 3892);
        }

        #[test]
        fn effective_input_budget_handles_output_exceeding_context() {
            let limits = ModelLimits::new(4096, 8192);
            assert_eq!(limits.effective_input_budget(), 0);
        }
    }

    mod model_registry {
        use super::*;

        #[test]
        fn gpt_4o_mini_is_not_shadowed_by_gpt_4o() {
            let registry = ModelRegistry::new();
            let resolved = registry.get("gpt-4o-mini-2024-07-18");
            assert_eq!(resolved.source(), ModelLimitsSource::Prefix("gpt-4o-mini"));
        }

        #[test]
        fn gpt_4_turbo_is_not_shadowed_by_gpt_4() {
            let registry = ModelRegistry::new();
            let resolved = registry.get("gpt-4-turbo");
            assert_eq!(resolved.source(), ModelLimitsSource::Prefix("gpt-4-turbo"));
            assert_eq!(resolved.limits().context_window(), 128_000);

            let resolved = registry.get("gpt-4-0613");
            assert_eq!(resolved.source(), ModelLimitsSource::Prefix("gpt-4"));
            assert_eq!(resolved.limits().context_window(), 8192);
        }

        #[test]
        fn gpt_3_5_turbo_limits() {
            let limits = ModelRegistry::new().get("gpt-3.5-turbo").limits();
            assert_eq!(limits.context_window(), 16_385);
            assert_eq!(limits.max_output(), 4096);
        }

        #[test]
        fn unknown_model_returns_default() {
            let registry = ModelRegistry::new();
            let resolved = registry.get("llama-3-70b");
            assert_eq!(resolved.source(), ModelLimitsSource::DefaultFallback);
            assert_eq!(resolved.limits(), DEFAULT_LIMITS);
        }

        #[test]
        fn override_takes_precedence() {
            let registry =
                ModelRegistry::new().with_override("gpt-4o", ModelLimits::new(50_000, 8000));

            let resolved = registry.get("gpt-4o");
            assert_eq!(resolved.source(), ModelLimitsSource::Override);
            assert_eq!(resolved.limits().context_window(), 50_000);

            // Other gpt-4o variants still use prefix matching.
            let resolved = registry.get("gpt-4o-2024-08-06");
            assert_eq!(resolved.source(), ModelLimitsSource::Prefix("gpt-4o"));
        }
    }
}
