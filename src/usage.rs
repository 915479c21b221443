//! Token usage accounting and cost estimation.
//!
//! Prices are in USD per 1 million tokens. The accumulator only ever grows;
//! it is reset by starting a new session.

use serde::{Deserialize, Serialize};

/// Per-million-token rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default = "default_input")]
    pub input_per_m: f64,
    #[serde(default = "default_output")]
    pub output_per_m: f64,
    #[serde(default = "default_cache_write")]
    pub cache_write_per_m: f64,
    #[serde(default = "default_cache_read")]
    pub cache_read_per_m: f64,
}

fn default_input() -> f64 {
    3.0
}
fn default_output() -> f64 {
    15.0
}
fn default_cache_write() -> f64 {
    3.75
}
fn default_cache_read() -> f64 {
    0.30
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_m: default_input(),
            output_per_m: default_output(),
            cache_write_per_m: default_cache_write(),
            cache_read_per_m: default_cache_read(),
        }
    }
}

/// Token counts reported by one API response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

/// Running totals for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageAccumulator {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, usage: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(usage.prompt_tokens);
        self.output_tokens = self.output_tokens.saturating_add(usage.completion_tokens);
        self.cache_write_tokens = self
            .cache_write_tokens
            .saturating_add(usage.cache_creation_input_tokens);
        self.cache_read_tokens = self
            .cache_read_tokens
            .saturating_add(usage.cache_read_input_tokens);
    }

    pub fn cost(&self, pricing: &Pricing) -> f64 {
        per_m(self.input_tokens, pricing.input_per_m)
            + per_m(self.output_tokens, pricing.output_per_m)
            + per_m(self.cache_write_tokens, pricing.cache_write_per_m)
            + per_m(self.cache_read_tokens, pricing.cache_read_per_m)
    }

    /// Cost if every cached token had been billed as ordinary input.
    pub fn cost_without_cache(&self, pricing: &Pricing) -> f64 {
        let input = self.input_tokens + self.cache_write_tokens + self.cache_read_tokens;
        per_m(input, pricing.input_per_m) + per_m(self.output_tokens, pricing.output_per_m)
    }

    pub fn savings(&self, pricing: &Pricing) -> f64 {
        self.cost_without_cache(pricing) - self.cost(pricing)
    }

    /// Savings as a percentage of the uncached cost; 0 when that cost is 0.
    pub fn savings_percent(&self, pricing: &Pricing) -> f64 {
        let baseline = self.cost_without_cache(pricing);
        if baseline > 0.0 {
            self.savings(pricing) / baseline * 100.0
        } else {
            0.0
        }
    }

    pub fn summary_line(&self, pricing: &Pricing) -> String {
        format!(
            "cost: ${:.4} | saved: ${:.4} ({:.1}%) | input: {} | output: {} | cache write: {} | cache read: {}",
            self.cost(pricing),
            self.savings(pricing),
            self.savings_percent(pricing),
            self.input_tokens,
            self.output_tokens,
            self.cache_write_tokens,
            self.cache_read_tokens,
        )
    }
}

fn per_m(tokens: u64, rate: f64) -> f64 {
    tokens as f64 / 1_000_000.0 * rate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn one_million_of_each() {
        let acc = UsageAccumulator {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            cache_write_tokens: 1_000_000,
            cache_read_tokens: 1_000_000,
        };
        let p = Pricing::default();
        assert!(approx(acc.cost(&p), 3.0 + 15.0 + 3.75 + 0.30));
        assert!(approx(acc.cost_without_cache(&p), 3.0 * 3.0 + 15.0));
        assert!(approx(acc.savings(&p), 24.0 - 22.05));
    }

    #[test]
    fn zero_usage_has_zero_savings_percent() {
        let acc = UsageAccumulator::new();
        let p = Pricing::default();
        assert_eq!(acc.cost(&p), 0.0);
        assert_eq!(acc.savings_percent(&p), 0.0);
    }

    #[test]
    fn cache_reads_save_money() {
        let mut acc = UsageAccumulator::new();
        acc.add(&Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 1_000_000,
        });
        let p = Pricing::default();
        // Reads bill at 0.30 instead of 3.00: 90% saved.
        assert!(approx(acc.savings_percent(&p), 90.0));
    }

    #[test]
    fn add_accumulates() {
        let mut acc = UsageAccumulator::new();
        let u = Usage {
            prompt_tokens: 10,
            completion_tokens: 20,
            cache_creation_input_tokens: 30,
            cache_read_input_tokens: 40,
        };
        acc.add(&u);
        acc.add(&u);
        assert_eq!(acc.input_tokens, 20);
        assert_eq!(acc.output_tokens, 40);
        assert_eq!(acc.cache_write_tokens, 60);
        assert_eq!(acc.cache_read_tokens, 80);
    }

    #[test]
    fn cost_is_monotonic_in_each_counter() {
        let p = Pricing::default();
        let base = UsageAccumulator {
            input_tokens: 500,
            output_tokens: 500,
            cache_write_tokens: 500,
            cache_read_tokens: 500,
        };
        let bumps = [
            Usage { prompt_tokens: 1_000, ..Default::default() },
            Usage { completion_tokens: 1_000, ..Default::default() },
            Usage { cache_creation_input_tokens: 1_000, ..Default::default() },
            Usage { cache_read_input_tokens: 1_000, ..Default::default() },
        ];
        for bump in &bumps {
            let mut next = base;
            next.add(bump);
            assert!(next.cost(&p) >= base.cost(&p), "{:?}", bump);
        }
    }

    #[test]
    fn usage_fields_default_to_zero() {
        let u: Usage = serde_json::from_str(r#"{"prompt_tokens": 7}"#).unwrap();
        assert_eq!(u.prompt_tokens, 7);
        assert_eq!(u.completion_tokens, 0);
        assert_eq!(u.cache_read_input_tokens, 0);
    }
}
