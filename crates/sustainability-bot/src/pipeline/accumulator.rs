use crate::memory_db::UsageMetrics;
use crate::model_runtime::TokenUsage;

/// Answer text and usage gathered while a completion streams.
///
/// Owned by the task driving one response; never shared.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    answer: String,
    usage: TokenUsage,
    chunks: usize,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_delta(&mut self, delta: &str) {
        self.answer.push_str(delta);
        self.chunks += 1;
    }

    /// Providers report usage once; a repeated report replaces the earlier one.
    pub fn record_usage(&mut self, usage: TokenUsage) {
        self.usage = usage;
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Token counters plus the USD cost converted at `usd_to_inr`.
    pub fn usage_metrics(&self, usd_to_inr: f64) -> UsageMetrics {
        UsageMetrics {
            total_tokens: self.usage.total_tokens,
            prompt_tokens: self.usage.prompt_tokens,
            completion_tokens: self.usage.completion_tokens,
            cost_inr: self.usage.cost_usd * usd_to_inr,
        }
    }

    pub fn into_answer(self) -> String {
        self.answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_deltas_and_converts_cost() {
        let mut acc = ResponseAccumulator::new();
        acc.push_delta("Compost");
        acc.push_delta("ing");
        acc.record_usage(TokenUsage {
            prompt_tokens: 12,
            completion_tokens: 8,
            total_tokens: 20,
            cost_usd: 0.01,
        });

        assert_eq!(acc.answer(), "Composting");
        assert_eq!(acc.chunks(), 2);
        let usage = acc.usage_metrics(90.0);
        assert_eq!(usage.total_tokens, 20);
        assert!((usage.cost_inr - 0.9).abs() < 1e-12);
    }

    #[test]
    fn missing_usage_reports_zero() {
        let acc = ResponseAccumulator::new();
        assert!(acc.usage_metrics(90.0).is_zero());
    }
}
