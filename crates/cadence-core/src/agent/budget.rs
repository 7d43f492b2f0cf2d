//! Per-project cost budget for agent invocations.
//!
//! `CostBudget` tracks estimated spend in micro-dollars with lock-free atomic
//! counters. It detects the 80% warning crossing (reported exactly once even
//! under concurrent access) and exhaustion. The pool checks exhaustion
//! before every call and charges the estimate afterwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const MICROS_PER_USD: f64 = 1_000_000.0;

/// Status returned after charging the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    /// Under the warning threshold (< 80%).
    Ok,
    /// Just crossed the 80% threshold. Returned exactly once per budget lifetime.
    Warning,
    /// At or over 100% of the budget.
    Exhausted,
}

/// Atomic spend tracker shared by every invocation of one project.
///
/// Cloning produces a shared view of the same budget. A budget without a
/// limit records spend but never warns or exhausts.
#[derive(Debug, Clone)]
pub struct CostBudget {
    limit_micros: Option<u64>,
    spent_micros: Arc<AtomicU64>,
    warning_emitted: Arc<AtomicBool>,
}

fn to_micros(usd: f64) -> u64 {
    (usd.max(0.0) * MICROS_PER_USD).round() as u64
}

impl CostBudget {
    /// Create a budget capped at `limit_usd`.
    pub fn new(limit_usd: f64) -> Self {
        Self {
            limit_micros: Some(to_micros(limit_usd)),
            spent_micros: Arc::new(AtomicU64::new(0)),
            warning_emitted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a budget that only records spend.
    pub fn unlimited() -> Self {
        Self {
            limit_micros: None,
            spent_micros: Arc::new(AtomicU64::new(0)),
            warning_emitted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_limit(limit_usd: Option<f64>) -> Self {
        limit_usd.map_or_else(Self::unlimited, Self::new)
    }

    /// Atomically record `cost_usd` of spend and return the resulting status.
    pub fn charge(&self, cost_usd: f64) -> BudgetStatus {
        let micros = to_micros(cost_usd);
        let prev = self.spent_micros.fetch_add(micros, Ordering::SeqCst);
        let new_total = prev.saturating_add(micros);

        let Some(limit) = self.limit_micros else {
            return BudgetStatus::Ok;
        };

        if new_total >= limit {
            return BudgetStatus::Exhausted;
        }

        let threshold = limit / 100 * 80;
        if prev < threshold
            && new_total >= threshold
            && self
                .warning_emitted
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return BudgetStatus::Warning;
        }

        BudgetStatus::Ok
    }

    /// Whether the limit has been reached. Unlimited budgets never exhaust.
    pub fn is_exhausted(&self) -> bool {
        self.limit_micros
            .is_some_and(|limit| self.spent_micros.load(Ordering::SeqCst) >= limit)
    }

    pub fn spent_usd(&self) -> f64 {
        self.spent_micros.load(Ordering::SeqCst) as f64 / MICROS_PER_USD
    }

    pub fn limit_usd(&self) -> Option<f64> {
        self.limit_micros.map(|l| l as f64 / MICROS_PER_USD)
    }

    /// Remaining spend before exhaustion (saturating). `None` when unlimited.
    pub fn remaining_usd(&self) -> Option<f64> {
        self.limit_micros.map(|limit| {
            limit.saturating_sub(self.spent_micros.load(Ordering::SeqCst)) as f64 / MICROS_PER_USD
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_returns_ok_when_under_budget() {
        let budget = CostBudget::new(10.0);
        assert_eq!(budget.charge(1.0), BudgetStatus::Ok);
        assert_eq!(budget.charge(2.0), BudgetStatus::Ok);
        assert!((budget.spent_usd() - 3.0).abs() < 1e-9);
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn charge_returns_warning_exactly_once_at_80_percent() {
        let budget = CostBudget::new(10.0);
        assert_eq!(budget.charge(7.5), BudgetStatus::Ok);
        assert_eq!(budget.charge(0.5), BudgetStatus::Warning);
        assert_eq!(budget.charge(0.5), BudgetStatus::Ok);
    }

    #[test]
    fn charge_returns_exhausted_at_or_over_limit() {
        let budget = CostBudget::new(1.0);
        assert_eq!(budget.charge(1.5), BudgetStatus::Exhausted);
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining_usd(), Some(0.0));
    }

    #[test]
    fn unlimited_budget_never_exhausts() {
        let budget = CostBudget::from_limit(None);
        assert_eq!(budget.charge(1_000.0), BudgetStatus::Ok);
        assert!(!budget.is_exhausted());
        assert!(budget.limit_usd().is_none());
        assert!(budget.remaining_usd().is_none());
    }

    #[tokio::test]
    async fn parallel_charges_warn_at_most_once() {
        let budget = CostBudget::new(100.0);

        let mut handles = Vec::new();
        for _ in 0..100 {
            let b = budget.clone();
            handles.push(tokio::spawn(async move { b.charge(1.0) }));
        }

        let mut warning_count = 0;
        for handle in handles {
            if handle.await.unwrap() == BudgetStatus::Warning {
                warning_count += 1;
            }
        }

        assert!(warning_count <= 1, "Warning fired {warning_count} times");
        assert!(budget.is_exhausted());
    }
}
