//! Shared credit pools.
//!
//! A creditor owns a budget and credits it as its own window opens up.
//! Debitors claim from it before sending. A claim that cannot be met
//! leaves the debitor waiting, and the next credit wakes every waiting
//! debitor with a [`SIGNAL_BUDGET_CREDIT`](super::SIGNAL_BUDGET_CREDIT)
//! signal so it can retry.

use std::collections::{BTreeSet, HashMap};

use super::ConsumerId;

#[derive(Debug, Default)]
struct Budget {
    available: i64,
    debitors: BTreeSet<(ConsumerId, u64)>,
    waiting: BTreeSet<(ConsumerId, u64)>,
}

#[derive(Debug, Default)]
pub struct Budgets {
    budgets: HashMap<u64, Budget>,
}

impl Budgets {
    pub fn acquire_creditor(&mut self, budget_id: u64) {
        self.budgets.entry(budget_id).or_default();
    }

    pub fn release_creditor(&mut self, budget_id: u64) {
        self.budgets.remove(&budget_id);
    }

    /// Adds credit and returns the debitors to wake.
    pub fn credit(&mut self, budget_id: u64, credit: i64) -> Vec<(ConsumerId, u64)> {
        match self.budgets.get_mut(&budget_id) {
            Some(budget) => {
                budget.available += credit;
                tracing::trace!(
                    "Budget {} credited {}, available {}",
                    budget_id,
                    credit,
                    budget.available
                );
                std::mem::take(&mut budget.waiting).into_iter().collect()
            }
            None => vec![],
        }
    }

    pub fn available(&self, budget_id: u64) -> i64 {
        self.budgets
            .get(&budget_id)
            .map(|budget| budget.available)
            .unwrap_or_default()
    }

    /// Returns `false` when no creditor owns `budget_id`.
    pub fn acquire_debitor(&mut self, budget_id: u64, debitor: (ConsumerId, u64)) -> bool {
        match self.budgets.get_mut(&budget_id) {
            Some(budget) => {
                budget.debitors.insert(debitor);
                true
            }
            None => false,
        }
    }

    pub fn release_debitor(&mut self, budget_id: u64, debitor: (ConsumerId, u64)) {
        if let Some(budget) = self.budgets.get_mut(&budget_id) {
            budget.debitors.remove(&debitor);
            budget.waiting.remove(&debitor);
        }
    }

    /// Claims between `minimum` and `maximum` bytes.
    ///
    /// Returns what was granted, `0` when less than `minimum` is
    /// available, in which case the debitor is woken on the next credit.
    pub fn claim(
        &mut self,
        budget_id: u64,
        debitor: (ConsumerId, u64),
        minimum: i32,
        maximum: i32,
    ) -> i32 {
        let Some(budget) = self.budgets.get_mut(&budget_id) else {
            return 0;
        };

        if budget.available >= minimum as i64 && maximum > 0 {
            let claimed = budget.available.min(maximum as i64);
            budget.available -= claimed;
            claimed as i32
        } else {
            budget.waiting.insert(debitor);
            0
        }
    }

    /// Forgets every debitor owned by `consumer`.
    pub fn detach(&mut self, consumer: ConsumerId) {
        for budget in self.budgets.values_mut() {
            budget.debitors.retain(|(owner, _)| *owner != consumer);
            budget.waiting.retain(|(owner, _)| *owner != consumer);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn claim_waits_for_credit() {
        let mut budgets = Budgets::default();
        budgets.acquire_creditor(7);
        assert!(budgets.acquire_debitor(7, (1, 3)));

        assert_eq!(budgets.claim(7, (1, 3), 10, 100), 0);
        assert_eq!(budgets.credit(7, 64), vec![(1, 3)]);
        assert_eq!(budgets.claim(7, (1, 3), 10, 100), 64);
        assert_eq!(budgets.available(7), 0);
        assert!(budgets.credit(7, 8).is_empty());
    }

    #[test]
    fn claim_is_partial() {
        let mut budgets = Budgets::default();
        budgets.acquire_creditor(7);
        budgets.credit(7, 100);
        assert_eq!(budgets.claim(7, (1, 3), 1, 30), 30);
        assert_eq!(budgets.available(7), 70);
    }

    #[test]
    fn unknown_budget_grants_nothing() {
        let mut budgets = Budgets::default();
        assert!(!budgets.acquire_debitor(9, (1, 3)));
        assert_eq!(budgets.claim(9, (1, 3), 0, 10), 0);
    }
}
