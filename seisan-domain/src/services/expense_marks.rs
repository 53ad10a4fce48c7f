use std::collections::BTreeSet;

use crate::error::LedgerError;
use crate::model::{CurrencyCode, ExpenseId, Money, PairKey};
use crate::rates::{convert, CurrencyConverter};
use crate::services::CheckpointManager;
use crate::snapshot::Ledger;

/// Per-expense paid flags for debtor/creditor pairs.
///
/// A mark says "the debtor's share of this expense is paid" without a
/// payment record behind it. Where a mark and a payment allocation meet
/// on the same expense, the mark wins and the allocation is ignored.
pub struct ExpenseMarkTracker;

impl ExpenseMarkTracker {
    /// Marked expense ids that still feed the pair's live debt.
    pub fn marked_contributing_ids(&self, ledger: &Ledger, pair: PairKey) -> BTreeSet<ExpenseId> {
        CheckpointManager
            .contributing_expense_ids(ledger, pair)
            .into_iter()
            .filter(|&id| ledger.is_marked(pair, id))
            .collect()
    }

    /// Total of the debtor's shares across live marked expenses, converted
    /// into `currency`.
    pub fn total_marked_amount(
        &self,
        ledger: &Ledger,
        pair: PairKey,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
    ) -> Result<Money, LedgerError> {
        let mut total = Money::ZERO;
        for id in self.marked_contributing_ids(ledger, pair) {
            let Some(expense) = ledger.expense(id) else {
                continue;
            };
            let share = expense.share_of(pair.debtor);
            total += convert(share, &expense.currency, currency, converter)?;
        }
        Ok(total)
    }
}
