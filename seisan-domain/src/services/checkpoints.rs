use std::collections::BTreeSet;

use crate::model::{money_epsilon, ExpenseId, PairKey};
use crate::snapshot::Ledger;

/// Settlement checkpoint bookkeeping for debtor/creditor pairs.
///
/// A checkpoint freezes the set of expense ids that existed when a pair
/// settled up. Frozen ids never leave the pair's live debt calculation
/// again, so expenses added afterwards start a fresh debt from zero
/// instead of reopening the settled history.
pub struct CheckpointManager;

impl CheckpointManager {
    /// Expense ids that currently feed the pair's live debt: the creditor
    /// paid, the debtor owes a positive share, and no checkpoint has
    /// frozen the expense yet.
    pub fn contributing_expense_ids(&self, ledger: &Ledger, pair: PairKey) -> BTreeSet<ExpenseId> {
        let frozen = ledger.checkpoint(pair).map(|checkpoint| &checkpoint.frozen);

        ledger
            .expenses()
            .filter(|expense| {
                expense.payer == pair.creditor
                    && expense.share_of(pair.debtor).as_decimal() > money_epsilon()
                    && frozen.map_or(true, |frozen| !frozen.contains(&expense.id))
            })
            .map(|expense| expense.id)
            .collect()
    }

    pub fn is_frozen(&self, ledger: &Ledger, pair: PairKey, expense: ExpenseId) -> bool {
        ledger
            .checkpoint(pair)
            .is_some_and(|checkpoint| checkpoint.frozen.contains(&expense))
    }
}
