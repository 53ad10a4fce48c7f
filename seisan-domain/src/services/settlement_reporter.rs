use std::collections::{BTreeMap, BTreeSet};

use crate::error::LedgerError;
use crate::model::{
    money_epsilon, Category, CurrencyCode, ExpenseId, LifetimeAdjustments, MemberId, Money,
    PairKey, PairStatus, PaymentId, ScopeId,
};
use crate::rates::{convert, CurrencyConverter};
use crate::services::{CheckpointManager, PaymentLedger};
use crate::snapshot::Ledger;

/// Per-pair debt views and lifetime creditor totals.
pub struct SettlementReporter;

impl SettlementReporter {
    /// Total the debtor owes the creditor across live contributing
    /// expenses, converted into `currency`. Checkpointed expenses are
    /// out of this number for good.
    pub fn amount_owed(
        &self,
        ledger: &Ledger,
        pair: PairKey,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
    ) -> Result<Money, LedgerError> {
        let contributing = CheckpointManager.contributing_expense_ids(ledger, pair);
        self.owed_total(ledger, pair, &contributing, currency, converter)
    }

    /// What remains after payments and paid marks:
    /// `max(0, amount_owed - paid_so_far)`. Never negative.
    pub fn still_owed(
        &self,
        ledger: &Ledger,
        pair: PairKey,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
    ) -> Result<Money, LedgerError> {
        self.still_owed_excluding(ledger, pair, currency, converter, None)
    }

    pub(crate) fn still_owed_excluding(
        &self,
        ledger: &Ledger,
        pair: PairKey,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
        exclude: Option<PaymentId>,
    ) -> Result<Money, LedgerError> {
        let contributing = CheckpointManager.contributing_expense_ids(ledger, pair);
        let owed = self.owed_total(ledger, pair, &contributing, currency, converter)?;
        let paid =
            PaymentLedger.paid_credit(ledger, pair, &contributing, currency, converter, exclude)?;
        Ok(owed.saturating_sub(paid))
    }

    /// Whether the pair's live debt is cleared. Checks the outstanding
    /// amount in every currency the contributing expenses use; a pair with
    /// no live debt is vacuously settled.
    pub fn is_fully_settled(
        &self,
        ledger: &Ledger,
        pair: PairKey,
        converter: &dyn CurrencyConverter,
    ) -> Result<bool, LedgerError> {
        let contributing = CheckpointManager.contributing_expense_ids(ledger, pair);
        let currencies: BTreeSet<&CurrencyCode> = contributing
            .iter()
            .filter_map(|&id| ledger.expense(id))
            .map(|expense| &expense.currency)
            .collect();

        for currency in currencies {
            let remaining = self.still_owed(ledger, pair, currency, converter)?;
            if remaining.as_decimal() > money_epsilon() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Where the pair stands in its settle-up cycle. `Closed` means the
    /// last checkpoint still stands and nothing has accrued since; a fresh
    /// expense moves the pair back to `Open`.
    pub fn pair_status(
        &self,
        ledger: &Ledger,
        pair: PairKey,
        converter: &dyn CurrencyConverter,
    ) -> Result<PairStatus, LedgerError> {
        let contributing = CheckpointManager.contributing_expense_ids(ledger, pair);
        if contributing.is_empty() {
            let closed = ledger
                .checkpoint(pair)
                .is_some_and(|checkpoint| checkpoint.explicitly_settled);
            return Ok(if closed {
                PairStatus::Closed
            } else {
                PairStatus::Settled
            });
        }

        if self.is_fully_settled(ledger, pair, converter)? {
            Ok(PairStatus::Settled)
        } else {
            Ok(PairStatus::Open)
        }
    }

    pub fn lifetime_forgiven(&self, ledger: &Ledger, creditor: MemberId) -> Money {
        ledger
            .lifetime(creditor)
            .map_or(Money::ZERO, |lifetime| lifetime.forgiven)
    }

    pub fn lifetime_change_returned(&self, ledger: &Ledger, creditor: MemberId) -> Money {
        ledger
            .lifetime(creditor)
            .map_or(Money::ZERO, |lifetime| lifetime.change_returned)
    }

    /// Full lifetime record for one creditor, with the per-debtor
    /// breakdown. Creditors with no recorded adjustments get zeros.
    pub fn creditor_record(&self, ledger: &Ledger, creditor: MemberId) -> LifetimeAdjustments {
        ledger.lifetime(creditor).cloned().unwrap_or_default()
    }

    /// Expense totals grouped by category, converted into `currency`,
    /// optionally restricted to one scope.
    pub fn spending_by_category(
        &self,
        ledger: &Ledger,
        currency: &CurrencyCode,
        scope: Option<ScopeId>,
        converter: &dyn CurrencyConverter,
    ) -> Result<BTreeMap<Category, Money>, LedgerError> {
        let mut totals: BTreeMap<Category, Money> = BTreeMap::new();
        for expense in ledger.expenses() {
            if !expense.in_scope(scope) {
                continue;
            }
            let amount = convert(expense.amount, &expense.currency, currency, converter)?;
            *totals.entry(expense.category.clone()).or_insert(Money::ZERO) += amount;
        }
        Ok(totals)
    }

    fn owed_total(
        &self,
        ledger: &Ledger,
        pair: PairKey,
        contributing: &BTreeSet<ExpenseId>,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
    ) -> Result<Money, LedgerError> {
        let mut owed = Money::ZERO;
        for &id in contributing {
            let Some(expense) = ledger.expense(id) else {
                continue;
            };
            let share = expense.share_of(pair.debtor);
            owed += convert(share, &expense.currency, currency, converter)?;
        }
        Ok(owed)
    }
}
