use crate::error::LedgerError;
use crate::model::{CurrencyCode, MemberBalances, MemberId, Money, ScopeId};
use crate::snapshot::Ledger;

/// Net balance derivation over the expense log.
pub struct BalanceCalculator;

impl BalanceCalculator {
    /// Computes every member's signed net position in one scan: what they
    /// paid for others minus what others paid for them, restricted to one
    /// currency and an optional scope. Positive means the member is owed
    /// money. Members with no matching expenses appear with a zero balance.
    pub fn balance_table(
        &self,
        ledger: &Ledger,
        currency: &CurrencyCode,
        scope: Option<ScopeId>,
    ) -> Result<MemberBalances, LedgerError> {
        let mut balances: MemberBalances = ledger
            .members()
            .map(|member| (member.id, Money::ZERO))
            .collect();

        for expense in ledger.expenses() {
            if expense.currency != *currency || !expense.in_scope(scope) {
                continue;
            }
            expense.validate()?;

            *balances.entry(expense.payer).or_insert(Money::ZERO) += expense.payer_credit();
            for (member, share) in &expense.split {
                *balances.entry(*member).or_insert(Money::ZERO) -= *share;
            }
        }

        Ok(balances)
    }

    /// One member's net position, read out of the same table
    /// [`Self::balance_table`] produces. Members the table does not know
    /// have a zero balance.
    pub fn net_balance(
        &self,
        ledger: &Ledger,
        member: MemberId,
        currency: &CurrencyCode,
        scope: Option<ScopeId>,
    ) -> Result<Money, LedgerError> {
        Ok(self
            .balance_table(ledger, currency, scope)?
            .get(&member)
            .copied()
            .unwrap_or(Money::ZERO))
    }
}
