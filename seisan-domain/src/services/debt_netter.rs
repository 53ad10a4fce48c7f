use seisan_netting::NetPosition;

use crate::error::LedgerError;
use crate::model::{money_epsilon, CurrencyCode, Money, ScopeId, Transfer};
use crate::services::BalanceCalculator;
use crate::snapshot::Ledger;

/// Turns net balances into a settlement plan.
pub struct DebtNetter;

impl DebtNetter {
    /// Minimal transfer list that settles everyone's balance in the given
    /// currency and scope. Transfers come back sorted by (debtor, creditor)
    /// so equal ledgers always produce the same plan.
    ///
    /// Balances that do not sum to zero (partially allocated expenses) are
    /// settled as far as they go; the residual is logged and dropped rather
    /// than failing the query.
    pub fn settlement_transfers(
        &self,
        ledger: &Ledger,
        currency: &CurrencyCode,
        scope: Option<ScopeId>,
    ) -> Result<Vec<Transfer>, LedgerError> {
        let balances = BalanceCalculator.balance_table(ledger, currency, scope)?;

        let positions: Vec<NetPosition<_>> = balances
            .iter()
            .map(|(&member, &balance)| NetPosition {
                id: member,
                balance: balance.as_decimal(),
            })
            .collect();
        let member_count = positions.len();

        let netting = seisan_netting::net_transfers(positions, money_epsilon());
        if netting.residual > money_epsilon() {
            tracing::warn!(
                currency = %currency,
                member_count,
                residual = %netting.residual,
                "Net positions did not sum to zero; residual dropped from settlement plan"
            );
        }

        let mut transfers: Vec<Transfer> = netting
            .transfers
            .into_iter()
            .map(|transfer| Transfer {
                debtor: transfer.debtor,
                creditor: transfer.creditor,
                amount: Money::from_decimal(transfer.amount),
            })
            .collect();
        transfers.sort_unstable_by_key(|transfer| (transfer.debtor, transfer.creditor));

        Ok(transfers)
    }
}
