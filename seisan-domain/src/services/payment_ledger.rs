use std::collections::BTreeSet;

use crate::error::LedgerError;
use crate::model::{CurrencyCode, ExpenseId, Money, PairKey, Payment, PaymentId};
use crate::rates::{convert, CurrencyConverter};
use crate::services::CheckpointManager;
use crate::snapshot::Ledger;

/// How a received amount splits against the outstanding debt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Apportioned {
    /// Slice of the received amount that reduces debt.
    pub applied: Money,
    /// Overpayment handed back. Absent when within tolerance of zero.
    pub change_returned: Option<Money>,
    /// Shortfall the creditor absorbs. Absent when within tolerance of zero.
    pub forgiven: Option<Money>,
}

/// Payment records and the paid-so-far arithmetic over them.
///
/// A payment's full applied amount counts once toward the pair's aggregate
/// debt whether or not it is earmarked; earmarking only distributes the
/// same amount across target expenses for per-expense progress.
pub struct PaymentLedger;

impl PaymentLedger {
    /// Splits cash received against the debt outstanding at that moment.
    ///
    /// Overpayments apply the outstanding amount and return the rest as
    /// change; underpayments apply everything received and record the
    /// shortfall as forgiven. Differences within tolerance are dropped
    /// rather than recorded as one-cent change or forgiveness.
    pub fn apportion(&self, outstanding: Money, received: Money) -> Apportioned {
        debug_assert!(!outstanding.as_decimal().is_sign_negative());

        if received >= outstanding {
            let change = received - outstanding;
            Apportioned {
                applied: outstanding,
                change_returned: (!change.is_negligible()).then_some(change),
                forgiven: None,
            }
        } else {
            let shortfall = outstanding - received;
            Apportioned {
                applied: received,
                change_returned: None,
                forgiven: (!shortfall.is_negligible()).then_some(shortfall),
            }
        }
    }

    /// Everything the debtor has paid toward the pair's live debt,
    /// converted into `currency`.
    ///
    /// Counts unallocated payments recorded at or after the pair's last
    /// checkpoint, plus per-expense coverage for each live contributing
    /// expense: the full share when the expense is marked paid, otherwise
    /// the allocations earmarked for it.
    pub fn paid_since_checkpoint(
        &self,
        ledger: &Ledger,
        pair: PairKey,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
    ) -> Result<Money, LedgerError> {
        let contributing = CheckpointManager.contributing_expense_ids(ledger, pair);
        self.paid_credit(ledger, pair, &contributing, currency, converter, None)
    }

    pub(crate) fn paid_credit(
        &self,
        ledger: &Ledger,
        pair: PairKey,
        contributing: &BTreeSet<ExpenseId>,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
        exclude: Option<PaymentId>,
    ) -> Result<Money, LedgerError> {
        let since = ledger
            .checkpoint(pair)
            .map(|checkpoint| checkpoint.last_checkpoint_at);

        let mut paid = Money::ZERO;
        let mut allocated: Vec<&Payment> = Vec::new();
        for payment in ledger.pair_payments(pair) {
            if exclude == Some(payment.id) {
                continue;
            }
            if !payment.is_unallocated() {
                allocated.push(payment);
                continue;
            }
            if since.is_some_and(|cutoff| payment.recorded_at < cutoff) {
                continue;
            }
            paid += convert(payment.amount_applied, &payment.currency, currency, converter)?;
        }

        for &id in contributing {
            let Some(expense) = ledger.expense(id) else {
                continue;
            };
            if ledger.is_marked(pair, id) {
                let share = expense.share_of(pair.debtor);
                paid += convert(share, &expense.currency, currency, converter)?;
                continue;
            }
            for payment in &allocated {
                if !payment.targets.contains(&id) {
                    continue;
                }
                paid += convert(
                    payment.allocation_per_target(),
                    &payment.currency,
                    currency,
                    converter,
                )?;
            }
        }

        Ok(paid)
    }

    /// Sum of allocation slices earmarked for one expense, converted into
    /// `currency`.
    pub fn amount_allocated_to_expense(
        &self,
        ledger: &Ledger,
        pair: PairKey,
        expense: ExpenseId,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
    ) -> Result<Money, LedgerError> {
        let mut total = Money::ZERO;
        for payment in ledger.pair_payments(pair) {
            if !payment.targets.contains(&expense) {
                continue;
            }
            total += convert(
                payment.allocation_per_target(),
                &payment.currency,
                currency,
                converter,
            )?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, Expense, Member, MemberId, Timestamp};
    use crate::rates::FixedRateTable;
    use crate::snapshot::PaymentDraft;
    use chrono::DateTime;
    use rstest::{fixture, rstest};

    fn ts(secs: i64) -> Timestamp {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    fn member(id: u128, name: &str) -> Member {
        Member {
            id: MemberId::from_u128(id),
            name: name.to_owned(),
            joined_at: ts(0),
            left_at: None,
        }
    }

    fn expense(id: u128, payer: u128, amount: i64, split: &[(u128, i64)]) -> Expense {
        Expense {
            id: ExpenseId::from_u128(id),
            description: format!("expense {id}"),
            amount: Money::from_i64(amount),
            currency: eur(),
            category: Category::new("general"),
            payer: MemberId::from_u128(payer),
            date: ts(1_000 + id as i64),
            split: split
                .iter()
                .map(|&(member, share)| (MemberId::from_u128(member), Money::from_i64(share)))
                .collect(),
            payer_earned: None,
            scope: None,
        }
    }

    fn draft(debtor: u128, creditor: u128, received: i64, targets: &[u128], at: i64) -> PaymentDraft {
        PaymentDraft {
            debtor: MemberId::from_u128(debtor),
            creditor: MemberId::from_u128(creditor),
            currency: eur(),
            amount_received: Money::from_i64(received),
            targets: targets.iter().map(|&id| ExpenseId::from_u128(id)).collect(),
            recorded_at: ts(at),
            note: None,
        }
    }

    fn pair(debtor: u128, creditor: u128) -> PairKey {
        PairKey::new(MemberId::from_u128(debtor), MemberId::from_u128(creditor))
    }

    fn eur() -> CurrencyCode {
        CurrencyCode::new("EUR")
    }

    fn no_rates() -> FixedRateTable {
        FixedRateTable::new()
    }

    #[fixture]
    fn payments() -> PaymentLedger {
        PaymentLedger
    }

    #[fixture]
    fn ledger() -> Ledger {
        Ledger::new([member(1, "asa"), member(2, "botan")])
            .add_expense(expense(1, 2, 60, &[(1, 30), (2, 30)]))
            .expect("valid expense")
            .add_expense(expense(2, 2, 40, &[(1, 40)]))
            .expect("valid expense")
    }

    #[rstest]
    #[case::overpay(50, 70, 50, Some(20), None)]
    #[case::underpay(50, 20, 20, None, Some(30))]
    #[case::exact(50, 50, 50, None, None)]
    #[case::nothing_outstanding(0, 30, 0, Some(30), None)]
    fn apportion_splits_received_cash(
        payments: PaymentLedger,
        #[case] outstanding: i64,
        #[case] received: i64,
        #[case] applied: i64,
        #[case] change: Option<i64>,
        #[case] forgiven: Option<i64>,
    ) {
        let result = payments.apportion(Money::from_i64(outstanding), Money::from_i64(received));

        assert_eq!(result.applied, Money::from_i64(applied));
        assert_eq!(result.change_returned, change.map(Money::from_i64));
        assert_eq!(result.forgiven, forgiven.map(Money::from_i64));
    }

    #[rstest]
    fn sub_tolerance_differences_are_dropped(payments: PaymentLedger) {
        let outstanding = Money::from_i64(50);

        let shortfall = payments.apportion(outstanding, Money::new(49_9995, 4));
        assert_eq!(shortfall.applied, Money::new(49_9995, 4));
        assert_eq!(shortfall.forgiven, None);

        let overpay = payments.apportion(outstanding, Money::new(50_0005, 4));
        assert_eq!(overpay.applied, outstanding);
        assert_eq!(overpay.change_returned, None);
    }

    #[rstest]
    fn unallocated_payment_counts_toward_aggregate(payments: PaymentLedger, ledger: Ledger) {
        let (ledger, _) = ledger
            .record_payment(draft(1, 2, 20, &[], 2_000), &no_rates())
            .expect("valid payment");

        let paid = payments
            .paid_since_checkpoint(&ledger, pair(1, 2), &eur(), &no_rates())
            .expect("single currency");

        assert_eq!(paid, Money::from_i64(20));
    }

    #[rstest]
    fn allocation_slices_split_evenly_and_conserve_the_total(
        payments: PaymentLedger,
        ledger: Ledger,
    ) {
        let (ledger, payment) = ledger
            .record_payment(draft(1, 2, 30, &[1, 2], 2_000), &no_rates())
            .expect("valid payment");

        let first = payments
            .amount_allocated_to_expense(&ledger, pair(1, 2), ExpenseId::from_u128(1), &eur(), &no_rates())
            .expect("single currency");
        let second = payments
            .amount_allocated_to_expense(&ledger, pair(1, 2), ExpenseId::from_u128(2), &eur(), &no_rates())
            .expect("single currency");

        assert_eq!(first, Money::from_i64(15));
        assert_eq!(second, Money::from_i64(15));
        assert_eq!(first + second, payment.amount_applied);

        // Earmarking does not double the aggregate credit.
        let paid = payments
            .paid_since_checkpoint(&ledger, pair(1, 2), &eur(), &no_rates())
            .expect("single currency");
        assert_eq!(paid, Money::from_i64(30));
    }

    #[rstest]
    fn mark_wins_over_allocation(payments: PaymentLedger, ledger: Ledger) {
        let (ledger, _) = ledger
            .record_payment(draft(1, 2, 20, &[1], 2_000), &no_rates())
            .expect("valid payment");
        let (ledger, _) = ledger
            .toggle_paid_mark(pair(1, 2), ExpenseId::from_u128(1))
            .expect("known expense");

        let paid = payments
            .paid_since_checkpoint(&ledger, pair(1, 2), &eur(), &no_rates())
            .expect("single currency");

        // The marked share (30) replaces the 20 allocation instead of
        // stacking on top of it.
        assert_eq!(paid, Money::from_i64(30));
    }

    #[rstest]
    fn checkpoint_cuts_off_older_unallocated_payments(payments: PaymentLedger, ledger: Ledger) {
        let (ledger, _) = ledger
            .record_payment(draft(1, 2, 20, &[], 2_000), &no_rates())
            .expect("valid payment");
        let ledger = ledger
            .mark_fully_paid(pair(1, 2), ts(3_000))
            .expect("known members");
        let ledger = ledger
            .add_expense(expense(3, 2, 50, &[(1, 50)]))
            .expect("valid expense");
        let (ledger, _) = ledger
            .record_payment(draft(1, 2, 10, &[], 4_000), &no_rates())
            .expect("valid payment");

        let paid = payments
            .paid_since_checkpoint(&ledger, pair(1, 2), &eur(), &no_rates())
            .expect("single currency");

        // Only the post-checkpoint payment counts against the fresh debt.
        assert_eq!(paid, Money::from_i64(10));
    }

    #[rstest]
    fn paid_credit_can_exclude_one_payment(payments: PaymentLedger, ledger: Ledger) {
        let (ledger, first) = ledger
            .record_payment(draft(1, 2, 20, &[], 2_000), &no_rates())
            .expect("valid payment");
        let (ledger, _) = ledger
            .record_payment(draft(1, 2, 10, &[], 2_500), &no_rates())
            .expect("valid payment");

        let contributing = CheckpointManager.contributing_expense_ids(&ledger, pair(1, 2));
        let without_first = payments
            .paid_credit(
                &ledger,
                pair(1, 2),
                &contributing,
                &eur(),
                &no_rates(),
                Some(first.id),
            )
            .expect("single currency");

        assert_eq!(without_first, Money::from_i64(10));
    }

    #[rstest]
    fn other_pairs_payments_never_leak_in(payments: PaymentLedger, ledger: Ledger) {
        let (ledger, _) = ledger
            .record_payment(draft(2, 1, 15, &[], 2_000), &no_rates())
            .expect("valid payment");

        let paid = payments
            .paid_since_checkpoint(&ledger, pair(1, 2), &eur(), &no_rates())
            .expect("single currency");

        assert_eq!(paid, Money::ZERO);
    }
}
