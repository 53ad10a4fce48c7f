use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::model::{
    money_epsilon, Category, Checkpoint, CurrencyCode, Expense, ExpenseId, LifetimeAdjustments,
    Member, MemberBalances, MemberId, Money, PairKey, PairStatus, Payment, PaymentId, ScopeId,
    Timestamp, Transfer,
};
use crate::rates::CurrencyConverter;
use crate::services::{
    Apportioned, BalanceCalculator, CheckpointManager, DebtNetter, ExpenseMarkTracker,
    PaymentLedger, SettlementReporter,
};

/// Input for recording a payment. The engine splits the received amount
/// into applied, change, and forgiven slices itself; callers only say
/// what changed hands.
#[derive(Clone, Debug)]
pub struct PaymentDraft {
    pub debtor: MemberId,
    pub creditor: MemberId,
    pub currency: CurrencyCode,
    pub amount_received: Money,
    /// Expense ids to earmark the payment for. Empty means unallocated.
    pub targets: BTreeSet<ExpenseId>,
    pub recorded_at: Timestamp,
    pub note: Option<String>,
}

/// Partial edit of a stored payment. `None` fields keep their current
/// value.
#[derive(Clone, Debug, Default)]
pub struct PaymentUpdate {
    pub amount_received: Option<Money>,
    pub targets: Option<BTreeSet<ExpenseId>>,
    pub note: Option<String>,
}

/// One settlement ledger: members, the expense log, payment records, paid
/// marks, per-pair checkpoints, and lifetime creditor adjustments.
///
/// The ledger is a value. Mutations take `&self`, validate everything up
/// front, and return the successor state; a rejected call leaves the
/// original untouched with no partial writes. Queries delegate to the
/// service layer so every read goes through one implementation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    members: BTreeMap<MemberId, Member>,
    expenses: BTreeMap<ExpenseId, Expense>,
    payments: BTreeMap<PaymentId, Payment>,
    marks: BTreeMap<PairKey, BTreeSet<ExpenseId>>,
    checkpoints: BTreeMap<PairKey, Checkpoint>,
    lifetime: BTreeMap<MemberId, LifetimeAdjustments>,
}

impl Ledger {
    pub fn new(members: impl IntoIterator<Item = Member>) -> Self {
        Ledger {
            members: members
                .into_iter()
                .map(|member| (member.id, member))
                .collect(),
            ..Ledger::default()
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.get(&id)
    }

    pub fn active_members(&self) -> impl Iterator<Item = &Member> {
        self.members.values().filter(|member| member.is_active())
    }

    pub fn expenses(&self) -> impl Iterator<Item = &Expense> {
        self.expenses.values()
    }

    pub fn expense(&self, id: ExpenseId) -> Option<&Expense> {
        self.expenses.get(&id)
    }

    pub fn payments(&self) -> impl Iterator<Item = &Payment> {
        self.payments.values()
    }

    pub fn payment(&self, id: PaymentId) -> Option<&Payment> {
        self.payments.get(&id)
    }

    pub fn pair_payments(&self, pair: PairKey) -> impl Iterator<Item = &Payment> {
        self.payments
            .values()
            .filter(move |payment| payment.pair() == pair)
    }

    pub fn is_marked(&self, pair: PairKey, expense: ExpenseId) -> bool {
        self.marks
            .get(&pair)
            .is_some_and(|marked| marked.contains(&expense))
    }

    pub fn marked_expenses(&self, pair: PairKey) -> impl Iterator<Item = ExpenseId> + '_ {
        self.marks.get(&pair).into_iter().flatten().copied()
    }

    pub fn checkpoint(&self, pair: PairKey) -> Option<&Checkpoint> {
        self.checkpoints.get(&pair)
    }

    pub fn lifetime(&self, creditor: MemberId) -> Option<&LifetimeAdjustments> {
        self.lifetime.get(&creditor)
    }

    /// Adds a member. Re-adding a known id replaces the stored record, so
    /// a returning member keeps their history.
    pub fn add_member(&self, member: Member) -> Ledger {
        let mut next = self.clone();
        next.members.insert(member.id, member);
        next
    }

    /// Marks a member as departed. Their expenses, payments, and lifetime
    /// records stay in place.
    pub fn retire_member(&self, member: MemberId, at: Timestamp) -> Result<Ledger, LedgerError> {
        let mut next = self.clone();
        let record = next
            .members
            .get_mut(&member)
            .ok_or(LedgerError::UnknownMember(member))?;
        record.left_at = Some(at);
        Ok(next)
    }

    /// Validates and appends an expense. The payer and every split member
    /// must be known, and the id must not already be stored; edits go
    /// through [`Self::update_expense`].
    pub fn add_expense(&self, expense: Expense) -> Result<Ledger, LedgerError> {
        if self.expenses.contains_key(&expense.id) {
            return Err(LedgerError::DuplicateExpense(expense.id));
        }
        self.check_expense(&expense)?;

        let mut next = self.clone();
        next.expenses.insert(expense.id, expense);
        Ok(next)
    }

    /// Replaces a stored expense under the same validation rules as
    /// [`Self::add_expense`]. Paid marks and payment allocations keep
    /// pointing at the id; amounts derived from them follow the new split
    /// on the next read.
    pub fn update_expense(&self, expense: Expense) -> Result<Ledger, LedgerError> {
        if !self.expenses.contains_key(&expense.id) {
            return Err(LedgerError::UnknownExpense(expense.id));
        }
        self.check_expense(&expense)?;

        let mut next = self.clone();
        next.expenses.insert(expense.id, expense);
        Ok(next)
    }

    /// Deletes an expense and its paid marks. Payment target sets and
    /// frozen checkpoint sets keep the id as history; reads skip ids with
    /// no stored expense.
    pub fn remove_expense(&self, id: ExpenseId) -> Result<Ledger, LedgerError> {
        if !self.expenses.contains_key(&id) {
            return Err(LedgerError::UnknownExpense(id));
        }

        let mut next = self.clone();
        next.expenses.remove(&id);
        for marked in next.marks.values_mut() {
            marked.remove(&id);
        }
        next.marks.retain(|_, marked| !marked.is_empty());
        Ok(next)
    }

    /// Records a payment, splitting the received amount against the
    /// pair's outstanding debt in the draft's currency at this moment.
    /// Overpayment beyond tolerance becomes change returned; shortfall
    /// beyond tolerance is forgiven and added to the creditor's lifetime
    /// totals. Returns the successor state and the stored record.
    pub fn record_payment(
        &self,
        draft: PaymentDraft,
        converter: &dyn CurrencyConverter,
    ) -> Result<(Ledger, Payment), LedgerError> {
        self.require_member(draft.debtor)?;
        self.require_member(draft.creditor)?;
        if draft.amount_received.as_decimal() <= money_epsilon() {
            return Err(LedgerError::InvalidAmount(format!(
                "payment amount must be positive (found {})",
                draft.amount_received
            )));
        }
        for target in &draft.targets {
            if !self.expenses.contains_key(target) {
                return Err(LedgerError::UnknownExpense(*target));
            }
        }

        let pair = PairKey::new(draft.debtor, draft.creditor);
        let outstanding = SettlementReporter.still_owed(self, pair, &draft.currency, converter)?;
        let split = PaymentLedger.apportion(outstanding, draft.amount_received);

        let payment = Payment {
            id: PaymentId::random(),
            debtor: draft.debtor,
            creditor: draft.creditor,
            currency: draft.currency,
            amount_applied: split.applied,
            amount_received: draft.amount_received,
            change_returned: split.change_returned,
            amount_forgiven: split.forgiven,
            targets: draft.targets,
            recorded_at: draft.recorded_at,
            note: draft.note,
        };
        tracing::debug!(
            payment = %payment.id,
            pair = %pair,
            received = %payment.amount_received,
            applied = %payment.amount_applied,
            "Recorded payment"
        );

        let mut next = self.clone();
        next.accumulate_lifetime(pair, &split);
        next.payments.insert(payment.id, payment.clone());
        Ok((next, payment))
    }

    /// Edits a payment and recomputes its applied/change/forgiven split
    /// against the debt outstanding without it. Lifetime totals only take
    /// the positive deltas; edits downward never subtract what was
    /// already accumulated.
    pub fn update_payment(
        &self,
        id: PaymentId,
        update: PaymentUpdate,
        converter: &dyn CurrencyConverter,
    ) -> Result<(Ledger, Payment), LedgerError> {
        let current = self.payments.get(&id).ok_or(LedgerError::UnknownPayment(id))?;

        let received = update.amount_received.unwrap_or(current.amount_received);
        if received.as_decimal() <= money_epsilon() {
            return Err(LedgerError::InvalidAmount(format!(
                "payment amount must be positive (found {received})"
            )));
        }
        let targets = update.targets.unwrap_or_else(|| current.targets.clone());
        for target in &targets {
            if !self.expenses.contains_key(target) {
                return Err(LedgerError::UnknownExpense(*target));
            }
        }

        let pair = current.pair();
        let outstanding = SettlementReporter.still_owed_excluding(
            self,
            pair,
            &current.currency,
            converter,
            Some(id),
        )?;
        let split = PaymentLedger.apportion(outstanding, received);

        let payment = Payment {
            amount_applied: split.applied,
            amount_received: received,
            change_returned: split.change_returned,
            amount_forgiven: split.forgiven,
            targets,
            note: update.note.or_else(|| current.note.clone()),
            ..current.clone()
        };
        tracing::debug!(
            payment = %payment.id,
            pair = %pair,
            received = %payment.amount_received,
            applied = %payment.amount_applied,
            "Updated payment"
        );

        let mut next = self.clone();
        next.accumulate_lifetime_delta(pair, current, &split);
        next.payments.insert(id, payment.clone());
        Ok((next, payment))
    }

    /// Deletes a payment record. Lifetime forgiven/change totals are
    /// deliberately left standing.
    pub fn remove_payment(&self, id: PaymentId) -> Result<Ledger, LedgerError> {
        if !self.payments.contains_key(&id) {
            return Err(LedgerError::UnknownPayment(id));
        }

        let mut next = self.clone();
        next.payments.remove(&id);
        Ok(next)
    }

    /// Flips the paid mark for one expense within a pair. Returns the
    /// successor state and whether the expense is marked afterwards.
    pub fn toggle_paid_mark(
        &self,
        pair: PairKey,
        expense: ExpenseId,
    ) -> Result<(Ledger, bool), LedgerError> {
        self.require_member(pair.debtor)?;
        self.require_member(pair.creditor)?;
        if !self.expenses.contains_key(&expense) {
            return Err(LedgerError::UnknownExpense(expense));
        }

        let mut next = self.clone();
        let marked = next.marks.entry(pair).or_default();
        let now_marked = if marked.remove(&expense) {
            false
        } else {
            marked.insert(expense);
            true
        };
        next.marks.retain(|_, marked| !marked.is_empty());
        Ok((next, now_marked))
    }

    /// Settles a pair up: every currently contributing expense id is
    /// frozen into the pair's checkpoint and the pair is labelled closed.
    /// Freezing is a union, so calling this again before new debt accrues
    /// changes nothing but the timestamp.
    pub fn mark_fully_paid(&self, pair: PairKey, at: Timestamp) -> Result<Ledger, LedgerError> {
        self.require_member(pair.debtor)?;
        self.require_member(pair.creditor)?;

        let contributing = CheckpointManager.contributing_expense_ids(self, pair);
        tracing::debug!(
            pair = %pair,
            frozen_count = contributing.len(),
            "Checkpointed pair"
        );

        let mut next = self.clone();
        let checkpoint = next.checkpoints.entry(pair).or_insert_with(|| Checkpoint {
            frozen: BTreeSet::new(),
            last_checkpoint_at: at,
            explicitly_settled: true,
        });
        checkpoint.frozen.extend(contributing);
        checkpoint.last_checkpoint_at = at;
        checkpoint.explicitly_settled = true;
        Ok(next)
    }

    /// Clears the closed label set by [`Self::mark_fully_paid`]. The
    /// frozen set and timestamp stay; settled history does not reopen.
    pub fn unmark_fully_paid(&self, pair: PairKey) -> Result<Ledger, LedgerError> {
        self.require_member(pair.debtor)?;
        self.require_member(pair.creditor)?;

        let mut next = self.clone();
        if let Some(checkpoint) = next.checkpoints.get_mut(&pair) {
            checkpoint.explicitly_settled = false;
        }
        Ok(next)
    }

    pub fn balance_table(
        &self,
        currency: &CurrencyCode,
        scope: Option<ScopeId>,
    ) -> Result<MemberBalances, LedgerError> {
        BalanceCalculator.balance_table(self, currency, scope)
    }

    pub fn net_balance(
        &self,
        member: MemberId,
        currency: &CurrencyCode,
        scope: Option<ScopeId>,
    ) -> Result<Money, LedgerError> {
        BalanceCalculator.net_balance(self, member, currency, scope)
    }

    pub fn settlement_transfers(
        &self,
        currency: &CurrencyCode,
        scope: Option<ScopeId>,
    ) -> Result<Vec<Transfer>, LedgerError> {
        DebtNetter.settlement_transfers(self, currency, scope)
    }

    pub fn contributing_expense_ids(&self, pair: PairKey) -> BTreeSet<ExpenseId> {
        CheckpointManager.contributing_expense_ids(self, pair)
    }

    pub fn amount_owed(
        &self,
        pair: PairKey,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
    ) -> Result<Money, LedgerError> {
        SettlementReporter.amount_owed(self, pair, currency, converter)
    }

    pub fn still_owed(
        &self,
        pair: PairKey,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
    ) -> Result<Money, LedgerError> {
        SettlementReporter.still_owed(self, pair, currency, converter)
    }

    pub fn is_fully_settled(
        &self,
        pair: PairKey,
        converter: &dyn CurrencyConverter,
    ) -> Result<bool, LedgerError> {
        SettlementReporter.is_fully_settled(self, pair, converter)
    }

    pub fn pair_status(
        &self,
        pair: PairKey,
        converter: &dyn CurrencyConverter,
    ) -> Result<PairStatus, LedgerError> {
        SettlementReporter.pair_status(self, pair, converter)
    }

    pub fn paid_since_checkpoint(
        &self,
        pair: PairKey,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
    ) -> Result<Money, LedgerError> {
        PaymentLedger.paid_since_checkpoint(self, pair, currency, converter)
    }

    pub fn amount_allocated_to_expense(
        &self,
        pair: PairKey,
        expense: ExpenseId,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
    ) -> Result<Money, LedgerError> {
        PaymentLedger.amount_allocated_to_expense(self, pair, expense, currency, converter)
    }

    pub fn total_marked_amount(
        &self,
        pair: PairKey,
        currency: &CurrencyCode,
        converter: &dyn CurrencyConverter,
    ) -> Result<Money, LedgerError> {
        ExpenseMarkTracker.total_marked_amount(self, pair, currency, converter)
    }

    pub fn lifetime_forgiven(&self, creditor: MemberId) -> Money {
        SettlementReporter.lifetime_forgiven(self, creditor)
    }

    pub fn lifetime_change_returned(&self, creditor: MemberId) -> Money {
        SettlementReporter.lifetime_change_returned(self, creditor)
    }

    pub fn creditor_record(&self, creditor: MemberId) -> LifetimeAdjustments {
        SettlementReporter.creditor_record(self, creditor)
    }

    pub fn spending_by_category(
        &self,
        currency: &CurrencyCode,
        scope: Option<ScopeId>,
        converter: &dyn CurrencyConverter,
    ) -> Result<BTreeMap<Category, Money>, LedgerError> {
        SettlementReporter.spending_by_category(self, currency, scope, converter)
    }

    fn require_member(&self, member: MemberId) -> Result<(), LedgerError> {
        if self.members.contains_key(&member) {
            Ok(())
        } else {
            Err(LedgerError::UnknownMember(member))
        }
    }

    fn check_expense(&self, expense: &Expense) -> Result<(), LedgerError> {
        expense.validate()?;
        self.require_member(expense.payer)?;
        for member in expense.split.keys() {
            self.require_member(*member)?;
        }
        Ok(())
    }

    fn accumulate_lifetime(&mut self, pair: PairKey, split: &Apportioned) {
        if let Some(forgiven) = split.forgiven {
            self.lifetime
                .entry(pair.creditor)
                .or_default()
                .add_forgiven(pair.debtor, forgiven);
        }
        if let Some(change) = split.change_returned {
            self.lifetime
                .entry(pair.creditor)
                .or_default()
                .add_change_returned(pair.debtor, change);
        }
    }

    fn accumulate_lifetime_delta(
        &mut self,
        pair: PairKey,
        previous: &Payment,
        split: &Apportioned,
    ) {
        let forgiven_delta = split.forgiven.unwrap_or(Money::ZERO)
            - previous.amount_forgiven.unwrap_or(Money::ZERO);
        let change_delta = split.change_returned.unwrap_or(Money::ZERO)
            - previous.change_returned.unwrap_or(Money::ZERO);
        let lifetime = self.lifetime.entry(pair.creditor).or_default();
        lifetime.add_forgiven(pair.debtor, forgiven_delta);
        lifetime.add_change_returned(pair.debtor, change_delta);
    }
}

#[cfg(test)]
impl Ledger {
    /// Inserts an expense with no validation, for tests that need a
    /// corrupted snapshot.
    pub(crate) fn with_expense_unchecked(self, expense: Expense) -> Ledger {
        let mut next = self;
        next.expenses.insert(expense.id, expense);
        next
    }
}
