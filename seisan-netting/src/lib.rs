#![warn(clippy::uninlined_format_args)]

mod model;

use rust_decimal::Decimal;

pub use model::{NetPosition, Netting, Transfer};

/// Builds a minimal set of transfers that settles the given net positions.
///
/// Positions within `epsilon` of zero are treated as settled. The remaining
/// debtors and creditors are each sorted by descending magnitude (ties broken
/// by id, so equal inputs always produce equal output) and matched greedily:
/// the largest debtor pays the largest creditor the smaller of the two
/// outstanding magnitudes, and whichever side reaches zero advances. For a
/// balanced input this emits at most `debtors + creditors - 1` transfers.
///
/// Inputs that do not sum to zero are not an error here: the unmatched
/// magnitude is reported as [`Netting::residual`] and the caller decides
/// what to do with it.
pub fn net_transfers<Id>(
    positions: impl IntoIterator<Item = NetPosition<Id>>,
    epsilon: Decimal,
) -> Netting<Id>
where
    Id: Copy + Ord,
{
    debug_assert!(!epsilon.is_sign_negative());

    let mut debtors: Vec<(Id, Decimal)> = Vec::new();
    let mut creditors: Vec<(Id, Decimal)> = Vec::new();
    for position in positions {
        if position.balance < -epsilon {
            debtors.push((position.id, -position.balance));
        } else if position.balance > epsilon {
            creditors.push((position.id, position.balance));
        }
    }

    debtors.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    creditors.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut transfers = Vec::with_capacity(debtors.len().max(creditors.len()));
    let (mut i, mut j) = (0, 0);
    while i < debtors.len() && j < creditors.len() {
        let amount = debtors[i].1.min(creditors[j].1);
        // Both outstanding magnitudes exceed epsilon, so the matched amount does too.
        debug_assert!(amount > epsilon);
        transfers.push(Transfer {
            debtor: debtors[i].0,
            creditor: creditors[j].0,
            amount,
        });

        debtors[i].1 -= amount;
        creditors[j].1 -= amount;
        if debtors[i].1 <= epsilon {
            i += 1;
        }
        if creditors[j].1 <= epsilon {
            j += 1;
        }
    }

    let residual: Decimal = debtors[i..]
        .iter()
        .chain(&creditors[j..])
        .map(|(_, magnitude)| *magnitude)
        .sum();

    Netting {
        transfers,
        residual,
    }
}

#[cfg(test)]
mod tests {
    use super::{net_transfers, NetPosition, Transfer};
    use proptest::prelude::*;
    use rstest::rstest;
    use rust_decimal::Decimal;
    use std::collections::HashMap;

    fn epsilon() -> Decimal {
        Decimal::new(1, 3)
    }

    fn position(id: &'static str, cents: i64) -> NetPosition<&'static str> {
        NetPosition {
            id,
            balance: Decimal::new(cents, 2),
        }
    }

    fn apply_transfers(
        positions: &[NetPosition<&'static str>],
        transfers: &[Transfer<&'static str>],
    ) -> HashMap<&'static str, Decimal> {
        let mut balances: HashMap<&'static str, Decimal> = positions
            .iter()
            .map(|position| (position.id, position.balance))
            .collect();
        for transfer in transfers {
            *balances
                .get_mut(transfer.debtor)
                .expect("debtor must exist in positions") += transfer.amount;
            *balances
                .get_mut(transfer.creditor)
                .expect("creditor must exist in positions") -= transfer.amount;
        }
        balances
    }

    fn assert_positions_settled(
        positions: &[NetPosition<&'static str>],
        transfers: &[Transfer<&'static str>],
    ) {
        let balances = apply_transfers(positions, transfers);
        for position in positions {
            let remaining = balances
                .get(position.id)
                .copied()
                .unwrap_or(Decimal::ZERO)
                .abs();
            assert!(
                remaining <= epsilon(),
                "position {} left unsettled ({remaining})",
                position.id
            );
        }
    }

    #[rstest]
    #[case::simple_two_people(&[position("A", 10_000), position("B", -10_000)])]
    fn settles_two_people(#[case] positions: &[NetPosition<&'static str>]) {
        let netting = net_transfers(positions.iter().copied(), epsilon());

        assert_eq!(netting.transfers.len(), 1);
        assert_eq!(netting.transfers[0].debtor, "B");
        assert_eq!(netting.transfers[0].creditor, "A");
        assert_eq!(netting.transfers[0].amount, Decimal::from(100));
        assert_eq!(netting.residual, Decimal::ZERO);
        assert_positions_settled(positions, &netting.transfers);
    }

    #[rstest]
    #[case::one_creditor_two_debtors(
        &[position("A", 8_000), position("B", -5_000), position("C", -3_000)],
        &[("B", "A", 5_000), ("C", "A", 3_000)],
    )]
    #[case::largest_magnitudes_pair_first(
        &[
            position("A", 10_000),
            position("B", 4_000),
            position("C", -9_000),
            position("D", -5_000),
        ],
        &[("C", "A", 9_000), ("D", "A", 1_000), ("D", "B", 4_000)],
    )]
    #[case::equal_magnitudes_tie_break_by_id(
        &[position("C", -10_000), position("B", 5_000), position("A", 5_000)],
        &[("C", "A", 5_000), ("C", "B", 5_000)],
    )]
    fn greedy_matching_is_deterministic(
        #[case] positions: &[NetPosition<&'static str>],
        #[case] expected: &[(&'static str, &'static str, i64)],
    ) {
        let netting = net_transfers(positions.iter().copied(), epsilon());

        let expected: Vec<Transfer<&'static str>> = expected
            .iter()
            .map(|&(debtor, creditor, cents)| Transfer {
                debtor,
                creditor,
                amount: Decimal::new(cents, 2),
            })
            .collect();
        assert_eq!(netting.transfers, expected);
        assert_eq!(netting.residual, Decimal::ZERO);
        assert_positions_settled(positions, &netting.transfers);
    }

    #[rstest]
    #[case::all_zero(&[position("A", 0), position("B", 0), position("C", 0)])]
    #[case::empty(&[])]
    #[case::single_zero(&[position("A", 0)])]
    #[case::sub_epsilon_noise(&[
        NetPosition { id: "A", balance: Decimal::new(5, 4) },
        NetPosition { id: "B", balance: Decimal::new(-5, 4) },
    ])]
    fn settled_inputs_produce_no_transfers(#[case] positions: &[NetPosition<&'static str>]) {
        let netting = net_transfers(positions.iter().copied(), epsilon());

        assert!(netting.transfers.is_empty());
        assert_eq!(netting.residual, Decimal::ZERO);
    }

    #[rstest]
    #[case::creditor_leftover(&[position("A", 5_000), position("B", -4_000)], 1_000)]
    #[case::debtor_leftover(&[position("A", 4_000), position("B", -5_000)], 1_000)]
    #[case::nobody_to_match(&[position("A", 5_000)], 5_000)]
    fn imbalanced_inputs_report_residual(
        #[case] positions: &[NetPosition<&'static str>],
        #[case] expected_residual_cents: i64,
    ) {
        let netting = net_transfers(positions.iter().copied(), epsilon());

        assert_eq!(netting.residual, Decimal::new(expected_residual_cents, 2));
        for transfer in &netting.transfers {
            assert!(transfer.amount > epsilon());
        }
    }

    #[test]
    fn output_is_independent_of_input_order() {
        let sorted = [
            position("A", 12_000),
            position("B", -10_000),
            position("C", -2_000),
            position("D", 0),
        ];
        let shuffled = [
            position("C", -2_000),
            position("D", 0),
            position("A", 12_000),
            position("B", -10_000),
        ];

        let first = net_transfers(sorted.iter().copied(), epsilon());
        let second = net_transfers(shuffled.iter().copied(), epsilon());

        assert_eq!(first, second);
    }

    #[test]
    fn fractional_amounts_are_preserved_exactly() {
        let positions = [
            NetPosition {
                id: "A",
                balance: Decimal::new(3_334, 2),
            },
            NetPosition {
                id: "B",
                balance: Decimal::new(-3_334, 2),
            },
        ];

        let netting = net_transfers(positions.iter().copied(), epsilon());

        assert_eq!(netting.transfers[0].amount, Decimal::new(3_334, 2));
    }

    proptest! {
        #[test]
        fn transfers_settle_balanced_positions(
            people_count in 2usize..=6,
            cents in prop::collection::vec(-20_000i64..=20_000, 1..=5),
        ) {
            let names = ["A", "B", "C", "D", "E", "F"];
            let mut positions = Vec::with_capacity(people_count);
            let mut sum = 0i64;
            for idx in 0..people_count.saturating_sub(1) {
                let balance = *cents.get(idx).unwrap_or(&0);
                sum += balance;
                positions.push(position(names[idx], balance));
            }
            positions.push(position(names[people_count - 1], -sum));

            let netting = net_transfers(positions.iter().copied(), epsilon());

            prop_assert!(netting.residual <= epsilon());
            for transfer in &netting.transfers {
                prop_assert!(transfer.amount > epsilon());
                prop_assert_ne!(transfer.debtor, transfer.creditor);
            }
            if !netting.transfers.is_empty() {
                prop_assert!(netting.transfers.len() < positions.len());
            }
            assert_positions_settled(&positions, &netting.transfers);
        }

        #[test]
        fn zero_positions_have_no_transfers(people_count in 2usize..=6) {
            let names = ["A", "B", "C", "D", "E", "F"];
            let positions: Vec<NetPosition<&'static str>> = names[..people_count]
                .iter()
                .map(|&name| position(name, 0))
                .collect();

            let netting = net_transfers(positions, epsilon());

            prop_assert!(netting.transfers.is_empty());
        }

        #[test]
        fn residual_matches_input_imbalance(
            people_count in 2usize..=6,
            cents in prop::collection::vec(-20_000i64..=20_000, 2..=6),
        ) {
            let names = ["A", "B", "C", "D", "E", "F"];
            let positions: Vec<NetPosition<&'static str>> = names[..people_count]
                .iter()
                .enumerate()
                .map(|(idx, &name)| position(name, *cents.get(idx).unwrap_or(&0)))
                .collect();

            let total: Decimal = positions.iter().map(|p| p.balance).sum();
            let netting = net_transfers(positions, epsilon());

            prop_assert_eq!(netting.residual, total.abs());
        }
    }
}
