//! Whole-lifecycle tests for the line-item state machines.
//!
//! These exercise the transition tables exhaustively: for every kind and
//! every reachable status, attempting every status in the union set must
//! succeed exactly when the table allows it, and each success must append
//! exactly one history entry.

use chrono::Utc;
use common::{Actor, Currency, ItemKind, LineItemId, MerchantId, Money, OrderId, VariantId};
use domain::checkout::CartLine;
use domain::item::{
    LineItemStatus, OrderLineItem, TransitionContext, allowed_transitions, legal_statuses,
};
use domain::{DomainError, derive_order_status};

fn fresh_item(kind: ItemKind) -> OrderLineItem {
    let line = CartLine {
        variant_id: VariantId::new(),
        product_name: "Exhaustive".to_string(),
        merchant_id: MerchantId::new(),
        kind,
        quantity: 1,
        unit_price: Money::from_cents(100),
        currency: Currency::Usd,
        slot_id: None,
        scheduled_at: None,
    };
    OrderLineItem::from_cart_line(LineItemId::new(), OrderId::new(), &line, Utc::now()).unwrap()
}

/// Drives an item along a path of statuses from `pending`.
fn drive(kind: ItemKind, path: &[LineItemStatus]) -> OrderLineItem {
    let mut item = fresh_item(kind);
    let ctx = TransitionContext::new(Actor::System, Utc::now());
    for to in path {
        item.apply_transition(*to, &ctx).unwrap();
    }
    item
}

/// Every path from `pending` to each reachable status, breadth-first.
fn paths_to_all_statuses(kind: ItemKind) -> Vec<Vec<LineItemStatus>> {
    let mut paths = vec![vec![]];
    let mut frontier = vec![(LineItemStatus::Pending, vec![])];
    while let Some((status, path)) = frontier.pop() {
        for next in allowed_transitions(kind, status) {
            let mut extended = path.clone();
            extended.push(*next);
            if paths.iter().any(|p: &Vec<LineItemStatus>| p.last() == Some(next)) {
                continue;
            }
            paths.push(extended.clone());
            frontier.push((*next, extended));
        }
    }
    paths
}

#[test]
fn transition_succeeds_iff_target_is_allowed() {
    for kind in ItemKind::ALL {
        for path in paths_to_all_statuses(kind) {
            for target in LineItemStatus::ALL {
                let mut item = drive(kind, &path);
                let from = item.status;
                let allowed = allowed_transitions(kind, from);
                let history_before = item.history.len();
                let ctx = TransitionContext::new(Actor::System, Utc::now());

                match item.apply_transition(target, &ctx) {
                    Ok(()) => {
                        assert!(
                            allowed.contains(&target),
                            "{kind}: {from} -> {target} succeeded but is not in the table"
                        );
                        assert_eq!(item.status, target);
                        assert_eq!(
                            item.history.len(),
                            history_before + 1,
                            "{kind}: {from} -> {target} must append exactly one entry"
                        );
                        assert_eq!(item.history.last().unwrap().to, target);
                    }
                    Err(DomainError::InvalidTransition { allowed: named, .. }) => {
                        assert!(
                            !allowed.contains(&target),
                            "{kind}: {from} -> {target} rejected but the table allows it"
                        );
                        assert_eq!(named, allowed);
                        assert_eq!(item.status, from);
                        assert_eq!(item.history.len(), history_before);
                    }
                    Err(other) => {
                        panic!("{kind}: {from} -> {target} failed unexpectedly: {other}")
                    }
                }
            }
        }
    }
}

#[test]
fn history_last_entry_always_matches_status() {
    for kind in ItemKind::ALL {
        for path in paths_to_all_statuses(kind) {
            let item = drive(kind, &path);
            assert_eq!(item.history.last().unwrap().to, item.status);
            assert_eq!(item.history.len(), path.len() + 1);
        }
    }
}

#[test]
fn every_legal_status_is_reachable_from_pending() {
    for kind in ItemKind::ALL {
        let reachable: Vec<LineItemStatus> = paths_to_all_statuses(kind)
            .iter()
            .filter_map(|p| p.last().copied())
            .collect();
        for status in legal_statuses(kind) {
            if *status == LineItemStatus::Pending {
                continue;
            }
            assert!(
                reachable.contains(status),
                "{kind}: {status} is legal but unreachable"
            );
        }
    }
}

#[test]
fn aggregate_derivation_stable_under_permutations() {
    let items = vec![
        drive(
            ItemKind::Physical,
            &[
                LineItemStatus::PaymentConfirmed,
                LineItemStatus::Preparing,
                LineItemStatus::ReadyToShip,
                LineItemStatus::Shipped,
                LineItemStatus::Delivered,
            ],
        ),
        drive(
            ItemKind::Digital,
            &[
                LineItemStatus::PaymentConfirmed,
                LineItemStatus::AccessGranted,
                LineItemStatus::Downloaded,
            ],
        ),
        drive(ItemKind::Service, &[LineItemStatus::Cancelled]),
    ];

    let reference = derive_order_status(&items);
    // All 6 permutations of three items.
    let orders = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    for order in orders {
        let permuted: Vec<_> = order.iter().map(|i| items[*i].clone()).collect();
        assert_eq!(derive_order_status(&permuted), reference);
    }
}
