//! Ledger consistency properties
//!
//! Sequences of buys and sells over the position arithmetic must never
//! produce a negative quantity, and the weighted-average cost basis must
//! behave exactly as specified: buys fold into the average, sells leave it
//! untouched, and a fully-closed position starts a fresh basis later.

use crate::domain::entities::position::Position;
use crate::domain::value_objects::{price::Price, shares::Shares};
use chrono::Utc;

fn position(quantity: i64, avg_cost: f64) -> Position {
    Position {
        user_id: "user-1".to_string(),
        ticker: "AAPL".to_string(),
        quantity,
        avg_cost,
        updated_at: Utc::now(),
    }
}

#[test]
fn weighted_average_example_from_two_buys() {
    // 10 @ $100 then 10 @ $120 yields quantity=20, avgCost=$110
    let pos = position(10, 100.0).with_buy(Shares::new(10).unwrap(), Price::new(120.0).unwrap());
    assert_eq!(pos.quantity, 20);
    assert!((pos.avg_cost - 110.0).abs() < 1e-9);

    // Selling any quantity afterward leaves avgCost at $110
    let after_sell = pos.with_sell(Shares::new(7).unwrap()).unwrap();
    assert_eq!(after_sell.quantity, 13);
    assert!((after_sell.avg_cost - 110.0).abs() < 1e-9);
}

#[test]
fn basis_resets_after_full_close() {
    let pos = position(10, 100.0);
    assert!(pos.with_sell(Shares::new(10).unwrap()).is_none());

    // A later buy starts a fresh cost basis, unrelated to the old $100
    let reopened = Position::opened(
        "user-1".to_string(),
        "AAPL".to_string(),
        Shares::new(5).unwrap(),
        Price::new(180.0).unwrap(),
    );
    assert_eq!(reopened.avg_cost, 180.0);
}

#[test]
fn quantity_never_negative_across_sequences() {
    // Walk a long buy/sell sequence, only selling what is held, and check
    // the invariants hold at every step
    let steps: [(&str, i64, f64); 8] = [
        ("buy", 10, 100.0),
        ("buy", 5, 130.0),
        ("sell", 8, 0.0),
        ("buy", 20, 90.0),
        ("sell", 20, 0.0),
        ("sell", 7, 0.0),
        ("buy", 3, 200.0),
        ("sell", 3, 0.0),
    ];

    let mut current: Option<Position> = None;
    for (action, quantity, price) in steps {
        let shares = Shares::new(quantity).unwrap();
        match action {
            "buy" => {
                let price = Price::new(price).unwrap();
                current = Some(match current.take() {
                    Some(pos) => pos.with_buy(shares, price),
                    None => Position::opened(
                        "user-1".to_string(),
                        "AAPL".to_string(),
                        shares,
                        price,
                    ),
                });
            }
            "sell" => {
                if let Some(pos) = current.take() {
                    let sellable = quantity.min(pos.quantity);
                    if sellable == quantity {
                        current = pos.with_sell(shares);
                    } else {
                        // Engine would reject; position unchanged
                        current = Some(pos);
                    }
                }
            }
            _ => unreachable!(),
        }

        if let Some(pos) = &current {
            assert!(pos.quantity > 0, "open position with non-positive quantity");
            assert!(pos.avg_cost > 0.0, "open position with non-positive basis");
        }
    }
}

#[test]
fn buy_average_is_order_independent_in_total_cost() {
    // Two buy orders reaching the same total shares and spend produce the
    // same weighted average regardless of order
    let a = position(10, 100.0).with_buy(Shares::new(30).unwrap(), Price::new(120.0).unwrap());
    let b = position(30, 120.0).with_buy(Shares::new(10).unwrap(), Price::new(100.0).unwrap());
    assert!((a.avg_cost - b.avg_cost).abs() < 1e-9);
    assert_eq!(a.quantity, b.quantity);
}

#[test]
fn partial_sells_only_change_quantity() {
    let mut pos = position(100, 55.5);
    for _ in 0..9 {
        pos = pos.with_sell(Shares::new(10).unwrap()).unwrap();
        assert_eq!(pos.avg_cost, 55.5);
    }
    assert_eq!(pos.quantity, 10);
}
