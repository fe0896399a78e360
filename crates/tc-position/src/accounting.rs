//! Weighted-average-cost fill accounting.
//!
//! The cost basis only ever describes the currently open side. Adding to a
//! side blends the fill into the average, reducing a side keeps the average,
//! and crossing through zero restarts the basis at the fill price.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tc_core::{Amount, Price, Qty, Side};

/// Quantities with a magnitude below this are treated as flat.
pub const QTY_EPSILON: Decimal = dec!(0.000000001);

/// Apply a fill of `qty` (unsigned) at `price` to `(old_qty, old_avg)`.
///
/// Returns the new signed quantity and average price, or `None` when the
/// arithmetic overflows `Decimal`. A flat result always has a zero average.
pub fn apply_fill(
    old_qty: Qty,
    old_avg: Price,
    side: Side,
    qty: Qty,
    price: Price,
) -> Option<(Qty, Price)> {
    let old_q = old_qty.inner();
    let old_a = old_avg.inner();
    let q = qty.inner();
    let p = price.inner();

    match side {
        Side::Buy => {
            let new_q = old_q.checked_add(q)?;
            if new_q.abs() < QTY_EPSILON {
                return Some((Qty::ZERO, Price::ZERO));
            }

            let new_a = if old_q >= Decimal::ZERO {
                if new_q > Decimal::ZERO {
                    old_a
                        .checked_mul(old_q)?
                        .checked_add(p.checked_mul(q)?)?
                        .checked_div(new_q)?
                } else {
                    // Not reachable with a positive fill quantity.
                    p
                }
            } else if new_q < Decimal::ZERO {
                old_a
            } else {
                p
            };
            Some((Qty::new(new_q), Price::new(new_a)))
        }
        Side::Sell => {
            let new_q = old_q.checked_sub(q)?;
            if new_q.abs() < QTY_EPSILON {
                return Some((Qty::ZERO, Price::ZERO));
            }

            let new_a = if old_q <= Decimal::ZERO {
                if new_q < Decimal::ZERO {
                    old_q
                        .abs()
                        .checked_mul(old_a)?
                        .checked_add(q.checked_mul(p)?)?
                        .checked_div(new_q.abs())?
                } else {
                    // Not reachable with a positive fill quantity.
                    p
                }
            } else if new_q > Decimal::ZERO {
                old_a
            } else {
                p
            };
            Some((Qty::new(new_q), Price::new(new_a)))
        }
    }
}

/// Profit realized by the closing part of a fill against `(old_qty, old_avg)`.
///
/// Zero when the fill only opens or adds to a side, `None` on overflow.
/// Fees are not included.
pub fn realized_pnl(
    old_qty: Qty,
    old_avg: Price,
    side: Side,
    qty: Qty,
    price: Price,
) -> Option<Amount> {
    let old_q = old_qty.inner();
    let close_qty = old_q.abs().min(qty.inner());
    if close_qty <= Decimal::ZERO {
        return Some(Amount::ZERO);
    }

    let pnl = match side {
        Side::Sell if old_q > Decimal::ZERO => price
            .inner()
            .checked_sub(old_avg.inner())?
            .checked_mul(close_qty)?,
        Side::Buy if old_q < Decimal::ZERO => old_avg
            .inner()
            .checked_sub(price.inner())?
            .checked_mul(close_qty)?,
        _ => Decimal::ZERO,
    };
    Some(Amount::new(pnl))
}
