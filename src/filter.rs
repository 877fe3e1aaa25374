//! Volume-based pair filter for multi-venue results
//!
//! A coin quoted in one currency can trade on many exchanges. The filter keeps
//! only the most liquid venues of each `(symbol, currency)` group.

use crate::types::PricePoint;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Keep at most `max_per_pair` price points per `(coin symbol, currency)` group
///
/// Points with NaN or non-positive volume are dropped. Each group is ordered by
/// volume descending; groups appear in the order of their first member in
/// `prices`. `max_per_pair == 0` returns `prices` untouched.
pub fn filter_by_pair_volume(prices: Vec<PricePoint>, max_per_pair: usize) -> Vec<PricePoint> {
    if max_per_pair == 0 || prices.is_empty() {
        return prices;
    }

    let mut order: Vec<(String, String)> = Vec::new();
    let mut groups: HashMap<(String, String), Vec<PricePoint>> = HashMap::new();

    for point in prices {
        if point.volume.is_nan() || point.volume <= 0.0 {
            continue;
        }
        let key = (point.coin.symbol.to_lowercase(), point.currency.to_lowercase());
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(point);
    }

    let mut kept = Vec::new();
    for key in order {
        let Some(mut group) = groups.remove(&key) else {
            continue;
        };
        // Stable sort: equal volumes keep their input order
        group.sort_by(|a, b| b.volume.partial_cmp(&a.volume).unwrap_or(Ordering::Equal));
        group.truncate(max_per_pair);
        kept.extend(group);
    }
    kept
}
