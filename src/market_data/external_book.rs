use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

type Px = OrderedFloat<f64>;

// Aggregated depth for one instrument, fed by a venue adapter
#[derive(Debug, Default, Clone)]
pub struct ExternalBook {
    // price -> size (aggregate)
    pub bids: BTreeMap<Px, f64>, // highest price = best bid
    pub asks: BTreeMap<Px, f64>, // lowest price  = best ask
}

impl ExternalBook {
    pub fn new() -> Self {
        Self::default()
    }

    // Replace the whole book with a fresh snapshot; zero-size levels are skipped
    pub fn apply_snapshot(&mut self, bids: &[(f64, f64)], asks: &[(f64, f64)]) {
        self.bids.clear();
        self.asks.clear();

        for &(p, s) in bids {
            if s > 0.0 {
                self.bids.insert(OrderedFloat(p), s);
            }
        }
        for &(p, s) in asks {
            if s > 0.0 {
                self.asks.insert(OrderedFloat(p), s);
            }
        }
    }

    pub fn bbo(&self) -> (Option<(f64, f64)>, Option<(f64, f64)>) {
        let best_bid = self.bids.iter().next_back().map(|(p, s)| (p.0, *s));
        let best_ask = self.asks.iter().next().map(|(p, s)| (p.0, *s));
        (best_bid, best_ask)
    }
}
