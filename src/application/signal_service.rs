//! Ingests raw signals into one [`PriorityHeap`] per interval and
//! exposes peek/pop access scoped to a single interval.

use crate::collections::priority_heap::{PriorityHeap, Scored};
use crate::domain::signal::Signal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct SignalItem(Signal);

impl Scored for SignalItem {
    fn id(&self) -> String {
        self.0.id()
    }
    fn score(&self) -> f64 {
        self.0.score()
    }
}

pub struct SignalService {
    heaps: RwLock<HashMap<String, Arc<PriorityHeap<SignalItem>>>>,
    max_size: usize,
}

impl SignalService {
    pub fn new(max_size: usize) -> Self {
        Self {
            heaps: RwLock::new(HashMap::new()),
            max_size,
        }
    }

    fn heap_for(&self, interval: &str) -> Arc<PriorityHeap<SignalItem>> {
        if let Some(h) = self.heaps.read().expect("signal service lock poisoned").get(interval) {
            return h.clone();
        }
        let mut heaps = self.heaps.write().expect("signal service lock poisoned");
        heaps
            .entry(interval.to_string())
            .or_insert_with(|| Arc::new(PriorityHeap::new(self.max_size)))
            .clone()
    }

    /// Routes by `signal.interval`, creating that interval's heap on
    /// first use.
    pub fn ingest(&self, signal: Signal) {
        self.heap_for(&signal.interval).add(SignalItem(signal));
    }

    pub fn peek(&self, interval: &str) -> Option<Signal> {
        self.heap_for(interval).peek().map(|i| i.0)
    }

    pub fn pop(&self, interval: &str) -> Option<Signal> {
        self.heap_for(interval).pop().map(|i| i.0)
    }

    pub fn size(&self, interval: &str) -> usize {
        self.heap_for(interval).size()
    }

    pub fn intervals(&self) -> Vec<String> {
        self.heaps.read().expect("signal service lock poisoned").keys().cloned().collect()
    }

    pub fn stats(&self) -> HashMap<String, usize> {
        self.heaps
            .read()
            .expect("signal service lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.size()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::collections::HashMap as Map;

    fn signal(symbol: &str, interval: &str, rsi: f64) -> Signal {
        let now = Utc::now();
        Signal {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            signal_type: crate::domain::signal::SignalType::Entry,
            action: crate::domain::signal::SignalAction::Buy,
            strength: 0.5,
            confidence: 0.5,
            price: 100.0,
            strategy: "rsi-kdj".to_string(),
            indicators: Map::from([("rsi".to_string(), rsi)]),
            metadata: Map::new(),
            created_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn ingest_routes_by_interval_and_peek_returns_highest_score() {
        let svc = SignalService::new(10);
        svc.ingest(signal("BTCUSDT", "1h", 80.0));
        svc.ingest(signal("ETHUSDT", "1h", 90.0));
        svc.ingest(signal("BTCUSDT", "5m", 10.0));

        assert_eq!(svc.peek("1h").unwrap().score(), 90.0);
        assert_eq!(svc.peek("5m").unwrap().score(), 10.0);
    }

    #[test]
    fn pop_removes_the_peeked_signal() {
        let svc = SignalService::new(10);
        svc.ingest(signal("BTCUSDT", "1h", 80.0));
        let popped = svc.pop("1h").unwrap();
        assert_eq!(popped.symbol, "BTCUSDT");
        assert_eq!(svc.size("1h"), 0);
    }

    #[test]
    fn intervals_lists_every_heap_created_so_far() {
        let svc = SignalService::new(10);
        svc.ingest(signal("BTCUSDT", "1h", 80.0));
        svc.ingest(signal("BTCUSDT", "5m", 10.0));
        let mut intervals = svc.intervals();
        intervals.sort();
        assert_eq!(intervals, vec!["1h".to_string(), "5m".to_string()]);
    }
}
