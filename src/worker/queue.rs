use crate::config::service::worker::WorkerServiceConfig;
use crate::error::config::ConfigError;
use itertools::Itertools;
use std::collections::BTreeMap;

/// Decides which queue the worker pool polls first on each pull cycle.
///
/// Uses smooth weighted round-robin: with weights `{critical: 6, default: 3, low: 1}`, every run
/// of 10 cycles selects `critical` 6 times, `default` 3 times and `low` once, interleaved rather
/// than in bursts. The weight table is read-only once built; only the cursor changes.
#[derive(Debug, Clone)]
pub struct QueueRouter {
    /// Sorted by descending weight, then by name.
    queues: Vec<WeightedQueue>,
    total_weight: i64,
    strict_priority: bool,
}

#[derive(Debug, Clone)]
struct WeightedQueue {
    name: String,
    weight: i64,
    current: i64,
}

impl QueueRouter {
    pub fn new(weights: &BTreeMap<String, u32>, strict_priority: bool) -> Result<Self, ConfigError> {
        if weights.is_empty() {
            return Err(ConfigError::Queue(
                "At least one queue must be configured".to_owned(),
            ));
        }
        if let Some((name, _)) = weights.iter().find(|(_, weight)| **weight == 0) {
            return Err(ConfigError::Queue(format!(
                "Queue `{name}` has a weight of zero and would never be polled"
            )));
        }

        let queues = weights
            .iter()
            .map(|(name, weight)| WeightedQueue {
                name: name.clone(),
                weight: i64::from(*weight),
                current: 0,
            })
            .sorted_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.name.cmp(&b.name)))
            .collect_vec();
        let total_weight = queues.iter().map(|queue| queue.weight).sum();

        Ok(Self {
            queues,
            total_weight,
            strict_priority,
        })
    }

    pub fn from_config(config: &WorkerServiceConfig) -> Result<Self, ConfigError> {
        Self::new(&config.queues, config.strict_priority)
    }

    /// The queues in descending weight order.
    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.queues.iter().map(|queue| queue.name.as_str())
    }

    pub fn contains(&self, queue: &str) -> bool {
        self.queues.iter().any(|q| q.name == queue)
    }

    /// The queue preference for the next pull cycle: the selected queue first, then the other
    /// queues by descending weight. Polling in this order means an empty preferred queue doesn't
    /// waste the cycle while other queues have ready tasks.
    pub fn next_order(&mut self) -> Vec<&str> {
        let selected = self.select();
        let mut order = Vec::with_capacity(self.queues.len());
        order.push(self.queues[selected].name.as_str());
        order.extend(
            self.queues
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != selected)
                .map(|(_, queue)| queue.name.as_str()),
        );
        order
    }

    /// Index of the queue selected for the next cycle.
    fn select(&mut self) -> usize {
        if self.strict_priority {
            return 0;
        }

        for queue in self.queues.iter_mut() {
            queue.current += queue.weight;
        }
        // `max_by_key` returns the last max element, so fold to keep the first one on ties. The
        // first is the higher weight queue.
        let selected = self
            .queues
            .iter()
            .enumerate()
            .fold(0, |best, (index, queue)| {
                if queue.current > self.queues[best].current {
                    index
                } else {
                    best
                }
            });
        self.queues[selected].current -= self.total_weight;
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use rstest::{fixture, rstest};

    #[fixture]
    fn weights() -> BTreeMap<String, u32> {
        [("critical", 6), ("default", 3), ("low", 1)]
            .into_iter()
            .map(|(name, weight)| (name.to_owned(), weight))
            .collect()
    }

    fn first_choices(router: &mut QueueRouter, cycles: usize) -> Vec<String> {
        (0..cycles)
            .map(|_| router.next_order()[0].to_owned())
            .collect()
    }

    #[rstest]
    fn weighted_fairness(weights: BTreeMap<String, u32>) {
        let mut router = QueueRouter::new(&weights, false).unwrap();

        let choices = first_choices(&mut router, 1000);

        let counts = choices.iter().counts();
        let total_weight: u32 = weights.values().sum();
        for (name, weight) in weights.iter() {
            let expected = 1000.0 * f64::from(*weight) / f64::from(total_weight);
            let observed = *counts.get(name).unwrap() as f64;
            assert!(
                (observed - expected).abs() <= expected * 0.15,
                "Queue `{name}` was selected {observed} times, expected about {expected}"
            );
        }
    }

    #[rstest]
    fn no_queue_is_starved(weights: BTreeMap<String, u32>) {
        let mut router = QueueRouter::new(&weights, false).unwrap();

        let choices = first_choices(&mut router, 1000);

        for window in choices.chunks(100) {
            for name in weights.keys() {
                assert!(window.contains(name), "Queue `{name}` starved");
            }
        }
        // Stronger than the above: every queue is selected within any `sum(weights)` cycles.
        for window in choices.windows(10) {
            assert!(window.iter().any(|name| name == "low"));
        }
    }

    #[rstest]
    fn interleaved(weights: BTreeMap<String, u32>) {
        let mut router = QueueRouter::new(&weights, false).unwrap();

        let choices = first_choices(&mut router, 10);

        assert_snapshot!(
            choices.join(","),
            @"critical,default,critical,critical,default,critical,low,critical,default,critical"
        );
    }

    #[rstest]
    fn order_contains_every_queue_once(weights: BTreeMap<String, u32>) {
        let mut router = QueueRouter::new(&weights, false).unwrap();

        for _ in 0..20 {
            let mut order = router.next_order();
            order.sort();
            assert_eq!(order, vec!["critical", "default", "low"]);
        }
    }

    #[rstest]
    fn fallback_by_weight(weights: BTreeMap<String, u32>) {
        let mut router = QueueRouter::new(&weights, false).unwrap();

        // Skip ahead to the cycle that selects `low`
        let order = loop {
            let order = router
                .next_order()
                .into_iter()
                .map(str::to_owned)
                .collect_vec();
            if order[0] == "low" {
                break order;
            }
        };

        assert_eq!(order, vec!["low", "critical", "default"]);
    }

    #[rstest]
    fn strict_priority(weights: BTreeMap<String, u32>) {
        let mut router = QueueRouter::new(&weights, true).unwrap();

        for _ in 0..10 {
            assert_eq!(router.next_order(), vec!["critical", "default", "low"]);
        }
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![("critical", 6), ("low", 0)])]
    fn invalid_weights(#[case] weights: Vec<(&str, u32)>) {
        let weights = weights
            .into_iter()
            .map(|(name, weight)| (name.to_owned(), weight))
            .collect();

        assert!(QueueRouter::new(&weights, false).is_err());
    }

    #[test]
    fn single_queue() {
        let weights = BTreeMap::from([("default".to_owned(), 1)]);
        let mut router = QueueRouter::new(&weights, false).unwrap();

        assert_eq!(first_choices(&mut router, 3), vec!["default"; 3]);
        assert!(router.contains("default"));
        assert!(!router.contains("critical"));
    }
}
