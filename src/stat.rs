use serde::Serialize;
use std::ops::AddAssign;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Expansions {
    pub high_level: u64,
    pub low_level: u64,
}

impl AddAssign for Expansions {
    fn add_assign(&mut self, other: Self) {
        self.high_level += other.high_level;
        self.low_level += other.low_level;
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub costs: usize,
    pub makespan: usize,
    pub time_us: u128,
    pub replans: usize,
    pub high_level_expand_nodes: u64,
    pub low_level_expand_nodes: u64,
}

impl Stats {
    pub(crate) fn record_expansions(&mut self, expansions: Expansions) {
        self.high_level_expand_nodes += expansions.high_level;
        self.low_level_expand_nodes += expansions.low_level;
    }

    pub(crate) fn record_runtime(&mut self, runtime: Duration) {
        self.time_us = runtime.as_micros();
    }

    pub fn print(&self) {
        info!(
            "Cost {:?} Makespan {:?} Time(microseconds) {:?} Replans {:?} High level expand nodes number: {:?} Low level expand nodes number {:?}",
            self.costs,
            self.makespan,
            self.time_us,
            self.replans,
            self.high_level_expand_nodes,
            self.low_level_expand_nodes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_expansions() {
        let mut stats = Stats::default();
        let mut total = Expansions::default();
        total += Expansions {
            high_level: 2,
            low_level: 30,
        };
        total += Expansions {
            high_level: 1,
            low_level: 5,
        };
        stats.record_expansions(total);
        stats.record_runtime(Duration::from_millis(3));
        assert_eq!(stats.high_level_expand_nodes, 3);
        assert_eq!(stats.low_level_expand_nodes, 35);
        assert_eq!(stats.time_us, 3000);
        stats.print();
    }
}
