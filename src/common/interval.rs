use super::{Constraint, ConstraintSet, Coordinate, Path};

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use tracing::trace;

pub const INF: f64 = f64::INFINITY;

/// Half-open time window `[start, end)`. `[INF, INF)` is the empty interval.
#[derive(Debug, Clone, Copy)]
pub struct TimeInterval {
    pub start: f64,
    pub end: f64,
}

impl TimeInterval {
    pub fn new(start: f64, end: f64) -> Self {
        TimeInterval { start, end }
    }

    pub fn empty() -> Self {
        TimeInterval {
            start: INF,
            end: INF,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn intersects(&self, t: f64) -> bool {
        self.start <= t && t < self.end
    }

    /// Ends at infinity while starting at a finite time.
    pub fn is_unbounded(&self) -> bool {
        self.start < INF && self.end == INF
    }
}

impl Default for TimeInterval {
    fn default() -> Self {
        TimeInterval::new(0.0, INF)
    }
}

impl PartialEq for TimeInterval {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeInterval {}

impl Ord for TimeInterval {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .total_cmp(&other.start)
            .then_with(|| self.end.total_cmp(&other.end))
    }
}

impl PartialOrd for TimeInterval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for TimeInterval {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.start.to_bits().hash(state);
        self.end.to_bits().hash(state);
    }
}

/// A search state of the safe-interval planners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct State {
    pub coordinate: Coordinate,
    pub interval: TimeInterval,
}

impl State {
    pub fn new(coordinate: Coordinate, interval: TimeInterval) -> Self {
        State {
            coordinate,
            interval,
        }
    }
}

/// Per-coordinate ordered sets of disjoint safe intervals.
///
/// A coordinate that was never touched is free for all time. Once touched, its
/// set may become empty, which means it is never safe.
#[derive(Debug, Clone, Default)]
pub struct SafeIntervals {
    configurations: HashMap<Coordinate, BTreeSet<TimeInterval>>,
}

impl SafeIntervals {
    pub fn new() -> Self {
        SafeIntervals::default()
    }

    /// Reserve every non-empty path, in slot order.
    pub fn from_paths(paths: &[Path]) -> Self {
        let mut intervals = SafeIntervals::new();
        for path in paths.iter().filter(|path| !path.is_empty()) {
            intervals.add_path(path);
        }
        intervals
    }

    /// Reserve every constraint imposed on `agent`.
    pub fn from_constraints(constraints: &ConstraintSet, agent: usize) -> Self {
        let mut intervals = SafeIntervals::new();
        for Constraint {
            coordinate,
            timestep,
            ..
        } in constraints
            .iter()
            .filter(|constraint| constraint.constrained_agent == agent)
        {
            intervals.add(*coordinate, *timestep as f64);
        }
        intervals
    }

    pub fn intervals_of(&mut self, coordinate: Coordinate) -> &BTreeSet<TimeInterval> {
        self.configurations
            .entry(coordinate)
            .or_insert_with(|| BTreeSet::from([TimeInterval::default()]))
    }

    /// The safe interval containing `t`, or the empty interval.
    pub fn interval_at(&mut self, coordinate: Coordinate, t: f64) -> TimeInterval {
        self.intervals_of(coordinate)
            .iter()
            .find(|interval| interval.intersects(t))
            .copied()
            .unwrap_or_else(TimeInterval::empty)
    }

    /// Start of the latest safe interval, `INF` if the coordinate is never safe.
    pub fn last_interval_start(&mut self, coordinate: Coordinate) -> f64 {
        self.intervals_of(coordinate)
            .last()
            .map_or(INF, |interval| interval.start)
    }

    /// Make timestep `t` unsafe at `coordinate`, splitting the interval that
    /// contains it. Returns the surviving left and right parts (empty if absent).
    pub fn add(&mut self, coordinate: Coordinate, t: f64) -> (TimeInterval, TimeInterval) {
        let set = self
            .configurations
            .entry(coordinate)
            .or_insert_with(|| BTreeSet::from([TimeInterval::default()]));

        let Some(hit) = set.iter().find(|interval| interval.intersects(t)).copied() else {
            return (TimeInterval::empty(), TimeInterval::empty());
        };
        set.remove(&hit);

        let mut left = TimeInterval::empty();
        let mut right = TimeInterval::empty();
        if t > hit.start {
            left = TimeInterval::new(hit.start, t);
            set.insert(left);
        }
        if t + 1.0 < hit.end {
            right = TimeInterval::new(t + 1.0, hit.end);
            set.insert(right);
        }
        trace!("reserve {coordinate} at {t}: {left:?} {right:?}");
        (left, right)
    }

    /// Reserve a whole path: each position at its timestep, the previous
    /// position at the arrival timestep, and the final position forever after.
    pub fn add_path(&mut self, path: &Path) {
        let Some(&goal) = path.last() else {
            return;
        };
        for (t, &coordinate) in path.iter().enumerate() {
            self.add(coordinate, t as f64);
            if t > 0 {
                self.add(path[t - 1], t as f64);
            }
        }

        // The goal is held from arrival on. Its final timestep is already
        // reserved, so every later window lies wholly past the path's end.
        let n = path.len() as f64;
        self.configurations
            .entry(goal)
            .or_insert_with(|| BTreeSet::from([TimeInterval::default()]))
            .retain(|interval| interval.end <= n);
    }
}
