pub mod algorithm;
pub mod common;
pub mod config;
pub mod error;
pub mod graph;
pub mod heuristic;
pub mod map;
pub mod planner;
pub mod policy;
pub mod scenario;
pub mod solver;
pub mod stat;

#[cfg(test)]
mod test_utils;
