use crate::algorithm::a_star_search;
use crate::common::{Agent, Coordinate, Edge};
use crate::error::{MapfError, Result};
use crate::graph::Snapshot;
use crate::heuristic::DistanceMetric;

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Free,
    Obstacle,
    /// Looks blocked from afar, turns out traversable.
    MaybeBlocked,
    /// Looks traversable from afar, turns out blocked.
    MaybeOpen,
}

impl Tile {
    fn from_char(ch: char) -> Self {
        match ch {
            '.' | 'G' | 'S' => Tile::Free,
            '?' => Tile::MaybeBlocked,
            '!' => Tile::MaybeOpen,
            _ => Tile::Obstacle,
        }
    }

    pub fn is_passable(&self) -> bool {
        *self != Tile::Obstacle
    }
}

#[derive(Debug, Clone)]
pub struct Map {
    pub height: usize,
    pub width: usize,
    pub grid: Vec<Vec<Tile>>,
    pub eight_connected: bool,
}

impl Map {
    pub fn from_file(path: &str, eight_connected: bool) -> Result<Self> {
        let file = File::open(path)?;
        let map = Self::parse(BufReader::new(file), eight_connected)?;
        info!("load map {path}: {}x{}", map.height, map.width);
        Ok(map)
    }

    /// MovingAI layout: `type`, `height H`, `width W`, `map`, then H rows.
    pub fn parse(reader: impl BufRead, eight_connected: bool) -> Result<Self> {
        let mut lines = reader.lines().enumerate();
        let mut header = |name: &'static str| -> Result<(usize, Option<String>)> {
            let (index, line) = lines
                .next()
                .ok_or_else(|| parse_error(0, format!("missing `{name}` header")))?;
            let line = line?;
            let mut parts = line.split_whitespace();
            if parts.next() != Some(name) {
                return Err(parse_error(index + 1, format!("expected `{name}`")));
            }
            Ok((index + 1, parts.next().map(str::to_string)))
        };
        let _type = header("type")?;
        let mut dimension = |name: &'static str| -> Result<usize> {
            let (line, value) = header(name)?;
            value
                .ok_or_else(|| parse_error(line, format!("missing {name}")))?
                .parse::<usize>()
                .map_err(|e| parse_error(line, e.to_string()))
        };

        let height = dimension("height")?;
        let width = dimension("width")?;
        let _map = header("map")?;

        let mut grid = Vec::with_capacity(height);
        for (index, line) in lines.take(height) {
            let tiles: Vec<Tile> = line?.trim_end().chars().map(Tile::from_char).collect();
            if tiles.len() != width {
                return Err(parse_error(
                    index + 1,
                    format!("expected {width} tiles, got {}", tiles.len()),
                ));
            }
            grid.push(tiles);
        }
        if grid.len() != height {
            return Err(parse_error(height + 4, "map ended early"));
        }

        Ok(Map {
            height,
            width,
            grid,
            eight_connected,
        })
    }

    pub fn from_rows(rows: &[&str], eight_connected: bool) -> Self {
        let grid: Vec<Vec<Tile>> = rows
            .iter()
            .map(|row| row.chars().map(Tile::from_char).collect())
            .collect();
        Map {
            height: grid.len(),
            width: grid.first().map_or(0, Vec::len),
            grid,
            eight_connected,
        }
    }

    pub fn tile(&self, coordinate: Coordinate) -> Option<Tile> {
        if coordinate.row < 0 || coordinate.column < 0 {
            return None;
        }
        self.grid
            .get(coordinate.row as usize)
            .and_then(|row| row.get(coordinate.column as usize))
            .copied()
    }

    pub fn is_passable(&self, coordinate: Coordinate) -> bool {
        self.tile(coordinate).is_some_and(|tile| tile.is_passable())
    }

    pub fn get_neighbors(&self, coordinate: Coordinate) -> Vec<Coordinate> {
        let straight = [(-1, 0), (1, 0), (0, -1), (0, 1)]; // Up, down, left, right
        let diagonal = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

        let mut neighbors: Vec<Coordinate> = straight
            .iter()
            .map(|&(dr, dc)| Coordinate::new(coordinate.row + dr, coordinate.column + dc))
            .filter(|&next| self.is_passable(next))
            .collect();
        if self.eight_connected {
            // No corner cutting.
            neighbors.extend(
                diagonal
                    .iter()
                    .filter(|&&(dr, dc)| {
                        self.is_passable(Coordinate::new(coordinate.row + dr, coordinate.column))
                            && self
                                .is_passable(Coordinate::new(coordinate.row, coordinate.column + dc))
                    })
                    .map(|&(dr, dc)| Coordinate::new(coordinate.row + dr, coordinate.column + dc))
                    .filter(|&next| self.is_passable(next)),
            );
        }
        neighbors
    }

    /// Classify every move between passable tiles. A move touching a `?` tile
    /// is maybe-blocked, one touching a `!` tile is maybe-open.
    pub fn snapshot(&self) -> Snapshot {
        let mut vertices = BTreeSet::new();
        let mut open = HashSet::new();
        let mut maybe_open = HashSet::new();
        let mut maybe_blocked = HashSet::new();

        for row in 0..self.height as i32 {
            for column in 0..self.width as i32 {
                let source = Coordinate::new(row, column);
                if !self.is_passable(source) {
                    continue;
                }
                vertices.insert(source);
                for destination in self.get_neighbors(source) {
                    let edge = Edge::new(source, destination);
                    let tiles = [self.tile(source), self.tile(destination)];
                    if tiles.contains(&Some(Tile::MaybeBlocked)) {
                        maybe_blocked.insert(edge);
                    } else if tiles.contains(&Some(Tile::MaybeOpen)) {
                        maybe_open.insert(edge);
                    } else {
                        open.insert(edge);
                    }
                }
            }
        }

        debug!(
            "snapshot: {} vertices, {} open, {} maybe open, {} maybe blocked",
            vertices.len(),
            open.len(),
            maybe_open.len(),
            maybe_blocked.len()
        );
        Snapshot::new(vertices, open, maybe_open, maybe_blocked)
    }

    /// Keep agents whose start and goal are on the map, unused by an earlier
    /// agent, and connected in the true graph. Kept agents are renumbered.
    pub fn valid_agents(&self, agents: &[Agent]) -> Vec<Agent> {
        let truth = self.snapshot().create_truth();
        let metric = if self.eight_connected {
            DistanceMetric::Chebyshev
        } else {
            DistanceMetric::Manhattan
        };

        let mut starts = HashSet::new();
        let mut goals = HashSet::new();
        let mut valid = Vec::new();
        for agent in agents {
            if !self.is_passable(agent.start)
                || !self.is_passable(agent.goal)
                || starts.contains(&agent.start)
                || goals.contains(&agent.goal)
            {
                debug!("drop agent {}: bad or duplicated endpoints", agent.id);
                continue;
            }
            if a_star_search(&truth, agent, metric).0.is_none() {
                debug!("drop agent {}: goal unreachable", agent.id);
                continue;
            }
            starts.insert(agent.start);
            goals.insert(agent.goal);
            valid.push(Agent::new(valid.len(), agent.start, agent.goal));
        }
        valid
    }
}

fn parse_error(line: usize, reason: impl Into<String>) -> MapfError {
    MapfError::Parse {
        kind: "map",
        line,
        reason: reason.into(),
    }
}
