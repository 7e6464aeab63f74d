use std::collections::BTreeMap;

/// Union-find over `0..n` with union by rank and path compression.
#[derive(Debug, Clone)]
pub struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl DisjointSets {
    pub fn new(n: usize) -> Self {
        DisjointSets {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    pub fn union(&mut self, x: usize, y: usize) {
        let (rx, ry) = (self.find(x), self.find(y));
        if rx == ry {
            return;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }
    }

    /// Merge every element of `members` into one set.
    pub fn union_all(&mut self, members: &[usize]) {
        if let Some((&first, rest)) = members.split_first() {
            for &other in rest {
                self.union(first, other);
            }
        }
    }

    pub fn is_disjoint(&mut self, x: usize, y: usize) -> bool {
        self.find(x) != self.find(y)
    }

    /// All sets, each sorted, ordered by their smallest member.
    pub fn sets(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for x in 0..self.len() {
            let root = self.find(x);
            by_root.entry(root).or_default().push(x);
        }
        let mut sets: Vec<Vec<usize>> = by_root.into_values().collect();
        sets.sort_by_key(|set| set[0]);
        sets
    }
}
