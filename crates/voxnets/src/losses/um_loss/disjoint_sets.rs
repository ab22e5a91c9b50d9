//! # Disjoint Sets
//!
//! Union-find with path compression and union by rank.

/// A forest of disjoint sets over ``0..len``.
#[derive(Debug, Clone)]
pub struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl DisjointSets {
    /// Every element in its own set.
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    /// The number of elements.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Is the forest empty?
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// The root of the set containing `x`.
    ///
    /// # Panics
    ///
    /// If `x` is out of range.
    pub fn find(
        &mut self,
        x: usize,
    ) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }

        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Merge the sets containing `a` and `b`.
    ///
    /// # Returns
    ///
    /// The root of the merged set; or `None` if they were already merged.
    pub fn union(
        &mut self,
        a: usize,
        b: usize,
    ) -> Option<usize> {
        let a = self.find(a);
        let b = self.find(b);
        if a == b {
            return None;
        }

        let (root, child) = if self.rank[a] < self.rank[b] {
            (b, a)
        } else {
            (a, b)
        };
        self.parent[child] = root;
        if self.rank[root] == self.rank[child] {
            self.rank[root] += 1;
        }
        Some(root)
    }
}
