//! Disjoint-set forest with union by rank and path halving.

/// Disjoint-set forest over dense `usize` handles.
///
/// Handles are allocated with [`push`](DisjointSets::push) and stay valid for
/// the life of the structure. `find` is iterative, so deep chains from
/// adversarial union orders cannot overflow the stack.
#[derive(Debug, Clone, Default)]
pub struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSets {
    /// Creates an empty forest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty forest with room for `capacity` elements.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            parent: Vec::with_capacity(capacity),
            rank: Vec::with_capacity(capacity),
        }
    }

    /// Adds a new singleton set and returns its handle.
    pub fn push(&mut self) -> usize {
        let id = self.parent.len();
        self.parent.push(id);
        self.rank.push(0);
        id
    }

    /// Number of elements across all sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// True if no element has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Returns the representative of the set containing `element`.
    ///
    /// Applies path halving on the way up, so repeated lookups flatten the
    /// tree.
    ///
    /// # Panics
    /// Panics if `element` was not returned by [`push`](DisjointSets::push).
    #[must_use]
    pub fn find(&mut self, element: usize) -> usize {
        let mut current = element;
        while self.parent[current] != current {
            let grandparent = self.parent[self.parent[current]];
            self.parent[current] = grandparent;
            current = grandparent;
        }
        current
    }

    /// Merges the sets containing `a` and `b`.
    ///
    /// Returns `true` if two distinct sets were joined, `false` if they were
    /// already the same set.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }
        let (parent, child) = if self.rank[root_a] >= self.rank[root_b] {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent[child] = parent;
        if self.rank[root_a] == self.rank[root_b] {
            self.rank[parent] += 1;
        }
        true
    }

    /// True if `a` and `b` are currently in the same set.
    pub fn same_set(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }
}
