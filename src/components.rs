//! Connected components over the surviving-pair graph.
//!
//! A small union-find keyed by image id. Nodes appear when their first
//! surviving pair registers an edge; the dominant (largest) component is the
//! image set reconstruction operates on, everything else is reported and
//! skipped.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Union-find with union by size and path halving.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairComponents {
    /// Image id to slot in `parent`/`size`.
    index: HashMap<usize, usize>,
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl PairComponents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct images seen so far.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn contains(&self, image_id: usize) -> bool {
        self.index.contains_key(&image_id)
    }

    fn slot(&mut self, image_id: usize) -> usize {
        if let Some(&slot) = self.index.get(&image_id) {
            return slot;
        }
        let slot = self.parent.len();
        self.index.insert(image_id, slot);
        self.parent.push(slot);
        self.size.push(1);
        slot
    }

    fn find(&mut self, mut slot: usize) -> usize {
        while self.parent[slot] != slot {
            self.parent[slot] = self.parent[self.parent[slot]];
            slot = self.parent[slot];
        }
        slot
    }

    /// Register an edge between two images, creating nodes as needed.
    pub fn union(&mut self, a: usize, b: usize) {
        let sa = self.slot(a);
        let sb = self.slot(b);
        let ra = self.find(sa);
        let rb = self.find(sb);
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }

    /// True when both images are present and connected.
    pub fn connected(&mut self, a: usize, b: usize) -> bool {
        match (self.index.get(&a).copied(), self.index.get(&b).copied()) {
            (Some(sa), Some(sb)) => self.find(sa) == self.find(sb),
            _ => false,
        }
    }

    /// All components, each as a sorted image-id set, largest first.
    /// Equal-sized components order by their smallest member.
    pub fn components(&mut self) -> Vec<BTreeSet<usize>> {
        let entries: Vec<(usize, usize)> = self.index.iter().map(|(&id, &s)| (id, s)).collect();
        let mut by_root: HashMap<usize, BTreeSet<usize>> = HashMap::new();
        for (image_id, slot) in entries {
            let root = self.find(slot);
            by_root.entry(root).or_default().insert(image_id);
        }

        let mut components: Vec<BTreeSet<usize>> = by_root.into_values().collect();
        components.sort_by(|a, b| {
            b.len()
                .cmp(&a.len())
                .then_with(|| a.iter().next().cmp(&b.iter().next()))
        });
        components
    }

    /// The largest component; empty when no edge was ever registered.
    pub fn dominant(&mut self) -> BTreeSet<usize> {
        self.components().into_iter().next().unwrap_or_default()
    }
}
