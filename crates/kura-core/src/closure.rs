//! Closure-table algebra over a forest of local classes.
//!
//! [`ClosureTable`] holds the `(ancestor, descendant, depth)` rows for every
//! node, indexed in both directions so that "is X an ancestor of Y", subtree
//! enumeration and breadcrumb ordering are plain map lookups. Nodes are
//! addressed by id only; there are no parent pointers to chase.
//!
//! Structural operations return the exact edge delta they applied, which the
//! in-memory store uses for logging and which mirrors the set-based SQL the
//! PostgreSQL maintainer runs.

use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::ClosureEdge;

/// Parent relation keyed by node id (None = root).
pub type ParentMap = HashMap<Uuid, Option<Uuid>>;

/// Edges removed and inserted by one structural change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureDelta {
    pub removed: Vec<ClosureEdge>,
    pub inserted: Vec<ClosureEdge>,
}

impl ClosureDelta {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.inserted.is_empty()
    }
}

/// Materialized transitive closure of a parent relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureTable {
    /// ancestor -> descendant -> depth
    down: HashMap<Uuid, BTreeMap<Uuid, i32>>,
    /// descendant -> ancestor -> depth
    up: HashMap<Uuid, BTreeMap<Uuid, i32>>,
}

impl ClosureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the closure from parent links.
    ///
    /// Fails with `CycleDetected` if a parent chain loops and with
    /// `ClassNotFound` if a parent id is not itself a node.
    pub fn from_parents(parents: &ParentMap) -> Result<Self> {
        let mut table = Self::new();
        for (&node, &parent) in parents {
            table.add_edge(node, node, 0);
            let mut seen = HashSet::from([node]);
            let mut cursor = parent;
            let mut depth = 0;
            while let Some(ancestor) = cursor {
                if !seen.insert(ancestor) {
                    return Err(Error::CycleDetected {
                        node,
                        parent: ancestor,
                    });
                }
                let next = parents
                    .get(&ancestor)
                    .ok_or(Error::ClassNotFound(ancestor))?;
                depth += 1;
                table.add_edge(ancestor, node, depth);
                cursor = *next;
            }
        }
        Ok(table)
    }

    /// Build a table from stored rows without validating them.
    pub fn from_edges<I: IntoIterator<Item = ClosureEdge>>(edges: I) -> Self {
        let mut table = Self::new();
        for e in edges {
            table.add_edge(e.ancestor_id, e.descendant_id, e.depth);
        }
        table
    }

    fn add_edge(&mut self, ancestor: Uuid, descendant: Uuid, depth: i32) {
        self.down
            .entry(ancestor)
            .or_default()
            .insert(descendant, depth);
        self.up
            .entry(descendant)
            .or_default()
            .insert(ancestor, depth);
    }

    fn remove_edge(&mut self, ancestor: Uuid, descendant: Uuid) {
        if let Some(m) = self.down.get_mut(&ancestor) {
            m.remove(&descendant);
            if m.is_empty() {
                self.down.remove(&ancestor);
            }
        }
        if let Some(m) = self.up.get_mut(&descendant) {
            m.remove(&ancestor);
            if m.is_empty() {
                self.up.remove(&descendant);
            }
        }
    }

    fn apply(&mut self, delta: &ClosureDelta) {
        for e in &delta.removed {
            self.remove_edge(e.ancestor_id, e.descendant_id);
        }
        for e in &delta.inserted {
            self.add_edge(e.ancestor_id, e.descendant_id, e.depth);
        }
    }

    /// True if the node has a self-edge.
    pub fn contains(&self, id: Uuid) -> bool {
        self.up
            .get(&id)
            .is_some_and(|ancestors| ancestors.get(&id) == Some(&0))
    }

    pub fn node_count(&self) -> usize {
        self.up.len()
    }

    pub fn edge_count(&self) -> usize {
        self.up.values().map(BTreeMap::len).sum()
    }

    /// Depth of the edge (ancestor, descendant), if present.
    pub fn depth_between(&self, ancestor: Uuid, descendant: Uuid) -> Option<i32> {
        self.down
            .get(&ancestor)
            .and_then(|m| m.get(&descendant))
            .copied()
    }

    /// Proper ancestors of `id`, root first.
    pub fn ancestors(&self, id: Uuid) -> Vec<(Uuid, i32)> {
        let mut out: Vec<(Uuid, i32)> = self
            .up
            .get(&id)
            .map(|m| {
                m.iter()
                    .filter(|&(&a, _)| a != id)
                    .map(|(&a, &d)| (a, d))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        out
    }

    pub fn parent_of(&self, id: Uuid) -> Option<Uuid> {
        self.up
            .get(&id)
            .and_then(|m| m.iter().find(|&(_, &d)| d == 1).map(|(&a, _)| a))
    }

    /// `id` and all its descendants with their depth below `id`.
    pub fn subtree(&self, id: Uuid) -> Vec<(Uuid, i32)> {
        let mut out: Vec<(Uuid, i32)> = self
            .down
            .get(&id)
            .map(|m| m.iter().map(|(&d, &depth)| (d, depth)).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        out
    }

    pub fn children(&self, id: Uuid) -> Vec<Uuid> {
        self.down
            .get(&id)
            .map(|m| {
                m.iter()
                    .filter(|&(_, &d)| d == 1)
                    .map(|(&c, _)| c)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parent relation implied by the depth-1 edges.
    pub fn parents(&self) -> ParentMap {
        self.up
            .keys()
            .map(|&node| (node, self.parent_of(node)))
            .collect()
    }

    /// Add a new node under `parent`, returning the inserted edges.
    pub fn insert_node(&mut self, id: Uuid, parent: Option<Uuid>) -> Result<Vec<ClosureEdge>> {
        if self.contains(id) {
            return Err(Error::InvalidInput(format!(
                "local class {} is already indexed",
                id
            )));
        }
        let mut inserted = vec![ClosureEdge::new(id, id, 0)];
        if let Some(p) = parent {
            let ancestors = self.up.get(&p).ok_or(Error::ClassNotFound(p))?;
            inserted.extend(
                ancestors
                    .iter()
                    .map(|(&a, &d)| ClosureEdge::new(a, id, d + 1)),
            );
        }
        for e in &inserted {
            self.add_edge(e.ancestor_id, e.descendant_id, e.depth);
        }
        Ok(inserted)
    }

    /// Reject moving `node` under `new_parent` when that would close a loop.
    pub fn check_attach(&self, node: Uuid, new_parent: Uuid) -> Result<()> {
        if !self.contains(node) {
            return Err(Error::ClassNotFound(node));
        }
        if !self.contains(new_parent) {
            return Err(Error::ClassNotFound(new_parent));
        }
        if self.depth_between(node, new_parent).is_some() {
            return Err(Error::CycleDetected {
                node,
                parent: new_parent,
            });
        }
        Ok(())
    }

    /// Move the subtree rooted at `node` under `new_parent` (None = detach).
    ///
    /// Edges from former ancestors into the subtree are removed; edges inside
    /// the subtree are untouched.
    pub fn move_subtree(&mut self, node: Uuid, new_parent: Option<Uuid>) -> Result<ClosureDelta> {
        match new_parent {
            Some(p) => self.check_attach(node, p)?,
            None if !self.contains(node) => return Err(Error::ClassNotFound(node)),
            None => {}
        }

        let subtree = self.subtree(node);
        let inside: HashSet<Uuid> = subtree.iter().map(|(id, _)| *id).collect();

        let mut delta = ClosureDelta::default();
        for (member, _) in &subtree {
            if let Some(ancestors) = self.up.get(member) {
                delta.removed.extend(
                    ancestors
                        .iter()
                        .filter(|&(a, _)| !inside.contains(a))
                        .map(|(&a, &d)| ClosureEdge::new(a, *member, d)),
                );
            }
        }

        if let Some(p) = new_parent {
            if let Some(ancestors) = self.up.get(&p) {
                for (&a, &d_anc) in ancestors {
                    for &(member, d_sub) in &subtree {
                        delta
                            .inserted
                            .push(ClosureEdge::new(a, member, d_anc + 1 + d_sub));
                    }
                }
            }
        }

        self.apply(&delta);
        Ok(delta)
    }

    /// Remove a childless node and every edge referencing it.
    pub fn remove_leaf(&mut self, id: Uuid) -> Result<Vec<ClosureEdge>> {
        if !self.contains(id) {
            return Err(Error::ClassNotFound(id));
        }
        let children = self.children(id);
        if !children.is_empty() {
            return Err(Error::HasChildren {
                id,
                count: children.len() as i64,
            });
        }
        let removed: Vec<ClosureEdge> = self
            .up
            .get(&id)
            .map(|m| {
                m.iter()
                    .map(|(&a, &d)| ClosureEdge::new(a, id, d))
                    .collect()
            })
            .unwrap_or_default();
        for e in &removed {
            self.remove_edge(e.ancestor_id, e.descendant_id);
        }
        Ok(removed)
    }

    /// All edges, sorted.
    pub fn edges(&self) -> Vec<ClosureEdge> {
        let mut out: Vec<ClosureEdge> = self
            .down
            .iter()
            .flat_map(|(&a, m)| m.iter().map(move |(&d, &depth)| ClosureEdge::new(a, d, depth)))
            .collect();
        out.sort();
        out
    }

    /// Compare against the closure recomputed from parent links.
    ///
    /// Returns `(missing, unexpected)`: edges `expected` has that `self`
    /// lacks, and edges `self` has that `expected` lacks. An edge with the
    /// wrong depth shows up in both lists.
    pub fn diff(&self, expected: &ClosureTable) -> (Vec<ClosureEdge>, Vec<ClosureEdge>) {
        let missing = expected
            .edges()
            .into_iter()
            .filter(|e| self.depth_between(e.ancestor_id, e.descendant_id) != Some(e.depth))
            .collect();
        let unexpected = self
            .edges()
            .into_iter()
            .filter(|e| expected.depth_between(e.ancestor_id, e.descendant_id) != Some(e.depth))
            .collect();
        (missing, unexpected)
    }
}
