//! Tree reassembly from parent-pointer rows
//!
//! Rows of a hierarchy (geometry members, nested attribute sets) arrive flat,
//! each naming its parent. [`TreeCache`] attaches every node exactly once and
//! tolerates any row order: a child seen before its parent creates an empty
//! placeholder that the parent's row later fills in place.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

/// A reassembled node
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode<P> {
    pub id: i64,
    pub payload: P,
    pub children: Vec<TreeNode<P>>,
}

impl<P> TreeNode<P> {
    /// Number of nodes in this subtree
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }

    /// Depth-first search by id
    pub fn find(&self, id: i64) -> Option<&TreeNode<P>> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// Result of attaching one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// New node
    Attached,
    /// The node's placeholder, created by an earlier child row, was filled
    FilledPlaceholder,
    /// The id was already attached; the row was ignored
    Duplicate,
}

/// Trees plus the ids that could not be attached
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledTree<P> {
    pub roots: Vec<TreeNode<P>>,
    /// Ids whose parent never arrived, or that sit on a parent cycle
    pub orphans: Vec<i64>,
}

#[derive(Debug)]
struct Entry<P> {
    payload: Option<P>,
    children: Vec<i64>,
}

impl<P> Entry<P> {
    fn placeholder() -> Self {
        Self {
            payload: None,
            children: Vec::new(),
        }
    }
}

/// Node map for one parent's row stream
#[derive(Debug)]
pub struct TreeCache<P> {
    entries: HashMap<i64, Entry<P>>,
    roots: Vec<i64>,
    attached: Vec<i64>,
}

impl<P> Default for TreeCache<P> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            roots: Vec::new(),
            attached: Vec::new(),
        }
    }
}

impl<P> TreeCache<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node to its parent, creating a placeholder parent if needed
    pub fn attach(&mut self, id: i64, parent_id: Option<i64>, payload: P) -> AttachOutcome {
        let outcome = match self.entries.get_mut(&id) {
            Some(entry) if entry.payload.is_some() => return AttachOutcome::Duplicate,
            Some(entry) => {
                entry.payload = Some(payload);
                AttachOutcome::FilledPlaceholder
            }
            None => {
                self.entries.insert(
                    id,
                    Entry {
                        payload: Some(payload),
                        children: Vec::new(),
                    },
                );
                AttachOutcome::Attached
            }
        };
        self.attached.push(id);

        match parent_id {
            Some(parent_id) if parent_id != id => {
                self.entries
                    .entry(parent_id)
                    .or_insert_with(Entry::placeholder)
                    .children
                    .push(id);
            }
            _ => self.roots.push(id),
        }

        outcome
    }

    /// Whether a node (or its placeholder) is known
    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of known nodes, placeholders included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the trees and empty the cache
    pub fn finish(&mut self) -> AssembledTree<P> {
        let mut entries = std::mem::take(&mut self.entries);
        let root_ids = std::mem::take(&mut self.roots);
        let attached = std::mem::take(&mut self.attached);

        let roots: Vec<TreeNode<P>> = root_ids
            .into_iter()
            .filter_map(|id| build(&mut entries, id))
            .collect();

        let orphans: Vec<i64> = attached
            .into_iter()
            .filter(|id| entries.get(id).is_some_and(|entry| entry.payload.is_some()))
            .collect();
        if !orphans.is_empty() {
            tracing::warn!("Dropping {} tree nodes without a reachable parent: {:?}", orphans.len(), orphans);
        }

        AssembledTree { roots, orphans }
    }

    /// Drop everything without building
    pub fn clear(&mut self) {
        self.entries.clear();
        self.roots.clear();
        self.attached.clear();
    }

    /// Scope the cache to one row stream; it is cleared when the guard drops,
    /// whether or not the stream completed
    pub fn session(&mut self) -> TreeSession<'_, P> {
        TreeSession { cache: self }
    }
}

fn build<P>(entries: &mut HashMap<i64, Entry<P>>, id: i64) -> Option<TreeNode<P>> {
    // removal doubles as the cycle guard
    let entry = entries.remove(&id)?;
    let payload = entry.payload?;
    let children = entry
        .children
        .into_iter()
        .filter_map(|child| build(entries, child))
        .collect();

    Some(TreeNode { id, payload, children })
}

/// Guard clearing a [`TreeCache`] on drop
pub struct TreeSession<'a, P> {
    cache: &'a mut TreeCache<P>,
}

impl<P> Deref for TreeSession<'_, P> {
    type Target = TreeCache<P>;

    fn deref(&self) -> &Self::Target {
        self.cache
    }
}

impl<P> DerefMut for TreeSession<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.cache
    }
}

impl<P> Drop for TreeSession<'_, P> {
    fn drop(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(rows: &[(i64, Option<i64>, &'static str)]) -> AssembledTree<&'static str> {
        let mut cache = TreeCache::new();
        for (id, parent, name) in rows {
            cache.attach(*id, *parent, *name);
        }
        cache.finish()
    }

    #[test]
    fn test_row_order_does_not_change_tree() {
        let parent_first = assemble(&[
            (1, None, "set"),
            (2, Some(1), "height"),
            (3, Some(1), "inner"),
            (4, Some(3), "width"),
        ]);
        let child_first = assemble(&[
            (4, Some(3), "width"),
            (2, Some(1), "height"),
            (3, Some(1), "inner"),
            (1, None, "set"),
        ]);

        assert_eq!(parent_first, child_first);
        assert_eq!(parent_first.roots.len(), 1);
        assert_eq!(parent_first.roots[0].size(), 4);
        assert_eq!(parent_first.roots[0].find(4).map(|node| node.payload), Some("width"));
    }

    #[test]
    fn test_placeholder_is_reused() {
        let mut cache = TreeCache::new();
        assert_eq!(cache.attach(2, Some(1), "child"), AttachOutcome::Attached);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.attach(1, None, "parent"), AttachOutcome::FilledPlaceholder);
        assert_eq!(cache.attach(1, None, "again"), AttachOutcome::Duplicate);

        let tree = cache.finish();
        assert_eq!(tree.roots[0].payload, "parent");
        assert_eq!(tree.roots[0].children.len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_orphans_are_reported() {
        let tree = assemble(&[(1, None, "root"), (5, Some(9), "lost"), (6, Some(5), "lost child")]);
        assert_eq!(tree.roots.len(), 1);
        assert_eq!(tree.orphans, vec![5, 6]);
    }

    #[test]
    fn test_cycles_do_not_loop() {
        let tree = assemble(&[(1, Some(2), "a"), (2, Some(1), "b")]);
        assert!(tree.roots.is_empty());
        assert_eq!(tree.orphans, vec![1, 2]);
    }

    #[test]
    fn test_session_clears_on_drop() {
        let mut cache = TreeCache::new();
        {
            let mut session = cache.session();
            session.attach(1, None, "root");
            session.attach(2, Some(3), "waiting");
            // dropped without finish, as on an error path
        }
        assert!(cache.is_empty());
    }
}
