//! Ordered aggregate store: a byte-wise prefix tree whose children are always kept sorted by edge
//! label.
//!
//! Because every sibling list is sorted, a pre-order walk yields keys in ascending byte order, so
//! output needs no terminal sort. Inserts pay a binary search per key byte, and merging two tries
//! is a two-pointer merge of each pair of sibling lists.

use std::cmp::Ordering;

use crate::compute::{Aggregate, Tenths};
use crate::store::AggregateStore;

// nothing here recurses per key byte: keys can be as long as a whole block, so merge, walk and
// drop all keep their own work lists on the heap instead of the call stack.
struct Node {
    label: u8,
    // only set when some record's key ends exactly here
    agg: Option<Aggregate>,
    children: Vec<Node>,
}

impl Node {
    fn new(label: u8) -> Self {
        Self {
            label,
            agg: None,
            children: Vec::new(),
        }
    }

    #[inline]
    fn find_child(&self, label: u8) -> Result<usize, usize> {
        self.children.binary_search_by_key(&label, |n| n.label)
    }

    #[inline]
    fn get_or_insert_child(&mut self, label: u8) -> &mut Node {
        let i = match self.find_child(label) {
            Ok(i) => i,
            Err(i) => {
                self.children.insert(i, Node::new(label));
                i
            }
        };
        &mut self.children[i]
    }

    /// Merges `other` (same label, same path) into `self`. Returns how many keys both sides held.
    fn merge(&mut self, other: Node) -> usize {
        let mut shared = 0;
        let mut pending: Vec<(&mut Node, Node)> = vec![(self, other)];
        while let Some((node, other)) = pending.pop() {
            let Node { agg, children, .. } = node;
            let Node {
                agg: their_agg,
                children: their_children,
                ..
            } = other;

            if let Some(theirs) = their_agg {
                match agg.as_mut() {
                    Some(mine) => {
                        mine.merge(theirs);
                        shared += 1;
                    }
                    None => *agg = Some(theirs),
                }
            }

            if their_children.is_empty() {
                continue;
            }
            if children.is_empty() {
                *children = their_children;
                continue;
            }

            // both sibling lists are sorted, so one pass splices them together and the result
            // stays sorted. matching labels get merged later, once their final slot is known.
            let mut merged = Vec::with_capacity(children.len() + their_children.len());
            let mut deferred = Vec::new();
            let mut left = std::mem::take(children).into_iter().peekable();
            let mut right = their_children.into_iter().peekable();
            loop {
                let ord = match (left.peek(), right.peek()) {
                    (Some(l), Some(r)) => l.label.cmp(&r.label),
                    _ => break,
                };
                match ord {
                    Ordering::Less => merged.extend(left.next()),
                    Ordering::Greater => merged.extend(right.next()),
                    Ordering::Equal => {
                        if let (Some(l), Some(r)) = (left.next(), right.next()) {
                            deferred.push((merged.len(), r));
                            merged.push(l);
                        }
                    }
                }
            }
            merged.extend(left);
            merged.extend(right);
            *children = merged;

            let mut deferred = deferred.into_iter().peekable();
            for (i, child) in children.iter_mut().enumerate() {
                if deferred.peek().is_some_and(|(j, _)| *j == i) {
                    if let Some((_, theirs)) = deferred.next() {
                        pending.push((child, theirs));
                    }
                }
            }
        }
        shared
    }
}

pub struct Trie {
    root: Node,
    len: usize,
}

impl Default for Trie {
    fn default() -> Self {
        Self {
            root: Node::new(0),
            len: 0,
        }
    }
}

impl Drop for Trie {
    fn drop(&mut self) {
        // flatten onto the heap so each node is freed with no children left to recurse into
        let mut stack = std::mem::take(&mut self.root.children);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.children);
        }
    }
}

impl std::fmt::Debug for Trie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trie").field("len", &self.len).finish_non_exhaustive()
    }
}

impl AggregateStore for Trie {
    fn record(&mut self, key: &[u8], value: Tenths) {
        let mut node = &mut self.root;
        for &b in key {
            node = node.get_or_insert_child(b);
        }
        match node.agg.as_mut() {
            Some(agg) => agg.insert(value),
            None => {
                node.agg = Some(Aggregate::new(value));
                self.len += 1;
            }
        }
    }

    fn merge(&mut self, mut other: Self) {
        let theirs = std::mem::replace(&mut other.root, Node::new(0));
        let shared = self.root.merge(theirs);
        self.len = self.len + other.len - shared;
    }

    fn get(&self, key: &[u8]) -> Option<&Aggregate> {
        let mut node = &self.root;
        for &b in key {
            node = &node.children[node.find_child(b).ok()?];
        }
        node.agg.as_ref()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn for_each_sorted<F: FnMut(&[u8], &Aggregate)>(&self, mut f: F) {
        let mut path = Vec::with_capacity(64);
        if let Some(agg) = &self.root.agg {
            f(&path, agg);
        }
        // pre-order, children pushed in reverse so the smallest label pops first.
        // the usize is how long the path above that node is.
        let mut stack = self
            .root
            .children
            .iter()
            .rev()
            .map(|c| (c, 0))
            .collect::<Vec<_>>();
        while let Some((node, depth)) = stack.pop() {
            path.truncate(depth);
            path.push(node.label);
            if let Some(agg) = &node.agg {
                f(&path, agg);
            }
            stack.extend(node.children.iter().rev().map(|c| (c, depth + 1)));
        }
    }
}
