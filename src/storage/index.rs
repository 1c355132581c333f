//! Shard Index
//!
//! Height-balanced (AVL) ordered tree holding the entries of one shard.
//!
//! Every node owns its children outright. Rotations move boxes between
//! parent and child slots, so the tree never holds shared or cyclic
//! references and is freed by ordinary drop.
//!
//! ```text
//!        left-left              left-right
//!          z                      z
//!         / \                    / \
//!        y   T4                 y   T4
//!       / \        ──►         / \       ──►  rotate_left(y),
//!      x   T3     rotate_     T1   x          then rotate_right(z)
//!     / \         right(z)        / \
//!    T1  T2                      T2  T3
//! ```

use std::cmp::Ordering;
use std::mem;

use tracing::debug;

use super::entry::CacheEntry;

/// Ordering used to place keys in the tree.
pub trait KeyOrder: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Byte-wise comparison over the common prefix, then shorter key first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lexicographic;

impl KeyOrder for Lexicographic {
    #[inline]
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let common = a.len().min(b.len());
        a[..common]
            .cmp(&b[..common])
            .then_with(|| a.len().cmp(&b.len()))
    }
}

impl<F> KeyOrder for F
where
    F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self(a, b)
    }
}

/// Result of placing an entry in the index.
#[derive(Debug)]
pub enum Insert {
    /// A new node was created
    Inserted,
    /// The key already existed and was left untouched; the rejected entry
    /// is handed back
    Duplicate(CacheEntry),
    /// The key already existed and its entry was swapped; the previous
    /// entry is handed back
    Replaced(CacheEntry),
}

type Link = Option<Box<Node>>;

struct Node {
    entry: CacheEntry,
    height: u32,
    left: Link,
    right: Link,
}

impl Node {
    fn leaf(entry: CacheEntry) -> Box<Self> {
        Box::new(Self {
            entry,
            height: 1,
            left: None,
            right: None,
        })
    }

    #[inline]
    fn update_height(&mut self) {
        self.height = 1 + height(&self.left).max(height(&self.right));
    }

    #[inline]
    fn balance_factor(&self) -> i64 {
        i64::from(height(&self.left)) - i64::from(height(&self.right))
    }
}

#[inline]
fn height(link: &Link) -> u32 {
    link.as_ref().map_or(0, |node| node.height)
}

fn rotate_left(mut node: Box<Node>) -> Box<Node> {
    let Some(mut pivot) = node.right.take() else {
        return node;
    };
    node.right = pivot.left.take();
    node.update_height();
    pivot.left = Some(node);
    pivot.update_height();
    pivot
}

fn rotate_right(mut node: Box<Node>) -> Box<Node> {
    let Some(mut pivot) = node.left.take() else {
        return node;
    };
    node.left = pivot.right.take();
    node.update_height();
    pivot.right = Some(node);
    pivot.update_height();
    pivot
}

/// Restore the height invariant at `node`, assuming both subtrees already
/// satisfy it.
fn rebalance(mut node: Box<Node>) -> Box<Node> {
    node.update_height();

    match node.balance_factor() {
        2 => {
            if let Some(left) = node.left.take() {
                // left-right case: straighten the inner grandchild first
                node.left = Some(if height(&left.right) > height(&left.left) {
                    rotate_left(left)
                } else {
                    left
                });
            }
            rotate_right(node)
        }
        -2 => {
            if let Some(right) = node.right.take() {
                node.right = Some(if height(&right.left) > height(&right.right) {
                    rotate_right(right)
                } else {
                    right
                });
            }
            rotate_left(node)
        }
        _ => node,
    }
}

fn insert_at<O: KeyOrder>(
    link: Link,
    entry: CacheEntry,
    order: &O,
    replace: bool,
) -> (Box<Node>, Insert) {
    let Some(mut node) = link else {
        return (Node::leaf(entry), Insert::Inserted);
    };

    let outcome = match order.compare(entry.key(), node.entry.key()) {
        Ordering::Less => {
            let (child, outcome) = insert_at(node.left.take(), entry, order, replace);
            node.left = Some(child);
            outcome
        }
        Ordering::Greater => {
            let (child, outcome) = insert_at(node.right.take(), entry, order, replace);
            node.right = Some(child);
            outcome
        }
        Ordering::Equal if replace => {
            let previous = mem::replace(&mut node.entry, entry);
            return (node, Insert::Replaced(previous));
        }
        Ordering::Equal => return (node, Insert::Duplicate(entry)),
    };

    (rebalance(node), outcome)
}

/// Balanced ordered index over [`CacheEntry`] values.
pub struct ShardIndex<O = Lexicographic> {
    root: Link,
    len: usize,
    order: O,
}

impl Default for ShardIndex<Lexicographic> {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardIndex<Lexicographic> {
    /// Create an empty index ordered byte-lexicographically
    pub fn new() -> Self {
        Self::with_order(Lexicographic)
    }
}

impl<O: KeyOrder> ShardIndex<O> {
    /// Create an empty index using a custom key ordering
    pub fn with_order(order: O) -> Self {
        Self {
            root: None,
            len: 0,
            order,
        }
    }

    /// Insert `entry` unless its key is already present.
    pub fn insert(&mut self, entry: CacheEntry) -> Insert {
        self.place(entry, false)
    }

    /// Insert `entry`, swapping out any entry stored under the same key.
    pub fn replace(&mut self, entry: CacheEntry) -> Insert {
        self.place(entry, true)
    }

    fn place(&mut self, entry: CacheEntry, replace: bool) -> Insert {
        let (root, outcome) = insert_at(self.root.take(), entry, &self.order, replace);
        self.root = Some(root);
        if matches!(outcome, Insert::Inserted) {
            self.len += 1;
        }
        outcome
    }

    /// Look up the entry stored under `key`.
    pub fn find(&self, key: &[u8]) -> Option<&CacheEntry> {
        let mut cursor = self.root.as_deref();
        while let Some(node) = cursor {
            cursor = match self.order.compare(key, node.entry.key()) {
                Ordering::Equal => return Some(&node.entry),
                Ordering::Less => node.left.as_deref(),
                Ordering::Greater => node.right.as_deref(),
            };
        }
        None
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Height of the tree; 0 when empty.
    pub fn height(&self) -> u32 {
        height(&self.root)
    }

    /// In-order (sorted) traversal.
    pub fn iter(&self) -> Iter<'_> {
        let mut iter = Iter { stack: Vec::new() };
        iter.descend_left(self.root.as_deref());
        iter
    }

    /// Visit every entry node-first: a node, then its left subtree, then its
    /// right subtree.
    pub fn preorder<F>(&self, mut visit: F)
    where
        F: FnMut(&CacheEntry),
    {
        let mut stack: Vec<&Node> = self.root.as_deref().into_iter().collect();
        while let Some(node) = stack.pop() {
            visit(&node.entry);
            if let Some(right) = node.right.as_deref() {
                stack.push(right);
            }
            if let Some(left) = node.left.as_deref() {
                stack.push(left);
            }
        }
    }

    /// Log every entry in key order.
    pub fn dump(&self, shard: usize) {
        debug!(shard, entries = self.len, height = self.height(), "Shard index");
        for entry in self.iter() {
            debug!(shard, ?entry, "Entry");
        }
    }
}

/// Sorted iterator over an index.
pub struct Iter<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iter<'a> {
    fn descend_left(&mut self, mut node: Option<&'a Node>) {
        while let Some(n) = node {
            self.stack.push(n);
            node = n.left.as_deref();
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a CacheEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.descend_left(node.right.as_deref());
        Some(&node.entry)
    }
}
