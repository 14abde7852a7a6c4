//! Prefix trie for pub/sub subscription matching.
//!
//! Maps subscription byte prefixes to the set of pipes subscribed to
//! them. Each node keeps a per-pipe refcount so repeated identical
//! subscriptions from one pipe are deduplicated; [`MultiTrie::add`] and
//! [`MultiTrie::remove`] report whether the net subscription set
//! changed, which is what decides whether a (un)subscription is
//! forwarded upstream.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::pipe::PipeId;

#[derive(Debug, Default)]
struct TrieNode {
    /// Subscribed pipes at exactly this prefix, with refcounts.
    pipes: HashMap<PipeId, u32>,
    children: HashMap<u8, TrieNode>,
}

impl TrieNode {
    fn is_redundant(&self) -> bool {
        self.pipes.is_empty() && self.children.is_empty()
    }
}

/// Subscription store shared by pub-side pattern sockets.
#[derive(Debug, Default)]
pub struct MultiTrie {
    root: TrieNode,
}

impl MultiTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pipe`'s subscription to `prefix`.
    ///
    /// Returns `true` iff the prefix previously had no subscriber at
    /// all, i.e. the subscription should be forwarded upstream.
    pub fn add(&mut self, prefix: &[u8], pipe: PipeId) -> bool {
        let mut node = &mut self.root;
        for &byte in prefix {
            node = node.children.entry(byte).or_default();
        }
        let was_empty = node.pipes.is_empty();
        *node.pipes.entry(pipe).or_insert(0) += 1;
        was_empty
    }

    /// Drop one reference of `pipe`'s subscription to `prefix`.
    ///
    /// Returns `true` iff the prefix is left with no subscriber, i.e.
    /// the unsubscription should be forwarded upstream. A prefix or
    /// pipe that was never subscribed is a no-op returning `false`.
    pub fn remove(&mut self, prefix: &[u8], pipe: PipeId) -> bool {
        Self::remove_at(&mut self.root, prefix, pipe)
    }

    /// Collect every pipe whose subscribed prefix is a prefix of
    /// `topic`, deduplicated.
    #[must_use]
    pub fn matches(&self, topic: &[u8]) -> SmallVec<[PipeId; 8]> {
        let mut out = SmallVec::new();
        let mut node = &self.root;
        let mut depth = 0;
        loop {
            for &pipe in node.pipes.keys() {
                if !out.contains(&pipe) {
                    out.push(pipe);
                }
            }
            let Some(&byte) = topic.get(depth) else {
                break;
            };
            match node.children.get(&byte) {
                Some(child) => {
                    node = child;
                    depth += 1;
                }
                None => break,
            }
        }
        out
    }

    /// Remove every subscription held by `pipe` (used when the pipe
    /// terminates). Returns the prefixes left with no subscriber, so
    /// the caller can forward the unsubscriptions upstream.
    pub fn remove_pipe(&mut self, pipe: PipeId) -> Vec<Vec<u8>> {
        let mut emptied = Vec::new();
        let mut path = Vec::new();
        Self::purge(&mut self.root, pipe, &mut path, &mut emptied);
        emptied
    }

    fn remove_at(node: &mut TrieNode, prefix: &[u8], pipe: PipeId) -> bool {
        match prefix.split_first() {
            None => match node.pipes.get_mut(&pipe) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    node.pipes.remove(&pipe);
                    node.pipes.is_empty()
                }
                None => false,
            },
            Some((&byte, rest)) => {
                let Some(child) = node.children.get_mut(&byte) else {
                    return false;
                };
                let emptied = Self::remove_at(child, rest, pipe);
                if child.is_redundant() {
                    node.children.remove(&byte);
                }
                emptied
            }
        }
    }

    fn purge(
        node: &mut TrieNode,
        pipe: PipeId,
        path: &mut Vec<u8>,
        emptied: &mut Vec<Vec<u8>>,
    ) {
        if node.pipes.remove(&pipe).is_some() && node.pipes.is_empty() {
            emptied.push(path.clone());
        }
        node.children.retain(|&byte, child| {
            path.push(byte);
            Self::purge(child, pipe, path, emptied);
            path.pop();
            !child.is_redundant()
        });
    }
}
