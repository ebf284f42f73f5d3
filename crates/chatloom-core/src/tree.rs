// ABOUTME: Conversation forest reconstruction from a flat message list
// ABOUTME: Branch choices select one child per node to produce the displayed linear transcript
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # Message Tree
//!
//! Messages are stored flat with a nullable `parent_id`. Editing or regenerating a
//! message adds a sibling instead of overwriting, so a chat is a forest. This
//! module rebuilds that forest from a snapshot and walks it according to a
//! [`BranchChoices`] map, which records the selected child index per node.
//!
//! The tree is an arena: nodes live in a `Vec` and refer to each other by index.
//! It is rebuilt from scratch on every read and never mutated.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::ops::ControlFlow;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::errors::AppError;
use crate::models::Message;

/// Failure to reconstruct a conversation tree
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// No message in the input has a null parent
    #[error("conversation has no root message")]
    NoRoot,
}

impl From<TreeError> for AppError {
    fn from(error: TreeError) -> Self {
        Self::not_found(format!("Tree root ({error})"))
    }
}

/// A message placed in the arena
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// The message itself
    pub message: Message,
    /// Arena index of the parent node
    pub parent: Option<usize>,
    /// Arena indices of the children, oldest first
    pub children: Vec<usize>,
}

impl TreeNode {
    /// Message id of this node
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.message.id
    }
}

/// Key of a [`BranchChoices`] entry
///
/// Serialized as the string `"root"` or as the decimal message id, so the map
/// round-trips through JSON objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChoiceKey {
    /// Selection among the root messages
    Root,
    /// Selection among the children of a message
    Node(i64),
}

impl fmt::Display for ChoiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Node(id) => write!(f, "{id}"),
        }
    }
}

impl Serialize for ChoiceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct ChoiceKeyVisitor;

impl Visitor<'_> for ChoiceKeyVisitor {
    type Value = ChoiceKey;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"root\" or a message id")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<ChoiceKey, E> {
        if value == "root" {
            return Ok(ChoiceKey::Root);
        }
        value
            .parse::<i64>()
            .map(ChoiceKey::Node)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<ChoiceKey, E> {
        Ok(ChoiceKey::Node(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<ChoiceKey, E> {
        i64::try_from(value)
            .map(ChoiceKey::Node)
            .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(value), &self))
    }
}

impl<'de> Deserialize<'de> for ChoiceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(ChoiceKeyVisitor)
    }
}

/// Selected child index per node
///
/// Missing entries mean index 0. Out-of-range entries are clamped while walking
/// and reset to 0 by [`MessageTree::normalize_choices`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchChoices(BTreeMap<ChoiceKey, usize>);

impl BranchChoices {
    /// Empty selection: every node shows its first child
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry for a key
    #[must_use]
    pub fn get(&self, key: ChoiceKey) -> Option<usize> {
        self.0.get(&key).copied()
    }

    /// Set the selected index for a key
    pub fn set(&mut self, key: ChoiceKey, index: usize) {
        self.0.insert(key, index);
    }

    /// Number of explicit entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no explicit entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn clamped(&self, key: ChoiceKey, len: usize) -> usize {
        self.get(key).unwrap_or(0).min(len.saturating_sub(1))
    }
}

/// A reconstructed conversation forest
#[derive(Debug, Clone)]
pub struct MessageTree {
    nodes: Vec<TreeNode>,
    roots: Vec<usize>,
    index: HashMap<i64, usize>,
}

const fn in_range(choice: Option<usize>, len: usize) -> bool {
    matches!(choice, Some(idx) if idx < len)
}

fn by_creation(a: &Message, b: &Message) -> Ordering {
    a.order_key().cmp(&b.order_key())
}

/// Rebuild the conversation forest from a flat message list
///
/// Siblings (the root list included) are ordered by `created_at`, ties broken by
/// `id`. Messages whose parent is not reachable from any root are left out.
///
/// # Errors
///
/// Returns [`TreeError::NoRoot`] when no message has a null parent, which
/// includes the empty input.
pub fn build_tree(messages: Vec<Message>) -> Result<MessageTree, TreeError> {
    let total = messages.len();
    let mut roots: Vec<Message> = Vec::new();
    let mut children_of: HashMap<i64, Vec<Message>> = HashMap::new();

    for message in messages {
        match message.parent_id {
            None => roots.push(message),
            Some(parent_id) => children_of.entry(parent_id).or_default().push(message),
        }
    }

    if roots.is_empty() {
        return Err(TreeError::NoRoot);
    }
    roots.sort_by(by_creation);

    let mut tree = MessageTree {
        nodes: Vec::with_capacity(total),
        roots: Vec::with_capacity(roots.len()),
        index: HashMap::with_capacity(total),
    };

    let mut queue: VecDeque<usize> = VecDeque::new();
    for root in roots {
        let idx = tree.push(root, None);
        tree.roots.push(idx);
        queue.push_back(idx);
    }

    while let Some(parent_idx) = queue.pop_front() {
        let parent_id = tree.nodes[parent_idx].id();
        let Some(mut kids) = children_of.remove(&parent_id) else {
            continue;
        };
        kids.sort_by(by_creation);
        for kid in kids {
            let idx = tree.push(kid, Some(parent_idx));
            tree.nodes[parent_idx].children.push(idx);
            queue.push_back(idx);
        }
    }

    if !children_of.is_empty() {
        let orphaned: usize = children_of.values().map(Vec::len).sum();
        debug!(orphaned, "Skipped messages unreachable from any root");
    }

    Ok(tree)
}

impl MessageTree {
    fn push(&mut self, message: Message, parent: Option<usize>) -> usize {
        let idx = self.nodes.len();
        self.index.insert(message.id, idx);
        self.nodes.push(TreeNode {
            message,
            parent,
            children: Vec::new(),
        });
        idx
    }

    /// Number of nodes in the forest
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a tree has at least one root
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Root nodes, oldest first
    pub fn roots(&self) -> impl Iterator<Item = &TreeNode> {
        self.roots.iter().map(|&idx| &self.nodes[idx])
    }

    /// Node by arena index
    #[must_use]
    pub fn node(&self, idx: usize) -> Option<&TreeNode> {
        self.nodes.get(idx)
    }

    /// Node by message id
    #[must_use]
    pub fn find(&self, message_id: i64) -> Option<&TreeNode> {
        self.index.get(&message_id).map(|&idx| &self.nodes[idx])
    }

    /// Parent of a node
    #[must_use]
    pub fn parent_of(&self, node: &TreeNode) -> Option<&TreeNode> {
        node.parent.map(|idx| &self.nodes[idx])
    }

    /// Children of a node, oldest first
    pub fn children_of<'a>(&'a self, node: &'a TreeNode) -> impl Iterator<Item = &'a TreeNode> {
        node.children.iter().map(|&idx| &self.nodes[idx])
    }

    /// Follow the branch choices from the selected root down to a leaf
    ///
    /// Visits exactly one node per depth. The visitor may stop the walk early by
    /// returning `ControlFlow::Break`.
    pub fn walk<'a, F>(&'a self, choices: &BranchChoices, mut visit: F)
    where
        F: FnMut(&'a TreeNode) -> ControlFlow<()>,
    {
        if self.roots.is_empty() {
            return;
        }
        let mut current = self.roots[choices.clamped(ChoiceKey::Root, self.roots.len())];

        loop {
            let node = &self.nodes[current];
            if visit(node).is_break() || node.children.is_empty() {
                return;
            }
            let pick = choices.clamped(ChoiceKey::Node(node.id()), node.children.len());
            current = node.children[pick];
        }
    }

    /// Visit every node breadth-first, ignoring branch choices
    pub fn walk_all<'a, F>(&'a self, mut visit: F)
    where
        F: FnMut(&'a TreeNode),
    {
        let mut queue: VecDeque<usize> = self.roots.iter().copied().collect();
        while let Some(idx) = queue.pop_front() {
            let node = &self.nodes[idx];
            visit(node);
            queue.extend(node.children.iter().copied());
        }
    }

    /// Give every node an in-range choice entry
    ///
    /// Missing or out-of-range entries become 0. Applying this twice yields the
    /// same map as applying it once.
    #[must_use]
    pub fn normalize_choices(&self, choices: &BranchChoices) -> BranchChoices {
        let mut normalized = choices.clone();

        if !in_range(normalized.get(ChoiceKey::Root), self.roots.len()) {
            normalized.set(ChoiceKey::Root, 0);
        }

        self.walk_all(|node| {
            let key = ChoiceKey::Node(node.id());
            if !in_range(normalized.get(key), node.children.len()) {
                normalized.set(key, 0);
            }
        });

        normalized
    }

    /// Terminal node of the displayed branch; the parent for a new message
    #[must_use]
    pub fn last_message(&self, choices: &BranchChoices) -> Option<&TreeNode> {
        let mut last = None;
        self.walk(choices, |node| {
            last = Some(node);
            ControlFlow::Continue(())
        });
        last
    }

    /// Messages along the displayed branch, root first
    #[must_use]
    pub fn linear_transcript(&self, choices: &BranchChoices) -> Vec<&Message> {
        let mut transcript = Vec::new();
        self.walk(choices, |node| {
            transcript.push(&node.message);
            ControlFlow::Continue(())
        });
        transcript
    }

    /// Point the choices along the path to `message_id` so it becomes visible
    ///
    /// Returns false when the message is not part of the tree.
    pub fn reveal(&self, choices: &mut BranchChoices, message_id: i64) -> bool {
        let Some(&target) = self.index.get(&message_id) else {
            return false;
        };

        let mut current = target;
        while let Some(parent_idx) = self.nodes[current].parent {
            let parent = &self.nodes[parent_idx];
            if let Some(pos) = parent.children.iter().position(|&c| c == current) {
                choices.set(ChoiceKey::Node(parent.id()), pos);
            }
            current = parent_idx;
        }
        if let Some(pos) = self.roots.iter().position(|&r| r == current) {
            choices.set(ChoiceKey::Root, pos);
        }
        true
    }
}
