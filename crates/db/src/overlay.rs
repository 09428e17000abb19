//! Copy-on-write overlay tree
//!
//! The overlay buffers mutations against the flattening views until
//! commit. It is an arena of nodes indexed by [`NodeId`]; child nodes
//! keep a parent index for dirty propagation, and the root (id 0) keeps
//! the list of dirty descendants.
//!
//! ## Ownership discipline
//!
//! Ownership runs strictly parent-to-child through the write buffers:
//! every node is held by exactly one slot. Assigning a node of the same
//! document elsewhere therefore deep-copies its current overlay state
//! (writing it back to its own slot is a no-op), and removing or
//! overwriting a slot detaches the node it held — a detached node's
//! buffered writes never reach the store, even if it was already marked
//! dirty.
//!
//! ## Wrapping discipline
//!
//! Reading a container child materializes an overlay node over the
//! underlying view (or over the staged plain value) and memoizes it in
//! the parent's buffer, so `d["a"]["b"] = 1` buffers the write inside
//! the cached child of `"a"`. Re-reads return the same node, and commit
//! re-bases fresh nodes onto their stored position, so handles stay
//! usable across commits.
//!
//! ## Commit
//!
//! Depth-first and two-phase per mapping: children are flushed and
//! unwrapped to their raw forms before the parent's write lands, and all
//! writes land before any delete. The second point is what makes
//! move-then-delete (`d["b"] = d["a"]; del d["a"]`) copy before it
//! purges.

use jotdb_core::{Error, Result, Scalar, Value};
use jotdb_flatten::{MapView, Node as FlatNode, SeqView};
use jotdb_store::SharedStore;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub(crate) type NodeId = usize;

/// The root overlay node of a document
pub(crate) const ROOT: NodeId = 0;

/// Shared handle to one document's overlay state
pub(crate) type Doc = Arc<Mutex<DocInner>>;

/// A buffered entry in a mapping overlay, or a staged sequence element
#[derive(Clone)]
pub(crate) enum Slot {
    /// Tombstone: the key is deleted in the overlay (mappings only)
    Deleted,
    /// A buffered scalar write
    Scalar(Scalar),
    /// A child overlay node
    Child(NodeId),
}

/// What a mapping overlay buffers against
pub(crate) enum MapBase {
    /// A mapping that exists in the store
    View(MapView),
    /// A plain mapping assigned in this transaction, not yet in the store
    Fresh(BTreeMap<String, Value>),
}

/// What a sequence overlay buffers against
pub(crate) enum SeqBase {
    View(SeqView),
    Fresh(Vec<Value>),
}

pub(crate) struct MapNode {
    parent: Option<NodeId>,
    base: MapBase,
    updates: BTreeMap<String, Slot>,
    detached: bool,
}

impl MapNode {
    fn over_view(parent: NodeId, view: MapView) -> Self {
        MapNode {
            parent: Some(parent),
            base: MapBase::View(view),
            updates: BTreeMap::new(),
            detached: false,
        }
    }

    fn fresh(parent: NodeId, entries: BTreeMap<String, Value>) -> Self {
        MapNode {
            parent: Some(parent),
            base: MapBase::Fresh(entries),
            updates: BTreeMap::new(),
            detached: false,
        }
    }
}

pub(crate) struct SeqNode {
    parent: Option<NodeId>,
    base: SeqBase,
    /// `None` until first staging; afterwards the entire replacement
    /// sequence
    staged: Option<Vec<Slot>>,
    detached: bool,
}

impl SeqNode {
    fn over_view(parent: NodeId, view: SeqView) -> Self {
        SeqNode {
            parent: Some(parent),
            base: SeqBase::View(view),
            staged: None,
            detached: false,
        }
    }

    fn fresh(parent: NodeId, items: Vec<Value>) -> Self {
        SeqNode {
            parent: Some(parent),
            base: SeqBase::Fresh(items),
            staged: None,
            detached: false,
        }
    }
}

pub(crate) enum OverlayNode {
    Map(MapNode),
    Seq(SeqNode),
}

/// Result of resolving a child through the overlay
pub(crate) enum Resolved {
    Scalar(Scalar),
    Map(NodeId),
    Seq(NodeId),
}

/// A value arriving at `set`/`insert`, already normalized by the entry
/// layer: plain data, or a node of this same document
pub(crate) enum Incoming {
    Value(Value),
    Existing(NodeId),
}

pub(crate) struct DocInner {
    store: SharedStore,
    nodes: Vec<OverlayNode>,
    /// Dirty descendants, kept only meaningfully at the root
    dirty: Vec<NodeId>,
    closed: bool,
}

fn overlay_corrupt() -> Error {
    Error::corrupt_store("overlay node inconsistency".to_string())
}

impl DocInner {
    pub(crate) fn new(store: SharedStore) -> Self {
        let root = MapView::root(store.clone());
        DocInner {
            store,
            nodes: vec![OverlayNode::Map(MapNode {
                parent: None,
                base: MapBase::View(root),
                updates: BTreeMap::new(),
                detached: false,
            })],
            dirty: Vec::new(),
            closed: false,
        }
    }

    pub(crate) fn store(&self) -> &SharedStore {
        &self.store
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::DbClosed)
        } else {
            Ok(())
        }
    }

    // === arena plumbing ===

    fn alloc(&mut self, node: OverlayNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn node(&self, id: NodeId) -> Result<&OverlayNode> {
        self.nodes.get(id).ok_or_else(overlay_corrupt)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut OverlayNode> {
        self.nodes.get_mut(id).ok_or_else(overlay_corrupt)
    }

    fn map_node(&self, id: NodeId) -> Result<&MapNode> {
        match self.node(id)? {
            OverlayNode::Map(node) => Ok(node),
            OverlayNode::Seq(_) => Err(overlay_corrupt()),
        }
    }

    fn map_node_mut(&mut self, id: NodeId) -> Result<&mut MapNode> {
        match self.node_mut(id)? {
            OverlayNode::Map(node) => Ok(node),
            OverlayNode::Seq(_) => Err(overlay_corrupt()),
        }
    }

    fn seq_node(&self, id: NodeId) -> Result<&SeqNode> {
        match self.node(id)? {
            OverlayNode::Seq(node) => Ok(node),
            OverlayNode::Map(_) => Err(overlay_corrupt()),
        }
    }

    fn seq_node_mut(&mut self, id: NodeId) -> Result<&mut SeqNode> {
        match self.node_mut(id)? {
            OverlayNode::Seq(node) => Ok(node),
            OverlayNode::Map(_) => Err(overlay_corrupt()),
        }
    }

    fn parent_of(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(match self.node(id)? {
            OverlayNode::Map(node) => node.parent,
            OverlayNode::Seq(node) => node.parent,
        })
    }

    pub(crate) fn is_root(&self, id: NodeId) -> Result<bool> {
        Ok(self.parent_of(id)?.is_none())
    }

    fn is_detached(&self, id: NodeId) -> Result<bool> {
        Ok(match self.node(id)? {
            OverlayNode::Map(node) => node.detached,
            OverlayNode::Seq(node) => node.detached,
        })
    }

    fn resolve_child(&self, id: NodeId) -> Result<Resolved> {
        match self.node(id)? {
            OverlayNode::Map(_) => Ok(Resolved::Map(id)),
            OverlayNode::Seq(_) => Ok(Resolved::Seq(id)),
        }
    }

    /// A mutated node bubbles a dirty notification to the root; the root
    /// itself is always committed and records nothing.
    fn record_changed(&mut self, id: NodeId) -> Result<()> {
        if self.parent_of(id)?.is_some() {
            self.dirty.push(id);
        }
        Ok(())
    }

    /// Mark a node removed from its owning slot, together with every
    /// node still held in its buffers. Pending dirt of detached nodes is
    /// discarded at commit instead of flushed.
    fn detach(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get_mut(current) else {
                continue;
            };
            let children: Vec<NodeId> = match node {
                OverlayNode::Map(map) => {
                    map.detached = true;
                    map.updates
                        .values()
                        .filter_map(|slot| match slot {
                            Slot::Child(child) => Some(*child),
                            _ => None,
                        })
                        .collect()
                }
                OverlayNode::Seq(seq) => {
                    seq.detached = true;
                    seq.staged
                        .iter()
                        .flatten()
                        .filter_map(|slot| match slot {
                            Slot::Child(child) => Some(*child),
                            _ => None,
                        })
                        .collect()
                }
            };
            stack.extend(children);
        }
    }

    fn detach_slot(&mut self, slot: Option<Slot>) {
        if let Some(Slot::Child(old)) = slot {
            self.detach(old);
        }
    }

    // === wrapping ===

    /// Wrap a plain value for buffering under `parent`
    fn wrap_value(&mut self, parent: NodeId, value: Value) -> Result<Slot> {
        match value {
            Value::Map(entries) => {
                let id = self.alloc(OverlayNode::Map(MapNode::fresh(parent, entries)));
                Ok(Slot::Child(id))
            }
            Value::Seq(items) => {
                let id = self.alloc(OverlayNode::Seq(SeqNode::fresh(parent, items)));
                Ok(Slot::Child(id))
            }
            leaf => {
                let scalar = leaf
                    .as_scalar()
                    .ok_or_else(|| Error::value_rejected(leaf.type_name().to_string()))?;
                Ok(Slot::Scalar(scalar))
            }
        }
    }

    /// Wrap an incoming assignment for buffering under `parent`
    ///
    /// Every slot owns its node, so assigning an existing node anywhere
    /// new deep-copies its current overlay state. (Writing it back to
    /// its own slot never reaches this point — the callers detect that
    /// and do nothing.)
    fn wrap(&mut self, parent: NodeId, incoming: Incoming) -> Result<Slot> {
        match incoming {
            Incoming::Value(value) => self.wrap_value(parent, value),
            Incoming::Existing(source) => {
                let value = self.export_node(source)?;
                self.wrap_value(parent, value)
            }
        }
    }

    // === mapping operations ===

    pub(crate) fn map_get(&mut self, id: NodeId, key: &str) -> Result<Resolved> {
        self.ensure_open()?;
        if let Some(slot) = self.map_node(id)?.updates.get(key) {
            return match slot {
                Slot::Deleted => Err(Error::KeyMissing(key.to_string())),
                Slot::Scalar(s) => Ok(Resolved::Scalar(s.clone())),
                Slot::Child(child) => self.resolve_child(*child),
            };
        }

        if matches!(self.map_node(id)?.base, MapBase::Fresh(_)) {
            return self.fresh_map_get(id, key);
        }

        let view = match &self.map_node(id)?.base {
            MapBase::View(view) => view.clone(),
            MapBase::Fresh(_) => return Err(overlay_corrupt()),
        };
        match view.get(key)? {
            FlatNode::Scalar(s) => Ok(Resolved::Scalar(s)),
            FlatNode::Map(child_view) => {
                let child = self.alloc(OverlayNode::Map(MapNode::over_view(id, child_view)));
                self.map_node_mut(id)?
                    .updates
                    .insert(key.to_string(), Slot::Child(child));
                Ok(Resolved::Map(child))
            }
            FlatNode::Seq(child_view) => {
                let child = self.alloc(OverlayNode::Seq(SeqNode::over_view(id, child_view)));
                self.map_node_mut(id)?
                    .updates
                    .insert(key.to_string(), Slot::Child(child));
                Ok(Resolved::Seq(child))
            }
        }
    }

    /// Read from a fresh (not yet stored) mapping base. Containers are
    /// moved out of the base into a child overlay and memoized; the
    /// parent's buffer becomes the single authority for the key.
    fn fresh_map_get(&mut self, id: NodeId, key: &str) -> Result<Resolved> {
        let scalar = {
            let MapBase::Fresh(entries) = &self.map_node(id)?.base else {
                return Err(overlay_corrupt());
            };
            match entries.get(key) {
                None => return Err(Error::KeyMissing(key.to_string())),
                Some(value) => value.as_scalar(),
            }
        };
        if let Some(scalar) = scalar {
            return Ok(Resolved::Scalar(scalar));
        }

        let value = {
            let MapBase::Fresh(entries) = &mut self.map_node_mut(id)?.base else {
                return Err(overlay_corrupt());
            };
            entries.remove(key).ok_or_else(overlay_corrupt)?
        };
        let slot = self.wrap_value(id, value)?;
        let Slot::Child(child) = slot else {
            return Err(overlay_corrupt());
        };
        self.map_node_mut(id)?
            .updates
            .insert(key.to_string(), Slot::Child(child));
        self.resolve_child(child)
    }

    pub(crate) fn map_set(&mut self, id: NodeId, key: &str, incoming: Incoming) -> Result<()> {
        self.ensure_open()?;
        // writing a node back to its own slot is a no-op
        if let Incoming::Existing(source) = &incoming {
            if matches!(
                self.map_node(id)?.updates.get(key),
                Some(Slot::Child(child)) if child == source
            ) {
                return Ok(());
            }
        }
        self.record_changed(id)?;
        let slot = self.wrap(id, incoming)?;
        let old = self.map_node_mut(id)?.updates.insert(key.to_string(), slot);
        self.detach_slot(old);
        Ok(())
    }

    pub(crate) fn map_delete(&mut self, id: NodeId, key: &str) -> Result<()> {
        self.ensure_open()?;
        let present = match self.map_node(id)?.updates.get(key) {
            Some(Slot::Deleted) => false,
            Some(_) => true,
            None => self.base_contains(id, key)?,
        };
        if !present {
            return Err(Error::KeyMissing(key.to_string()));
        }
        let old = self
            .map_node_mut(id)?
            .updates
            .insert(key.to_string(), Slot::Deleted);
        self.detach_slot(old);
        Ok(())
    }

    pub(crate) fn map_contains(&mut self, id: NodeId, key: &str) -> Result<bool> {
        match self.map_get(id, key) {
            Ok(_) => Ok(true),
            Err(Error::KeyMissing(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn base_contains(&self, id: NodeId, key: &str) -> Result<bool> {
        match &self.map_node(id)?.base {
            MapBase::View(view) => view.contains(key),
            MapBase::Fresh(entries) => Ok(entries.contains_key(key)),
        }
    }

    pub(crate) fn map_len(&self, id: NodeId) -> Result<usize> {
        self.ensure_open()?;
        let node = self.map_node(id)?;
        let base_len = match &node.base {
            MapBase::View(view) => view.len()?,
            MapBase::Fresh(entries) => entries.len(),
        };
        let mut additions = 0usize;
        let mut deletions = 0usize;
        for (key, slot) in &node.updates {
            let in_base = match &node.base {
                MapBase::View(view) => view.contains(key)?,
                MapBase::Fresh(entries) => entries.contains_key(key),
            };
            if !in_base {
                additions += 1;
            }
            if matches!(slot, Slot::Deleted) {
                deletions += 1;
            }
        }
        (base_len + additions)
            .checked_sub(deletions)
            .ok_or_else(|| Error::corrupt_store("negative overlay length".to_string()))
    }

    pub(crate) fn map_keys(&self, id: NodeId) -> Result<Vec<String>> {
        self.ensure_open()?;
        let node = self.map_node(id)?;
        let mut keys: Vec<String> = node
            .updates
            .iter()
            .filter(|(_, slot)| !matches!(slot, Slot::Deleted))
            .map(|(key, _)| key.clone())
            .collect();
        let base_keys = match &node.base {
            MapBase::View(view) => view.keys()?,
            MapBase::Fresh(entries) => entries.keys().cloned().collect(),
        };
        for key in base_keys {
            if !node.updates.contains_key(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    // === sequence operations ===

    pub(crate) fn seq_len(&self, id: NodeId) -> Result<usize> {
        self.ensure_open()?;
        let node = self.seq_node(id)?;
        match &node.staged {
            Some(slots) => Ok(slots.len()),
            None => match &node.base {
                SeqBase::View(view) => view.len(),
                SeqBase::Fresh(items) => Ok(items.len()),
            },
        }
    }

    /// Copy the underlying elements into the staging buffer, wrapping
    /// container elements as child overlays. No-op when already staged.
    fn ensure_staged(&mut self, id: NodeId) -> Result<()> {
        if self.seq_node(id)?.staged.is_some() {
            return Ok(());
        }

        enum Raw {
            Scalar(Scalar),
            Map(MapView),
            Seq(SeqView),
            Plain(Value),
        }
        let raw: Vec<Raw> = match &self.seq_node(id)?.base {
            SeqBase::View(view) => view
                .items()?
                .into_iter()
                .map(|node| match node {
                    FlatNode::Scalar(s) => Raw::Scalar(s),
                    FlatNode::Map(v) => Raw::Map(v),
                    FlatNode::Seq(v) => Raw::Seq(v),
                })
                .collect(),
            SeqBase::Fresh(items) => items.iter().cloned().map(Raw::Plain).collect(),
        };

        let mut slots = Vec::with_capacity(raw.len());
        for item in raw {
            let slot = match item {
                Raw::Scalar(s) => Slot::Scalar(s),
                Raw::Map(view) => {
                    Slot::Child(self.alloc(OverlayNode::Map(MapNode::over_view(id, view))))
                }
                Raw::Seq(view) => {
                    Slot::Child(self.alloc(OverlayNode::Seq(SeqNode::over_view(id, view))))
                }
                Raw::Plain(value) => self.wrap_value(id, value)?,
            };
            slots.push(slot);
        }
        self.seq_node_mut(id)?.staged = Some(slots);
        Ok(())
    }

    pub(crate) fn seq_get(&mut self, id: NodeId, index: i64) -> Result<Resolved> {
        self.ensure_open()?;
        let len = self.seq_len(id)?;
        let i = normalize_index(index, len)?;

        if self.seq_node(id)?.staged.is_none() {
            // scalar reads skip staging entirely
            let scalar = match &self.seq_node(id)?.base {
                SeqBase::View(view) => match view.get(i as i64)? {
                    FlatNode::Scalar(s) => Some(s),
                    _ => None,
                },
                SeqBase::Fresh(items) => items.get(i).ok_or_else(overlay_corrupt)?.as_scalar(),
            };
            if let Some(scalar) = scalar {
                return Ok(Resolved::Scalar(scalar));
            }
            self.ensure_staged(id)?;
        }

        let slot = {
            let node = self.seq_node(id)?;
            let Some(slots) = &node.staged else {
                return Err(overlay_corrupt());
            };
            slots.get(i).ok_or_else(overlay_corrupt)?.clone()
        };
        match slot {
            Slot::Scalar(s) => Ok(Resolved::Scalar(s)),
            Slot::Child(child) => self.resolve_child(child),
            Slot::Deleted => Err(overlay_corrupt()),
        }
    }

    pub(crate) fn seq_set(&mut self, id: NodeId, index: i64, incoming: Incoming) -> Result<()> {
        self.ensure_open()?;
        let len = self.seq_len(id)?;
        let i = normalize_index(index, len)?;
        self.ensure_staged(id)?;
        // writing an element back to its own position is a no-op
        if let Incoming::Existing(source) = &incoming {
            let node = self.seq_node(id)?;
            if let Some(slots) = &node.staged {
                if matches!(slots.get(i), Some(Slot::Child(child)) if child == source) {
                    return Ok(());
                }
            }
        }
        self.record_changed(id)?;
        let slot = self.wrap(id, incoming)?;
        let old = {
            let node = self.seq_node_mut(id)?;
            let Some(slots) = &mut node.staged else {
                return Err(overlay_corrupt());
            };
            Some(std::mem::replace(&mut slots[i], slot))
        };
        self.detach_slot(old);
        Ok(())
    }

    pub(crate) fn seq_insert(&mut self, id: NodeId, pos: i64, incoming: Incoming) -> Result<()> {
        self.ensure_open()?;
        self.ensure_staged(id)?;
        self.record_changed(id)?;
        let slot = self.wrap(id, incoming)?;
        let node = self.seq_node_mut(id)?;
        let Some(slots) = &mut node.staged else {
            return Err(overlay_corrupt());
        };
        let i = clamp_insert(pos, slots.len());
        slots.insert(i, slot);
        Ok(())
    }

    pub(crate) fn seq_delete(&mut self, id: NodeId, index: i64) -> Result<()> {
        self.ensure_open()?;
        let len = self.seq_len(id)?;
        let i = normalize_index(index, len)?;
        self.ensure_staged(id)?;
        self.record_changed(id)?;
        let old = {
            let node = self.seq_node_mut(id)?;
            let Some(slots) = &mut node.staged else {
                return Err(overlay_corrupt());
            };
            Some(slots.remove(i))
        };
        self.detach_slot(old);
        Ok(())
    }

    pub(crate) fn seq_pop(&mut self, id: NodeId) -> Result<Resolved> {
        self.ensure_open()?;
        let len = self.seq_len(id)?;
        if len == 0 {
            return Err(Error::IndexOutOfRange { index: -1, len: 0 });
        }
        self.ensure_staged(id)?;
        self.record_changed(id)?;
        let slot = {
            let node = self.seq_node_mut(id)?;
            let Some(slots) = &mut node.staged else {
                return Err(overlay_corrupt());
            };
            slots.pop().ok_or_else(overlay_corrupt)?
        };
        match slot {
            Slot::Scalar(s) => Ok(Resolved::Scalar(s)),
            Slot::Child(child) => {
                // the popped node leaves the document; it stays readable
                // through the returned entry but no longer commits
                self.detach(child);
                self.resolve_child(child)
            }
            Slot::Deleted => Err(overlay_corrupt()),
        }
    }

    pub(crate) fn seq_assign(&mut self, id: NodeId, items: Vec<Incoming>) -> Result<()> {
        self.ensure_open()?;
        self.record_changed(id)?;
        // wrap before replacing: nodes of this document are copied out
        // while the old elements are still readable
        let mut slots = Vec::with_capacity(items.len());
        for item in items {
            slots.push(self.wrap(id, item)?);
        }
        let old = self.seq_node_mut(id)?.staged.replace(slots);
        for slot in old.into_iter().flatten() {
            self.detach_slot(Some(slot));
        }
        Ok(())
    }

    // === export ===

    pub(crate) fn export_node(&mut self, id: NodeId) -> Result<Value> {
        match self.node(id)? {
            OverlayNode::Map(_) => self.export_map(id),
            OverlayNode::Seq(_) => self.export_seq(id),
        }
    }

    pub(crate) fn export_map(&mut self, id: NodeId) -> Result<Value> {
        let keys = self.map_keys(id)?;
        let mut entries = BTreeMap::new();
        for key in keys {
            let resolved = self.map_get(id, &key)?;
            let value = self.export_resolved(resolved)?;
            entries.insert(key, value);
        }
        Ok(Value::Map(entries))
    }

    pub(crate) fn export_seq(&mut self, id: NodeId) -> Result<Value> {
        let len = self.seq_len(id)?;
        let mut items = Vec::with_capacity(len);
        for i in 0..len {
            let resolved = self.seq_get(id, i as i64)?;
            items.push(self.export_resolved(resolved)?);
        }
        Ok(Value::Seq(items))
    }

    fn export_resolved(&mut self, resolved: Resolved) -> Result<Value> {
        match resolved {
            Resolved::Scalar(s) => Ok(Value::from(s)),
            Resolved::Map(id) => self.export_map(id),
            Resolved::Seq(id) => self.export_seq(id),
        }
    }

    // === commit / rollback ===

    pub(crate) fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let dirty = std::mem::take(&mut self.dirty);
        for id in dirty {
            if self.is_detached(id)? {
                // removed from the document in this transaction; its
                // buffered writes are moot
                self.rollback_node(id)?;
            } else {
                self.commit_node(id)?;
            }
        }
        self.commit_node(ROOT)?;
        self.store.lock().flush()?;
        debug!(target: "jotdb::overlay", "commit complete");
        Ok(())
    }

    pub(crate) fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let dirty = std::mem::take(&mut self.dirty);
        for id in dirty {
            self.rollback_node(id)?;
        }
        self.rollback_node(ROOT)?;
        debug!(target: "jotdb::overlay", "rollback complete");
        Ok(())
    }

    fn rollback_node(&mut self, id: NodeId) -> Result<()> {
        match self.node_mut(id)? {
            OverlayNode::Map(node) => node.updates.clear(),
            OverlayNode::Seq(node) => node.staged = None,
        }
        Ok(())
    }

    fn commit_node(&mut self, id: NodeId) -> Result<()> {
        match self.node(id)? {
            OverlayNode::Map(_) => self.commit_map(id),
            OverlayNode::Seq(_) => self.commit_seq(id),
        }
    }

    /// Flush a mapping overlay into its base
    ///
    /// Writes first, deletes second. Scalar entries leave the buffer as
    /// they flush; committed child wrappers stay memoized (re-based onto
    /// their stored position), so handles obtained before the commit
    /// keep addressing the same nodes afterwards.
    fn commit_map(&mut self, id: NodeId) -> Result<()> {
        let pending: Vec<(String, Slot)> = self
            .map_node(id)?
            .updates
            .iter()
            .filter(|(_, slot)| !matches!(slot, Slot::Deleted))
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();
        for (key, slot) in pending {
            match slot {
                Slot::Scalar(scalar) => {
                    self.base_write_scalar(id, &key, scalar)?;
                    self.map_node_mut(id)?.updates.remove(&key);
                }
                Slot::Child(child) => {
                    self.commit_node(child)?;
                    self.base_write_child(id, &key, child)?;
                }
                Slot::Deleted => {}
            }
        }

        let deleted: Vec<String> = self
            .map_node(id)?
            .updates
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Deleted))
            .map(|(key, _)| key.clone())
            .collect();
        for key in deleted {
            self.base_delete(id, &key)?;
            self.map_node_mut(id)?.updates.remove(&key);
        }
        Ok(())
    }

    /// Flush a sequence overlay: commit children, materialize every
    /// element, then replace the base wholesale. Materializing before the
    /// replacement purge is what keeps view-backed elements readable.
    fn commit_seq(&mut self, id: NodeId) -> Result<()> {
        let Some(slots) = self.seq_node(id)?.staged.clone() else {
            return Ok(());
        };
        let mut values = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Scalar(scalar) => values.push(Value::from(scalar)),
                Slot::Child(child) => {
                    self.commit_node(child)?;
                    values.push(self.base_value(child)?);
                }
                Slot::Deleted => return Err(overlay_corrupt()),
            }
        }

        let view = match &self.seq_node(id)?.base {
            SeqBase::View(view) => Some(view.clone()),
            SeqBase::Fresh(_) => None,
        };
        match view {
            Some(view) => view.assign(&values)?,
            None => {
                let SeqBase::Fresh(items) = &mut self.seq_node_mut(id)?.base else {
                    return Err(overlay_corrupt());
                };
                *items = values;
            }
        }
        self.seq_node_mut(id)?.staged = None;
        Ok(())
    }

    fn base_write_scalar(&mut self, id: NodeId, key: &str, scalar: Scalar) -> Result<()> {
        let view = match &self.map_node(id)?.base {
            MapBase::View(view) => Some(view.clone()),
            MapBase::Fresh(_) => None,
        };
        match view {
            Some(view) => view.set(key, &Value::from(scalar)),
            None => {
                let MapBase::Fresh(entries) = &mut self.map_node_mut(id)?.base else {
                    return Err(overlay_corrupt());
                };
                entries.insert(key.to_string(), Value::from(scalar));
                Ok(())
            }
        }
    }

    /// Write a committed child's raw form under `key` in this node's base
    ///
    /// Under a view base the child is retained and re-based onto the
    /// position it was just written to; under a fresh base the slot is
    /// dropped (the whole subtree gets rewritten by an ancestor anyway).
    fn base_write_child(&mut self, id: NodeId, key: &str, child: NodeId) -> Result<()> {
        enum Repr {
            Node(FlatNode),
            Value(Value),
        }
        let repr = match self.node(child)? {
            OverlayNode::Map(node) => match &node.base {
                MapBase::View(view) => Repr::Node(FlatNode::Map(view.clone())),
                MapBase::Fresh(entries) => Repr::Value(Value::Map(entries.clone())),
            },
            OverlayNode::Seq(node) => match &node.base {
                SeqBase::View(view) => Repr::Node(FlatNode::Seq(view.clone())),
                SeqBase::Fresh(items) => Repr::Value(Value::Seq(items.clone())),
            },
        };

        let view = match &self.map_node(id)?.base {
            MapBase::View(view) => Some(view.clone()),
            MapBase::Fresh(_) => None,
        };
        match view {
            Some(view) => {
                match repr {
                    // set_node detects writing a view back to its own
                    // position and skips it
                    Repr::Node(node) => view.set_node(key, &node)?,
                    Repr::Value(value) => view.set(key, &value)?,
                }
                self.rebase_child(&view, key, child)
            }
            None => {
                let value = match repr {
                    Repr::Node(node) => node.to_value()?,
                    Repr::Value(value) => value,
                };
                let MapBase::Fresh(entries) = &mut self.map_node_mut(id)?.base else {
                    return Err(overlay_corrupt());
                };
                entries.insert(key.to_string(), value);
                self.map_node_mut(id)?.updates.remove(key);
                Ok(())
            }
        }
    }

    /// Point a committed child at the position it now occupies in the
    /// store
    fn rebase_child(&mut self, parent_view: &MapView, key: &str, child: NodeId) -> Result<()> {
        let prefix = parent_view.path().dict()?.lookup(key)?;
        let store = parent_view.store().clone();
        match self.node_mut(child)? {
            OverlayNode::Map(node) => {
                node.base = MapBase::View(MapView::new(store, prefix));
            }
            OverlayNode::Seq(node) => {
                node.base = SeqBase::View(SeqView::new(store, prefix));
            }
        }
        Ok(())
    }

    /// The raw value of a committed child, read out of its base
    fn base_value(&mut self, id: NodeId) -> Result<Value> {
        match self.node(id)? {
            OverlayNode::Map(node) => match &node.base {
                MapBase::View(view) => view.export(),
                MapBase::Fresh(entries) => Ok(Value::Map(entries.clone())),
            },
            OverlayNode::Seq(node) => match &node.base {
                SeqBase::View(view) => view.export(),
                SeqBase::Fresh(items) => Ok(Value::Seq(items.clone())),
            },
        }
    }

    /// Delete tolerates a key that never reached the base: an overlay
    /// add followed by a delete commits as nothing at all.
    fn base_delete(&mut self, id: NodeId, key: &str) -> Result<()> {
        let view = match &self.map_node(id)?.base {
            MapBase::View(view) => Some(view.clone()),
            MapBase::Fresh(_) => None,
        };
        match view {
            Some(view) => {
                if view.contains(key)? {
                    view.delete(key)?;
                }
                Ok(())
            }
            None => {
                let MapBase::Fresh(entries) = &mut self.map_node_mut(id)?.base else {
                    return Err(overlay_corrupt());
                };
                entries.remove(key);
                Ok(())
            }
        }
    }
}

/// Map a possibly-negative index into `[0, len)`
fn normalize_index(index: i64, len: usize) -> Result<usize> {
    let n = len as i64;
    if index < 0 {
        let shifted = index + n;
        if shifted >= 0 {
            return Ok(shifted as usize);
        }
    } else if index < n {
        return Ok(index as usize);
    }
    Err(Error::IndexOutOfRange { index, len })
}

/// Clamp an insertion position: negative counts from the end, anything
/// past the end appends
fn clamp_insert(pos: i64, len: usize) -> usize {
    if pos < 0 {
        (len as i64 + pos).max(0) as usize
    } else {
        (pos as usize).min(len)
    }
}
