//! The mutable, event-emitting source of truth for one diagram.
//!
//! Every mutation goes through this API; collaborators never reach
//! into entities directly. That exclusivity is what lets the model
//! enforce referential integrity and emit correct change events.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::event::{EventHandler, ModelEvent, SubscriptionId};
use crate::{Direction, Edge, GraphData, ModelError, Node, SubGraph};

#[derive(Default)]
pub struct GraphModel {
    direction: Direction,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    subgraphs: Vec<SubGraph>,
    class_defs: BTreeMap<String, Vec<String>>,
    subscribers: Vec<(SubscriptionId, EventHandler)>,
    next_subscription: u64,
    batch_depth: usize,
    buffered: Vec<ModelEvent>,
}

impl fmt::Debug for GraphModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphModel")
            .field("direction", &self.direction)
            .field("nodes", &self.nodes)
            .field("edges", &self.edges)
            .field("subgraphs", &self.subgraphs)
            .field("class_defs", &self.class_defs)
            .field("subscribers", &self.subscribers.len())
            .field("batch_depth", &self.batch_depth)
            .finish()
    }
}

impl GraphModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Accessors ─────────────────────────────────────────────────────

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[must_use]
    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|edge| edge.id == id)
    }

    /// First edge connecting `source` to `target`, in insertion order.
    #[must_use]
    pub fn edge_between(&self, source: &str, target: &str) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|edge| edge.source == source && edge.target == target)
    }

    #[must_use]
    pub fn subgraphs(&self) -> &[SubGraph] {
        &self.subgraphs
    }

    #[must_use]
    pub fn subgraph(&self, id: &str) -> Option<&SubGraph> {
        self.subgraphs.iter().find(|sg| sg.id == id)
    }

    #[must_use]
    pub fn class_defs(&self) -> &BTreeMap<String, Vec<String>> {
        &self.class_defs
    }

    // ── Subscriptions ─────────────────────────────────────────────────

    /// Register a change handler. Delivery is synchronous and in
    /// subscription order.
    pub fn subscribe(&mut self, handler: impl FnMut(&ModelEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Returns false when the id is unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
        self.subscribers.len() != before
    }

    // ── Batching ──────────────────────────────────────────────────────

    /// Open a batch scope. While any scope is open, individual events
    /// are buffered; closing the outermost scope flushes them as one
    /// [`ModelEvent::Batch`].
    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    pub fn end_batch(&mut self) {
        if self.batch_depth == 0 {
            return;
        }
        self.batch_depth -= 1;
        if self.batch_depth == 0 && !self.buffered.is_empty() {
            let events = std::mem::take(&mut self.buffered);
            self.deliver(&ModelEvent::Batch { events });
        }
    }

    fn emit(&mut self, event: ModelEvent) {
        if self.batch_depth > 0 {
            self.buffered.push(event);
        } else {
            self.deliver(&event);
        }
    }

    fn deliver(&mut self, event: &ModelEvent) {
        for (_, handler) in &mut self.subscribers {
            handler(event);
        }
    }

    // ── Direction ─────────────────────────────────────────────────────

    pub fn set_direction(&mut self, direction: Direction) {
        if self.direction == direction {
            return;
        }
        let previous = self.direction;
        self.direction = direction;
        self.emit(ModelEvent::DirectionChanged {
            previous,
            direction,
        });
    }

    // ── Nodes ─────────────────────────────────────────────────────────

    /// Insert a node. Fails if the id is already taken.
    pub fn add_node(&mut self, node: Node) -> Result<(), ModelError> {
        if self.node(&node.id).is_some() {
            return Err(ModelError::DuplicateNode(node.id));
        }
        if let Some(subgraph_id) = node.subgraph.clone() {
            if let Some(subgraph) = self.subgraphs.iter_mut().find(|sg| sg.id == subgraph_id) {
                if !subgraph.nodes.contains(&node.id) {
                    subgraph.nodes.push(node.id.clone());
                }
            }
        }
        self.nodes.push(node.clone());
        self.emit(ModelEvent::NodeAdded { node });
        Ok(())
    }

    /// Merge changes into an existing node. Returns the updated node,
    /// or None when the id is absent (a no-op, not an error). The id
    /// itself is immutable and restored if the closure alters it. A
    /// change to the `subgraph` field updates the member lists on both
    /// sides; pointing it at an unknown subgraph is reverted.
    pub fn update_node(&mut self, id: &str, mutate: impl FnOnce(&mut Node)) -> Option<Node> {
        let index = self.nodes.iter().position(|node| node.id == id)?;
        let previous = self.nodes[index].clone();
        mutate(&mut self.nodes[index]);
        self.nodes[index].id = previous.id.clone();
        if self.nodes[index].subgraph != previous.subgraph {
            let target = self.nodes[index].subgraph.clone();
            if let Some(sg_id) = &target
                && !self.subgraphs.iter().any(|sg| &sg.id == sg_id)
            {
                self.nodes[index].subgraph = previous.subgraph.clone();
            } else {
                if let Some(old) = &previous.subgraph
                    && let Some(sg) = self.subgraphs.iter_mut().find(|sg| &sg.id == old)
                {
                    sg.nodes.retain(|member| member != id);
                }
                if let Some(new_id) = &target
                    && let Some(sg) = self.subgraphs.iter_mut().find(|sg| &sg.id == new_id)
                    && !sg.nodes.contains(&previous.id)
                {
                    sg.nodes.push(previous.id.clone());
                }
            }
        }
        let node = self.nodes[index].clone();
        if node == previous {
            return Some(node);
        }
        self.emit(ModelEvent::NodeUpdated {
            previous,
            node: node.clone(),
        });
        Some(node)
    }

    /// Remove a node and, atomically, every edge touching it plus its
    /// subgraph membership. Observed as a single batch event listing
    /// the underlying node-remove and edge-remove events. No-op when
    /// the id is absent.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let index = self.nodes.iter().position(|node| node.id == id)?;

        self.begin_batch();

        let mut removed_edges = Vec::new();
        self.edges.retain(|edge| {
            if edge.source == id || edge.target == id {
                removed_edges.push(edge.clone());
                false
            } else {
                true
            }
        });
        for edge in removed_edges {
            self.emit(ModelEvent::EdgeRemoved { edge });
        }

        for subgraph in &mut self.subgraphs {
            subgraph.nodes.retain(|member| member != id);
        }

        let node = self.nodes.remove(index);
        debug!(node = %node.id, "removed node with cascading edge cleanup");
        self.emit(ModelEvent::NodeRemoved { node: node.clone() });

        self.end_batch();
        Some(node)
    }

    // ── Edges ─────────────────────────────────────────────────────────

    /// Insert an edge. Both endpoints must already exist and the id
    /// must be free.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), ModelError> {
        for endpoint in [&edge.source, &edge.target] {
            if self.node(endpoint).is_none() {
                return Err(ModelError::MissingEndpoint {
                    edge: edge.id,
                    node: endpoint.clone(),
                });
            }
        }
        if self.edge(&edge.id).is_some() {
            return Err(ModelError::DuplicateEdge(edge.id));
        }
        self.edges.push(edge.clone());
        self.emit(ModelEvent::EdgeAdded { edge });
        Ok(())
    }

    /// Merge changes into an existing edge. Id, source, and target are
    /// fixed at creation time and restored if the closure alters them.
    pub fn update_edge(&mut self, id: &str, mutate: impl FnOnce(&mut Edge)) -> Option<Edge> {
        let index = self.edges.iter().position(|edge| edge.id == id)?;
        let previous = self.edges[index].clone();
        mutate(&mut self.edges[index]);
        self.edges[index].id = previous.id.clone();
        self.edges[index].source = previous.source.clone();
        self.edges[index].target = previous.target.clone();
        let edge = self.edges[index].clone();
        if edge == previous {
            return Some(edge);
        }
        self.emit(ModelEvent::EdgeUpdated {
            previous,
            edge: edge.clone(),
        });
        Some(edge)
    }

    pub fn remove_edge(&mut self, id: &str) -> Option<Edge> {
        let index = self.edges.iter().position(|edge| edge.id == id)?;
        let edge = self.edges.remove(index);
        self.emit(ModelEvent::EdgeRemoved { edge: edge.clone() });
        Some(edge)
    }

    // ── Subgraphs ─────────────────────────────────────────────────────

    /// Insert a subgraph. Fails on duplicate id or when its parent
    /// chain would cycle. Listed member nodes that exist get their
    /// `subgraph` field pointed at it.
    pub fn add_sub_graph(&mut self, subgraph: SubGraph) -> Result<(), ModelError> {
        if self.subgraph(&subgraph.id).is_some() {
            return Err(ModelError::DuplicateSubGraph(subgraph.id));
        }
        if self.would_cycle(&subgraph.id, subgraph.parent.as_deref()) {
            return Err(ModelError::SubGraphCycle(subgraph.id));
        }
        for member in &subgraph.nodes {
            if let Some(node) = self.nodes.iter_mut().find(|node| &node.id == member) {
                node.subgraph = Some(subgraph.id.clone());
            }
        }
        self.subgraphs.push(subgraph.clone());
        self.emit(ModelEvent::SubGraphAdded { subgraph });
        Ok(())
    }

    /// Merge changes into an existing subgraph. The id is immutable;
    /// a parent change that would cycle is rejected. Edits to the
    /// member list update the `subgraph` field of the affected nodes.
    pub fn update_sub_graph(
        &mut self,
        id: &str,
        mutate: impl FnOnce(&mut SubGraph),
    ) -> Result<Option<SubGraph>, ModelError> {
        let Some(index) = self.subgraphs.iter().position(|sg| sg.id == id) else {
            return Ok(None);
        };
        let previous = self.subgraphs[index].clone();
        mutate(&mut self.subgraphs[index]);
        self.subgraphs[index].id = previous.id.clone();
        if self.subgraphs[index].parent != previous.parent {
            let parent = self.subgraphs[index].parent.clone();
            if self.would_cycle(id, parent.as_deref()) {
                self.subgraphs[index] = previous;
                return Err(ModelError::SubGraphCycle(id.to_string()));
            }
        }
        if self.subgraphs[index].nodes != previous.nodes {
            let members = self.subgraphs[index].nodes.clone();
            for removed in previous.nodes.iter().filter(|m| !members.contains(m)) {
                if let Some(node) = self.nodes.iter_mut().find(|node| &node.id == removed)
                    && node.subgraph.as_deref() == Some(id)
                {
                    node.subgraph = None;
                }
            }
            for added in members.iter().filter(|m| !previous.nodes.contains(m)) {
                if let Some(node) = self.nodes.iter_mut().find(|node| &node.id == added) {
                    node.subgraph = Some(id.to_string());
                }
                for (other_index, other) in self.subgraphs.iter_mut().enumerate() {
                    if other_index != index {
                        other.nodes.retain(|member| member != added);
                    }
                }
            }
        }
        let subgraph = self.subgraphs[index].clone();
        if subgraph == previous {
            return Ok(Some(subgraph));
        }
        self.emit(ModelEvent::SubGraphUpdated {
            previous,
            subgraph: subgraph.clone(),
        });
        Ok(Some(subgraph))
    }

    /// Remove a subgraph, detaching (not deleting) its member nodes
    /// and reparenting child subgraphs to the removed one's parent.
    pub fn remove_sub_graph(&mut self, id: &str) -> Option<SubGraph> {
        let index = self.subgraphs.iter().position(|sg| sg.id == id)?;
        let subgraph = self.subgraphs.remove(index);

        for node in &mut self.nodes {
            if node.subgraph.as_deref() == Some(id) {
                node.subgraph = subgraph.parent.clone();
            }
        }
        for child in &mut self.subgraphs {
            if child.parent.as_deref() == Some(id) {
                child.parent = subgraph.parent.clone();
            }
        }

        self.emit(ModelEvent::SubGraphRemoved {
            subgraph: subgraph.clone(),
        });
        Some(subgraph)
    }

    /// True when assigning `parent` to `id` would make the parent
    /// chain loop back onto `id`.
    fn would_cycle<'a>(&'a self, id: &str, mut parent: Option<&'a str>) -> bool {
        let mut hops = 0usize;
        while let Some(current) = parent {
            if current == id {
                return true;
            }
            hops += 1;
            if hops > self.subgraphs.len() {
                return true;
            }
            parent = self
                .subgraph(current)
                .and_then(|sg| sg.parent.as_deref());
        }
        false
    }

    // ── Class definitions ─────────────────────────────────────────────

    pub fn define_class(&mut self, name: impl Into<String>, styles: Vec<String>) {
        let name = name.into();
        self.class_defs.insert(name.clone(), styles.clone());
        self.emit(ModelEvent::ClassDefined { name, styles });
    }

    // ── Snapshots ─────────────────────────────────────────────────────

    #[must_use]
    pub fn to_data(&self) -> GraphData {
        GraphData {
            direction: self.direction,
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            subgraphs: self.subgraphs.clone(),
            class_defs: self.class_defs.clone(),
        }
    }

    /// Rebuild a model from a snapshot. The snapshot is trusted to be
    /// internally consistent (it only comes from [`Self::to_data`] or
    /// the parser's commit step); no events are emitted.
    #[must_use]
    pub fn from_data(data: GraphData) -> Self {
        Self {
            direction: data.direction,
            nodes: data.nodes,
            edges: data.edges,
            subgraphs: data.subgraphs,
            class_defs: data.class_defs,
            ..Self::default()
        }
    }
}
