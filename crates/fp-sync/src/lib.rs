#![forbid(unsafe_code)]

//! Bidirectional coordinator between DSL text and the graph model.
//!
//! The coordinator owns the authoritative [`GraphModel`] plus two
//! things the model deliberately does not carry: the current text
//! rendition of the graph, and a position side table keyed by node id.
//! Positions have no DSL syntax, so the side table is what lets a
//! node keep its place on screen while the text is re-parsed around
//! it.
//!
//! - **Text -> model**: [`SyncCoordinator::update_from_code`] replaces
//!   the model with a fresh parse, re-attaching positions of surviving
//!   nodes. Observers re-fetch the model after this call.
//! - **Model -> text**: structural edits arm a trailing-edge debounce;
//!   the host drives it by calling [`SyncCoordinator::poll`] with the
//!   current time, and the text is regenerated once the quiet period
//!   has elapsed. Position updates never trigger re-serialization.
//!
//! Every structural edit also pushes a full snapshot (model plus
//! positions) onto a bounded undo stack.

mod debounce;

use std::collections::VecDeque;
use std::time::Instant;

use fp_core::{Edge, GraphData, GraphModel, ModelError, Node, Point};
use rustc_hash::FxHashMap;
use tracing::debug;

pub use debounce::Debouncer;

/// Undo history depth. The oldest snapshot falls off when exceeded.
const UNDO_LIMIT: usize = 64;

/// One undo/redo step: the full structural state plus positions.
#[derive(Debug, Clone)]
struct Snapshot {
    data: GraphData,
    positions: FxHashMap<String, Point>,
}

pub struct SyncCoordinator {
    model: GraphModel,
    positions: FxHashMap<String, Point>,
    code: String,
    undo_stack: VecDeque<Snapshot>,
    redo_stack: Vec<Snapshot>,
    debouncer: Debouncer,
}

impl SyncCoordinator {
    /// Empty document.
    pub fn new(debouncer: Debouncer) -> Self {
        let model = GraphModel::new();
        let code = fp_emit::serialize(&model);
        Self {
            model,
            positions: FxHashMap::default(),
            code,
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            debouncer,
        }
    }

    /// Parse `code` into the initial model. The stored text is kept
    /// verbatim, not canonicalized, until the first structural edit.
    pub fn from_code(code: &str, debouncer: Debouncer) -> Self {
        let model = fp_parser::parse(code);
        Self {
            model,
            positions: FxHashMap::default(),
            code: code.to_string(),
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            debouncer,
        }
    }

    pub fn model(&self) -> &GraphModel {
        &self.model
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn position(&self, id: &str) -> Option<Point> {
        self.positions.get(id).copied()
    }

    /// Snapshot of the position side table, for persistence.
    pub fn export_positions(&self) -> FxHashMap<String, Point> {
        self.positions.clone()
    }

    /// Restore persisted positions. Entries for unknown node ids are
    /// dropped; the text is untouched and nothing is scheduled.
    pub fn import_positions(&mut self, positions: FxHashMap<String, Point>) {
        self.positions = positions;
        self.positions
            .retain(|id, _| self.model.node(id).is_some());
        let points: Vec<(String, Point)> = self
            .positions
            .iter()
            .map(|(id, point)| (id.clone(), *point))
            .collect();
        for (id, point) in points {
            self.model.update_node(&id, |node| node.position = Some(point));
        }
    }

    /// Drop the undo/redo history and the position side table. The
    /// model and text are untouched.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.positions.clear();
        self.debouncer.cancel();
    }

    // -- Text -> model -------------------------------------------------------

    /// Replace the whole document text. Positions of nodes whose id
    /// survives the re-parse are carried over; the rest are dropped.
    /// Subscriptions on the previous model do not carry over.
    pub fn update_from_code(&mut self, code: &str) {
        self.push_undo();
        let mut model = fp_parser::parse(code);
        self.positions
            .retain(|id, _| model.node(id).is_some());
        for (id, point) in &self.positions {
            model.update_node(id, |node| node.position = Some(*point));
        }
        self.model = model;
        self.code = code.to_string();
        self.debouncer.cancel();
        debug!(
            nodes = self.model.nodes().len(),
            edges = self.model.edges().len(),
            "document replaced from text"
        );
    }

    // -- Model -> text -------------------------------------------------------

    /// Run a structural edit against the model. A snapshot is taken
    /// first and the text re-serialization is scheduled.
    pub fn edit<R>(&mut self, now: Instant, apply: impl FnOnce(&mut GraphModel) -> R) -> R {
        self.push_undo();
        let result = apply(&mut self.model);
        self.sync_positions_from_model();
        self.debouncer.schedule(now);
        result
    }

    pub fn add_node(&mut self, now: Instant, node: Node) -> Result<(), ModelError> {
        self.checked_edit(now, |model| model.add_node(node))
    }

    pub fn update_node(
        &mut self,
        now: Instant,
        id: &str,
        mutate: impl FnOnce(&mut Node),
    ) -> Option<Node> {
        self.edit(now, |model| model.update_node(id, mutate))
    }

    pub fn remove_node(&mut self, now: Instant, id: &str) -> Option<Node> {
        self.edit(now, |model| model.remove_node(id))
    }

    pub fn add_edge(&mut self, now: Instant, edge: Edge) -> Result<(), ModelError> {
        self.checked_edit(now, |model| model.add_edge(edge))
    }

    pub fn update_edge(
        &mut self,
        now: Instant,
        id: &str,
        mutate: impl FnOnce(&mut Edge),
    ) -> Option<Edge> {
        self.edit(now, |model| model.update_edge(id, mutate))
    }

    pub fn remove_edge(&mut self, now: Instant, id: &str) -> Option<Edge> {
        self.edit(now, |model| model.remove_edge(id))
    }

    /// Like [`SyncCoordinator::edit`], but a rejected mutation leaves
    /// the undo and redo stacks untouched since the model did not
    /// change.
    fn checked_edit(
        &mut self,
        now: Instant,
        apply: impl FnOnce(&mut GraphModel) -> Result<(), ModelError>,
    ) -> Result<(), ModelError> {
        let snapshot = self.snapshot();
        apply(&mut self.model)?;
        self.commit_undo(snapshot);
        self.sync_positions_from_model();
        self.debouncer.schedule(now);
        Ok(())
    }

    /// Move a node. Only the side table and the node's position field
    /// change; the text is untouched and nothing is scheduled.
    pub fn update_node_position(&mut self, id: &str, point: Point) -> bool {
        if self.model.node(id).is_none() {
            debug!(id, "position update for unknown node, ignored");
            return false;
        }
        self.positions.insert(id.to_string(), point);
        self.model.update_node(id, |node| node.position = Some(point));
        true
    }

    /// Split an edge in two by routing it through a new node. Both
    /// halves keep the original stroke and end marker; the label and
    /// start marker stay on the first. One undo step.
    pub fn insert_node_on_edge(
        &mut self,
        now: Instant,
        edge_id: &str,
        node: Node,
    ) -> Result<(), ModelError> {
        let Some(edge) = self.model.edge(edge_id).cloned() else {
            return Err(ModelError::UnknownEdge(edge_id.to_string()));
        };
        let snapshot = self.snapshot();
        let node_id = node.id.clone();
        let result = (|| {
            self.model.begin_batch();
            let outcome = (|| {
                self.model.add_node(node)?;
                self.model.remove_edge(&edge.id);

                let mut first = Edge::new(
                    format!("{}-a", edge.id),
                    edge.source.clone(),
                    node_id.clone(),
                );
                first.stroke = edge.stroke;
                first.arrow_start = edge.arrow_start;
                first.arrow_end = edge.arrow_end;
                first.text = edge.text.clone();
                first.style = edge.style.clone();
                first.classes = edge.classes.clone();
                self.model.add_edge(first)?;

                let mut second = Edge::new(
                    format!("{}-b", edge.id),
                    node_id.clone(),
                    edge.target.clone(),
                );
                second.stroke = edge.stroke;
                second.arrow_end = edge.arrow_end;
                second.style = edge.style.clone();
                second.classes = edge.classes.clone();
                self.model.add_edge(second)?;
                Ok(())
            })();
            self.model.end_batch();
            outcome
        })();
        match result {
            Ok(()) => {
                self.commit_undo(snapshot);
                self.debouncer.schedule(now);
                Ok(())
            }
            Err(err) => {
                // Roll the half-applied split back. The stacks and the
                // text are untouched because nothing happened.
                self.model = GraphModel::from_data(snapshot.data);
                self.positions = snapshot.positions;
                Err(err)
            }
        }
    }

    /// Convenience form of [`SyncCoordinator::insert_node_on_edge`]
    /// keyed by endpoints. With parallel edges the first match wins.
    pub fn insert_node_between(
        &mut self,
        now: Instant,
        source: &str,
        target: &str,
        node: Node,
    ) -> Result<(), ModelError> {
        let Some(edge_id) = self
            .model
            .edge_between(source, target)
            .map(|edge| edge.id.clone())
        else {
            return Err(ModelError::UnknownEdge(format!("{source} -> {target}")));
        };
        self.insert_node_on_edge(now, &edge_id, node)
    }

    /// Drive the debounce clock. Returns true when the text was just
    /// regenerated.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.debouncer.poll(now) {
            return false;
        }
        self.code = fp_emit::serialize(&self.model);
        debug!(bytes = self.code.len(), "text regenerated");
        true
    }

    /// Regenerate the text immediately, cancelling any pending timer.
    pub fn flush(&mut self) {
        self.debouncer.cancel();
        self.code = fp_emit::serialize(&self.model);
    }

    // -- Undo / redo ---------------------------------------------------------

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Restore the previous snapshot. The text is regenerated at once
    /// rather than debounced.
    pub fn undo(&mut self) -> bool {
        let Some(snapshot) = self.undo_stack.pop_back() else {
            return false;
        };
        self.redo_stack.push(self.snapshot());
        self.restore(snapshot);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(snapshot) = self.redo_stack.pop() else {
            return false;
        };
        self.undo_stack.push_back(self.snapshot());
        self.restore(snapshot);
        true
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            data: self.model.to_data(),
            positions: self.positions.clone(),
        }
    }

    fn push_undo(&mut self) {
        let snapshot = self.snapshot();
        self.commit_undo(snapshot);
    }

    fn commit_undo(&mut self, snapshot: Snapshot) {
        self.undo_stack.push_back(snapshot);
        if self.undo_stack.len() > UNDO_LIMIT {
            self.undo_stack.pop_front();
        }
        self.redo_stack.clear();
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.model = GraphModel::from_data(snapshot.data);
        self.positions = snapshot.positions;
        self.debouncer.cancel();
        self.code = fp_emit::serialize(&self.model);
    }

    /// Pull positions that an edit closure may have written directly
    /// on nodes back into the side table.
    fn sync_positions_from_model(&mut self) {
        for node in self.model.nodes() {
            if let Some(point) = node.position {
                self.positions.insert(node.id.clone(), point);
            }
        }
        self.positions
            .retain(|id, _| self.model.node(id).is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn coordinator(input: &str) -> SyncCoordinator {
        SyncCoordinator::from_code(input, Debouncer::new(Duration::from_millis(100)))
    }

    #[test]
    fn positions_survive_text_replacement() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        sync.update_node_position("A", Point { x: 40.0, y: 8.0 });
        sync.update_from_code("flowchart LR\nA --> B\nB --> C");
        assert_eq!(sync.position("A"), Some(Point { x: 40.0, y: 8.0 }));
        assert_eq!(
            sync.model().node("A").unwrap().position,
            Some(Point { x: 40.0, y: 8.0 })
        );
        assert!(sync.model().node("C").is_some());
    }

    #[test]
    fn dropped_nodes_lose_their_positions() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        sync.update_node_position("B", Point { x: 1.0, y: 2.0 });
        sync.update_from_code("flowchart LR\nA --> C");
        assert_eq!(sync.position("B"), None);
    }

    #[test]
    fn position_updates_do_not_schedule_serialization() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        let start = Instant::now();
        sync.update_node_position("A", Point { x: 5.0, y: 5.0 });
        assert!(!sync.poll(start + Duration::from_secs(10)));
    }

    #[test]
    fn edits_debounce_to_the_trailing_edge() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        let start = Instant::now();
        sync.edit(start, |model| {
            model.add_node(Node::new("C")).unwrap();
        });
        // Not yet due.
        assert!(!sync.poll(start + Duration::from_millis(50)));
        // A second edit inside the quiet period pushes the deadline out.
        sync.edit(start + Duration::from_millis(60), |model| {
            model.add_node(Node::new("D")).unwrap();
        });
        assert!(!sync.poll(start + Duration::from_millis(120)));
        assert!(sync.poll(start + Duration::from_millis(170)));
        assert!(sync.code().contains('C'));
        assert!(sync.code().contains('D'));
        // Fires once per schedule.
        assert!(!sync.poll(start + Duration::from_millis(200)));
    }

    #[test]
    fn undo_and_redo_restore_structure_and_positions() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        sync.update_node_position("A", Point { x: 3.0, y: 4.0 });
        let now = Instant::now();
        sync.edit(now, |model| {
            model.add_node(Node::new("C")).unwrap();
        });
        assert!(sync.model().node("C").is_some());

        assert!(sync.undo());
        assert!(sync.model().node("C").is_none());
        assert_eq!(sync.position("A"), Some(Point { x: 3.0, y: 4.0 }));
        // Undo re-serializes immediately.
        assert!(!sync.code().contains('C'));

        assert!(sync.redo());
        assert!(sync.model().node("C").is_some());
        assert!(sync.code().contains('C'));
    }

    #[test]
    fn new_edit_clears_the_redo_stack() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        let now = Instant::now();
        sync.edit(now, |model| {
            model.add_node(Node::new("C")).unwrap();
        });
        sync.undo();
        sync.edit(now, |model| {
            model.add_node(Node::new("D")).unwrap();
        });
        assert!(!sync.can_redo());
        assert!(!sync.redo());
    }

    #[test]
    fn undo_depth_is_bounded() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        let now = Instant::now();
        for index in 0..(UNDO_LIMIT + 10) {
            sync.edit(now, |model| {
                model.add_node(Node::new(format!("n{index}"))).unwrap();
            });
        }
        let mut undone = 0;
        while sync.undo() {
            undone += 1;
        }
        assert_eq!(undone, UNDO_LIMIT);
    }

    #[test]
    fn insert_node_on_edge_splits_the_edge() {
        let mut sync = coordinator("flowchart LR\nA -->|go| B");
        let edge_id = sync.model().edges()[0].id.clone();
        let now = Instant::now();
        sync.insert_node_on_edge(now, &edge_id, Node::new("M")).unwrap();

        assert!(sync.model().edge(&edge_id).is_none());
        let first = sync.model().edge_between("A", "M").unwrap();
        assert_eq!(first.text.as_deref(), Some("go"));
        assert!(sync.model().edge_between("M", "B").is_some());
        assert!(sync.model().edge_between("A", "B").is_none());

        // One undo step restores the original edge.
        assert!(sync.undo());
        assert!(sync.model().node("M").is_none());
        assert!(sync.model().edge(&edge_id).is_some());
    }

    #[test]
    fn insert_on_missing_edge_is_an_error() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        let err = sync.insert_node_on_edge(Instant::now(), "nope", Node::new("M"));
        assert!(err.is_err());
        assert!(sync.model().node("M").is_none());
    }

    #[test]
    fn named_mutators_take_the_undo_path() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        let now = Instant::now();
        sync.add_node(now, Node::new("C")).unwrap();
        assert!(sync.can_undo());
        let edge_count = sync.model().edges().len();
        sync.add_edge(now, Edge::new("e-ac", "A", "C")).unwrap();
        assert_eq!(sync.model().edges().len(), edge_count + 1);
        sync.remove_node(now, "C");
        assert_eq!(sync.model().edges().len(), edge_count);
    }

    #[test]
    fn rejected_mutation_leaves_no_undo_entry() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        let now = Instant::now();
        assert!(sync.add_node(now, Node::new("A")).is_err());
        assert!(!sync.can_undo());
        assert!(sync.add_edge(now, Edge::new("e", "A", "missing")).is_err());
        assert!(!sync.can_undo());
    }

    #[test]
    fn rejected_mutation_keeps_redo_history() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        let now = Instant::now();
        sync.edit(now, |model| {
            model.add_node(Node::new("C")).unwrap();
        });
        sync.undo();
        assert!(sync.can_redo());

        assert!(sync.add_node(now, Node::new("A")).is_err());
        assert!(sync.can_redo());
        assert!(sync.redo());
        assert!(sync.model().node("C").is_some());
    }

    #[test]
    fn insert_node_between_resolves_the_edge() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        let now = Instant::now();
        sync.insert_node_between(now, "A", "B", Node::new("M")).unwrap();
        assert!(sync.model().edge_between("A", "M").is_some());
        assert!(sync.model().edge_between("M", "B").is_some());
        assert!(sync.model().edge_between("A", "B").is_none());

        let err = sync.insert_node_between(now, "A", "B", Node::new("N"));
        assert!(err.is_err());
    }

    #[test]
    fn positions_export_and_import() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        sync.update_node_position("A", Point { x: 7.0, y: 9.0 });
        let exported = sync.export_positions();

        let mut other = coordinator("flowchart LR\nA --> C");
        other.import_positions(exported);
        assert_eq!(other.position("A"), Some(Point { x: 7.0, y: 9.0 }));
        assert_eq!(
            other.model().node("A").unwrap().position,
            Some(Point { x: 7.0, y: 9.0 })
        );
        // "B" does not exist in the second document.
        assert_eq!(other.position("B"), None);
    }

    #[test]
    fn clear_drops_history_and_positions() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        let now = Instant::now();
        sync.update_node_position("A", Point { x: 1.0, y: 1.0 });
        sync.edit(now, |model| {
            model.add_node(Node::new("C")).unwrap();
        });
        sync.clear();
        assert!(!sync.can_undo());
        assert_eq!(sync.position("A"), None);
        assert!(sync.model().node("C").is_some());
        assert!(!sync.poll(now + Duration::from_secs(1)));
    }

    #[test]
    fn flush_serializes_immediately() {
        let mut sync = coordinator("flowchart LR\nA --> B");
        let now = Instant::now();
        sync.edit(now, |model| {
            model.add_node(Node::new("Z")).unwrap();
        });
        sync.flush();
        assert!(sync.code().contains('Z'));
        assert!(!sync.poll(now + Duration::from_secs(1)));
    }
}
