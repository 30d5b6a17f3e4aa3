#![forbid(unsafe_code)]

//! Core data model for flowpad: nodes, edges, subgraphs, class
//! definitions, and the event-emitting [`GraphModel`] that owns them.

mod event;
mod model;

pub use event::{EventHandler, ModelEvent, SubscriptionId};
pub use model::GraphModel;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flow direction of the whole graph (or of one subgraph override).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    TB,
    BT,
    LR,
    RL,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TB => "TB",
            Self::BT => "BT",
            Self::LR => "LR",
            Self::RL => "RL",
        }
    }

    /// Parse a direction token; `TD` is an alias of `TB`.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "TB" | "TD" => Some(Self::TB),
            "BT" => Some(Self::BT),
            "LR" => Some(Self::LR),
            "RL" => Some(Self::RL),
            _ => None,
        }
    }
}

/// Node rendering category.
///
/// The first group has legacy bracket sugar in the DSL (`[x]`, `(x)`,
/// `{x}`, ...); everything else is written with the
/// `id@{ shape: ..., label: ... }` property form. Shape keywords not
/// known to this crate round-trip through [`NodeShape::Extended`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum NodeShape {
    #[default]
    Rect,
    Rounded,
    Stadium,
    Subroutine,
    Cylinder,
    Circle,
    DoubleCircle,
    Asymmetric,
    Diamond,
    Hexagon,
    LeanRight,
    LeanLeft,
    Trapezoid,
    InvTrapezoid,
    /// A shape with no bracket sugar, identified by its keyword
    /// (for example `card`, `doc`, `cloud`).
    Extended(String),
}

impl NodeShape {
    /// The DSL bracket pair for shapes that have legacy sugar.
    #[must_use]
    pub fn brackets(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Rect => Some(("[", "]")),
            Self::Rounded => Some(("(", ")")),
            Self::Stadium => Some(("([", "])")),
            Self::Subroutine => Some(("[[", "]]")),
            Self::Cylinder => Some(("[(", ")]")),
            Self::Circle => Some(("((", "))")),
            Self::DoubleCircle => Some(("(((", ")))")),
            Self::Asymmetric => Some((">", "]")),
            Self::Diamond => Some(("{", "}")),
            Self::Hexagon => Some(("{{", "}}")),
            Self::LeanRight => Some(("[/", "/]")),
            Self::LeanLeft => Some(("[\\", "\\]")),
            Self::Trapezoid => Some(("[/", "\\]")),
            Self::InvTrapezoid => Some(("[\\", "/]")),
            Self::Extended(_) => None,
        }
    }

    /// Keyword used in the `@{ shape: ... }` property form.
    #[must_use]
    pub fn keyword(&self) -> &str {
        match self {
            Self::Rect => "rect",
            Self::Rounded => "rounded",
            Self::Stadium => "stadium",
            Self::Subroutine => "subroutine",
            Self::Cylinder => "cylinder",
            Self::Circle => "circle",
            Self::DoubleCircle => "double-circle",
            Self::Asymmetric => "odd",
            Self::Diamond => "diamond",
            Self::Hexagon => "hexagon",
            Self::LeanRight => "lean-right",
            Self::LeanLeft => "lean-left",
            Self::Trapezoid => "trapezoid",
            Self::InvTrapezoid => "inv-trapezoid",
            Self::Extended(name) => name,
        }
    }

    /// Resolve a `@{ shape: ... }` keyword. Unknown keywords are kept
    /// as [`NodeShape::Extended`] so they survive a round trip.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.trim().to_ascii_lowercase().as_str() {
            "rect" | "rectangle" | "process" => Self::Rect,
            "rounded" => Self::Rounded,
            "stadium" | "pill" | "terminal" => Self::Stadium,
            "subroutine" | "subproc" => Self::Subroutine,
            "cylinder" | "cyl" | "database" | "db" => Self::Cylinder,
            "circle" | "circ" => Self::Circle,
            "double-circle" | "dbl-circ" => Self::DoubleCircle,
            "odd" => Self::Asymmetric,
            "diamond" | "diam" | "decision" | "question" => Self::Diamond,
            "hexagon" | "hex" => Self::Hexagon,
            "lean-right" | "lean-r" => Self::LeanRight,
            "lean-left" | "lean-l" => Self::LeanLeft,
            "trapezoid" | "trap-b" => Self::Trapezoid,
            "inv-trapezoid" | "trap-t" => Self::InvTrapezoid,
            other => Self::Extended(other.to_string()),
        }
    }
}

/// Line style of an edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum StrokeKind {
    #[default]
    Normal,
    Thick,
    Dotted,
    Invisible,
}

/// Marker at one end of an edge. Both ends are independently settable,
/// so a true bidirectional edge is a single edge with markers on both
/// ends, not a pair of opposing edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ArrowMarker {
    #[default]
    None,
    Arrow,
    Circle,
    Cross,
}

/// Screen position, maintained outside the DSL text by the sync layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Inline style of a node or edge, split into the well-known fields
/// plus any declarations we do not interpret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EntityStyle {
    pub fill: Option<String>,
    pub stroke: Option<String>,
    pub stroke_width: Option<String>,
    pub color: Option<String>,
    pub extra: Vec<String>,
}

impl EntityStyle {
    /// Parse a comma-separated declaration list (`fill:#f9f,stroke:#333`).
    #[must_use]
    pub fn from_decls(raw: &str) -> Self {
        let mut style = Self::default();
        for decl in raw.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let Some((key, value)) = decl.split_once(':') else {
                style.extra.push(decl.to_string());
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "fill" => style.fill = Some(value),
                "stroke" => style.stroke = Some(value),
                "stroke-width" => style.stroke_width = Some(value),
                "color" => style.color = Some(value),
                _ => style.extra.push(decl.to_string()),
            }
        }
        style
    }

    /// Re-emit the declaration list in a stable order.
    #[must_use]
    pub fn to_decls(&self) -> String {
        let mut decls = Vec::new();
        if let Some(fill) = &self.fill {
            decls.push(format!("fill:{fill}"));
        }
        if let Some(stroke) = &self.stroke {
            decls.push(format!("stroke:{stroke}"));
        }
        if let Some(width) = &self.stroke_width {
            decls.push(format!("stroke-width:{width}"));
        }
        if let Some(color) = &self.color {
            decls.push(format!("color:{color}"));
        }
        decls.extend(self.extra.iter().cloned());
        decls.join(",")
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fill.is_none()
            && self.stroke.is_none()
            && self.stroke_width.is_none()
            && self.color.is_none()
            && self.extra.is_empty()
    }
}

/// Hyperlink attached to a node by a `click` statement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NodeLink {
    pub href: String,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Node {
    pub id: String,
    pub text: String,
    pub shape: NodeShape,
    pub style: Option<EntityStyle>,
    pub classes: Vec<String>,
    pub link: Option<NodeLink>,
    /// Id of the containing subgraph, if any.
    pub subgraph: Option<String>,
    /// Screen position. Never parsed from or serialized to DSL text.
    pub position: Option<Point>,
    pub size: Option<Size>,
    /// Extra `@{ ... }` properties (icon, img, form, w, h, ...) carried
    /// verbatim so the property form round-trips.
    pub properties: BTreeMap<String, String>,
}

impl Node {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            text: id.clone(),
            id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn with_shape(mut self, shape: NodeShape) -> Self {
        self.shape = shape;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub text: Option<String>,
    pub stroke: StrokeKind,
    pub arrow_start: ArrowMarker,
    pub arrow_end: ArrowMarker,
    /// Visual segment count of the operator (`-->` is 1, `--->` is 2).
    pub length: u32,
    pub style: Option<EntityStyle>,
    pub classes: Vec<String>,
    pub animate: bool,
    pub animation: Option<String>,
    /// True when the id came from an `id@` prefix in the source text,
    /// which forces the serializer to emit the prefix again.
    pub explicit_id: bool,
}

impl Edge {
    #[must_use]
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            arrow_end: ArrowMarker::Arrow,
            length: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// A named cluster of nodes. Subgraphs nest into a forest through
/// `parent` references; the model rejects parent cycles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SubGraph {
    pub id: String,
    pub title: String,
    pub nodes: Vec<String>,
    pub parent: Option<String>,
    pub direction: Option<Direction>,
}

impl SubGraph {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            ..Self::default()
        }
    }
}

/// Lossless structural snapshot of a [`GraphModel`], used for
/// persistence and undo/redo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GraphData {
    pub direction: Direction,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub subgraphs: Vec<SubGraph>,
    pub class_defs: BTreeMap<String, Vec<String>>,
}

/// Model-integrity failures. These reject the offending operation and
/// leave the model unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("node '{0}' already exists")]
    DuplicateNode(String),
    #[error("edge '{0}' already exists")]
    DuplicateEdge(String),
    #[error("subgraph '{0}' already exists")]
    DuplicateSubGraph(String),
    #[error("edge '{edge}' references missing node '{node}'")]
    MissingEndpoint { edge: String, node: String },
    #[error("no edge with id '{0}'")]
    UnknownEdge(String),
    #[error("subgraph parent chain would cycle at '{0}'")]
    SubGraphCycle(String),
}

#[cfg(test)]
mod tests {
    use super::{Direction, EntityStyle, NodeShape};

    #[test]
    fn direction_token_treats_td_as_tb() {
        assert_eq!(Direction::from_token("TD"), Some(Direction::TB));
        assert_eq!(Direction::from_token("lr"), Some(Direction::LR));
        assert_eq!(Direction::from_token("sideways"), None);
    }

    #[test]
    fn unknown_shape_keyword_round_trips_as_extended() {
        let shape = NodeShape::from_keyword("cloud");
        assert_eq!(shape, NodeShape::Extended("cloud".to_string()));
        assert_eq!(shape.keyword(), "cloud");
        assert!(shape.brackets().is_none());
    }

    #[test]
    fn every_bracket_shape_has_distinct_delimiters() {
        let shapes = [
            NodeShape::Rect,
            NodeShape::Rounded,
            NodeShape::Stadium,
            NodeShape::Subroutine,
            NodeShape::Cylinder,
            NodeShape::Circle,
            NodeShape::DoubleCircle,
            NodeShape::Asymmetric,
            NodeShape::Diamond,
            NodeShape::Hexagon,
            NodeShape::LeanRight,
            NodeShape::LeanLeft,
            NodeShape::Trapezoid,
            NodeShape::InvTrapezoid,
        ];
        let mut seen = Vec::new();
        for shape in shapes {
            let pair = shape.brackets().expect("legacy shape has brackets");
            assert!(!seen.contains(&pair), "duplicate delimiters {pair:?}");
            seen.push(pair);
        }
    }

    #[test]
    fn style_decls_round_trip_known_and_unknown_fields() {
        let style = EntityStyle::from_decls("fill:#f9f, stroke:#333, stroke-width:4px, rx:5");
        assert_eq!(style.fill.as_deref(), Some("#f9f"));
        assert_eq!(style.stroke.as_deref(), Some("#333"));
        assert_eq!(style.stroke_width.as_deref(), Some("4px"));
        assert_eq!(style.extra, vec!["rx:5".to_string()]);
        assert_eq!(style.to_decls(), "fill:#f9f,stroke:#333,stroke-width:4px,rx:5");
    }
}
