#![forbid(unsafe_code)]

//! Serializer from the graph model back to DSL text.
//!
//! The output is canonical rather than byte-faithful: node labels are
//! written once in declaration lines, edge labels always use the
//! `|label|` form, and directive blocks (classDef, style, linkStyle,
//! click) come after the structure. Parsing the output yields a model
//! semantically equal to the input; positions and sizes are never
//! written because the DSL has no syntax for them.

use std::fmt::Write;

use fp_core::{ArrowMarker, Edge, GraphData, GraphModel, Node, NodeShape, StrokeKind, SubGraph};

/// Serialize a live model.
pub fn serialize(model: &GraphModel) -> String {
    serialize_data(&model.to_data())
}

/// Serialize a structural snapshot.
pub fn serialize_data(data: &GraphData) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "flowchart {}", data.direction.as_str());

    for node in &data.nodes {
        if node.subgraph.is_none() && needs_declaration(node, data) {
            let _ = writeln!(out, "    {}", node_token(node));
        }
    }

    for sub in &data.subgraphs {
        if sub.parent.is_none() {
            write_subgraph(&mut out, data, sub, 1);
        }
    }

    for edge in &data.edges {
        let _ = writeln!(
            out,
            "    {} {} {}",
            edge.source,
            edge_operator(edge),
            edge.target
        );
    }
    for edge in &data.edges {
        if let Some(props) = edge_prop_statement(edge) {
            let _ = writeln!(out, "    {props}");
        }
    }

    for (name, styles) in &data.class_defs {
        let _ = writeln!(out, "    classDef {name} {}", styles.join(","));
    }
    for node in &data.nodes {
        if let Some(style) = &node.style
            && !style.is_empty()
        {
            let _ = writeln!(out, "    style {} {}", node.id, style.to_decls());
        }
    }
    for (index, edge) in data.edges.iter().enumerate() {
        if let Some(style) = &edge.style
            && !style.is_empty()
        {
            let _ = writeln!(out, "    linkStyle {index} {}", style.to_decls());
        }
    }
    for node in &data.nodes {
        if let Some(link) = &node.link {
            match &link.target {
                Some(target) => {
                    let _ = writeln!(out, "    click {} \"{}\" {target}", node.id, link.href);
                }
                None => {
                    let _ = writeln!(out, "    click {} \"{}\"", node.id, link.href);
                }
            }
        }
    }

    out
}

/// A bare connected node carries no information beyond its id, so its
/// declaration line is omitted and the edge lines introduce it.
fn needs_declaration(node: &Node, data: &GraphData) -> bool {
    node.text != node.id
        || node.shape != NodeShape::Rect
        || !node.properties.is_empty()
        || !node.classes.is_empty()
        || !data
            .edges
            .iter()
            .any(|edge| edge.source == node.id || edge.target == node.id)
}

fn write_subgraph(out: &mut String, data: &GraphData, sub: &SubGraph, depth: usize) {
    let indent = "    ".repeat(depth);
    if sub.title != sub.id {
        let _ = writeln!(out, "{indent}subgraph {} [{}]", sub.id, escape_label(&sub.title));
    } else {
        let _ = writeln!(out, "{indent}subgraph {}", sub.id);
    }
    if let Some(direction) = sub.direction {
        let _ = writeln!(out, "{indent}    direction {}", direction.as_str());
    }
    for member in &sub.nodes {
        if let Some(node) = data.nodes.iter().find(|node| node.id == *member) {
            let _ = writeln!(out, "{indent}    {}", node_token(node));
        }
    }
    for child in &data.subgraphs {
        if child.parent.as_deref() == Some(sub.id.as_str()) {
            write_subgraph(out, data, child, depth + 1);
        }
    }
    let _ = writeln!(out, "{indent}end");
}

/// The declaration token for one node, including class suffixes.
fn node_token(node: &Node) -> String {
    let mut token = node_core_token(node);
    for class in &node.classes {
        let _ = write!(token, ":::{class}");
    }
    token
}

fn node_core_token(node: &Node) -> String {
    if node.properties.is_empty() {
        if node.text == node.id && node.shape == NodeShape::Rect {
            return node.id.clone();
        }
        if let Some((open, close)) = node.shape.brackets() {
            return format!("{}{open}{}{close}", node.id, escape_label(&node.text));
        }
    }

    // Extended shapes and extra properties only exist in the
    // `@{ ... }` form.
    let mut entries = Vec::new();
    if node.shape != NodeShape::Rect || node.properties.contains_key("shape") {
        entries.push(format!("shape: {}", node.shape.keyword()));
    }
    if node.text != node.id {
        entries.push(format!("label: \"{}\"", escape_quoted(&node.text)));
    }
    for (key, value) in &node.properties {
        if key == "shape" || key == "label" {
            continue;
        }
        if value.contains([',', '}', '{']) {
            entries.push(format!("{key}: \"{}\"", escape_quoted(value)));
        } else {
            entries.push(format!("{key}: {value}"));
        }
    }
    if entries.is_empty() {
        return node.id.clone();
    }
    format!("{}@{{ {} }}", node.id, entries.join(", "))
}

/// Rebuild the operator text from stroke, markers, and length.
fn edge_operator(edge: &Edge) -> String {
    let mut op = String::new();
    if edge.explicit_id || edge.animate || edge.animation.is_some() {
        let _ = write!(op, "{}@", edge.id);
    }
    match edge.arrow_start {
        ArrowMarker::None => {}
        ArrowMarker::Arrow => op.push('<'),
        ArrowMarker::Circle => op.push('o'),
        ArrowMarker::Cross => op.push('x'),
    }
    let has_marker = edge.arrow_start != ArrowMarker::None || edge.arrow_end != ArrowMarker::None;
    let length = edge.length.max(1) as usize;
    match edge.stroke {
        StrokeKind::Normal | StrokeKind::Thick => {
            let ch = if edge.stroke == StrokeKind::Thick { '=' } else { '-' };
            let run = if has_marker { length + 1 } else { length + 2 };
            op.extend(std::iter::repeat_n(ch, run));
        }
        StrokeKind::Dotted => {
            op.push('-');
            op.extend(std::iter::repeat_n('.', length));
            op.push('-');
        }
        StrokeKind::Invisible => {
            op.extend(std::iter::repeat_n('~', length + 2));
        }
    }
    match edge.arrow_end {
        ArrowMarker::None => {}
        ArrowMarker::Arrow => op.push('>'),
        ArrowMarker::Circle => op.push('o'),
        ArrowMarker::Cross => op.push('x'),
    }
    if let Some(text) = &edge.text {
        let _ = write!(op, "|{}|", escape_pipe_label(text));
    }
    op
}

fn edge_prop_statement(edge: &Edge) -> Option<String> {
    let mut entries = Vec::new();
    if let Some(animation) = &edge.animation {
        entries.push(format!("animation: {animation}"));
    } else if edge.animate {
        entries.push("animate: true".to_string());
    }
    if entries.is_empty() {
        return None;
    }
    Some(format!("{}@{{ {} }}", edge.id, entries.join(", ")))
}

/// Label text as written inside bracket delimiters: quoted whenever it
/// contains anything the statement scanner or delimiter matcher could
/// trip over.
fn escape_label(text: &str) -> String {
    let needs_quotes = text.is_empty()
        || text != text.trim()
        || text.contains([
            '"', '\'', '`', '[', ']', '(', ')', '{', '}', '<', '>', '|', '&', ';', '#', '%', '@',
            '\n',
        ]);
    if needs_quotes {
        format!("\"{}\"", escape_quoted(text))
    } else {
        text.to_string()
    }
}

/// Body of a double-quoted label. Entities are decoded again by the
/// parser's unquote step. Backticks must be encoded or a label that
/// starts and ends with one reads back as the markdown string form.
fn escape_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '#' => out.push_str("#35;"),
            '"' => out.push_str("#quot;"),
            '`' => out.push_str("#96;"),
            '\n' => out.push_str("#10;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Pipe labels carry no outer quotes, so anything the unquote step
/// would strip or the statement splitter would act on is encoded.
fn escape_pipe_label(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '#' => out.push_str("#35;"),
            '|' => out.push_str("#124;"),
            '"' => out.push_str("#quot;"),
            '\'' => out.push_str("#39;"),
            '`' => out.push_str("#96;"),
            '\n' => out.push_str("#10;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fp_core::{Direction, EntityStyle};
    use fp_parser::parse;

    fn round_trip(input: &str) -> GraphData {
        parse(&serialize(&parse(input))).to_data()
    }

    #[test]
    fn header_and_bare_edge() {
        let model = parse("flowchart LR\nA --> B");
        let text = serialize(&model);
        assert!(text.starts_with("flowchart LR\n"));
        assert!(text.contains("A --> B"));
    }

    #[test]
    fn labeled_shapes_round_trip() {
        let data = round_trip("flowchart TB\nA[Start] --> B{Decision}\nB -->|yes| C([Done])");
        let a = data.nodes.iter().find(|n| n.id == "A").unwrap();
        assert_eq!(a.text, "Start");
        assert_eq!(a.shape, NodeShape::Rect);
        let b = data.nodes.iter().find(|n| n.id == "B").unwrap();
        assert_eq!(b.shape, NodeShape::Diamond);
        let edge = data
            .edges
            .iter()
            .find(|e| e.source == "B" && e.target == "C")
            .unwrap();
        assert_eq!(edge.text.as_deref(), Some("yes"));
    }

    #[test]
    fn parenthesized_label_survives_via_quoting() {
        let data = round_trip("flowchart LR\nA[\"Text (with parens)\"] --> B");
        let a = data.nodes.iter().find(|n| n.id == "A").unwrap();
        assert_eq!(a.text, "Text (with parens)");
    }

    #[test]
    fn every_sugared_shape_survives() {
        let shapes = [
            ("(", ")", NodeShape::Rounded),
            ("([", "])", NodeShape::Stadium),
            ("[[", "]]", NodeShape::Subroutine),
            ("[(", ")]", NodeShape::Cylinder),
            ("((", "))", NodeShape::Circle),
            ("(((", ")))", NodeShape::DoubleCircle),
            (">", "]", NodeShape::Asymmetric),
            ("{", "}", NodeShape::Diamond),
            ("{{", "}}", NodeShape::Hexagon),
            ("[/", "/]", NodeShape::LeanRight),
            ("[\\", "\\]", NodeShape::LeanLeft),
            ("[/", "\\]", NodeShape::Trapezoid),
            ("[\\", "/]", NodeShape::InvTrapezoid),
        ];
        for (open, close, shape) in shapes {
            let input = format!("flowchart LR\nN{open}label{close} --> M");
            let data = round_trip(&input);
            let n = data.nodes.iter().find(|n| n.id == "N").unwrap();
            assert_eq!(n.shape, shape, "shape for {open}...{close}");
        }
    }

    #[test]
    fn extended_shape_uses_property_form() {
        let model = parse("flowchart LR\nS@{ shape: cloud, label: \"Fog\" } --> T");
        let text = serialize(&model);
        assert!(text.contains("S@{ shape: cloud, label: \"Fog\" }"));
        let data = round_trip("flowchart LR\nS@{ shape: cloud, label: \"Fog\" } --> T");
        let s = data.nodes.iter().find(|n| n.id == "S").unwrap();
        assert_eq!(s.shape, NodeShape::Extended("cloud".to_string()));
        assert_eq!(s.text, "Fog");
    }

    #[test]
    fn edge_attributes_round_trip() {
        let data = round_trip("flowchart LR\nA ==> B\nC -..-> D\nE ~~~ F\nG <--> H\nI --- J");
        let find = |s: &str, t: &str| {
            data.edges
                .iter()
                .find(|e| e.source == s && e.target == t)
                .unwrap()
                .clone()
        };
        assert_eq!(find("A", "B").stroke, StrokeKind::Thick);
        let dotted = find("C", "D");
        assert_eq!(dotted.stroke, StrokeKind::Dotted);
        assert_eq!(dotted.length, 2);
        assert_eq!(find("E", "F").stroke, StrokeKind::Invisible);
        let both = find("G", "H");
        assert_eq!(both.arrow_start, ArrowMarker::Arrow);
        assert_eq!(both.arrow_end, ArrowMarker::Arrow);
        let open = find("I", "J");
        assert_eq!(open.arrow_end, ArrowMarker::None);
    }

    #[test]
    fn explicit_edge_id_and_animation_round_trip() {
        let data = round_trip("flowchart LR\nA e1@--> B\ne1@{ animation: fast }");
        let edge = data.edges.iter().find(|e| e.id == "e1").unwrap();
        assert!(edge.explicit_id);
        assert!(edge.animate);
        assert_eq!(edge.animation.as_deref(), Some("fast"));
    }

    #[test]
    fn subgraph_membership_and_direction_round_trip() {
        let input = "\
flowchart TB
subgraph outer [Outer Title]
  direction LR
  A --> B
  subgraph inner
    C
  end
end";
        let data = round_trip(input);
        let outer = data.subgraphs.iter().find(|s| s.id == "outer").unwrap();
        assert_eq!(outer.title, "Outer Title");
        assert_eq!(outer.direction, Some(Direction::LR));
        assert_eq!(outer.nodes, vec!["A".to_string(), "B".to_string()]);
        let inner = data.subgraphs.iter().find(|s| s.id == "inner").unwrap();
        assert_eq!(inner.parent.as_deref(), Some("outer"));
        assert_eq!(inner.nodes, vec!["C".to_string()]);
    }

    #[test]
    fn directives_round_trip() {
        let input = "\
flowchart LR
A[Start]:::hot --> B
classDef hot fill:#f66
style A fill:#fff
linkStyle 0 stroke:#00f
click A \"https://example.com\" _blank";
        let data = round_trip(input);
        let a = data.nodes.iter().find(|n| n.id == "A").unwrap();
        assert_eq!(a.classes, vec!["hot".to_string()]);
        assert_eq!(a.style.clone().unwrap().fill.as_deref(), Some("#fff"));
        let link = a.link.clone().unwrap();
        assert_eq!(link.href, "https://example.com");
        assert_eq!(link.target.as_deref(), Some("_blank"));
        assert_eq!(
            data.class_defs.get("hot").unwrap(),
            &vec!["fill:#f66".to_string()]
        );
        assert_eq!(
            data.edges[0].style.clone().unwrap().stroke.as_deref(),
            Some("#00f")
        );
    }

    #[test]
    fn positions_never_reach_the_text() {
        let mut model = parse("flowchart LR\nA --> B");
        model
            .update_node("A", |node| {
                node.position = Some(fp_core::Point { x: 10.0, y: 20.0 });
            })
            .unwrap();
        let text = serialize(&model);
        assert!(!text.contains("10"));
        assert!(!text.contains("position"));
    }

    #[test]
    fn edge_label_with_pipe_is_entity_escaped() {
        let mut model = parse("flowchart LR\nA --> B");
        let id = model.edges()[0].id.clone();
        model.update_edge(&id, |edge| {
            edge.text = Some("a|b".to_string());
        });
        let text = serialize(&model);
        assert!(text.contains("|a#124;b|"));
        let data = parse(&text).to_data();
        assert_eq!(data.edges[0].text.as_deref(), Some("a|b"));
    }

    #[test]
    fn backticked_text_survives_quoting() {
        let data = round_trip("flowchart LR\nA[\"#96;code#96;\"] --> B");
        let a = data.nodes.iter().find(|n| n.id == "A").unwrap();
        assert_eq!(a.text, "`code`");

        let mut model = parse("flowchart LR\nA --> B");
        let id = model.edges()[0].id.clone();
        model.update_edge(&id, |edge| {
            edge.text = Some("\"note\"".to_string());
        });
        let data = parse(&serialize(&model)).to_data();
        assert_eq!(data.edges[0].text.as_deref(), Some("\"note\""));
    }

    #[test]
    fn operator_length_is_preserved() {
        let data = round_trip("flowchart LR\nA ---> B\nC ---- D");
        assert_eq!(
            data.edges
                .iter()
                .find(|e| e.source == "A")
                .unwrap()
                .length,
            2
        );
        assert_eq!(
            data.edges
                .iter()
                .find(|e| e.source == "C")
                .unwrap()
                .length,
            2
        );
    }

    #[test]
    fn empty_style_is_not_emitted() {
        let mut model = parse("flowchart LR\nA --> B");
        model
            .update_node("A", |node| {
                node.style = Some(EntityStyle::default());
            })
            .unwrap();
        let text = serialize(&model);
        assert!(!text.contains("style A"));
    }
}
