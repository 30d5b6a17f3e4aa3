//! Statement dispatch and the flow-statement scanner.
//!
//! Each preprocessed line is split on top-level `;` and handed to
//! [`ParseContext::handle_statement`]. Directive keywords (`subgraph`,
//! `classDef`, `style`, ...) are dispatched by their first word;
//! everything else is treated as a node/edge statement and scanned
//! left to right for edge operators at nesting depth zero. Lines that
//! match nothing are dropped without failing the parse.

use std::collections::BTreeMap;

use fp_core::{
    Direction, Edge, EntityStyle, GraphData, GraphModel, Node, NodeLink, NodeShape, SubGraph,
};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::edge_id::EdgeIdAllocator;
use crate::property::parse_property_map;
use crate::tables::{EdgeToken, SHAPE_DELIMITERS, match_edge_operator};
use crate::text::{normalize_identifier, unquote};

/// Accumulated parse state for one document.
#[derive(Default)]
pub(crate) struct ParseContext {
    direction: Direction,
    header_seen: bool,
    nodes: Vec<Node>,
    node_index: FxHashMap<String, usize>,
    edges: Vec<Edge>,
    edge_alloc: EdgeIdAllocator,
    subgraphs: Vec<SubGraph>,
    subgraph_index: FxHashMap<String, usize>,
    subgraph_stack: Vec<usize>,
    class_defs: BTreeMap<String, Vec<String>>,
    /// `linkStyle` targets edges by declaration index, which is only
    /// final once every edge statement has been read.
    pending_link_styles: Vec<(LinkStyleTarget, String)>,
    /// Standalone `id@{ ... }` statements may precede the edge they
    /// refer to, so they are applied at the end as well.
    pending_edge_props: Vec<(String, Vec<(String, String)>)>,
}

enum LinkStyleTarget {
    Index(usize),
    Default,
}

impl ParseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_line(&mut self, line: &str) {
        for statement in split_statements(line) {
            self.handle_statement(statement.trim());
        }
    }

    /// Consume the context and produce the model.
    pub fn finish(mut self) -> GraphModel {
        for (id, pairs) in std::mem::take(&mut self.pending_edge_props) {
            self.apply_edge_props(&id, &pairs);
        }
        for (target, decls) in std::mem::take(&mut self.pending_link_styles) {
            match target {
                LinkStyleTarget::Index(index) => {
                    if let Some(edge) = self.edges.get_mut(index) {
                        edge.style = Some(EntityStyle::from_decls(&decls));
                    } else {
                        debug!(index, "linkStyle index out of range, dropped");
                    }
                }
                LinkStyleTarget::Default => {
                    for edge in &mut self.edges {
                        edge.style = Some(EntityStyle::from_decls(&decls));
                    }
                }
            }
        }
        GraphModel::from_data(GraphData {
            direction: self.direction,
            nodes: self.nodes,
            edges: self.edges,
            subgraphs: self.subgraphs,
            class_defs: self.class_defs,
        })
    }

    fn handle_statement(&mut self, statement: &str) {
        if statement.is_empty() {
            return;
        }

        let (keyword, rest) = match statement.find(char::is_whitespace) {
            Some(idx) => (&statement[..idx], statement[idx..].trim_start()),
            None => (statement, ""),
        };

        match keyword {
            "flowchart" | "graph" => {
                if self.header_seen {
                    debug!(statement, "extra header line, skipped");
                    return;
                }
                self.header_seen = true;
                if let Some(direction) = Direction::from_token(rest.trim()) {
                    self.direction = direction;
                }
            }
            "subgraph" => self.open_subgraph(rest),
            "end" if rest.is_empty() => {
                if self.subgraph_stack.pop().is_none() {
                    debug!("unmatched end, skipped");
                }
            }
            "direction" => {
                let Some(direction) = Direction::from_token(rest.trim()) else {
                    debug!(rest, "unknown direction token, skipped");
                    return;
                };
                match self.subgraph_stack.last() {
                    Some(&index) => self.subgraphs[index].direction = Some(direction),
                    None => self.direction = direction,
                }
            }
            "classDef" => self.handle_class_def(rest),
            "class" => self.handle_class_assign(rest),
            "style" => self.handle_style(rest),
            "linkStyle" => self.handle_link_style(rest),
            "click" => self.handle_click(rest),
            _ => {
                // A standalone `id@{ ... }` is an edge property update
                // when the keys say so or the id names a known edge;
                // otherwise it is the node property form.
                if let Some((id, pairs)) = parse_edge_prop_statement(statement)
                    && ((!pairs.is_empty()
                        && pairs
                            .iter()
                            .all(|(key, _)| matches!(key.as_str(), "animate" | "animation")))
                        || self.edges.iter().any(|edge| edge.id == id))
                {
                    self.pending_edge_props.push((id, pairs));
                } else if !self.handle_flow_statement(statement) {
                    debug!(statement, "unrecognized statement, skipped");
                }
            }
        }
    }

    fn open_subgraph(&mut self, rest: &str) {
        let rest = rest.trim();
        let (id, title) = match rest.find('[') {
            Some(open) if rest.ends_with(']') => {
                let id_part = rest[..open].trim();
                let title = unquote(rest[open + 1..rest.len() - 1].trim());
                if id_part.is_empty() {
                    (normalize_identifier(&title), title)
                } else {
                    (normalize_identifier(id_part), title)
                }
            }
            _ => (normalize_identifier(rest), unquote(rest)),
        };
        if id.is_empty() {
            debug!(rest, "subgraph without usable id, skipped");
            return;
        }
        let parent = self
            .subgraph_stack
            .last()
            .map(|&index| self.subgraphs[index].id.clone());

        let index = match self.subgraph_index.get(&id) {
            Some(&index) => index,
            None => {
                let mut sub = SubGraph::new(&id);
                sub.title = title;
                sub.parent = parent;
                self.subgraphs.push(sub);
                let index = self.subgraphs.len() - 1;
                self.subgraph_index.insert(id, index);
                index
            }
        };
        self.subgraph_stack.push(index);
    }

    fn handle_class_def(&mut self, rest: &str) {
        let Some(split) = rest.find(char::is_whitespace) else {
            debug!(rest, "classDef without styles, skipped");
            return;
        };
        let names = &rest[..split];
        let styles: Vec<String> = rest[split..]
            .trim()
            .split(',')
            .map(|decl| decl.trim().to_string())
            .filter(|decl| !decl.is_empty())
            .collect();
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            self.class_defs.insert(name.to_string(), styles.clone());
        }
    }

    fn handle_class_assign(&mut self, rest: &str) {
        let Some(split) = rest.rfind(char::is_whitespace) else {
            debug!(rest, "class without class name, skipped");
            return;
        };
        let class_name = rest[split..].trim().to_string();
        for id in rest[..split].split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let index = self.ensure_node(id, None);
            let node = &mut self.nodes[index];
            if !node.classes.contains(&class_name) {
                node.classes.push(class_name.clone());
            }
        }
    }

    fn handle_style(&mut self, rest: &str) {
        let Some(split) = rest.find(char::is_whitespace) else {
            debug!(rest, "style without declarations, skipped");
            return;
        };
        let id = rest[..split].trim();
        let decls = rest[split..].trim();
        if let Some(&index) = self.node_index.get(id) {
            self.nodes[index].style = Some(EntityStyle::from_decls(decls));
        } else if let Some(edge) = self.edges.iter_mut().find(|edge| edge.id == id) {
            edge.style = Some(EntityStyle::from_decls(decls));
        } else {
            debug!(id, "style target not found, skipped");
        }
    }

    fn handle_link_style(&mut self, rest: &str) {
        let Some(split) = rest.find(char::is_whitespace) else {
            debug!(rest, "linkStyle without declarations, skipped");
            return;
        };
        let targets = &rest[..split];
        let decls = rest[split..].trim();
        for target in targets.split(',').map(str::trim) {
            if target == "default" {
                self.pending_link_styles
                    .push((LinkStyleTarget::Default, decls.to_string()));
            } else if let Ok(index) = target.parse::<usize>() {
                self.pending_link_styles
                    .push((LinkStyleTarget::Index(index), decls.to_string()));
            } else {
                debug!(target, "linkStyle target is not an index, skipped");
            }
        }
    }

    fn handle_click(&mut self, rest: &str) {
        let Some((id_token, after_id)) = take_token(rest) else {
            debug!(rest, "click without node id, skipped");
            return;
        };
        let id = normalize_identifier(id_token);
        let Some(&index) = self.node_index.get(&id) else {
            debug!(%id, "click target node not found, skipped");
            return;
        };

        // Tolerate the `click A href "url"` spelling.
        let mut remainder = after_id;
        if let Some((token, rest)) = take_token(remainder)
            && token == "href"
        {
            remainder = rest;
        }
        let Some((href_token, after_href)) = take_token(remainder) else {
            debug!(%id, "click without link target, skipped");
            return;
        };
        let href = unquote(href_token);
        if href.is_empty() {
            debug!(%id, "click target empty after unquoting, skipped");
            return;
        }
        if !is_safe_link_target(&href) {
            debug!(%id, href, "unsafe click link target blocked");
            return;
        }
        let target = take_token(after_href)
            .map(|(token, _)| token.to_string())
            .filter(|token| token.starts_with('_'));
        self.nodes[index].link = Some(NodeLink { href, target });
    }

    /// Parse a node/edge statement; returns false when nothing usable
    /// was found so the caller can log the drop.
    fn handle_flow_statement(&mut self, statement: &str) -> bool {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut operators: Vec<EdgeToken> = Vec::new();
        let mut rest = statement;

        loop {
            let Some((group_raw, found)) = scan_until_operator(rest) else {
                if groups.is_empty() {
                    return false;
                }
                operators.truncate(groups.len() - 1);
                break;
            };
            let Some(group) = self.register_group(group_raw) else {
                if groups.is_empty() {
                    return false;
                }
                operators.truncate(groups.len() - 1);
                break;
            };
            groups.push(group);
            let Some((mut token, after_op)) = found else {
                break;
            };
            rest = after_op;
            if let Some((label, after_label)) = take_pipe_label(rest) {
                token.text = Some(label);
                rest = after_label;
            }
            if rest.trim().is_empty() {
                // Dangling operator with no right-hand side; keep the
                // nodes, drop the half-written edge.
                debug!(statement, "dangling edge operator, edge dropped");
                break;
            }
            operators.push(token);
        }

        for (pair_index, token) in operators.iter().enumerate() {
            let sources = groups[pair_index].clone();
            let targets = groups[pair_index + 1].clone();
            for &source in &sources {
                for &target in &targets {
                    self.push_edge(source, target, token);
                }
            }
        }
        true
    }

    fn push_edge(&mut self, source: usize, target: usize, token: &EdgeToken) {
        let source_id = self.nodes[source].id.clone();
        let target_id = self.nodes[target].id.clone();
        let (id, explicit) = match &token.id {
            Some(id) => (self.edge_alloc.allocate_explicit(id), true),
            None => (self.edge_alloc.allocate(&source_id, &target_id, token), false),
        };
        let mut edge = Edge::new(&id, &source_id, &target_id);
        edge.stroke = token.stroke;
        edge.arrow_start = token.arrow_start;
        edge.arrow_end = token.arrow_end;
        edge.length = token.length.max(1);
        edge.text = token.text.clone();
        edge.explicit_id = explicit;
        self.edges.push(edge);
    }

    /// Split a group on top-level `&` and register each node token.
    /// Returns node indices, or None when no token was usable.
    fn register_group(&mut self, raw: &str) -> Option<Vec<usize>> {
        let mut indices = Vec::new();
        for token_raw in split_top_level(raw, '&') {
            let token_raw = token_raw.trim();
            if token_raw.is_empty() {
                continue;
            }
            let Some(token) = parse_node_token(token_raw) else {
                debug!(token_raw, "unusable node token, skipped");
                continue;
            };
            let index = self.ensure_node(&token.id, token.text.clone());
            let node = &mut self.nodes[index];
            if let Some(shape) = token.shape {
                node.shape = shape;
            }
            if let Some(text) = token.text {
                node.text = text;
            }
            for class in token.classes {
                if !node.classes.contains(&class) {
                    node.classes.push(class);
                }
            }
            for (key, value) in token.properties {
                node.properties.insert(key, value);
            }
            indices.push(index);
        }
        (!indices.is_empty()).then_some(indices)
    }

    /// Look up or create a node, attaching new nodes to the innermost
    /// open subgraph. Membership of an existing node never moves.
    fn ensure_node(&mut self, id: &str, text: Option<String>) -> usize {
        if let Some(&index) = self.node_index.get(id) {
            return index;
        }
        let mut node = match text {
            Some(text) => Node::new(id).with_text(text),
            None => Node::new(id),
        };
        if let Some(&sub_index) = self.subgraph_stack.last() {
            let sub = &mut self.subgraphs[sub_index];
            node.subgraph = Some(sub.id.clone());
            sub.nodes.push(id.to_string());
        }
        self.nodes.push(node);
        let index = self.nodes.len() - 1;
        self.node_index.insert(id.to_string(), index);
        index
    }

    fn apply_edge_props(&mut self, id: &str, pairs: &[(String, String)]) {
        let Some(edge) = self.edges.iter_mut().find(|edge| edge.id == id) else {
            debug!(id, "edge property target not found, skipped");
            return;
        };
        for (key, value) in pairs {
            match key.as_str() {
                "animate" => edge.animate = value == "true",
                "animation" => {
                    edge.animation = Some(value.clone());
                    edge.animate = true;
                }
                "label" => edge.text = Some(unquote(value)),
                _ => debug!(key, "unknown edge property, skipped"),
            }
        }
    }
}

/// A node token after delimiter/property/class suffix handling.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NodeToken {
    id: String,
    text: Option<String>,
    shape: Option<NodeShape>,
    classes: Vec<String>,
    properties: Vec<(String, String)>,
}

fn parse_node_token(raw: &str) -> Option<NodeToken> {
    let (raw, classes) = split_class_suffix(raw);
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    // Property form: `id@{ shape: cylinder, label: "..." }`.
    if let Some(at) = raw.find("@{")
        && raw[..at]
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        && !raw[..at].is_empty()
        && let Some(pairs) = parse_property_map(&raw[at + 1..])
    {
        let mut token = NodeToken {
            id: raw[..at].to_string(),
            text: None,
            shape: None,
            classes,
            properties: Vec::new(),
        };
        for (key, value) in pairs {
            match key.as_str() {
                "shape" => token.shape = Some(NodeShape::from_keyword(&value)),
                "label" => token.text = Some(unquote(&value)),
                _ => token.properties.push((key, value)),
            }
        }
        return Some(token);
    }

    // Wrapped delimiter forms, most specific first.
    for (open, close, shape) in SHAPE_DELIMITERS {
        if let Some((id, text)) = split_wrapped(raw, open, close) {
            return Some(NodeToken {
                id,
                text: Some(text),
                shape: Some(shape.clone()),
                classes,
                properties: Vec::new(),
            });
        }
    }

    // Bare identifier.
    let id = normalize_identifier(raw);
    (!id.is_empty()).then_some(NodeToken {
        id,
        text: None,
        shape: None,
        classes,
        properties: Vec::new(),
    })
}

/// `id[label]` style split: the id sits before the opening delimiter
/// and the label inside it; the closer must end the token. A missing
/// id falls back to the normalized label.
fn split_wrapped(raw: &str, open: &str, close: &str) -> Option<(String, String)> {
    let open_at = raw.find(open)?;
    if !raw.ends_with(close) || raw.len() < open_at + open.len() + close.len() {
        return None;
    }
    let id_part = raw[..open_at].trim();
    if id_part
        .chars()
        .any(|ch| matches!(ch, '[' | ']' | '(' | ')' | '{' | '}' | '>' | '"' | '@'))
    {
        return None;
    }
    let inner = raw[open_at + open.len()..raw.len() - close.len()].trim();
    let text = unquote(inner);
    let id = if id_part.is_empty() {
        normalize_identifier(&text)
    } else {
        id_part.to_string()
    };
    (!id.is_empty()).then(|| (id, text))
}

fn split_class_suffix(raw: &str) -> (&str, Vec<String>) {
    let mut classes = Vec::new();
    let mut head = raw.trim();
    while let Some(at) = head.rfind(":::") {
        let class = head[at + 3..].trim();
        if class.is_empty() || class.contains(|ch: char| ch.is_whitespace()) {
            break;
        }
        classes.insert(0, class.to_string());
        head = head[..at].trim_end();
    }
    (head, classes)
}

/// Standalone `id@{ ... }` statement applying properties to an edge.
fn parse_edge_prop_statement(statement: &str) -> Option<(String, Vec<(String, String)>)> {
    let at = statement.find("@{")?;
    let id = &statement[..at];
    if id.is_empty()
        || !id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return None;
    }
    // Node property forms are handled by the flow statement path;
    // this path only claims statements whose id looks like an edge id
    // or that name a previously declared edge, which is decided by the
    // caller applying them at the end. The map must span the rest.
    let pairs = parse_property_map(&statement[at + 1..])?;
    Some((id.to_string(), pairs))
}

/// Scan for the first edge operator at nesting depth zero, outside
/// quotes. Returns the text before it and, when an operator matched,
/// the token plus the remainder after it. None when no group precedes
/// the operator (or the input is blank).
fn scan_until_operator(input: &str) -> Option<(&str, Option<(EdgeToken, &str)>)> {
    let trimmed = input.trim_start();
    let mut in_quote: Option<char> = None;
    let mut square = 0i32;
    let mut paren = 0i32;
    let mut brace = 0i32;
    let mut prev: Option<char> = None;

    for (idx, ch) in trimmed.char_indices() {
        if let Some(quote) = in_quote {
            if ch == quote {
                in_quote = None;
            }
            prev = Some(ch);
            continue;
        }
        match ch {
            '"' | '\'' | '`' => in_quote = Some(ch),
            '[' => square += 1,
            // Clamp: the asymmetric form `N>label]` closes a bracket
            // it never opened.
            ']' => square = (square - 1).max(0),
            '(' => paren += 1,
            ')' => paren = (paren - 1).max(0),
            '{' => brace += 1,
            '}' => brace = (brace - 1).max(0),
            _ if square == 0 && paren == 0 && brace == 0 => {
                let at_boundary = prev.is_none_or(char::is_whitespace);
                let candidate = matches!(ch, '-' | '=' | '~' | '<')
                    || (at_boundary && (ch.is_ascii_alphanumeric() || ch == '_'));
                if candidate
                    && let Some((consumed, token)) =
                        match_edge_operator(&trimmed[idx..], at_boundary)
                {
                    let before = trimmed[..idx].trim_end();
                    if before.is_empty() {
                        return None;
                    }
                    return Some((before, Some((token, &trimmed[idx + consumed..]))));
                }
            }
            _ => {}
        }
        prev = Some(ch);
    }

    let before = trimmed.trim_end();
    (!before.is_empty()).then_some((before, None))
}

fn take_pipe_label(input: &str) -> Option<(String, &str)> {
    let trimmed = input.trim_start();
    let after_open = trimmed.strip_prefix('|')?;
    let close = after_open.find('|')?;
    let label = unquote(after_open[..close].trim());
    Some((label, &after_open[close + 1..]))
}

/// Split on `separator` at depth zero, outside quotes and `|...|`
/// label spans. Closers are clamped at depth zero so the unmatched
/// `]` of the asymmetric form cannot poison the rest of the line.
fn split_top_level(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quote: Option<char> = None;
    let mut in_pipe = false;
    let mut depth = 0i32;
    let mut start = 0usize;
    for (idx, ch) in input.char_indices() {
        if let Some(quote) = in_quote {
            if ch == quote {
                in_quote = None;
            }
            continue;
        }
        if in_pipe {
            match ch {
                '"' | '\'' | '`' => in_quote = Some(ch),
                '|' => in_pipe = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => in_quote = Some(ch),
            '|' => in_pipe = true,
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth = (depth - 1).max(0),
            _ if ch == separator && depth == 0 => {
                parts.push(&input[start..idx]);
                start = idx + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Split a line on top-level `;` statement separators.
pub(crate) fn split_statements(line: &str) -> Vec<&str> {
    split_top_level(line, ';')
}

fn take_token(input: &str) -> Option<(&str, &str)> {
    let trimmed = input.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    let first = trimmed.chars().next()?;
    if matches!(first, '"' | '\'' | '`') {
        for (idx, ch) in trimmed.char_indices().skip(1) {
            if ch == first {
                return Some((&trimmed[..=idx], &trimmed[idx + 1..]));
            }
        }
        return Some((trimmed, ""));
    }
    let split = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
    Some((&trimmed[..split], &trimmed[split..]))
}

/// Reject link targets whose scheme could execute script, including
/// percent-encoded spellings of those schemes.
fn is_safe_link_target(target: &str) -> bool {
    let decoded = decode_percent_triplets(target);
    let lower = decoded.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("data:")
        || lower.starts_with("vbscript:")
    {
        return false;
    }
    lower.starts_with("https://")
        || lower.starts_with("http://")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || decoded.starts_with('/')
        || decoded.starts_with('#')
        || !lower.contains(':')
}

fn decode_percent_triplets(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 2 < bytes.len() {
            let high = decode_hex_nibble(bytes[index + 1]);
            let low = decode_hex_nibble(bytes[index + 2]);
            if let (Some(high), Some(low)) = (high, low) {
                decoded.push((high << 4) | low);
                index += 3;
                continue;
            }
        }
        decoded.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn decode_hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
