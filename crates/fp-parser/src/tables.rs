//! Ordered pattern tables for shape and edge recognition.
//!
//! Both tables are first-match-wins and the order is a correctness
//! dependency, not an implementation detail: more specific delimiter
//! pairs and operator forms must shadow more general ones (triple
//! paren before double before single, `-->` before `--`, the
//! text-bearing `-- text -->` form before the symbol-only scan).

use fp_core::{ArrowMarker, NodeShape, StrokeKind};

/// Shape delimiter pairs, most specific first. The node token parser
/// walks this list in order.
pub(crate) const SHAPE_DELIMITERS: &[(&str, &str, NodeShape)] = &[
    ("(((", ")))", NodeShape::DoubleCircle),
    ("((", "))", NodeShape::Circle),
    ("([", "])", NodeShape::Stadium),
    ("[[", "]]", NodeShape::Subroutine),
    ("[(", ")]", NodeShape::Cylinder),
    ("{{", "}}", NodeShape::Hexagon),
    ("[/", "\\]", NodeShape::Trapezoid),
    ("[\\", "/]", NodeShape::InvTrapezoid),
    ("[/", "/]", NodeShape::LeanRight),
    ("[\\", "\\]", NodeShape::LeanLeft),
    ("[", "]", NodeShape::Rect),
    ("(", ")", NodeShape::Rounded),
    ("{", "}", NodeShape::Diamond),
    (">", "]", NodeShape::Asymmetric),
];

/// A recognized edge operator plus everything captured around it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct EdgeToken {
    pub stroke: StrokeKind,
    pub arrow_start: ArrowMarker,
    pub arrow_end: ArrowMarker,
    /// Label captured from a text-bearing operator form; pipe labels
    /// are attached later by the statement splitter.
    pub text: Option<String>,
    /// Explicit id from an `id@-->` prefix.
    pub id: Option<String>,
    /// Visual segment count derived from the operator's character runs.
    pub length: u32,
    /// The operator exactly as written, for identifier hashing.
    pub raw: String,
}

/// Try to recognize an edge operator at the start of `tail`.
/// `at_boundary` is true when the position follows whitespace (or is
/// the start of the statement); `o`/`x` start markers and `id@`
/// prefixes are only legal there, otherwise node ids ending in those
/// letters would be cut short. Returns the consumed byte length.
pub(crate) fn match_edge_operator(tail: &str, at_boundary: bool) -> Option<(usize, EdgeToken)> {
    // Explicit edge id: `ident@` immediately followed by an operator.
    // Dashes are legal so generated ids (`edge-<hex>`, `-dup<N>`)
    // round-trip when they carry animation flags.
    if at_boundary {
        let ident_len = tail
            .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'))
            .unwrap_or(tail.len());
        if ident_len > 0 && tail[ident_len..].starts_with('@') {
            let rest = &tail[ident_len + 1..];
            if rest.starts_with(['-', '=', '.', '~', '<', 'o', 'x']) {
                if let Some((consumed, mut token)) = match_edge_operator(rest, true) {
                    token.id = Some(tail[..ident_len].to_string());
                    token.raw = tail[..ident_len + 1 + consumed].to_string();
                    return Some((ident_len + 1 + consumed, token));
                }
            }
        }
    }

    let mut cursor = 0usize;
    let mut arrow_start = ArrowMarker::None;
    let bytes = tail.as_bytes();

    match bytes.first() {
        Some(b'<') if matches!(bytes.get(1), Some(b'-' | b'=' | b'~')) => {
            arrow_start = ArrowMarker::Arrow;
            cursor = 1;
        }
        Some(b'o') if at_boundary && matches!(bytes.get(1), Some(b'-' | b'=' | b'~')) => {
            arrow_start = ArrowMarker::Circle;
            cursor = 1;
        }
        Some(b'x') if at_boundary && matches!(bytes.get(1), Some(b'-' | b'=' | b'~')) => {
            arrow_start = ArrowMarker::Cross;
            cursor = 1;
        }
        _ => {}
    }

    let body = &tail[cursor..];

    // Text-bearing, space-delimited forms first; the generic scan
    // below would otherwise swallow the text as part of the operator.
    for (open, closer_char, stroke) in [
        ("--", '-', StrokeKind::Normal),
        ("-.", '.', StrokeKind::Dotted),
        ("==", '=', StrokeKind::Thick),
    ] {
        if let Some((consumed, mut token)) = match_text_operator(body, open, closer_char, stroke) {
            token.arrow_start = arrow_start;
            token.raw = tail[..cursor + consumed].to_string();
            return Some((cursor + consumed, token));
        }
    }

    let (consumed, mut token) = match_symbol_operator(body)?;
    token.arrow_start = arrow_start;
    // A start marker counts as the run's marker for length purposes,
    // so `<---` has the same length as `--->`.
    if arrow_start != ArrowMarker::None
        && token.arrow_end == ArrowMarker::None
        && token.stroke != StrokeKind::Invisible
    {
        token.length = token.length.saturating_add(1);
    }
    token.raw = tail[..cursor + consumed].to_string();
    Some((cursor + consumed, token))
}

/// `-- text -->`, `-. text .->`, `== text ==>`: an opener, free text,
/// then a closing run that determines stroke/arrow/length.
fn match_text_operator(
    body: &str,
    open: &str,
    closer_char: char,
    stroke: StrokeKind,
) -> Option<(usize, EdgeToken)> {
    let after_open = body.strip_prefix(open)?;
    if !after_open.starts_with([' ', '\t']) {
        return None;
    }

    let mut search_from = 0usize;
    loop {
        let rel = after_open[search_from..].find(' ')?;
        let space_idx = search_from + rel;
        let closer = &after_open[space_idx + 1..];
        if let Some((closer_len, token_tail)) = match_closing_run(closer, closer_char) {
            let text = after_open[..space_idx].trim();
            let consumed = open.len() + 1 + space_idx + closer_len;
            let mut token = token_tail;
            token.stroke = stroke;
            token.text = (!text.is_empty()).then(|| text.to_string());
            return Some((consumed, token));
        }
        search_from = space_idx + 1;
        if search_from >= after_open.len() {
            return None;
        }
    }
}

/// Closing run of a text-bearing form: `-->`, `---`, `.->`, `==>`, ...
fn match_closing_run(closer: &str, run_char: char) -> Option<(usize, EdgeToken)> {
    let run = closer.chars().take_while(|ch| *ch == run_char).count();
    if run < 1 {
        return None;
    }
    let mut cursor = run;
    // Dotted closers are `.->`: dots then a dash before the marker.
    if run_char == '.' {
        let dashes = closer[cursor..].chars().take_while(|ch| *ch == '-').count();
        if dashes == 0 {
            return None;
        }
        cursor += dashes;
    } else if run < 2 {
        return None;
    }

    let (arrow_end, marker_len) = match closer[cursor..].chars().next() {
        Some('>') => (ArrowMarker::Arrow, 1),
        Some('o') => (ArrowMarker::Circle, 1),
        Some('x') => (ArrowMarker::Cross, 1),
        _ => (ArrowMarker::None, 0),
    };
    if run_char != '.' && arrow_end == ArrowMarker::None && run < 3 {
        return None;
    }

    let length = if run_char == '.' {
        run as u32
    } else if arrow_end == ArrowMarker::None {
        (run as u32).saturating_sub(2).max(1)
    } else {
        (run as u32).saturating_sub(1).max(1)
    };

    Some((
        cursor + marker_len,
        EdgeToken {
            arrow_end,
            length,
            ..EdgeToken::default()
        },
    ))
}

/// The generic symbol-only operator scan: variable-length dash, equals,
/// dot, and tilde runs with an optional end marker. Longer, more
/// specific forms win because the run is consumed greedily.
fn match_symbol_operator(body: &str) -> Option<(usize, EdgeToken)> {
    let first = body.chars().next()?;
    match first {
        '-' => {
            let dashes = body.chars().take_while(|ch| *ch == '-').count();
            let after = &body[dashes..];
            if after.starts_with('.') {
                // Dotted: `-.` dots `-`, e.g. `-.->` or `-..-`.
                let dots = after.chars().take_while(|ch| *ch == '.').count();
                let tail = &after[dots..];
                let trailing = tail.chars().take_while(|ch| *ch == '-').count();
                if trailing == 0 {
                    return None;
                }
                let (arrow_end, marker_len) = end_marker(&tail[trailing..]);
                Some((
                    dashes + dots + trailing + marker_len,
                    EdgeToken {
                        stroke: StrokeKind::Dotted,
                        arrow_end,
                        length: dots as u32,
                        ..EdgeToken::default()
                    },
                ))
            } else {
                if dashes < 2 {
                    return None;
                }
                let (arrow_end, marker_len) = end_marker(after);
                if arrow_end == ArrowMarker::None && dashes < 3 {
                    return None;
                }
                let length = run_length(dashes, arrow_end);
                Some((
                    dashes + marker_len,
                    EdgeToken {
                        stroke: StrokeKind::Normal,
                        arrow_end,
                        length,
                        ..EdgeToken::default()
                    },
                ))
            }
        }
        '=' => {
            let equals = body.chars().take_while(|ch| *ch == '=').count();
            if equals < 2 {
                return None;
            }
            let (arrow_end, marker_len) = end_marker(&body[equals..]);
            if arrow_end == ArrowMarker::None && equals < 3 {
                return None;
            }
            Some((
                equals + marker_len,
                EdgeToken {
                    stroke: StrokeKind::Thick,
                    arrow_end,
                    length: run_length(equals, arrow_end),
                    ..EdgeToken::default()
                },
            ))
        }
        '~' => {
            let tildes = body.chars().take_while(|ch| *ch == '~').count();
            if tildes < 3 {
                return None;
            }
            Some((
                tildes,
                EdgeToken {
                    stroke: StrokeKind::Invisible,
                    length: (tildes as u32).saturating_sub(2).max(1),
                    ..EdgeToken::default()
                },
            ))
        }
        _ => None,
    }
}

fn end_marker(tail: &str) -> (ArrowMarker, usize) {
    match tail.chars().next() {
        Some('>') => (ArrowMarker::Arrow, 1),
        Some('o') => (ArrowMarker::Circle, 1),
        Some('x') => (ArrowMarker::Cross, 1),
        _ => (ArrowMarker::None, 0),
    }
}

fn run_length(run: usize, arrow_end: ArrowMarker) -> u32 {
    if arrow_end == ArrowMarker::None {
        (run as u32).saturating_sub(2).max(1)
    } else {
        (run as u32).saturating_sub(1).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(tail: &str) -> (usize, EdgeToken) {
        match_edge_operator(tail, true).expect("operator should match")
    }

    #[test]
    fn plain_arrow() {
        let (len, token) = op("-->");
        assert_eq!(len, 3);
        assert_eq!(token.stroke, StrokeKind::Normal);
        assert_eq!(token.arrow_end, ArrowMarker::Arrow);
        assert_eq!(token.arrow_start, ArrowMarker::None);
        assert_eq!(token.length, 1);
    }

    #[test]
    fn longer_runs_extend_length() {
        assert_eq!(op("--->").1.length, 2);
        assert_eq!(op("---").1.length, 1);
        assert_eq!(op("----").1.length, 2);
        assert_eq!(op("====>").1.length, 3);
    }

    #[test]
    fn dotted_and_thick_and_invisible() {
        let (_, dotted) = op("-.->");
        assert_eq!(dotted.stroke, StrokeKind::Dotted);
        assert_eq!(dotted.arrow_end, ArrowMarker::Arrow);
        assert_eq!(dotted.length, 1);

        let (_, thick) = op("==>");
        assert_eq!(thick.stroke, StrokeKind::Thick);

        let (_, invisible) = op("~~~");
        assert_eq!(invisible.stroke, StrokeKind::Invisible);
        assert_eq!(invisible.arrow_end, ArrowMarker::None);
    }

    #[test]
    fn bidirectional_markers() {
        let (_, both) = op("<-->");
        assert_eq!(both.arrow_start, ArrowMarker::Arrow);
        assert_eq!(both.arrow_end, ArrowMarker::Arrow);

        let (_, circles) = op("o--o");
        assert_eq!(circles.arrow_start, ArrowMarker::Circle);
        assert_eq!(circles.arrow_end, ArrowMarker::Circle);

        let (_, crosses) = op("x==x");
        assert_eq!(crosses.arrow_start, ArrowMarker::Cross);
        assert_eq!(crosses.arrow_end, ArrowMarker::Cross);
    }

    #[test]
    fn circle_start_requires_word_boundary() {
        // Inside a word, `o-->` must not be read as a circle marker.
        assert!(match_edge_operator("o-->", false).is_none());
        assert!(match_edge_operator("o-->", true).is_some());
    }

    #[test]
    fn text_bearing_forms_capture_the_label() {
        let (len, token) = op("-- yes -->");
        assert_eq!(len, "-- yes -->".len());
        assert_eq!(token.text.as_deref(), Some("yes"));
        assert_eq!(token.arrow_end, ArrowMarker::Arrow);

        let (_, dotted) = op("-. maybe .->");
        assert_eq!(dotted.stroke, StrokeKind::Dotted);
        assert_eq!(dotted.text.as_deref(), Some("maybe"));

        let (_, thick) = op("== no ==>");
        assert_eq!(thick.stroke, StrokeKind::Thick);
        assert_eq!(thick.text.as_deref(), Some("no"));
    }

    #[test]
    fn explicit_edge_id_prefix() {
        let (len, token) = op("e1@-->");
        assert_eq!(len, 6);
        assert_eq!(token.id.as_deref(), Some("e1"));
        assert_eq!(token.arrow_end, ArrowMarker::Arrow);
        assert_eq!(token.raw, "e1@-->");
    }

    #[test]
    fn two_dashes_alone_is_not_an_operator() {
        assert!(match_edge_operator("--", true).is_none());
        assert!(match_edge_operator("-", true).is_none());
        assert!(match_edge_operator("==", true).is_none());
    }

    #[test]
    fn table_order_puts_specific_delimiters_first() {
        let triple = SHAPE_DELIMITERS
            .iter()
            .position(|(open, _, _)| *open == "(((")
            .unwrap();
        let single = SHAPE_DELIMITERS
            .iter()
            .position(|(open, _, _)| *open == "(")
            .unwrap();
        assert!(triple < single);
    }
}
