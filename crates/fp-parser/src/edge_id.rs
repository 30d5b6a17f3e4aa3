//! Deterministic edge identifiers.
//!
//! An edge with no explicit `id@` prefix gets an id hashed from its
//! observable attributes, so re-parsing the same document always
//! yields the same ids and diff-based tooling stays stable. Hash
//! collisions between structurally identical edges (same endpoints,
//! operator, and label) are disambiguated with a `-dup<N>` suffix in
//! encounter order.

use fp_core::{ArrowMarker, StrokeKind};
use rustc_hash::FxHashMap;

use crate::tables::EdgeToken;

/// Per-parse dedup state, keyed by the base hash id.
#[derive(Debug, Default)]
pub(crate) struct EdgeIdAllocator {
    seen: FxHashMap<String, u32>,
}

impl EdgeIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a unique id for an edge between `source` and `target`
    /// recognized via `token`.
    pub fn allocate(&mut self, source: &str, target: &str, token: &EdgeToken) -> String {
        let base = hash_edge(source, target, token);
        let counter = self.seen.entry(base.clone()).or_insert(0);
        *counter += 1;
        if *counter == 1 {
            base
        } else {
            format!("{base}-dup{}", *counter - 1)
        }
    }

    /// Allocate an explicitly written id. The first use keeps the id
    /// verbatim; reuse (a fan-out edge statement carrying one `id@`
    /// prefix, or a repeated id) gets the same `-dup<N>` treatment as
    /// hashed ids.
    pub fn allocate_explicit(&mut self, id: &str) -> String {
        let counter = self.seen.entry(id.to_string()).or_insert(0);
        *counter += 1;
        if *counter == 1 {
            id.to_string()
        } else {
            format!("{id}-dup{}", *counter - 1)
        }
    }
}

fn hash_edge(source: &str, target: &str, token: &EdgeToken) -> String {
    let mut hash: u32 = 5381;
    let mut feed = |s: &str| {
        for byte in s.bytes() {
            hash = hash.wrapping_mul(33).wrapping_add(u32::from(byte));
        }
        hash = hash.wrapping_mul(33).wrapping_add(0x1f);
    };
    feed(source);
    feed(target);
    feed(&token.raw);
    feed(token.text.as_deref().unwrap_or(""));
    feed(stroke_tag(token.stroke));
    feed(marker_tag(token.arrow_start));
    feed(marker_tag(token.arrow_end));
    format!("edge-{hash:x}")
}

fn stroke_tag(stroke: StrokeKind) -> &'static str {
    match stroke {
        StrokeKind::Normal => "normal",
        StrokeKind::Thick => "thick",
        StrokeKind::Dotted => "dotted",
        StrokeKind::Invisible => "invisible",
    }
}

fn marker_tag(marker: ArrowMarker) -> &'static str {
    match marker {
        ArrowMarker::None => "none",
        ArrowMarker::Arrow => "arrow",
        ArrowMarker::Circle => "circle",
        ArrowMarker::Cross => "cross",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrow_token() -> EdgeToken {
        EdgeToken {
            arrow_end: ArrowMarker::Arrow,
            length: 1,
            raw: "-->".to_string(),
            ..EdgeToken::default()
        }
    }

    #[test]
    fn same_edge_same_id() {
        let mut a = EdgeIdAllocator::new();
        let mut b = EdgeIdAllocator::new();
        assert_eq!(
            a.allocate("A", "B", &arrow_token()),
            b.allocate("A", "B", &arrow_token())
        );
    }

    #[test]
    fn attributes_change_the_id() {
        let mut alloc = EdgeIdAllocator::new();
        let plain = alloc.allocate("A", "B", &arrow_token());

        let mut labeled = arrow_token();
        labeled.text = Some("yes".to_string());
        let mut alloc = EdgeIdAllocator::new();
        assert_ne!(plain, alloc.allocate("A", "B", &labeled));

        let mut thick = arrow_token();
        thick.stroke = StrokeKind::Thick;
        thick.raw = "==>".to_string();
        let mut alloc = EdgeIdAllocator::new();
        assert_ne!(plain, alloc.allocate("A", "B", &thick));
    }

    #[test]
    fn duplicates_get_suffixed_in_order() {
        let mut alloc = EdgeIdAllocator::new();
        let first = alloc.allocate("A", "B", &arrow_token());
        let second = alloc.allocate("A", "B", &arrow_token());
        let third = alloc.allocate("A", "B", &arrow_token());
        assert!(!first.contains("-dup"));
        assert_eq!(second, format!("{first}-dup1"));
        assert_eq!(third, format!("{first}-dup2"));
    }

    #[test]
    fn explicit_ids_pass_through_once() {
        let mut alloc = EdgeIdAllocator::new();
        assert_eq!(alloc.allocate_explicit("e1"), "e1");
        assert_eq!(alloc.allocate_explicit("e1"), "e1-dup1");
    }

    #[test]
    fn ids_have_the_edge_prefix() {
        let mut alloc = EdgeIdAllocator::new();
        let id = alloc.allocate("A", "B", &arrow_token());
        assert!(id.starts_with("edge-"));
    }
}
