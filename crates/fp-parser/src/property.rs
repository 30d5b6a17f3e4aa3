//! Parser for the `@{ key: value, ... }` property form.
//!
//! The same braced map is used after a node id (`A@{ shape: cylinder,
//! label: "Store" }`) and as a standalone edge property statement
//! (`e1@{ animate: true }`). Keys are bare words; values are quoted
//! strings or bare runs up to the next comma or closing brace.

use chumsky::extra;
use chumsky::prelude::*;

/// Parse the braced body, including the braces. Returns pairs in
/// written order; returns `None` when the text is not a property map.
pub(crate) fn parse_property_map(raw: &str) -> Option<Vec<(String, String)>> {
    property_map_parser().parse(raw.trim()).into_output()
}

fn property_map_parser<'a>()
-> impl Parser<'a, &'a str, Vec<(String, String)>, extra::Err<Rich<'a, char>>> {
    let ws_char = any().filter(|c: &char| c.is_whitespace());
    let inline_ws = ws_char.repeated().to(());

    let key = any()
        .filter(|c: &char| c.is_ascii_alphanumeric() || matches!(*c, '_' | '-'))
        .repeated()
        .at_least(1)
        .to_slice();

    let quoted_value = {
        let double_q = just('"')
            .ignore_then(any().filter(|c: &char| *c != '"').repeated().to_slice())
            .then_ignore(just('"'));
        let single_q = just('\'')
            .ignore_then(any().filter(|c: &char| *c != '\'').repeated().to_slice())
            .then_ignore(just('\''));
        double_q.or(single_q)
    };

    let bare_value = any()
        .filter(|c: &char| *c != ',' && *c != '}' && *c != '"' && *c != '\'')
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|s: &str| s.trim());

    let value = quoted_value.or(bare_value);

    let entry = key
        .then_ignore(inline_ws)
        .then_ignore(just(':'))
        .then_ignore(inline_ws)
        .then(value)
        .map(|(k, v): (&str, &str)| (k.to_string(), v.to_string()));

    just('{')
        .ignore_then(inline_ws)
        .ignore_then(
            entry
                .separated_by(just(',').then_ignore(inline_ws))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(inline_ws)
        .then_ignore(just('}'))
        .then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_entry() {
        let pairs = parse_property_map("{ shape: cylinder }").unwrap();
        assert_eq!(pairs, vec![("shape".to_string(), "cylinder".to_string())]);
    }

    #[test]
    fn quoted_values_keep_commas() {
        let pairs = parse_property_map(r#"{ shape: rect, label: "a, b" }"#).unwrap();
        assert_eq!(pairs[1], ("label".to_string(), "a, b".to_string()));
    }

    #[test]
    fn bare_values_are_trimmed() {
        let pairs = parse_property_map("{shape: lean-right , w: 120}").unwrap();
        assert_eq!(pairs[0].1, "lean-right");
        assert_eq!(pairs[1], ("w".to_string(), "120".to_string()));
    }

    #[test]
    fn trailing_comma_is_tolerated() {
        let pairs = parse_property_map("{ animate: true, }").unwrap();
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn non_maps_are_rejected() {
        assert!(parse_property_map("[label]").is_none());
        assert!(parse_property_map("{ shape cylinder }").is_none());
        assert!(parse_property_map("{").is_none());
    }
}
