//! Label text handling: quote unwrapping, entity decoding, and
//! identifier normalization.

use unicode_segmentation::UnicodeSegmentation;

/// Unwrap one layer of quoting from delimiter content and decode DSL
/// entity codes. Supports plain text, single/double quotes, backticks,
/// and the two-character markdown string form `"` ... `"`.
pub fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();

    let inner = if let Some(markdown) = strip_pair(trimmed, "\"`", "`\"") {
        markdown
    } else if let Some(double) = strip_pair(trimmed, "\"", "\"") {
        double
    } else if let Some(single) = strip_pair(trimmed, "'", "'") {
        single
    } else if let Some(backtick) = strip_pair(trimmed, "`", "`") {
        backtick
    } else {
        trimmed
    };

    decode_entities(inner)
}

fn strip_pair<'a>(value: &'a str, open: &str, close: &str) -> Option<&'a str> {
    if value.len() < open.len() + close.len() {
        return None;
    }
    value.strip_prefix(open)?.strip_suffix(close)
}

/// Decode `#quot;`-style and numeric `#NN;` entity codes. Unknown
/// codes are left untouched.
pub fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(hash_idx) = rest.find('#') {
        out.push_str(&rest[..hash_idx]);
        let tail = &rest[hash_idx..];
        match decode_entity(tail) {
            Some((decoded, consumed)) => {
                out.push_str(&decoded);
                rest = &tail[consumed..];
            }
            None => {
                out.push('#');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(tail: &str) -> Option<(String, usize)> {
    let body = tail.strip_prefix('#')?;
    let semi = body.find(';')?;
    // Anything long enough to hold a semicolon this far out is text.
    if semi > 8 {
        return None;
    }
    let name = &body[..semi];
    let consumed = 1 + semi + 1;

    if name.chars().all(|ch| ch.is_ascii_digit()) && !name.is_empty() {
        let code: u32 = name.parse().ok()?;
        return char::from_u32(code).map(|ch| (ch.to_string(), consumed));
    }

    let decoded = match name {
        "quot" => '"',
        "apos" => '\'',
        "lt" => '<',
        "gt" => '>',
        "amp" => '&',
        "semi" => ';',
        _ => return None,
    };
    Some((decoded.to_string(), consumed))
}

/// Reduce raw token text to a usable node identifier, in the same
/// spirit as label normalization: quotes stripped, the leading run of
/// identifier characters kept.
pub fn normalize_identifier(raw: &str) -> String {
    let cleaned = raw
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim_matches('`')
        .trim();
    if cleaned.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(cleaned.len());
    for ch in cleaned.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | '/') {
            out.push(ch);
        } else if !out.is_empty() {
            break;
        }
    }

    if out.is_empty() {
        // Non-ASCII identifiers: keep whole graphemes, replace anything
        // structural with underscores.
        let mut fallback = String::with_capacity(cleaned.len());
        for grapheme in cleaned.graphemes(true) {
            if grapheme
                .chars()
                .all(|ch| ch.is_alphanumeric() || matches!(ch, '_' | '-'))
            {
                fallback.push_str(grapheme);
            } else {
                fallback.push('_');
            }
        }
        fallback.trim_matches('_').to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_entities, normalize_identifier, unquote};

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(unquote("Start"), "Start");
        assert_eq!(unquote("  padded  "), "padded");
    }

    #[test]
    fn quoted_forms_unwrap() {
        assert_eq!(unquote("\"Text (with parens)\""), "Text (with parens)");
        assert_eq!(unquote("'single'"), "single");
        assert_eq!(unquote("`ticked`"), "ticked");
    }

    #[test]
    fn markdown_string_form_unwraps_both_layers() {
        assert_eq!(unquote("\"`**bold**`\""), "**bold**");
    }

    #[test]
    fn entities_decode_named_and_numeric() {
        assert_eq!(decode_entities("a #quot;b#quot; #35;1"), "a \"b\" #1");
        assert_eq!(decode_entities("#lt;div#gt;"), "<div>");
    }

    #[test]
    fn unknown_entities_are_preserved() {
        assert_eq!(decode_entities("#nope; #123456789;"), "#nope; #123456789;");
    }

    #[test]
    fn identifier_normalization_takes_leading_run() {
        assert_eq!(normalize_identifier("  node-1  "), "node-1");
        assert_eq!(normalize_identifier("\"quoted\""), "quoted");
        assert_eq!(normalize_identifier("a b"), "a");
    }
}
