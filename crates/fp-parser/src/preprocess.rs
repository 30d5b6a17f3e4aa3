//! Line preprocessing: comment stripping and blank-line removal.
//!
//! Total by construction; there is no way for preprocessing to fail.

/// Split input into trimmed, non-empty lines with `%%` comments
/// removed.
pub fn preprocess(input: &str) -> Vec<&str> {
    input
        .lines()
        .map(strip_comment)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Remove everything from an unquoted `%%` marker to end of line.
fn strip_comment(line: &str) -> &str {
    let mut in_quote: Option<char> = None;
    let mut previous_percent = false;

    for (idx, ch) in line.char_indices() {
        if let Some(quote) = in_quote {
            if ch == quote {
                in_quote = None;
            }
            previous_percent = false;
            continue;
        }
        match ch {
            '"' | '\'' | '`' => {
                in_quote = Some(ch);
                previous_percent = false;
            }
            '%' if previous_percent => {
                return &line[..idx - '%'.len_utf8()];
            }
            '%' => previous_percent = true,
            _ => previous_percent = false,
        }
    }

    line
}
