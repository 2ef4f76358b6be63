/// Wraps a filename in double quotes for transmission to the helper, doubling any embedded quote
/// character so the helper's own line splitter can find the closing quote unambiguously.
pub fn quote_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Reverses `quote_filename`: strips the surrounding quotes and collapses doubled quotes back to
/// one.
pub fn unquote_filename(quoted: &str) -> String {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(quoted);
    inner.replace("\"\"", "\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_names() {
        let name = "report.pdf";
        assert_eq!(unquote_filename(&quote_filename(name)), name);
    }

    #[test]
    fn round_trips_names_with_embedded_quotes() {
        let name = "weird\"name.txt";
        assert_eq!(unquote_filename(&quote_filename(name)), name);
    }

    #[test]
    fn round_trips_names_with_spaces_and_unicode() {
        let name = "日本語 report (final).txt";
        assert_eq!(unquote_filename(&quote_filename(name)), name);
    }
}
