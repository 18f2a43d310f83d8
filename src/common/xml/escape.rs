use aho_corasick::{AhoCorasick, MatchKind};
use once_cell::sync::Lazy;

// Static initialization: automata are built only once, thread-safe
static TEXT_ESCAPER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .build(["&", "<", ">"])
        .expect("Failed to build XML text escaper")
});

// Attribute values additionally encode quotes and the whitespace characters that
// attribute-value normalization would otherwise collapse to spaces on re-read.
static ATTR_ESCAPER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .build(["&", "<", ">", "\"", "\n", "\r", "\t"])
        .expect("Failed to build XML attribute escaper")
});

// Use LeftmostLongest to ensure longer entities are matched first (e.g., &amp; instead of &lt;)
static XML_UNESCAPER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .match_kind(MatchKind::LeftmostLongest)
        .build(["&amp;", "&lt;", "&gt;", "&quot;", "&apos;"])
        .expect("Failed to build XML unescaper")
});

/// Escape character data for use between tags.
///
/// # Examples
///
/// ```
/// use litchi_opc::common::xml::escape_text;
/// assert_eq!(escape_text("a & b"), "a &amp; b");
/// assert_eq!(escape_text("\"quoted\" <tag>"), "\"quoted\" &lt;tag&gt;");
/// ```
#[inline]
pub fn escape_text(s: &str) -> String {
    TEXT_ESCAPER.replace_all(s, &["&amp;", "&lt;", "&gt;"])
}

/// Escape a value for use inside a double-quoted attribute.
///
/// Literal `\n`, `\r` and `\t` are written as character references so they
/// survive a subsequent parse unchanged.
///
/// # Examples
///
/// ```
/// use litchi_opc::common::xml::escape_attr;
/// assert_eq!(escape_attr("<foo & \"bar\">"), "&lt;foo &amp; &quot;bar&quot;&gt;");
/// assert_eq!(escape_attr("line1\nline2\t"), "line1&#10;line2&#9;");
/// ```
#[inline]
pub fn escape_attr(s: &str) -> String {
    ATTR_ESCAPER.replace_all(
        s,
        &["&amp;", "&lt;", "&gt;", "&quot;", "&#10;", "&#13;", "&#9;"],
    )
}

/// Unescape the five predefined XML entities and numeric character references.
///
/// Unknown or malformed references are left unchanged.
///
/// # Examples
///
/// ```
/// use litchi_opc::common::xml::unescape_xml;
/// assert_eq!(unescape_xml("&lt;a &amp; b&gt;"), "<a & b>");
/// assert_eq!(unescape_xml("&amp;lt;"), "&lt;"); // &amp; is matched first
/// assert_eq!(unescape_xml("tab&#9;nl&#xA;"), "tab\tnl\n");
/// assert_eq!(unescape_xml("&invalid;"), "&invalid;");
/// ```
pub fn unescape_xml(s: &str) -> String {
    if !s.contains("&#") {
        return XML_UNESCAPER.replace_all(s, &["&", "<", ">", "\"", "'"]);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match tail.find(';') {
            Some(end) => match resolve_reference(&tail[1..end]) {
                Some(c) => {
                    out.push(c);
                    rest = &tail[end + 1..];
                },
                None => {
                    out.push('&');
                    rest = &tail[1..];
                },
            },
            None => {
                out.push_str(tail);
                rest = "";
            },
        }
    }
    out.push_str(rest);
    out
}

/// Resolve an entity or character reference name (the text between `&` and `;`).
///
/// # Examples
///
/// ```
/// use litchi_opc::common::xml::resolve_reference;
/// assert_eq!(resolve_reference("amp"), Some('&'));
/// assert_eq!(resolve_reference("#x41"), Some('A'));
/// assert_eq!(resolve_reference("#65"), Some('A'));
/// assert_eq!(resolve_reference("nbsp"), None);
/// ```
pub fn resolve_reference(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_attr_roundtrip() {
        let original = "a\nb\r\tc & \"d\"";
        assert_eq!(unescape_xml(&escape_attr(original)), original);
    }

    #[test]
    fn test_escape_text_leaves_quotes() {
        assert_eq!(escape_text("it's \"ok\""), "it's \"ok\"");
    }

    #[test]
    fn test_unescape_incomplete_reference() {
        assert_eq!(unescape_xml("&#65"), "&#65");
        assert_eq!(unescape_xml("x &#zz; y"), "x &#zz; y");
    }
}
