//! Wiki-link scanning and rewriting for `Store::update_page_title` /
//! `Store::move_page`.
//!
//! Tokens have the form `[[Target]]`, `[[Target|Alias]]`, `[[Target#Heading]]`
//! or an embed variant `![[Target]]`. Only the `Target` portion is ever
//! rewritten; everything else in the token is preserved verbatim. Content
//! is only ever scanned at the granularity of a whole `bullet` block: a
//! `code`/`fence` block's content is never passed to these functions, since
//! its kind already marks it opaque to the wiki-link scanner.

use std::sync::OnceLock;

use regex::Regex;

static WIKI_LINK_REGEX: OnceLock<Regex> = OnceLock::new();

fn wiki_link_regex() -> &'static Regex {
    WIKI_LINK_REGEX.get_or_init(|| Regex::new(r"(!?)\[\[([^\]]+)\]\]").unwrap())
}

/// Split a token's inner content (`Target|Alias#Heading` etc.) into its
/// target and the verbatim suffix that follows it (starting at `|` or `#`,
/// if present).
fn split_target(inner: &str) -> (&str, &str) {
    let cut = inner
        .find('|')
        .into_iter()
        .chain(inner.find('#'))
        .min();
    match cut {
        Some(idx) => (&inner[..idx], &inner[idx..]),
        None => (inner, ""),
    }
}

/// Whether `content` contains at least one wiki-link whose target is
/// exactly `title` (case-sensitive).
pub fn references_title(content: &str, title: &str) -> bool {
    wiki_link_regex().captures_iter(content).any(|cap| {
        let inner = cap.get(2).map_or("", |m| m.as_str());
        split_target(inner).0 == title
    })
}

/// Rewrite every wiki-link targeting exactly `old_title` to target
/// `new_title`, preserving embed markers, aliases, headings and block
/// refs. Returns the rewritten content and whether anything changed.
pub fn rewrite_title(content: &str, old_title: &str, new_title: &str) -> (String, bool) {
    let mut changed = false;
    let rewritten = wiki_link_regex()
        .replace_all(content, |cap: &regex::Captures| {
            let bang = cap.get(1).map_or("", |m| m.as_str());
            let inner = cap.get(2).map_or("", |m| m.as_str());
            let (target, suffix) = split_target(inner);
            if target == old_title {
                changed = true;
                format!("{bang}[[{new_title}{suffix}]]")
            } else {
                cap.get(0).unwrap().as_str().to_string()
            }
        })
        .into_owned();
    (rewritten, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_plain_reference() {
        assert!(references_title("see [[Alpha]] here", "Alpha"));
        assert!(!references_title("see [[Beta]] here", "Alpha"));
    }

    #[test]
    fn rewrites_plain_target() {
        let (out, changed) = rewrite_title("see [[Alpha]] here", "Alpha", "Gamma");
        assert!(changed);
        assert_eq!(out, "see [[Gamma]] here");
    }

    #[test]
    fn rewrite_preserves_alias() {
        let (out, changed) = rewrite_title("[[Alpha|shown text]]", "Alpha", "Gamma");
        assert!(changed);
        assert_eq!(out, "[[Gamma|shown text]]");
    }

    #[test]
    fn rewrite_preserves_heading_and_blockref() {
        let (out, _) = rewrite_title("[[Alpha#Section 1]]", "Alpha", "Gamma");
        assert_eq!(out, "[[Gamma#Section 1]]");

        let (out, _) = rewrite_title("[[Alpha#^abc123]]", "Alpha", "Gamma");
        assert_eq!(out, "[[Gamma#^abc123]]");
    }

    #[test]
    fn rewrite_preserves_embed_marker() {
        let (out, _) = rewrite_title("![[Alpha]]", "Alpha", "Gamma");
        assert_eq!(out, "![[Gamma]]");
    }

    #[test]
    fn rewrite_is_exact_match_only() {
        let (out, changed) = rewrite_title("[[Alphabet]]", "Alpha", "Gamma");
        assert!(!changed);
        assert_eq!(out, "[[Alphabet]]");
    }

    #[test]
    fn rewrite_leaves_unrelated_links_untouched() {
        let (out, changed) = rewrite_title("[[Alpha]] and [[Beta]]", "Alpha", "Gamma");
        assert!(changed);
        assert_eq!(out, "[[Gamma]] and [[Beta]]");
    }
}
