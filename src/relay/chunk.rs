//! Splitting an assistant reply into deliverable messages.
//!
//! Replies are split at blank lines so each paragraph arrives as its own
//! message. File-search citation markers like `【4:0†source】` are removed
//! along with the whitespace that follows them.

const CITATION_OPEN: char = '【';
const CITATION_CLOSE: char = '】';

/// Split `reply` into trimmed, non-empty, citation-free chunks.
pub fn split_reply(reply: &str) -> Vec<String> {
    let normalized = reply.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .map(|chunk| strip_citations(chunk).trim().to_string())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

/// Remove every `【...】` marker and the whitespace right after it. An
/// unterminated marker is kept as text.
pub fn strip_citations(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find(CITATION_OPEN) {
        let after_open = &rest[open + CITATION_OPEN.len_utf8()..];
        let Some(close) = after_open.find(CITATION_CLOSE) else {
            break;
        };
        out.push_str(&rest[..open]);
        rest = after_open[close + CITATION_CLOSE.len_utf8()..]
            .trim_start_matches([' ', '\t']);
    }

    out.push_str(rest);
    out
}
