//! Outbound message chunking and Slack link cleanup.

use crate::util::{floor_char_boundary, static_regex};
use regex::Regex;
use std::sync::OnceLock;

/// Slack rejects (or silently mangles) messages much beyond this many bytes.
pub const SLACK_MAX_MESSAGE_LENGTH: usize = 3500;
/// HipChat's room message limit.
pub const HIPCHAT_MAX_MESSAGE_LENGTH: usize = 10000;

pub const TRUNCATION_NOTICE: &str = "Message too long, truncating...";

/// Split an outbound message into backend-sized chunks.
///
/// Each chunk ends at the last newline or space at or before `max_len`.
/// When a window has no boundary at all, a truncation notice is emitted
/// and the window is hard-cut at the limit.
pub fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let limit = floor_char_boundary(remaining, max_len);
        // A separator sitting right at the limit still counts
        let search_area = &remaining[..floor_char_boundary(remaining, max_len.saturating_add(1))];

        // Prefer splitting at newline, then space
        let boundary = search_area
            .rfind('\n')
            .or_else(|| search_area.rfind(' '))
            .filter(|pos| *pos > 0 && *pos <= max_len);

        match boundary {
            Some(pos) => {
                chunks.push(remaining[..pos].to_string());
                remaining = &remaining[pos + 1..];
            }
            None => {
                // Hard split at the limit, never inside a codepoint
                let cut = if limit == 0 {
                    remaining.chars().next().map_or(remaining.len(), char::len_utf8)
                } else {
                    limit
                };
                chunks.push(TRUNCATION_NOTICE.to_string());
                chunks.push(remaining[..cut].to_string());
                remaining = &remaining[cut..];
            }
        }
    }

    chunks
}

fn labelled_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"<https?://[^|>]+\|([^>]+)>"))
}

fn bare_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| static_regex(r"<(https?://[^>]+)>"))
}

/// Undo Slack's auto-linking so patterns see what the user typed.
///
/// `<http://example.com|example.com>` becomes `example.com`, and
/// `<http://example.com>` becomes `http://example.com`.
pub fn unlink_slack(text: &str) -> String {
    let text = labelled_link_re().replace_all(text, "$1");
    bare_link_re().replace_all(&text, "$1").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_short_message() {
        let msg = "Hello, world!";
        let chunks = split_message(msg, SLACK_MAX_MESSAGE_LENGTH);
        assert_eq!(chunks, vec![msg.to_string()]);
    }

    #[test]
    fn split_exact_limit() {
        let msg = "a ".repeat(SLACK_MAX_MESSAGE_LENGTH / 2);
        let chunks = split_message(&msg, SLACK_MAX_MESSAGE_LENGTH);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), SLACK_MAX_MESSAGE_LENGTH);
    }

    #[test]
    fn split_at_word_boundary() {
        let msg = format!("{} tail", "word ".repeat(SLACK_MAX_MESSAGE_LENGTH / 5));
        let chunks = split_message(&msg, SLACK_MAX_MESSAGE_LENGTH);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= SLACK_MAX_MESSAGE_LENGTH);
            assert!(!chunk.ends_with(' '));
            assert_ne!(chunk, TRUNCATION_NOTICE);
        }
        assert!(chunks.last().unwrap().ends_with("tail"));
    }

    #[test]
    fn split_prefers_newline() {
        let msg = "first line\nsecond line";
        let chunks = split_message(msg, 15);
        assert_eq!(chunks, vec!["first line", "second line"]);
    }

    #[test]
    fn split_without_boundary_truncates_with_notice() {
        let msg = "a".repeat(25);
        let chunks = split_message(&msg, 10);
        assert_eq!(chunks[0], TRUNCATION_NOTICE);
        assert_eq!(chunks[1], "a".repeat(10));
        let rejoined: String = chunks
            .iter()
            .filter(|c| c.as_str() != TRUNCATION_NOTICE)
            .map(String::as_str)
            .collect();
        assert_eq!(rejoined, msg);
    }

    #[test]
    fn split_uses_boundary_exactly_at_limit() {
        assert_eq!(split_message("aaaa bbb", 4), vec!["aaaa", "bbb"]);
        assert_eq!(split_message("abcd\nefgh", 4), vec!["abcd", "efgh"]);
    }

    #[test]
    fn split_never_cuts_inside_codepoint() {
        let msg = "é".repeat(20);
        let chunks = split_message(&msg, 7);
        for chunk in chunks {
            assert!(chunk.len() <= 7 || chunk == TRUNCATION_NOTICE);
        }
    }

    #[test]
    fn split_empty_message() {
        assert_eq!(split_message("", 10), vec![String::new()]);
    }

    #[test]
    fn unlink_labelled_and_bare_links() {
        assert_eq!(
            unlink_slack("see <http://example.com|example.com> now"),
            "see example.com now"
        );
        assert_eq!(
            unlink_slack("go to <https://foo.bar/x?y=1>"),
            "go to https://foo.bar/x?y=1"
        );
        assert_eq!(unlink_slack("<@U123> hi"), "<@U123> hi");
    }
}
