//! Pane text markers.
//!
//! Every regex the detector, the extractor and the activity classifier look
//! for lives in [`MARKER_TABLE`], keyed by [`MarkerKind`], so the three never
//! disagree about what a spinner or a prompt looks like.

use once_cell::sync::Lazy;
use regex::Regex;

/// Number of non-blank trailing lines considered "live" screen content.
pub const LIVE_TAIL_LINES: usize = 20;

/// Named categories of pane text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// Spinner glyph or a transient status word
    Processing,
    /// First line of a Gemini reply
    ReplyStart,
    /// Interactive yes/no confirmation
    PermissionPrompt,
    /// The input prompt Gemini shows when it waits for a message
    PromptToken,
    /// Shell mode toggled inside the CLI
    ShellMode,
    /// Footer and hint lines that are never part of a reply
    StatusChrome,
    /// Markdown code fence
    CodeFence,
    /// Top edge of a bordered box
    BoxOpen,
    /// Bottom edge of a bordered box
    BoxClose,
    /// Bullet or numbered list item
    ListItem,
    /// A user message echoed into the history
    UserEcho,
    /// Error output from the CLI itself
    Error,
}

const MARKER_TABLE: &[(MarkerKind, &str)] = &[
    (
        MarkerKind::Processing,
        r"[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]|(?i)^\s*(?:translating|searching|processing|thinking)\b[^.…]*(?:\.\.\.|…)",
    ),
    (MarkerKind::ReplyStart, r"^\s*✦"),
    (MarkerKind::PermissionPrompt, r"Do you want to proceed\?"),
    (
        MarkerKind::PromptToken,
        r"^\s*gemini>|^\s*│?\s*>\s*(?:Type your message[^│]*)?│?\s*$",
    ),
    (MarkerKind::ShellMode, r"(?i)shell mode enabled"),
    (
        MarkerKind::StatusChrome,
        r"(?i)\(esc to (?:cancel|interrupt)|press esc|^\s*using \d+ \S+\.md files?|context left\)|^\s*loaded cached credentials\.",
    ),
    (MarkerKind::CodeFence, r"^\s*(?:│\s*)?(?:```|~~~)"),
    (MarkerKind::BoxOpen, r"^\s*[╭┌]"),
    (MarkerKind::BoxClose, r"^\s*[╰└]"),
    (MarkerKind::ListItem, r"^\s*(?:[-*+•]|\d+[.)])\s+\S"),
    (MarkerKind::UserEcho, r"^\s*(?:│\s*)?(?:You:|>)\s+\S"),
    (
        MarkerKind::Error,
        r"^\s*(?i:error):|^\s*✕|Exception|FAILED|panicked|(?i:fatal):",
    ),
];

static MARKERS: Lazy<Vec<(MarkerKind, Regex)>> = Lazy::new(|| {
    MARKER_TABLE
        .iter()
        .map(|(kind, pattern)| (*kind, Regex::new(pattern).unwrap()))
        .collect()
});

fn pattern(kind: MarkerKind) -> &'static Regex {
    MARKERS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, re)| re)
        .unwrap_or_else(|| unreachable!("every MarkerKind has a table entry"))
}

/// Whether a single line carries the given marker
pub fn matches(kind: MarkerKind, line: &str) -> bool {
    pattern(kind).is_match(line)
}

/// Whether any of the lines carries the given marker
pub fn any_line<'a>(kind: MarkerKind, lines: impl IntoIterator<Item = &'a str>) -> bool {
    lines.into_iter().any(|line| matches(kind, line))
}

/// Number of lines in `text` that carry the given marker
pub fn count_lines(kind: MarkerKind, text: &str) -> usize {
    text.lines().filter(|line| matches(kind, line)).count()
}

/// The last [`LIVE_TAIL_LINES`] non-blank lines of a snapshot, oldest first.
///
/// tmux pads captures with empty rows below the cursor, so blank lines are
/// skipped before counting.
pub fn live_tail(snapshot: &str) -> Vec<&str> {
    let mut tail: Vec<&str> = snapshot
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .take(LIVE_TAIL_LINES)
        .collect();
    tail.reverse();
    tail
}

/// Reply-start and list lines are content even when they mention a status
/// word ("✦ Searching the docs turned up...")
fn is_content(line: &str) -> bool {
    matches(MarkerKind::ReplyStart, line) || matches(MarkerKind::ListItem, line)
}

/// A spinner or status line showing that Gemini is still working
pub fn is_live_status(line: &str) -> bool {
    !is_content(line) && matches(MarkerKind::Processing, line)
}

/// Whether any line of the live tail shows Gemini still working
pub fn shows_activity(snapshot: &str) -> bool {
    live_tail(snapshot).into_iter().any(is_live_status)
}

/// Lines that carry no reply content: blank, spinner, or status chrome
pub fn is_noise(line: &str) -> bool {
    if line.trim().is_empty() {
        return true;
    }
    if is_content(line) {
        return false;
    }
    is_live_status(line) || matches(MarkerKind::StatusChrome, line)
}

/// Rough count of conversation turns visible in a transcript
pub fn approximate_message_count(transcript: &str) -> usize {
    transcript
        .lines()
        .filter(|line| {
            matches(MarkerKind::ReplyStart, line)
                || (matches(MarkerKind::UserEcho, line) && !matches(MarkerKind::PromptToken, line))
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_pattern() {
        let kinds = [
            MarkerKind::Processing,
            MarkerKind::ReplyStart,
            MarkerKind::PermissionPrompt,
            MarkerKind::PromptToken,
            MarkerKind::ShellMode,
            MarkerKind::StatusChrome,
            MarkerKind::CodeFence,
            MarkerKind::BoxOpen,
            MarkerKind::BoxClose,
            MarkerKind::ListItem,
            MarkerKind::UserEcho,
            MarkerKind::Error,
        ];
        for kind in kinds {
            // Panics if the table is missing an entry
            let _ = pattern(kind);
        }
    }

    #[test]
    fn test_processing_markers() {
        assert!(matches(MarkerKind::Processing, "⠋ Working on it"));
        assert!(matches(MarkerKind::Processing, "thinking... (esc to cancel, 2s)"));
        assert!(matches(MarkerKind::Processing, "SEARCHING the web..."));
        assert!(!matches(MarkerKind::Processing, "✦ The answer is 42"));
        assert!(!matches(MarkerKind::Processing, "rethinkingly..."));
        assert!(!matches(MarkerKind::Processing, "Processing happens lazily in iterators."));
        assert!(!matches(MarkerKind::Processing, "the thinking... part"));
    }

    #[test]
    fn test_status_words_in_replies_are_not_activity() {
        assert!(is_live_status("⠼ Thinking... (esc to cancel, 4s)"));
        assert!(is_live_status("Searching the web..."));
        assert!(!is_live_status("✦ Processing happens lazily in iterators."));
        assert!(!is_live_status("- Thinking... about ownership helps"));

        let reply = "> explain\n✦ Processing happens lazily in iterators.\nProcessing stops at the first None.\n│ > Type your message │\n";
        assert!(!shows_activity(reply));
        assert!(shows_activity("> explain\n⠋ Thinking... (esc to cancel, 1s)\n"));
    }

    #[test]
    fn test_prompt_token() {
        assert!(matches(MarkerKind::PromptToken, "gemini> "));
        assert!(matches(MarkerKind::PromptToken, ">"));
        assert!(matches(
            MarkerKind::PromptToken,
            "│ > Type your message or @path/to/file                 │"
        ));
        assert!(!matches(MarkerKind::PromptToken, "> quoted text in a reply"));
    }

    #[test]
    fn test_noise_classification() {
        assert!(is_noise(""));
        assert!(is_noise("   "));
        assert!(is_noise("⠹ Thinking..."));
        assert!(is_noise("Using 2 GEMINI.md files"));
        assert!(!is_noise("✦ Searching found three matches"));
        assert!(!is_noise("- Processing happens in two stages"));
        assert!(!is_noise("plain reply text"));
    }

    #[test]
    fn test_live_tail_skips_padding() {
        let mut snapshot = String::new();
        for i in 0..30 {
            snapshot.push_str(&format!("line {}\n", i));
        }
        snapshot.push_str("\n\n\n");
        let tail = live_tail(&snapshot);
        assert_eq!(tail.len(), LIVE_TAIL_LINES);
        assert_eq!(tail.first(), Some(&"line 10"));
        assert_eq!(tail.last(), Some(&"line 29"));
    }

    #[test]
    fn test_approximate_message_count() {
        let transcript = "> hello\n✦ Hi there\n> what is rust\n✦ A language\n│ > Type your message │";
        assert_eq!(approximate_message_count(transcript), 4);
    }
}
