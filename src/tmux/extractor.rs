use super::markers::{self, MarkerKind};

/// Messages longer than this are matched by their leading characters only,
/// since tmux wraps long input across several pane lines
const SHORT_MESSAGE_LIMIT: usize = 60;
const MATCH_PREFIX_CHARS: usize = 40;

/// Pull Gemini's reply to `outbound` out of a captured transcript.
///
/// Never fails: an unrecognisable transcript yields whatever survives noise
/// filtering, possibly an empty string. Content is delimited, never
/// reformatted.
pub fn extract(transcript: &str, outbound: &str) -> String {
    let lines: Vec<&str> = transcript.lines().collect();
    let region = candidate_region(&lines, outbound);
    delimit_reply(region)
}

fn candidate_region<'a>(lines: &'a [&'a str], outbound: &str) -> &'a [&'a str] {
    if let Some(echo) = find_echo(lines, outbound) {
        return &lines[echo + 1..];
    }

    if let Some(marker) = lines.iter().rposition(|line| {
        markers::is_live_status(line) || markers::matches(MarkerKind::ReplyStart, line)
    }) {
        return &lines[marker.saturating_sub(1)..];
    }

    if let Some(prompt) = lines
        .iter()
        .rposition(|line| markers::matches(MarkerKind::PromptToken, line))
    {
        let mut end = lines.len();
        while end > prompt + 1 && markers::is_noise(lines[end - 1]) {
            end -= 1;
        }
        return &lines[prompt + 1..end];
    }

    lines
}

/// Index of the last line echoing the outbound message
fn find_echo(lines: &[&str], outbound: &str) -> Option<usize> {
    let first_line = outbound.lines().map(str::trim).find(|l| !l.is_empty())?;
    let needle: String = if first_line.chars().count() > SHORT_MESSAGE_LIMIT {
        first_line.chars().take(MATCH_PREFIX_CHARS).collect()
    } else {
        first_line.to_string()
    };
    lines.iter().rposition(|line| line.contains(needle.as_str()))
}

fn delimit_reply(region: &[&str]) -> String {
    let mut reply: Vec<&str> = Vec::new();
    let mut started = false;
    let mut in_fence = false;
    // Index in `reply` where a still-open bordered box begins
    let mut open_box: Option<usize> = None;

    for &line in region {
        if !started {
            if markers::is_noise(line) {
                continue;
            }
            started = true;
        }

        if !in_fence
            && (markers::matches(MarkerKind::PromptToken, line)
                || markers::matches(MarkerKind::ShellMode, line))
        {
            // The input box drawn around the prompt is not part of the reply
            if let Some(at) = open_box {
                reply.truncate(at);
            }
            break;
        }

        if markers::matches(MarkerKind::CodeFence, line) {
            in_fence = !in_fence;
        } else if !in_fence {
            if markers::matches(MarkerKind::BoxOpen, line) {
                open_box = Some(reply.len());
            } else if markers::matches(MarkerKind::BoxClose, line) {
                open_box = None;
            }
        }

        let blank = line.trim().is_empty();
        let inside_block = in_fence || open_box.is_some();
        if blank && !inside_block && reply.last().is_some_and(|prev| prev.trim().is_empty()) {
            continue;
        }
        reply.push(line);
    }

    while reply.last().is_some_and(|line| line.trim().is_empty()) {
        reply.pop();
    }
    reply.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_reply_after_echo() {
        let transcript = "\
Tips for getting started
You: @config.json summarize
⠋ Thinking...
⠙ Thinking...
⠹ Searching...
✦ This file configures...
gemini> ";
        assert_eq!(
            extract(transcript, "@config.json summarize"),
            "✦ This file configures..."
        );
    }

    #[test]
    fn test_uses_last_echo() {
        let transcript = "\
> what is 2+2
✦ 4
> what is 2+2
✦ Still 4.
>";
        assert_eq!(extract(transcript, "what is 2+2"), "✦ Still 4.");
    }

    #[test]
    fn test_long_message_matches_prefix() {
        let message = "Please review the following module and list every function that allocates on the heap";
        // tmux wrapped the echoed input after 50 columns
        let transcript = format!(
            "> {}\n{}\n✦ Only `build_index` allocates.\n│ > Type your message │",
            &message[..50],
            &message[50..]
        );
        let reply = extract(&transcript, message);
        assert!(reply.ends_with("✦ Only `build_index` allocates."));
        assert!(!reply.contains("Type your message"));
    }

    #[test]
    fn test_falls_back_to_reply_marker() {
        let transcript = "\
earlier output

✦ Rust has no garbage collector.
It uses ownership instead.

>";
        assert_eq!(
            extract(transcript, "message that was never echoed"),
            "✦ Rust has no garbage collector.\nIt uses ownership instead."
        );
    }

    #[test]
    fn test_falls_back_to_prompt_token() {
        let transcript = "gemini> \nplain answer line\nsecond line\n\nUsing 1 GEMINI.md file\n";
        assert_eq!(
            extract(transcript, "not echoed"),
            "plain answer line\nsecond line"
        );
    }

    #[test]
    fn test_keeps_code_fence_content() {
        let transcript = "\
> show a loop
✦ Here you go:
```rust
for i in 0..3 {

    // gemini> is just text in here
    println!(\"{}\", i);
}
```


Done.
gemini> ";
        assert_eq!(
            extract(transcript, "show a loop"),
            "✦ Here you go:\n```rust\nfor i in 0..3 {\n\n    // gemini> is just text in here\n    println!(\"{}\", i);\n}\n```\n\nDone."
        );
    }

    #[test]
    fn test_drops_input_box_and_keeps_closed_boxes() {
        let transcript = "\
> read the file
╭──────────────────────╮
│ ✔ ReadFile main.rs   │
│                      │
╰──────────────────────╯
✦ main.rs starts the server.

╭──────────────────────╮
│ > Type your message  │
╰──────────────────────╯
Using 1 GEMINI.md file";
        assert_eq!(
            extract(transcript, "read the file"),
            "╭──────────────────────╮\n│ ✔ ReadFile main.rs   │\n│                      │\n╰──────────────────────╯\n✦ main.rs starts the server."
        );
    }

    #[test]
    fn test_shell_mode_ends_reply() {
        let transcript = "> run ls\n✦ Listing files.\nShell mode enabled (esc to disable)\n$ ls";
        assert_eq!(extract(transcript, "run ls"), "✦ Listing files.");
    }

    #[test]
    fn test_never_fails_on_degenerate_input() {
        for transcript in ["", "\n\n\n", "⠋\n⠙\n⠹", "gemini> ", "│ > Type your message │\n\n"] {
            for message in ["", "hello", "\n"] {
                let reply = extract(transcript, message);
                assert!(!reply.ends_with('\n'));
                assert!(reply.lines().last().map_or(true, |l| !l.trim().is_empty()));
            }
        }
    }

    #[test]
    fn test_no_trailing_blank_lines() {
        let transcript = "> hi\n✦ Hello!\n\n\n   \n";
        assert_eq!(extract(transcript, "hi"), "✦ Hello!");
    }
}
