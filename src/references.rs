use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};

/// `@token` at the start of the message or after whitespace
static FILE_REFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|\s)@([^\s@]+)").unwrap());

/// Punctuation that commonly trails a reference in prose ("see @a.rs, then...")
const TRAILING_PUNCTUATION: &[char] = &[',', '.', ';', ':', '!', '?', ')', ']', '\'', '"'];

/// Rewrite `@token` references to absolute paths.
///
/// A token is rewritten only when it names an existing file or directory,
/// relative to `workdir` (or absolute, or `~/`-prefixed). Anything else is
/// left exactly as written.
pub fn expand_file_references(message: &str, workdir: &Path) -> String {
    FILE_REFERENCE
        .replace_all(message, |caps: &Captures| {
            let lead = &caps[1];
            let token = &caps[2];

            if let Some(path) = resolve(token, workdir) {
                return format!("{}@{}", lead, path.display());
            }

            let trimmed = token.trim_end_matches(TRAILING_PUNCTUATION);
            if !trimmed.is_empty() && trimmed.len() < token.len() {
                if let Some(path) = resolve(trimmed, workdir) {
                    return format!("{}@{}{}", lead, path.display(), &token[trimmed.len()..]);
                }
            }

            caps[0].to_string()
        })
        .into_owned()
}

fn resolve(token: &str, workdir: &Path) -> Option<PathBuf> {
    let candidate = if let Some(rest) = token.strip_prefix("~/") {
        dirs::home_dir()?.join(rest)
    } else {
        let path = Path::new(token);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            workdir.join(path)
        }
    };
    // canonicalize fails for paths that don't exist
    candidate.canonicalize().ok()
}
