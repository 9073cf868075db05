//! Output scrubbing shared by the skills.
//!
//! Skill output re-enters model context, so everything fetched from outside
//! the trust boundary is treated as adversarial: HTML, script-ish URIs,
//! control characters, and known prompt-injection phrasings are stripped
//! before the text is returned.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

// Specific markers come before the generic HTML-tag alternative so e.g.
// `<<SYS>>` is consumed whole instead of partially as a tag.
static SUSPICIOUS: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(concat!(
        r"<<SYS>>",
        r"|\[INST\]",
        r"|<[^>]+>",
        r"|javascript:",
        r"|data:",
        r"|ignore\s+previous",
        r"|system\s+prompt",
        r"|disregard\s+instructions",
        r"|you\s+are\s+now\b",
        r"|new\s+instructions?:",
    ))
    .case_insensitive(true)
    .build()
    .expect("suspicious pattern must compile")
});

// Control characters except \t \n \r.
static CTRL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f]").unwrap());

/// Strip control characters and suspicious patterns from text headed back
/// into model context.
pub fn scrub(text: &str) -> String {
    let cleaned = CTRL_CHARS.replace_all(text, "");
    SUSPICIOUS.replace_all(&cleaned, "").into_owned()
}

/// Truncate to `max_chars` characters. Returns the clipped string and
/// whether clipping happened.
pub fn clip(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        (text.to_string(), false)
    } else {
        (text.chars().take(max_chars).collect(), true)
    }
}
