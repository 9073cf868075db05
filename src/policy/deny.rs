//! Compiled-in shell-command deny list.
//!
//! These patterns live in the binary, not in the policy document, so no
//! configuration change or reload can weaken them. A match always yields
//! deny at critical risk.

use std::sync::LazyLock;

use regex::Regex;

static HARD_DENY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Destructive file operations
        r"\brm\s+(-[a-zA-Z]*)?r[a-zA-Z]*f",
        r"\brm\s+(-[a-zA-Z]*)?f[a-zA-Z]*r",
        r"\brm\s+-rf\b",
        // Dangerous permission changes
        r"\bchmod\s+777\b",
        r"\bchmod\s+-R\s+777\b",
        // Pipe-to-shell attacks
        r"\bcurl\b.*\|\s*(ba)?sh\b",
        r"\bwget\b.*\|\s*(ba)?sh\b",
        // Fork bombs
        r":\(\)\{.*\|.*&.*\};:",
        r"(?i)\bfork\s*bomb\b",
        // System destruction
        r"\bshutdown\b",
        r"\breboot\b",
        r"\bhalt\b",
        r"\binit\s+0\b",
        r"\bpoweroff\b",
        // Disk destruction
        r"\bmkfs\b",
        r"\bdd\s+.*of=/dev/",
        // Privilege escalation
        r"\bsudo\s+su\b",
        r"\bsu\s+-\s*$",
        r"\bpasswd\b",
        // Network exfiltration / reverse shells
        r"\bnc\s+-[a-zA-Z]*l",
        r"/dev/tcp/",
        // Package manager as root
        r"\bsudo\s+pip\b",
        r"\bsudo\s+npm\b",
        // History/log tampering
        r"\bhistory\s+-c\b",
        r">\s*/dev/null\s+2>&1\s*&\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("hard deny pattern must compile"))
    .collect()
});

/// Check a command string against the deny list. Returns the matching
/// pattern, or None when the command is not denied.
pub fn is_denied_command(command: &str) -> Option<&'static str> {
    HARD_DENY_PATTERNS
        .iter()
        .find(|p| p.is_match(command))
        .map(|p| p.as_str())
}
