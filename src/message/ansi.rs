//! Terminal escape stripping for stderr output

use regex::Regex;
use std::sync::LazyLock;

// CSI sequences, OSC sequences terminated by BEL or ST, and two-byte escapes
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("ANSI escape regex should be valid")
});

/// Remove terminal control sequences and stray carriage returns
#[must_use]
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").replace('\r', "")
}
