//! Reply text transforms: display markup and speech-safe text

use std::sync::LazyLock;

use regex::Regex;

static BOLD_ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*{4}(.+?)\*{4}").unwrap());
static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static MARKERS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*+").unwrap());

/// Line break marker emitted in place of `\n`
pub const LINE_BREAK: &str = "<br>";

/// Convert assistant markup into display markup.
///
/// `****x****` becomes `<b><i>x</i></b>`, `**x**` becomes `<b>x</b>` and
/// newlines become [`LINE_BREAK`]. The four-asterisk rule must run first so
/// its markers are gone before the two-asterisk rule looks for pairs.
pub fn format_reply(text: &str) -> String {
    let text = BOLD_ITALIC.replace_all(text, "<b><i>$1</i></b>");
    let text = BOLD.replace_all(&text, "<b>$1</b>");
    text.replace('\n', LINE_BREAK)
}

/// Remove every run of asterisks so markers are never spoken
pub fn strip_markers(text: &str) -> String {
    MARKERS.replace_all(text, "").into_owned()
}
