//! Output normalization: turn the model's tagged answer into display text.
//!
//! [`OutputNormalizer::normalize`] is total and idempotent. It never fails;
//! input without any section markers comes back trimmed and
//! whitespace-collapsed with its structure otherwise unchanged.

use std::sync::LazyLock;

use regex::Regex;

use crate::schema::OutputSchema;

static HORIZONTAL_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("static pattern is valid"));

static DEFAULT_NORMALIZER: LazyLock<OutputNormalizer> =
    LazyLock::new(|| OutputNormalizer::new(&OutputSchema::default()));

/// Strips a schema's section markers and canonicalizes whitespace and list items.
#[derive(Debug, Clone)]
pub struct OutputNormalizer {
    markers: Regex,
}

impl Default for OutputNormalizer {
    fn default() -> Self {
        DEFAULT_NORMALIZER.clone()
    }
}

impl OutputNormalizer {
    pub fn new(schema: &OutputSchema) -> Self {
        Self { markers: schema.marker_pattern() }
    }

    /// Normalize raw model output.
    ///
    /// 1. Remove every section marker, keeping inner content in order.
    /// 2. Collapse runs of spaces and tabs to one space and drop trailing
    ///    whitespace on each line.
    /// 3. Rewrite `N.` list markers at the start of a line as `N. ` and
    ///    make sure each list item is preceded by exactly one blank line.
    /// 4. Collapse consecutive blank lines to one.
    /// 5. Trim the result.
    pub fn normalize(&self, raw: &str) -> String {
        let stripped = self.strip_markers(raw);

        let mut lines: Vec<String> = Vec::new();
        for line in stripped.lines() {
            let collapsed = HORIZONTAL_WS.replace_all(line, " ");
            let line = collapsed.trim_end();

            if line.is_empty() {
                if lines.last().is_some_and(|l| !l.is_empty()) {
                    lines.push(String::new());
                }
                continue;
            }

            match split_list_item(line) {
                Some((number, body)) => {
                    if lines.last().is_some_and(|l| !l.is_empty()) {
                        lines.push(String::new());
                    }
                    if body.is_empty() {
                        lines.push(format!("{number}."));
                    } else {
                        lines.push(format!("{number}. {body}"));
                    }
                }
                None => lines.push(line.to_string()),
            }
        }

        lines.join("\n").trim().to_string()
    }

    /// Remove markers until none remain, so removing one cannot leave another behind.
    fn strip_markers(&self, raw: &str) -> String {
        let mut text = raw.to_string();
        while self.markers.is_match(&text) {
            text = self.markers.replace_all(&text, "").into_owned();
        }
        text
    }
}

/// Normalize with the default travel schema.
pub fn normalize(raw: &str) -> String {
    DEFAULT_NORMALIZER.normalize(raw)
}

/// Split `"  3.   Body"` into `("3", "Body")`.
///
/// The period must not be followed directly by a digit, so decimals such as
/// `4.5 stars` at the start of a line are left alone.
fn split_list_item(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    let digits = trimmed.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = trimmed[digits..].strip_prefix('.')?;
    if rest.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some((&trimmed[..digits], rest.trim_start()))
}
