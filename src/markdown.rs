//! Deterministic Markdown normalisation.
//!
//! Two producers feed text into the cache: the vision backend (model output,
//! prone to stray fences and broken tables) and the local text extractor
//! (raw text layer, prone to CR line endings, form feeds and long runs of
//! blank lines). Both pass through [`tidy`]; model output additionally goes
//! through [`clean_model_output`].

use once_cell::sync::Lazy;
use regex::Regex;

static RE_WRAPPING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\n(.*?)\n```[ \t]*$").unwrap());

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

const INVISIBLE: [char; 7] = [
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}', '\u{000C}',
];

/// Normalise whitespace without touching content.
///
/// Line endings become `\n`, invisible format characters are dropped,
/// trailing whitespace is trimmed per line and blank-line runs collapse to a
/// single blank line. The result has no trailing newline; empty input stays
/// empty.
pub fn tidy(input: &str) -> String {
    let unified = input.replace("\r\n", "\n").replace('\r', "\n");
    let visible: String = unified.chars().filter(|c| !INVISIBLE.contains(c)).collect();
    let trimmed = visible
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    RE_BLANK_RUN
        .replace_all(trimmed.trim_matches('\n'), "\n\n")
        .into_owned()
}

/// Clean one page of model-generated Markdown.
pub fn clean_model_output(input: &str) -> String {
    let unfenced = match RE_WRAPPING_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    };
    repair_tables(&tidy(&unfenced))
}

/// Join page texts from a text layer into one document.
///
/// Pages with no text are skipped so scanned covers do not leave gaps.
pub fn join_pages<I, S>(pages: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    pages
        .into_iter()
        .map(|p| tidy(p.as_ref()))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Insert a missing header separator below the first row of each pipe table.
fn repair_tables(input: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut previous_was_row = false;
    let mut lines = input.lines().peekable();

    while let Some(line) = lines.next() {
        let row = is_pipe_row(line);
        out.push(line.to_string());
        if row && !previous_was_row && !is_separator(line) {
            let next = lines.peek().copied().unwrap_or_default();
            if is_pipe_row(next) && !is_separator(next) {
                let columns = line.trim().matches('|').count().saturating_sub(1).max(1);
                out.push(format!("|{}", " --- |".repeat(columns)));
            }
        }
        previous_was_row = row;
    }

    out.join("\n")
}

fn is_pipe_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.contains('-') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}
