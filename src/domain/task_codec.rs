use crate::domain::models::{TaskEntry, TaskStatus};

pub const MARKER_PREFIX: &str = "[STATUS:";
const MARKER_SUFFIX: char = ']';

/// Parses the stored text of a slot into its entries.
///
/// Blank lines are skipped. The first `[STATUS:...]` marker of a line is
/// removed and the remainder trimmed to form the content; lines without a
/// marker, or with an unknown status word, decode as `initial`.
pub fn decode(task_text: &str) -> Vec<TaskEntry> {
    task_text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(decode_line)
        .collect()
}

pub fn encode(entries: &[TaskEntry]) -> String {
    entries
        .iter()
        .map(encode_entry)
        .collect::<Vec<_>>()
        .join("\n")
}

fn encode_entry(entry: &TaskEntry) -> String {
    format!(
        "{} {MARKER_PREFIX}{}{MARKER_SUFFIX}",
        entry.content,
        entry.status.as_str()
    )
}

fn decode_line(line: &str) -> Option<TaskEntry> {
    let (content, status) = match split_marker(line) {
        Some((before, status_word, after)) => {
            let status = TaskStatus::parse(status_word).unwrap_or_else(|| {
                tracing::debug!(status = status_word, "unknown status marker, treating as initial");
                TaskStatus::Initial
            });
            (format!("{before}{after}").trim().to_string(), status)
        }
        None => (line.trim().to_string(), TaskStatus::Initial),
    };

    if content.is_empty() {
        tracing::debug!(line, "dropping task line without content");
        return None;
    }
    Some(TaskEntry { content, status })
}

fn split_marker(line: &str) -> Option<(&str, &str, &str)> {
    let start = line.find(MARKER_PREFIX)?;
    let status_start = start + MARKER_PREFIX.len();
    let status_len = line[status_start..].find(MARKER_SUFFIX)?;
    let status_end = status_start + status_len;
    Some((
        &line[..start],
        &line[status_start..status_end],
        &line[status_end + MARKER_SUFFIX.len_utf8()..],
    ))
}
