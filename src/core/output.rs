//! Bounded text rendering for observations and terminal output.

pub const TRUNCATION_MARKER: &str = " ...[truncated]";

/// Cut `input` to `max_chars` characters, appending the truncation marker
/// when anything was dropped.
pub fn truncate_observation(input: &str, max_chars: usize) -> String {
    let mut chars = input.chars();
    let kept: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}{}", kept, TRUNCATION_MARKER)
    } else {
        kept
    }
}

/// Collapse newlines/extra whitespace and bound length for a one-line preview.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Fixed-width text table. Cells wider than their column are clipped.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = headers
        .iter()
        .map(|h| h.chars().count().max(10))
        .collect();

    let pad = |cell: &str, width: usize| -> String {
        let clipped: String = cell.chars().take(width).collect();
        format!("{:<width$}", clipped, width = width)
    };

    let header = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| pad(h, *w))
        .collect::<Vec<_>>()
        .join(" | ");
    let separator = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("-+-");

    let mut lines = vec![header, separator];
    for row in rows {
        lines.push(
            row.iter()
                .zip(&widths)
                .map(|(cell, w)| pad(cell, *w))
                .collect::<Vec<_>>()
                .join(" | "),
        );
    }
    lines.join("\n")
}
