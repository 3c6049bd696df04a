//! Final report builder.
//!
//! Formats a completed run into human-readable lines for text mode and the
//! TUI answer panel.

use crate::model::FinalResult;

/// Pre-formatted lines for presentation layers.
pub(crate) struct Report {
    pub lines: Vec<String>,
}

pub(crate) fn build_report(result: &FinalResult) -> Report {
    let mut lines = Vec::new();

    lines.push(format!("Question: {}", result.question));
    lines.push(format!("Document: {}", result.doc_id));
    lines.push(format!("Relevance: {}", verdict(result.is_relevant)));
    lines.push(String::new());

    match result.draft_answer.as_deref() {
        Some(answer) if !answer.trim().is_empty() => {
            lines.push("Answer:".into());
            for line in answer.lines() {
                lines.push(format!("  {line}"));
            }
        }
        _ => lines.push("No answer was produced.".into()),
    }

    if let Some(report) = result.verification_report.as_deref() {
        if !report.trim().is_empty() {
            lines.push(String::new());
            lines.push("Verification:".into());
            for line in report.lines() {
                lines.push(format!("  {line}"));
            }
        }
    }

    if !result.sources.is_empty() {
        lines.push(String::new());
        lines.push(format!("Sources ({}):", result.sources.len()));
        for (i, source) in result.sources.iter().enumerate() {
            let origin = source
                .metadata
                .get("source")
                .or_else(|| source.metadata.get("doc_id"))
                .and_then(|v| v.as_str())
                .unwrap_or("?");
            lines.push(format!(
                "  {}. [{}] {}",
                i + 1,
                origin,
                snippet(&source.content, 100)
            ));
        }
    }

    Report { lines }
}

fn verdict(is_relevant: Option<bool>) -> &'static str {
    match is_relevant {
        Some(true) => "relevant",
        Some(false) => "not relevant",
        None => "undetermined",
    }
}

/// Collapse whitespace and truncate to at most `max` characters.
fn snippet(content: &str, max: usize) -> String {
    let collapsed: Vec<&str> = content.split_whitespace().collect();
    let collapsed = collapsed.join(" ");
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}
