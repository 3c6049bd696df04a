use crate::model::{AskRequest, RunPhase, StageStatus};
use ratatui::style::Color;

/// Presentation-only state owned by the UI thread. Run state itself lives
/// in the controller and is read through its accessors.
pub struct UiState {
    pub question: String,
    pub doc_id: String,
    pub docs: Vec<String>,
    pub info: String,
    pub show_help: bool,
    pub scroll: u16,
    pub auto_save: bool,
    pub last_phase: RunPhase,
}

impl UiState {
    pub fn new(auto_save: bool, docs: Vec<String>, request: &AskRequest) -> Self {
        Self {
            question: request.question.clone(),
            doc_id: request.doc_id.clone(),
            docs,
            info: String::new(),
            show_help: false,
            scroll: 0,
            auto_save,
            last_phase: RunPhase::Idle,
        }
    }
}

/// Glyph and color for one stage row in the trace panel.
pub fn status_glyph(status: StageStatus) -> (&'static str, Color) {
    match status {
        StageStatus::Idle => ("·", Color::DarkGray),
        StageStatus::Running => ("▶", Color::Yellow),
        StageStatus::Done => ("✓", Color::Green),
        StageStatus::Error => ("✗", Color::Red),
    }
}

pub fn phase_color(phase: RunPhase) -> Color {
    match phase {
        RunPhase::Idle => Color::DarkGray,
        RunPhase::Running => Color::Yellow,
        RunPhase::Done => Color::Green,
        RunPhase::Error => Color::Red,
    }
}

pub fn phase_label(phase: RunPhase) -> &'static str {
    match phase {
        RunPhase::Idle => "idle",
        RunPhase::Running => "running",
        RunPhase::Done => "done",
        RunPhase::Error => "error",
    }
}
