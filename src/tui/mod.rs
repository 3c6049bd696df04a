mod export;
mod help;
mod state;

use crate::api::ApiClient;
use crate::cli::Cli;
use crate::model::{AskRequest, RunMessage, RunPhase};
use crate::orchestrator::RunController;
use crate::report;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use state::UiState;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc::UnboundedReceiver;

pub async fn run(args: Cli, client: ApiClient) -> Result<()> {
    let request = crate::cli::resolve_request(&args, &client).await?;
    let docs = client.list_docs().await.unwrap_or_default();

    let (controller, event_rx) = RunController::new(
        client,
        tokio::runtime::Handle::current(),
        args.stream_timeout.map(Into::into),
    );

    // TUI runs in a dedicated thread to keep blocking terminal I/O out of the
    // runtime. The controller moves with it; stream tasks stay on the runtime
    // via the handle it carries.
    let ui_handle =
        std::thread::spawn(move || run_threaded(args, request, docs, controller, event_rx));

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    match join_res {
        Ok(Ok(res)) => res,
        Ok(Err(_)) => Err(anyhow::anyhow!("TUI thread panicked")),
        Err(e) => Err(anyhow::anyhow!("TUI join failed: {e}")),
    }
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    args: Cli,
    request: AskRequest,
    docs: Vec<String>,
    mut controller: RunController,
    mut event_rx: UnboundedReceiver<RunMessage>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = UiState::new(args.auto_save, docs, &request);
    if args.ask_on_launch {
        match controller.start(&request) {
            Ok(_) => state.info = format!("Asking about {}", request.doc_id),
            Err(e) => state.info = format!("Not started: {e}"),
        }
    } else {
        state.info = "Press r to ask".into();
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain stream messages without blocking to keep the UI responsive.
        while let Ok(msg) = event_rx.try_recv() {
            controller.handle(msg);
        }

        if state.last_phase != controller.phase() {
            state.last_phase = controller.phase();
            match state.last_phase {
                RunPhase::Done => {
                    state.info = "Run complete".into();
                    if state.auto_save {
                        if let Some(result) = controller.result().cloned() {
                            export::save_result(&result, &mut state);
                        }
                    }
                }
                RunPhase::Error => {
                    state.info = format!(
                        "Run failed: {}",
                        controller.error_message().unwrap_or("unknown error")
                    );
                }
                _ => {}
            }
        }

        if last_tick.elapsed() >= tick_rate {
            terminal
                .draw(|f| draw(f.area(), f, &state, &controller))
                .ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        controller.cancel();
                        break Ok(());
                    }
                    (_, KeyCode::Char('r')) => match controller.start(&request) {
                        Ok(_) => {
                            state.scroll = 0;
                            state.info = format!("Asking about {}", request.doc_id);
                        }
                        Err(e) => state.info = format!("Not started: {e}"),
                    },
                    (_, KeyCode::Char('c')) => {
                        if controller.phase() == RunPhase::Running {
                            controller.cancel();
                            state.info = "Cancelled".into();
                        }
                    }
                    (_, KeyCode::Char('x')) => {
                        controller.reset();
                        state.scroll = 0;
                        state.info = "Reset".into();
                    }
                    (_, KeyCode::Char('s')) => {
                        if let Some(result) = controller.result().cloned() {
                            export::save_result(&result, &mut state);
                        } else {
                            state.info = "No completed run to save yet.".into();
                        }
                    }
                    (_, KeyCode::Char('y')) => {
                        match controller.result().and_then(|r| r.draft_answer.clone()) {
                            Some(answer) => match export::copy_to_clipboard(&answer) {
                                Ok(()) => state.info = "Answer copied to clipboard".into(),
                                Err(e) => state.info = format!("Copy failed: {e:#}"),
                            },
                            None => state.info = "No answer to copy yet.".into(),
                        }
                    }
                    (_, KeyCode::Char('?')) => state.show_help = !state.show_help,
                    (_, KeyCode::Up) | (_, KeyCode::Char('k')) => {
                        state.scroll = state.scroll.saturating_sub(1);
                    }
                    (_, KeyCode::Down) | (_, KeyCode::Char('j')) => {
                        state.scroll = state.scroll.saturating_add(1);
                    }
                    (_, KeyCode::PageUp) => state.scroll = state.scroll.saturating_sub(10),
                    (_, KeyCode::PageDown) => state.scroll = state.scroll.saturating_add(10),
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

fn draw(area: Rect, f: &mut Frame, state: &UiState, controller: &RunController) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(8),
            Constraint::Length(1),
        ])
        .split(area);

    draw_header(rows[0], f, state, controller);
    if state.show_help {
        help::draw_help(rows[1], f);
    } else {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(42), Constraint::Min(24)])
            .split(rows[1]);
        draw_trace(cols[0], f, controller);
        draw_answer(cols[1], f, state, controller);
    }
    draw_status(rows[2], f, state, controller);
}

fn draw_header(area: Rect, f: &mut Frame, state: &UiState, controller: &RunController) {
    let phase = controller.phase();
    let lines = vec![
        Line::from(vec![
            Span::styled("Q: ", Style::default().fg(Color::Gray)),
            Span::raw(state.question.clone()),
        ]),
        Line::from(vec![
            Span::styled("Doc: ", Style::default().fg(Color::Gray)),
            Span::raw(state.doc_id.clone()),
            Span::raw("   "),
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(
                state::phase_label(phase),
                Style::default().fg(state::phase_color(phase)),
            ),
            Span::styled(
                format!("   {} doc(s) on server", state.docs.len()),
                Style::default().fg(Color::DarkGray),
            ),
        ]),
    ];
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("DocChat"));
    f.render_widget(p, area);
}

fn draw_trace(area: Rect, f: &mut Frame, controller: &RunController) {
    let mut lines = Vec::new();
    for (stage, stage_state) in controller.snapshot() {
        let (glyph, color) = state::status_glyph(stage_state.status);
        let mut spans = vec![
            Span::styled(format!(" {glyph} "), Style::default().fg(color)),
            Span::raw(format!("{:<16}", stage.label())),
            Span::styled(stage_state.status.as_str(), Style::default().fg(color)),
        ];
        if let Some(ms) = stage_state.elapsed_ms {
            spans.push(Span::styled(
                format!("  {ms} ms"),
                Style::default().fg(Color::DarkGray),
            ));
        }
        lines.push(Line::from(spans));
        if let Some(summary) = stage_state.summary.as_deref() {
            lines.push(Line::from(Span::styled(
                format!("    {summary}"),
                Style::default().fg(Color::Gray),
            )));
        }
    }
    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Agent trace"))
        .wrap(Wrap { trim: false });
    f.render_widget(p, area);
}

fn draw_answer(area: Rect, f: &mut Frame, state: &UiState, controller: &RunController) {
    let lines: Vec<Line> = match controller.phase() {
        RunPhase::Done => match controller.result() {
            Some(result) => report::build_report(result)
                .lines
                .into_iter()
                .map(Line::from)
                .collect(),
            None => vec![Line::from("Run finished without a result.")],
        },
        RunPhase::Error => vec![Line::from(Span::styled(
            controller
                .error_message()
                .unwrap_or("unknown error")
                .to_string(),
            Style::default().fg(Color::Red),
        ))],
        RunPhase::Running => vec![Line::from(Span::styled(
            "Waiting for the pipeline…",
            Style::default().fg(Color::DarkGray),
        ))],
        RunPhase::Idle => vec![Line::from(Span::styled(
            "Press r to ask.",
            Style::default().fg(Color::DarkGray),
        ))],
    };
    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Answer"))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll, 0));
    f.render_widget(p, area);
}

fn draw_status(area: Rect, f: &mut Frame, state: &UiState, controller: &RunController) {
    let mut spans = vec![Span::raw(format!(" {}", state.info))];
    if controller.events_dropped() > 0 {
        spans.push(Span::styled(
            format!("   {} event(s) dropped", controller.events_dropped()),
            Style::default().fg(Color::Yellow),
        ));
    }
    spans.push(Span::styled(
        "   ? help  q quit",
        Style::default().fg(Color::DarkGray),
    ));
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
