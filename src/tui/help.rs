use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, desc: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(format!("{key:<10}"), Style::default().fg(Color::Magenta)),
        Span::raw(desc),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        key_line("q / Ctrl-C", "Quit"),
        key_line("r", "Ask again"),
        key_line("c", "Cancel the running ask"),
        key_line("x", "Reset the trace"),
        key_line("s", "Save result JSON"),
        key_line("y", "Copy answer to clipboard"),
        key_line("j/k or ↑/↓", "Scroll the answer panel"),
        key_line("PgUp/PgDn", "Scroll faster"),
        key_line("?", "Toggle this help"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
