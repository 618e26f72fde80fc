use std::time::{Instant, SystemTime};

use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, ListState, Paragraph, Wrap},
};

use switchboard_core::model::{CommandKind, ServiceStats};
use switchboard_core::panel::Panel;
use switchboard_core::reconciler::{ConnectionState, ServiceView};

use super::app::App;
use super::theme::theme;

const TOAST_WIDTH: u16 = 48;

/// Format a SystemTime as HH:MM:SS
fn format_timestamp(time: SystemTime) -> String {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => {
            let secs = duration.as_secs();
            format!(
                "{:02}:{:02}:{:02}",
                (secs / 3600) % 24,
                (secs / 60) % 60,
                secs % 60
            )
        }
        Err(_) => "??:??:??".to_string(),
    }
}

fn connection_label(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Connecting => "connecting".to_string(),
        ConnectionState::Connected => "connected".to_string(),
        ConnectionState::Disconnected { reason } => format!("disconnected ({})", reason),
    }
}

pub fn draw(
    f: &mut Frame,
    panel: &Panel,
    app: &App,
    list_state: &mut ListState,
    title: &str,
    transport: &str,
    now: Instant,
) {
    let t = theme();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(f.area());

    let connection = panel.ui().connection();
    let header = Line::from(vec![
        Span::styled(format!(" {} ", title), t.title_style()),
        Span::styled(format!("via {} ", transport), t.text_dim_style()),
        Span::styled(connection_label(connection), t.connection_style(connection)),
    ]);
    f.render_widget(Paragraph::new(header), rows[0]);

    let body = if app.show_diagnostics {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(rows[1])
    } else {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(100)])
            .split(rows[1])
    };

    draw_services(f, panel, list_state, body[0]);
    if app.show_diagnostics {
        draw_diagnostics(f, panel, body[1]);
    }

    let hints = match (&app.flash, app.input.is_some()) {
        (_, true) => " enter apply · esc cancel".to_string(),
        (Some(flash), false) => format!(" {}", flash),
        (None, false) => {
            " ↑↓ select · enter details · s start · x stop · r restart · l launch · R refresh · tab diagnostics · q quit"
                .to_string()
        }
    };
    f.render_widget(
        Paragraph::new(Span::styled(hints, t.key_hint_style())),
        rows[2],
    );

    if let Some(view) = panel.ui().views().find(|v| v.detail_open) {
        draw_detail(f, view, app, f.area());
    }

    draw_toast(f, panel, now, f.area());
}

fn service_row(view: &ServiceView) -> ListItem<'static> {
    let t = theme();
    let mut spans = vec![
        Span::styled(
            format!(" {} ", t.running_icon(view.is_running)),
            t.running_style(view.is_running),
        ),
        Span::styled(view.name.clone(), t.text_style()),
        Span::raw(" "),
    ];

    match view.loading {
        Some(kind) => spans.push(Span::styled(
            format!("[{}…]", kind.progressive()),
            t.pending_style(),
        )),
        None => spans.push(Span::styled(
            if view.is_running { "[running]" } else { "[stopped]" },
            t.running_style(view.is_running),
        )),
    }

    if let Some(url) = view.launch.url() {
        spans.push(Span::styled(format!("  {}", url), t.text_dim_style()));
    }
    ListItem::new(Line::from(spans))
}

fn draw_services(f: &mut Frame, panel: &Panel, list_state: &mut ListState, area: Rect) {
    let t = theme();
    let items: Vec<ListItem> = panel.ui().views().map(service_row).collect();
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(t.border_style(true))
                .title(" Services "),
        )
        .highlight_style(t.selection_style());
    f.render_stateful_widget(list, area, list_state);
}

fn draw_diagnostics(f: &mut Frame, panel: &Panel, area: Rect) {
    let t = theme();
    let capacity = area.height.saturating_sub(2) as usize;
    let diagnostics: Vec<_> = panel.ui().diagnostics().collect();
    let skip = diagnostics.len().saturating_sub(capacity);
    let lines: Vec<Line> = diagnostics
        .into_iter()
        .skip(skip)
        .map(|d| {
            Line::from(vec![
                Span::styled(format!("{} ", format_timestamp(d.at)), t.text_dim_style()),
                Span::styled(d.text.clone(), t.diagnostic_style(d.level)),
            ])
        })
        .collect();

    f.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(t.border_style(false))
                .title(" Diagnostics "),
        ),
        area,
    );
}

/// A rectangle of `percent_x` by `percent_y` centered in `area`
fn centered(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

fn controls_line(view: &ServiceView) -> Line<'static> {
    let t = theme();
    let enabled = !view.controls_disabled;
    let mut spans = Vec::new();
    for (key, kind) in [
        ("s", CommandKind::Start),
        ("x", CommandKind::Stop),
        ("r", CommandKind::Restart),
    ] {
        let label = if view.loading == Some(kind) {
            format!("{}…", kind.progressive())
        } else {
            let verb = kind.verb();
            let mut chars = verb.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        };
        spans.push(Span::styled(format!("[{}] {}  ", key, label), t.control_style(enabled)));
    }
    let launch = view.launch.url().is_some();
    spans.push(Span::styled("[l] Launch", t.control_style(launch)));
    Line::from(spans)
}

fn draw_gauges(f: &mut Frame, stats: Option<ServiceStats>, area: Rect) {
    let t = theme();
    let cells = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(area);

    let values = stats.map(|s| [s.cpu_usage, s.memory_usage, s.disk_usage]);
    for (i, name) in ["CPU", "Memory", "Disk"].into_iter().enumerate() {
        let value = values.map(|v| v[i]);
        let percent = value.unwrap_or(0.0).clamp(0.0, 100.0);
        let label = match value {
            Some(v) => format!("{:.1}%", v),
            None => "n/a".to_string(),
        };
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title(format!(" {} ", name)))
            .gauge_style(t.gauge_style(percent))
            .ratio(percent / 100.0)
            .label(label);
        f.render_widget(gauge, cells[i]);
    }
}

fn draw_detail(f: &mut Frame, view: &ServiceView, app: &App, area: Rect) {
    let t = theme();
    let modal = centered(area, 80, 80);
    f.render_widget(Clear, modal);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(t.border_style(true))
        .title(format!(" {} ", view.name))
        .title_bottom(" esc close · c clear logs · e edit env ");
    let inner = block.inner(modal);
    f.render_widget(block, modal);

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(if app.input.is_some() { 1 } else { 0 }),
        ])
        .split(inner);

    let summary = vec![
        Line::from(Span::styled(
            view.description.clone().unwrap_or_default(),
            t.text_dim_style(),
        )),
        controls_line(view),
    ];
    f.render_widget(Paragraph::new(summary), parts[0]);

    draw_gauges(f, view.stats, parts[1]);

    let capacity = parts[2].height.saturating_sub(2) as usize;
    let skip = view.logs.len().saturating_sub(capacity);
    let logs: Vec<Line> = view
        .logs
        .iter()
        .skip(skip)
        .map(|l| Line::from(l.as_str()))
        .collect();
    f.render_widget(
        Paragraph::new(logs)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title(" Logs ")),
        parts[2],
    );

    if let Some(input) = &app.input {
        f.render_widget(
            Paragraph::new(Line::from(vec![
                Span::styled("env> ", t.key_hint_style()),
                Span::raw(input.as_str()),
            ])),
            parts[3],
        );
    }
}

fn draw_toast(f: &mut Frame, panel: &Panel, now: Instant, area: Rect) {
    let toast = panel.ui().toast();
    let phase = toast.phase(now);
    let Some(text) = toast.text(now) else {
        return;
    };

    let width = TOAST_WIDTH.min(area.width);
    let height = 3u16.min(area.height);
    let rect = Rect {
        x: area.x + area.width - width,
        y: area.y + area.height.saturating_sub(height + 1),
        width,
        height,
    };
    f.render_widget(Clear, rect);
    f.render_widget(
        Paragraph::new(text.to_string())
            .style(theme().toast_style(phase))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL)),
        rect,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::{Terminal, backend::TestBackend};
    use switchboard_core::model::Service;
    use switchboard_core::panel::PanelSettings;
    use switchboard_core::protocol::InboundEvent;

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    fn render(panel: &Panel, now: Instant) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        let app = App::default();
        let mut list_state = ListState::default();
        terminal
            .draw(|f| draw(f, panel, &app, &mut list_state, "homelab", "fake", now))
            .unwrap();
        buffer_text(&terminal)
    }

    #[test]
    fn test_draws_pending_service_then_toast() {
        let mut panel = Panel::new(
            vec![Service::new("1").with_name("Gitea")],
            PanelSettings::default(),
        );
        let now = Instant::now();
        panel.start("1", now);

        let text = render(&panel, now);
        assert!(text.contains("homelab"));
        assert!(text.contains("Gitea"));
        assert!(text.contains("Starting"));
        assert!(!text.contains("Service started successfully"));

        let acked = now + std::time::Duration::from_millis(100);
        panel.handle_event(
            InboundEvent::CommandSucceeded {
                service_id: "1".into(),
                kind: CommandKind::Start,
                message: "Service started successfully".into(),
            },
            acked,
        );

        let text = render(&panel, acked + std::time::Duration::from_millis(50));
        assert!(text.contains("[running]"));
        assert!(text.contains("Service started successfully"));
        assert!(!text.contains("Starting"));
    }

    #[test]
    fn test_timestamp_format() {
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(3661);
        assert_eq!(format_timestamp(t), "01:01:01");
    }
}
