pub mod app;
mod render;
pub mod theme;

use std::io;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event as CEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend, widgets::ListState};
use tracing::info;

use crate::runtime::Runtime;
use app::{Action, App};

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Hand a URL to the desktop opener. Failure is reported, never fatal.
fn open_url(url: &str) -> Result<(), String> {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    };
    std::process::Command::new(opener)
        .arg(url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|e| format!("could not run {}: {}", opener, e))
}

/// Run the interactive panel until the user quits
pub async fn run(mut runtime: Runtime, title: &str) -> io::Result<()> {
    let mut terminal = setup_terminal()?;
    runtime.act(|panel, _| panel.refresh_all());
    let result = event_loop(&mut terminal, &mut runtime, title).await;

    // Leave no stream open behind us
    let open: Vec<String> = runtime
        .panel()
        .ui()
        .views()
        .filter(|v| v.detail_open)
        .map(|v| v.id.clone())
        .collect();
    for id in open {
        runtime.act(|panel, _| panel.close_detail(&id));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    restore_terminal(terminal)?;
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    runtime: &mut Runtime,
    title: &str,
) -> io::Result<()> {
    let mut app = App::default();
    let mut list_state = ListState::default();
    let transport = runtime.transport_name();

    loop {
        runtime.drain();

        let ids = runtime.panel().service_ids();
        app.clamp(ids.len());
        list_state.select((!ids.is_empty()).then_some(app.selected));

        let now = Instant::now();
        terminal.draw(|f| {
            render::draw(f, runtime.panel(), &app, &mut list_state, title, transport, now)
        })?;

        // Yield so transport tasks make progress between frames
        tokio::task::yield_now().await;
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let CEvent::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        let Some(id) = ids.get(app.selected).cloned() else {
            if app.handle_key(key, 0, false) == Action::Quit {
                return Ok(());
            }
            continue;
        };
        let detail_open = runtime
            .panel()
            .session(&id)
            .is_some_and(|s| s.detail_open);

        app.flash = None;
        match app.handle_key(key, ids.len(), detail_open) {
            Action::None => {}
            Action::Quit => return Ok(()),
            Action::OpenDetail => runtime.act(|p, _| p.open_detail(&id)),
            Action::CloseDetail => runtime.act(|p, _| p.close_detail(&id)),
            Action::Command(kind) => runtime.act(|p, now| p.request_command(&id, kind, now)),
            Action::ClearLogs => runtime.update(|p| p.clear_logs(&id)),
            Action::DismissToast => runtime.update(|p| p.dismiss_toast()),
            Action::RefreshAll => runtime.act(|p, _| p.refresh_all()),
            Action::UpdateEnvironment(vars) => {
                runtime.act(|p, _| p.update_environment(&id, vars))
            }
            Action::Launch => match runtime.panel().launch(&id).map(str::to_string) {
                Some(url) => {
                    info!(service = %id, %url, "launching");
                    if let Err(e) = open_url(&url) {
                        app.flash = Some(format!("{} ({})", url, e));
                    }
                }
                None => app.flash = Some("launch is unavailable until the service runs".into()),
            },
        }
    }
}
