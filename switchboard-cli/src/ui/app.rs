use std::collections::BTreeMap;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use switchboard_core::model::CommandKind;

/// What a key press asks the panel to do
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    None,
    Quit,
    OpenDetail,
    CloseDetail,
    Command(CommandKind),
    ClearLogs,
    Launch,
    DismissToast,
    RefreshAll,
    UpdateEnvironment(BTreeMap<String, String>),
}

/// Terminal-only state: selection, the env input line, which side pane
/// is shown. Everything about services lives in the panel.
#[derive(Debug, Default)]
pub struct App {
    pub selected: usize,
    pub input: Option<String>,
    pub show_diagnostics: bool,
    pub flash: Option<String>,
}

impl App {
    pub fn select_next(&mut self, len: usize) {
        if len > 0 {
            self.selected = (self.selected + 1) % len;
        }
    }

    pub fn select_prev(&mut self, len: usize) {
        if len > 0 {
            self.selected = (self.selected + len - 1) % len;
        }
    }

    pub fn clamp(&mut self, len: usize) {
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent, len: usize, detail_open: bool) -> Action {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Action::Quit;
        }
        if self.input.is_some() {
            return self.handle_input(key);
        }

        match key.code {
            KeyCode::Char('q') => Action::Quit,
            KeyCode::Up | KeyCode::Char('k') if !detail_open => {
                self.select_prev(len);
                Action::None
            }
            KeyCode::Down | KeyCode::Char('j') if !detail_open => {
                self.select_next(len);
                Action::None
            }
            KeyCode::Enter if !detail_open => Action::OpenDetail,
            KeyCode::Esc if detail_open => Action::CloseDetail,
            KeyCode::Esc => Action::DismissToast,
            KeyCode::Char('s') => Action::Command(CommandKind::Start),
            KeyCode::Char('x') => Action::Command(CommandKind::Stop),
            KeyCode::Char('r') => Action::Command(CommandKind::Restart),
            KeyCode::Char('l') => Action::Launch,
            KeyCode::Char('d') => Action::DismissToast,
            KeyCode::Char('c') if detail_open => Action::ClearLogs,
            KeyCode::Char('e') if detail_open => {
                self.input = Some(String::new());
                Action::None
            }
            KeyCode::Char('R') => Action::RefreshAll,
            KeyCode::Tab => {
                self.show_diagnostics = !self.show_diagnostics;
                Action::None
            }
            _ => Action::None,
        }
    }

    fn handle_input(&mut self, key: KeyEvent) -> Action {
        let Some(buffer) = self.input.as_mut() else {
            return Action::None;
        };
        match key.code {
            KeyCode::Esc => {
                self.input = None;
                Action::None
            }
            KeyCode::Backspace => {
                buffer.pop();
                Action::None
            }
            KeyCode::Char(c) => {
                buffer.push(c);
                Action::None
            }
            KeyCode::Enter => {
                let line = self.input.take().unwrap_or_default();
                let words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
                match parse_assignments(&words) {
                    Ok(vars) if !vars.is_empty() => Action::UpdateEnvironment(vars),
                    Ok(_) => Action::None,
                    Err(e) => {
                        self.flash = Some(e);
                        Action::None
                    }
                }
            }
            _ => Action::None,
        }
    }
}

/// Parse `KEY=VALUE` words. Values may be empty, keys may not.
pub fn parse_assignments(words: &[String]) -> Result<BTreeMap<String, String>, String> {
    let mut vars = BTreeMap::new();
    for word in words {
        let Some((key, value)) = word.split_once('=') else {
            return Err(format!("expected KEY=VALUE, got '{}'", word));
        };
        if key.is_empty() {
            return Err(format!("missing variable name in '{}'", word));
        }
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
