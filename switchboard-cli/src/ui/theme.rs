//! Color palette and style helpers for the panel
//!
//! Renderers ask for a style by meaning (running, pending, error) rather
//! than by color, so the palette can change in one place.

use ratatui::style::{Color, Modifier, Style};

use switchboard_core::reconciler::{ConnectionState, DiagnosticLevel};
use switchboard_core::toast::ToastPhase;

/// Color palette tokens for the theme
#[derive(Clone, Debug)]
pub struct Palette {
    /// Panel border color
    pub panel_border: Color,
    /// Primary text color
    pub text: Color,
    /// Dimmed text (secondary info)
    pub text_dim: Color,
    /// Muted text (disabled controls)
    pub text_muted: Color,
    /// Accent color (highlights, focus)
    pub accent: Color,
    /// Running services, successful connections
    pub success: Color,
    /// Commands in flight
    pub warn: Color,
    /// Failures
    pub error: Color,
    pub selection_bg: Color,
    pub selection_fg: Color,
    /// Key hint text
    pub key_hint: Color,
    pub toast_bg: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self::dark()
    }
}

impl Palette {
    pub fn dark() -> Self {
        Self {
            panel_border: Color::Rgb(60, 60, 60),
            text: Color::Rgb(212, 212, 212),
            text_dim: Color::Rgb(150, 150, 150),
            text_muted: Color::Rgb(100, 100, 100),
            accent: Color::Rgb(79, 193, 255),
            success: Color::Rgb(78, 201, 176),
            warn: Color::Rgb(220, 180, 100),
            error: Color::Rgb(244, 135, 113),
            selection_bg: Color::Rgb(38, 79, 120),
            selection_fg: Color::White,
            key_hint: Color::Rgb(206, 145, 120),
            toast_bg: Color::Rgb(45, 45, 48),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Theme {
    pub palette: Palette,
}

impl Theme {
    pub fn running_style(&self, running: bool) -> Style {
        let color = if running {
            self.palette.success
        } else {
            self.palette.text_muted
        };
        Style::default().fg(color)
    }

    pub fn running_icon(&self, running: bool) -> &'static str {
        if running { "●" } else { "○" }
    }

    pub fn pending_style(&self) -> Style {
        Style::default()
            .fg(self.palette.warn)
            .add_modifier(Modifier::ITALIC)
    }

    /// A control that can be pressed, or its disabled look
    pub fn control_style(&self, enabled: bool) -> Style {
        if enabled {
            Style::default().fg(self.palette.key_hint)
        } else {
            Style::default()
                .fg(self.palette.text_muted)
                .add_modifier(Modifier::CROSSED_OUT)
        }
    }

    pub fn toast_style(&self, phase: ToastPhase) -> Style {
        let base = Style::default().bg(self.palette.toast_bg);
        match phase {
            ToastPhase::Visible => base.fg(self.palette.text).add_modifier(Modifier::BOLD),
            ToastPhase::FadingIn | ToastPhase::FadingOut => base.fg(self.palette.text_dim),
            ToastPhase::Hidden => base.fg(self.palette.text_muted),
        }
    }

    pub fn diagnostic_style(&self, level: DiagnosticLevel) -> Style {
        match level {
            DiagnosticLevel::Debug => Style::default().fg(self.palette.text_dim),
            DiagnosticLevel::Error => Style::default().fg(self.palette.error),
        }
    }

    pub fn connection_style(&self, state: &ConnectionState) -> Style {
        let color = match state {
            ConnectionState::Connected => self.palette.success,
            ConnectionState::Connecting => self.palette.warn,
            ConnectionState::Disconnected { .. } => self.palette.error,
        };
        Style::default().fg(color)
    }

    /// Gauge color by load: calm, busy, hot
    pub fn gauge_style(&self, percent: f64) -> Style {
        let color = if percent >= 85.0 {
            self.palette.error
        } else if percent >= 60.0 {
            self.palette.warn
        } else {
            self.palette.accent
        };
        Style::default().fg(color)
    }

    pub fn key_hint_style(&self) -> Style {
        Style::default().fg(self.palette.key_hint)
    }

    pub fn border_style(&self, focused: bool) -> Style {
        if focused {
            Style::default().fg(self.palette.accent)
        } else {
            Style::default().fg(self.palette.panel_border)
        }
    }

    pub fn selection_style(&self) -> Style {
        Style::default()
            .bg(self.palette.selection_bg)
            .fg(self.palette.selection_fg)
            .add_modifier(Modifier::BOLD)
    }

    pub fn text_style(&self) -> Style {
        Style::default().fg(self.palette.text)
    }

    pub fn text_dim_style(&self) -> Style {
        Style::default().fg(self.palette.text_dim)
    }

    pub fn title_style(&self) -> Style {
        Style::default()
            .fg(self.palette.text)
            .add_modifier(Modifier::BOLD)
    }
}

static DEFAULT_THEME: std::sync::OnceLock<Theme> = std::sync::OnceLock::new();

pub fn theme() -> &'static Theme {
    DEFAULT_THEME.get_or_init(Theme::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_thresholds() {
        let t = Theme::default();
        assert_eq!(t.gauge_style(10.0).fg, Some(t.palette.accent));
        assert_eq!(t.gauge_style(70.0).fg, Some(t.palette.warn));
        assert_eq!(t.gauge_style(99.0).fg, Some(t.palette.error));
    }

    #[test]
    fn test_disabled_control_is_muted() {
        let t = Theme::default();
        assert_eq!(t.control_style(false).fg, Some(t.palette.text_muted));
        assert_eq!(t.control_style(true).fg, Some(t.palette.key_hint));
    }
}
