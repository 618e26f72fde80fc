//! Single-slot toast notification
//!
//! The phase is derived from the elapsed time since the message was shown,
//! so callers only need to pass `now` when rendering.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToastTiming {
    pub fade_in: Duration,
    pub visible: Duration,
    pub fade_out: Duration,
}

impl Default for ToastTiming {
    fn default() -> Self {
        Self {
            fade_in: Duration::from_millis(10),
            visible: Duration::from_millis(3000),
            fade_out: Duration::from_millis(500),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastPhase {
    Hidden,
    FadingIn,
    Visible,
    FadingOut,
}

impl ToastPhase {
    /// Whether the toast occupies layout space
    pub fn is_displayed(self) -> bool {
        !matches!(self, ToastPhase::Hidden)
    }
}

#[derive(Clone, Debug)]
struct Shown {
    text: String,
    at: Instant,
    skip_fade_in: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Toast {
    timing: ToastTiming,
    shown: Option<Shown>,
}

impl Toast {
    pub fn new(timing: ToastTiming) -> Self {
        Self {
            timing,
            shown: None,
        }
    }

    /// Show `text`. If a toast is already on screen its text is replaced and
    /// the timer restarts from `now`; there is no queue.
    pub fn show(&mut self, text: impl Into<String>, now: Instant) {
        let on_screen = self.phase(now).is_displayed();
        self.shown = Some(Shown {
            text: text.into(),
            at: now,
            skip_fade_in: on_screen,
        });
    }

    /// Close button: hide immediately
    pub fn dismiss(&mut self) {
        self.shown = None;
    }

    pub fn phase(&self, now: Instant) -> ToastPhase {
        let Some(shown) = &self.shown else {
            return ToastPhase::Hidden;
        };
        let elapsed = now.saturating_duration_since(shown.at);
        let t = self.timing;

        if elapsed < t.fade_in && !shown.skip_fade_in {
            ToastPhase::FadingIn
        } else if elapsed < t.visible {
            ToastPhase::Visible
        } else if elapsed < t.visible + t.fade_out {
            ToastPhase::FadingOut
        } else {
            ToastPhase::Hidden
        }
    }

    /// Text of the toast if it is displayed at `now`
    pub fn text(&self, now: Instant) -> Option<&str> {
        if self.phase(now).is_displayed() {
            self.shown.as_ref().map(|s| s.text.as_str())
        } else {
            None
        }
    }

    /// Drop the message once it has fully hidden
    pub fn tick(&mut self, now: Instant) {
        if self.shown.is_some() && self.phase(now) == ToastPhase::Hidden {
            self.shown = None;
        }
    }

    /// Next instant at which the phase changes, for render scheduling
    pub fn next_transition(&self, now: Instant) -> Option<Instant> {
        let shown = self.shown.as_ref()?;
        let t = self.timing;
        [
            shown.at + t.fade_in,
            shown.at + t.visible,
            shown.at + t.visible + t.fade_out,
        ]
        .into_iter()
        .find(|at| *at > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_phase_sequence() {
        let t0 = Instant::now();
        let mut toast = Toast::default();
        assert_eq!(toast.phase(t0), ToastPhase::Hidden);

        toast.show("Started", t0);
        assert_eq!(toast.phase(t0), ToastPhase::FadingIn);
        assert_eq!(toast.phase(t0 + ms(10)), ToastPhase::Visible);
        assert_eq!(toast.phase(t0 + ms(2999)), ToastPhase::Visible);
        assert_eq!(toast.phase(t0 + ms(3000)), ToastPhase::FadingOut);
        assert_eq!(toast.text(t0 + ms(3499)), Some("Started"));
        assert_eq!(toast.phase(t0 + ms(3500)), ToastPhase::Hidden);
        assert_eq!(toast.text(t0 + ms(3500)), None);
    }

    #[test]
    fn test_replace_restarts_timer_without_fade_in() {
        let t0 = Instant::now();
        let mut toast = Toast::default();
        toast.show("first", t0);
        toast.show("second", t0 + ms(2000));

        assert_eq!(toast.text(t0 + ms(2000)), Some("second"));
        assert_eq!(toast.phase(t0 + ms(2000)), ToastPhase::Visible);
        // the first message's deadline no longer applies
        assert_eq!(toast.phase(t0 + ms(3200)), ToastPhase::Visible);
        assert_eq!(toast.phase(t0 + ms(5000)), ToastPhase::FadingOut);
        assert_eq!(toast.phase(t0 + ms(5500)), ToastPhase::Hidden);
    }

    #[test]
    fn test_show_after_hidden_fades_in_again() {
        let t0 = Instant::now();
        let mut toast = Toast::default();
        toast.show("a", t0);
        toast.tick(t0 + ms(4000));
        toast.show("b", t0 + ms(4000));
        assert_eq!(toast.phase(t0 + ms(4000)), ToastPhase::FadingIn);
    }

    #[test]
    fn test_dismiss() {
        let t0 = Instant::now();
        let mut toast = Toast::default();
        toast.show("a", t0);
        toast.dismiss();
        assert_eq!(toast.phase(t0 + ms(20)), ToastPhase::Hidden);
        assert_eq!(toast.next_transition(t0), None);
    }

    #[test]
    fn test_next_transition() {
        let t0 = Instant::now();
        let mut toast = Toast::default();
        toast.show("a", t0);
        assert_eq!(toast.next_transition(t0), Some(t0 + ms(10)));
        assert_eq!(toast.next_transition(t0 + ms(10)), Some(t0 + ms(3000)));
        assert_eq!(toast.next_transition(t0 + ms(3600)), None);
    }
}
