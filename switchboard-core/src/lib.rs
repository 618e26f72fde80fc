//! Core of the switchboard service control panel.
//!
//! Everything in here is synchronous and time-injected: the [`panel::Panel`]
//! consumes inbound events and user intents, and answers with requests for a
//! [`transport::Transport`] to carry out.

pub mod config;
pub mod errors;
pub mod model;
pub mod protocol;

// Event plumbing
pub mod channel;
pub mod dispatcher;
pub mod subscriptions;

// Presentation state
pub mod reconciler;
pub mod toast;

pub mod panel;
pub mod transport;
