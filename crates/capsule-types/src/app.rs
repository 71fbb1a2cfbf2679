//! Application state shared with the UI.
//!
//! The UI never mutates this directly. It sends an [`Action`] and renders the
//! state returned by [`reduce`].

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::network::NetworkLink;
use crate::usage::Day;

/// Which view the app is in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Student,
    Teacher,
}

/// Modal dialogs the UI may be showing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum Dialog {
    Quiz,
    QuotaExceeded,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct AppState {
    pub role: Role,
    pub dialog: Option<Dialog>,
    /// Day selected in the Data Wallet view. `None` means today.
    pub wallet_day: Option<Day>,
    pub network: NetworkLink,
    /// Incremented on every state change.
    #[ts(type = "number")]
    pub revision: u64,
}

/// User or host intents that change [`AppState`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SwitchRole { role: Role },
    OpenDialog { dialog: Dialog },
    DismissDialog,
    SelectWalletDay { day: Option<Day> },
    NetworkChanged { link: NetworkLink },
}

/// Apply `action` to `state`, returning the next state.
pub fn reduce(state: &AppState, action: &Action) -> AppState {
    let mut next = state.clone();
    match action {
        Action::SwitchRole { role } => {
            if next.role != *role {
                next.role = *role;
                next.dialog = None;
                next.wallet_day = None;
            }
        }
        Action::OpenDialog { dialog } => next.dialog = Some(*dialog),
        Action::DismissDialog => next.dialog = None,
        Action::SelectWalletDay { day } => next.wallet_day = *day,
        Action::NetworkChanged { link } => next.network = *link,
    }
    if next != *state {
        next.revision = state.revision.wrapping_add(1);
    }
    next
}
