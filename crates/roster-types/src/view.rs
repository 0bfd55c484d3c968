use serde::{Deserialize, Serialize};

use crate::UserId;

/// Which panel is shown next to the user list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum ViewState {
    /// The empty create form.
    #[default]
    Form,
    /// One record's details, optionally in its edit sub-mode.
    Detail { id: UserId, editing: bool },
    /// Neither form nor details; the selected record no longer exists.
    ListOnly,
}

impl ViewState {
    pub fn detail(id: UserId) -> Self {
        ViewState::Detail { id, editing: false }
    }

    pub fn selected(&self) -> Option<UserId> {
        match self {
            ViewState::Detail { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn is_editing(&self) -> bool {
        matches!(self, ViewState::Detail { editing: true, .. })
    }
}
