use roster_types::{UserId, ViewState};
use serde::Serialize;

/// Published after every committed change, once storage has been written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    UserAdded { id: UserId, count: usize },
    UserUpdated { id: UserId },
    UserDeleted { id: UserId, count: usize },
    Reloaded { count: usize },
    ViewChanged { view: ViewState },
}
