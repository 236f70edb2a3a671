//! Lifecycle notifications for the layer embedding the hub

use crate::session::SessionId;

/// Session lifecycle signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A session was added to the table
    SessionCreated(SessionId),
    /// A session released its subscribers and file handle
    SessionClosed(SessionId),
    /// A session and its log were permanently removed
    SessionDeleted(SessionId),
    /// The number of subscribers of a session changed
    ClientCount { session_id: SessionId, count: usize },
}

impl HubEvent {
    /// Session the event refers to
    pub fn session_id(&self) -> &SessionId {
        match self {
            HubEvent::SessionCreated(id)
            | HubEvent::SessionClosed(id)
            | HubEvent::SessionDeleted(id) => id,
            HubEvent::ClientCount { session_id, .. } => session_id,
        }
    }
}
