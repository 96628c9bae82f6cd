//! Per-connection session state.
//!
//! Everything here is owned by the single task driving a connection, so no
//! locking is involved.

use std::collections::HashMap;

use tds_protocol::packet::{DEFAULT_PACKET_SIZE, clamp_packet_size};
use tds_protocol::{EnvChange, LoginAck, ServerVersion, TdsVersion};

use crate::row::RowDescriptor;

/// Caller-chosen identifier of a server cursor.
pub type CursorId = u32;

/// Progress of one server cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorState {
    /// Handle from `sp_cursorprepexec`, 0 until assigned.
    pub prepared_handle: i32,
    /// Server cursor id, 0 until assigned. Zero or less after the opening
    /// call means no real cursor exists.
    pub server_cursor_id: i32,
    /// Row descriptor from the opening call, reused by fetches.
    pub descriptor: Option<RowDescriptor>,
    /// Whether a fetch has been sent for this cursor.
    pub fetch_sent: bool,
    /// Total row count reported by the server. May be negative while the
    /// server is still populating the cursor.
    pub rows_total: i32,
    /// Rows received so far.
    pub rows_fetched: i32,
    /// The server ran the statement without opening a cursor.
    pub executed_directly: bool,
}

impl CursorState {
    /// Whether the server still holds rows for this cursor.
    #[must_use]
    pub fn has_more(&self) -> bool {
        !self.executed_directly && self.rows_fetched != self.rows_total
    }

    /// Whether the server allocated a cursor that must be closed.
    #[must_use]
    pub fn has_server_cursor(&self) -> bool {
        self.server_cursor_id > 0
    }

    /// Assign an output parameter to the first still-unset slot: prepared
    /// handle, then server cursor id. Anything after that is the total row
    /// count.
    pub fn assign_output(&mut self, value: i32) {
        if self.prepared_handle == 0 {
            self.prepared_handle = value;
        } else if self.server_cursor_id == 0 {
            self.server_cursor_id = value;
        } else {
            self.rows_total = value;
        }
    }
}

/// Server details captured at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// TDS version acknowledged by the server.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server program version.
    pub server_version: ServerVersion,
}

impl From<&LoginAck> for ServerInfo {
    fn from(ack: &LoginAck) -> Self {
        Self {
            tds_version: ack.tds_version,
            prog_name: ack.prog_name.clone(),
            server_version: ServerVersion::from_raw(ack.prog_version, 0),
        }
    }
}

/// Mutable state of one connection.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Current transaction descriptor, 0 outside a transaction.
    pub transaction_descriptor: u64,
    /// Negotiated packet size.
    pub packet_size: usize,
    /// Current database.
    pub database: Option<String>,
    /// Server details once logged in.
    pub server: Option<ServerInfo>,
    /// Open cursors by caller id.
    pub cursors: HashMap<CursorId, CursorState>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_PACKET_SIZE)
    }
}

impl SessionState {
    /// Fresh state with the requested packet size.
    #[must_use]
    pub fn new(packet_size: usize) -> Self {
        Self {
            transaction_descriptor: 0,
            packet_size: clamp_packet_size(packet_size),
            database: None,
            server: None,
            cursors: HashMap::new(),
        }
    }

    /// Apply an ENVCHANGE token.
    pub fn apply_env_change(&mut self, change: &EnvChange) {
        if let Some(descriptor) = change.transaction_descriptor() {
            if descriptor != self.transaction_descriptor {
                tracing::debug!(
                    old = self.transaction_descriptor,
                    new = descriptor,
                    "transaction descriptor changed"
                );
            }
            self.transaction_descriptor = descriptor;
            return;
        }

        match change {
            EnvChange::Database { new, .. } => {
                tracing::debug!(database = %new, "database changed");
                self.database = Some(new.clone());
            }
            EnvChange::PacketSize { new } => {
                let size = clamp_packet_size(*new as usize);
                tracing::debug!(packet_size = size, "packet size changed");
                self.packet_size = size;
            }
            EnvChange::Other(env_type) => {
                tracing::warn!(env_type, "ignoring unknown environment change");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_assignment_order() {
        let mut cursor = CursorState::default();
        cursor.assign_output(11);
        cursor.assign_output(22);
        cursor.assign_output(5);
        assert_eq!(cursor.prepared_handle, 11);
        assert_eq!(cursor.server_cursor_id, 22);
        assert_eq!(cursor.rows_total, 5);

        cursor.assign_output(-1);
        assert_eq!(cursor.server_cursor_id, 22);
        assert_eq!(cursor.rows_total, -1);
    }

    #[test]
    fn test_has_more() {
        let mut cursor = CursorState {
            rows_total: 3,
            rows_fetched: 2,
            ..Default::default()
        };
        assert!(cursor.has_more());
        cursor.rows_fetched = 3;
        assert!(!cursor.has_more());
        cursor.rows_fetched = 1;
        cursor.executed_directly = true;
        assert!(!cursor.has_more());
    }

    #[test]
    fn test_transaction_descriptor_tracking() {
        let mut session = SessionState::default();
        session.apply_env_change(&EnvChange::BeginTransaction(7));
        assert_eq!(session.transaction_descriptor, 7);
        session.apply_env_change(&EnvChange::CommitTransaction);
        assert_eq!(session.transaction_descriptor, 0);
        session.apply_env_change(&EnvChange::EnlistDtcTransaction(9));
        assert_eq!(session.transaction_descriptor, 9);
        session.apply_env_change(&EnvChange::RollbackTransaction);
        assert_eq!(session.transaction_descriptor, 0);
    }

    #[test]
    fn test_packet_size_and_database() {
        let mut session = SessionState::new(100);
        assert_eq!(session.packet_size, 512);
        session.apply_env_change(&EnvChange::PacketSize { new: 8000 });
        assert_eq!(session.packet_size, 8000);
        session.apply_env_change(&EnvChange::Database {
            new: "app".into(),
            old: "master".into(),
        });
        assert_eq!(session.database.as_deref(), Some("app"));
    }
}
