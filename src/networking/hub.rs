use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, event, Level};

use crate::error::RpcError;
use crate::networking::connection::Connection;
use crate::Result;

#[derive(Default)]
struct HubState {
    connections: HashMap<String, Arc<dyn Connection>>,
    auth_mapping: HashMap<String, HashSet<String>>,
}

impl HubState {
    fn unmap(&mut self, user_id: &str, connection_id: &str) {
        if let Some(connection_ids) = self.auth_mapping.get_mut(user_id) {
            connection_ids.remove(connection_id);
            if connection_ids.is_empty() {
                self.auth_mapping.remove(user_id);
            }
        }
    }
}

///
/// Registry of every live connection, plus an index from authenticated user
/// to the connections currently logged in as that user. It is the only
/// place the node looks when pushing a notification to a user.
///
/// One lock guards both maps; every operation is a handful of map lookups.
///
#[derive(Default)]
pub struct ConnectionHub {
    state: RwLock<HubState>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        ConnectionHub::default()
    }

    pub fn add(&self, connection: Arc<dyn Connection>) -> Result<()> {
        let connection_id = connection.connection_id().to_string();
        let mut state = self.state.write();
        if state.connections.contains_key(&connection_id) {
            return Err(RpcError::DuplicateConnection(connection_id));
        }
        let user_id = connection.user_id();
        if !user_id.is_empty() {
            state
                .auth_mapping
                .entry(user_id)
                .or_default()
                .insert(connection_id.clone());
        }
        state.connections.insert(connection_id, connection);
        Ok(())
    }

    /// Move a connection to `user_id`, e.g. after a login on an already
    /// open socket.
    pub fn reauthenticate(&self, connection_id: &str, user_id: &str) -> Result<()> {
        let mut state = self.state.write();
        let connection = state
            .connections
            .get(connection_id)
            .cloned()
            .ok_or_else(|| RpcError::UnknownConnection(connection_id.to_string()))?;

        let old_user_id = connection.user_id();
        if !old_user_id.is_empty() {
            state.unmap(&old_user_id, connection_id);
        }
        if !user_id.is_empty() {
            state
                .auth_mapping
                .entry(user_id.to_string())
                .or_default()
                .insert(connection_id.to_string());
        }
        connection.set_user_id(user_id);
        debug!(%connection_id, %old_user_id, %user_id, "connection reauthenticated");
        Ok(())
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<dyn Connection>> {
        self.state.read().connections.get(connection_id).cloned()
    }

    /// Unknown ids are ignored.
    pub fn remove(&self, connection_id: &str) {
        let mut state = self.state.write();
        if let Some(connection) = state.connections.remove(connection_id) {
            let user_id = connection.user_id();
            if !user_id.is_empty() {
                state.unmap(&user_id, connection_id);
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    pub fn user_connection_ids(&self, user_id: &str) -> Vec<String> {
        self.state
            .read()
            .auth_mapping
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    ///
    /// Hand `message` to every connection of `user_id`. Best effort: a user
    /// with no connections is not an error, and ids whose connection is gone
    /// are pruned on the way.
    ///
    pub async fn publish(&self, user_id: &str, message: Vec<u8>) {
        let targets: Vec<Arc<dyn Connection>> = {
            let mut state = self.state.write();
            let connection_ids = match state.auth_mapping.get(user_id) {
                Some(connection_ids) => connection_ids.clone(),
                None => return,
            };
            let mut targets = Vec::with_capacity(connection_ids.len());
            for connection_id in connection_ids {
                match state.connections.get(&connection_id) {
                    Some(connection) => targets.push(connection.clone()),
                    None => {
                        event!(Level::DEBUG, %user_id, %connection_id, "pruning stale connection");
                        state.unmap(user_id, &connection_id);
                    }
                }
            }
            targets
        };

        join_all(
            targets
                .iter()
                .map(|connection| connection.write_raw_response(message.clone())),
        )
        .await;
    }

    #[cfg(test)]
    pub(crate) fn map_stale(&self, user_id: &str, connection_id: &str) {
        self.state
            .write()
            .auth_mapping
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
    }

    #[cfg(test)]
    pub(crate) fn has_user(&self, user_id: &str) -> bool {
        self.state.read().auth_mapping.contains_key(user_id)
    }
}
