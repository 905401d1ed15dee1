//! Authoritative record of who is logged in where.
//!
//! Every read and write goes through one [`tokio::sync::Mutex`]. No method
//! holds the lock across network I/O; broadcasting works from a
//! [`SessionRegistry::snapshot`] taken and released beforehand.
//!
//! Sessions are never removed. A logged-out session keeps its last connection
//! binding, so the map grows with the number of distinct names ever seen
//! rather than with open connections.

use std::collections::BTreeMap;

use tokio::sync::Mutex;

use crate::{
    connection::{ConnectionHandle, ConnectionId},
    error::ProtocolViolation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Anonymous,
    LoggedIn,
}

#[derive(Debug, Clone)]
pub struct Session {
    name: String,
    password: String,
    state: LoginState,
    connection: ConnectionHandle,
}

impl Session {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Credential supplied at the most recent login. Never verified.
    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn is_logged_in(&self) -> bool {
        self.state == LoginState::LoggedIn
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    fn is_bound_to(&self, connection: ConnectionId) -> bool {
        self.connection.id() == connection
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lookup(&self, name: &str) -> Option<Session> {
        self.sessions.lock().await.get(name).cloned()
    }

    /// Logs `name` in on `connection`.
    ///
    /// Fails with [`ProtocolViolation::AlreadyLoggedIn`] when the name is
    /// logged in anywhere, or when `connection` already holds another
    /// logged-in name. A logged-out session is re-bound to the new
    /// connection.
    pub async fn login(
        &self,
        name: &str,
        password: &str,
        connection: &ConnectionHandle,
    ) -> Result<(), ProtocolViolation> {
        let mut sessions = self.sessions.lock().await;

        let connection_busy = sessions
            .values()
            .any(|session| session.is_logged_in() && session.is_bound_to(connection.id()));
        if connection_busy {
            return Err(ProtocolViolation::AlreadyLoggedIn);
        }

        match sessions.get_mut(name) {
            Some(session) if session.is_logged_in() => Err(ProtocolViolation::AlreadyLoggedIn),
            Some(session) => {
                session.state = LoginState::LoggedIn;
                session.password = password.to_string();
                session.connection = connection.clone();
                Ok(())
            }
            None => {
                sessions.insert(
                    name.to_string(),
                    Session {
                        name: name.to_string(),
                        password: password.to_string(),
                        state: LoginState::LoggedIn,
                        connection: connection.clone(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Logs `name` out. Only the connection the name is logged in on may do
    /// this; anything else is [`ProtocolViolation::NotLoggedIn`].
    pub async fn logout(
        &self,
        name: &str,
        connection: ConnectionId,
    ) -> Result<(), ProtocolViolation> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(name) {
            Some(session) if session.is_logged_in() && session.is_bound_to(connection) => {
                session.state = LoginState::Anonymous;
                Ok(())
            }
            _ => Err(ProtocolViolation::NotLoggedIn),
        }
    }

    /// Whether `name` is logged in on `connection`.
    pub async fn is_logged_in(&self, name: &str, connection: ConnectionId) -> bool {
        self.sessions
            .lock()
            .await
            .get(name)
            .is_some_and(|session| session.is_logged_in() && session.is_bound_to(connection))
    }

    /// Marks every session logged in on a closing connection as logged out
    /// and returns their names.
    pub async fn release(&self, connection: ConnectionId) -> Vec<String> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .values_mut()
            .filter(|session| session.is_logged_in() && session.is_bound_to(connection))
            .map(|session| {
                session.state = LoginState::Anonymous;
                session.name.clone()
            })
            .collect()
    }

    /// Point-in-time copy of all sessions, ordered by name.
    pub async fn snapshot(&self) -> Vec<Session> {
        self.sessions.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
