use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    config::BroadcastScope,
    connection::ConnectionHandle,
    dispatcher::Dispatcher,
    error::ProtocolViolation,
    message::{Inbound, Outbound},
    registry::SessionRegistry,
};

pub const HELP_TEXT: &str = "commands: /login <name> <password>, /logout, /? for help, /quit to leave; anything else is sent to everyone";
pub const LOGGED_IN_ANNOUNCEMENT: &str = "Logged in";
pub const LOGGED_OUT_ANNOUNCEMENT: &str = "Logged out";

/// Login state machine shared by all connection handlers.
///
/// Each inbound frame is interpreted against the registry; the returned frame,
/// if any, is the reply for the connection that sent it.
pub struct Protocol {
    registry: Arc<SessionRegistry>,
    dispatcher: Dispatcher,
}

impl Protocol {
    pub fn new(registry: Arc<SessionRegistry>, scope: BroadcastScope) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&registry), scope);
        Self {
            registry,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn handle(&self, connection: &ConnectionHandle, frame: Inbound) -> Option<Outbound> {
        match frame {
            Inbound::Help { name } => Some(Outbound::answer(name, HELP_TEXT)),
            Inbound::Login { name, password } => {
                Some(self.login(connection, name, password.unwrap_or_default()).await)
            }
            Inbound::Logout { name } => Some(self.logout(connection, name).await),
            Inbound::Message { name, text } => self.message(connection, name, text).await,
            Inbound::Unrecognized => {
                warn!("frame with unrecognized ctrl");
                Some(Outbound::rejection("", ProtocolViolation::UnrecognizedCtrl))
            }
        }
    }

    /// Releases every name held by a closing connection, announcing each
    /// logout to the others when `announce` is set.
    pub async fn disconnect(&self, connection: &ConnectionHandle, announce: bool) {
        for name in self.registry.release(connection.id()).await {
            info!(%name, "released session of closed connection");
            if announce {
                self.dispatcher.broadcast(&name, LOGGED_OUT_ANNOUNCEMENT).await;
            }
        }
    }

    async fn login(
        &self,
        connection: &ConnectionHandle,
        name: String,
        password: String,
    ) -> Outbound {
        if name.trim().is_empty() {
            return Outbound::rejection(name, ProtocolViolation::MissingName);
        }
        if password.is_empty() {
            return Outbound::rejection(name, ProtocolViolation::MissingPassword);
        }

        if let Err(violation) = self.registry.login(&name, &password, connection).await {
            debug!(%name, %violation, "login rejected");
            return Outbound::rejection(name, violation);
        }

        info!(%name, "logged in");
        self.dispatcher.broadcast(&name, LOGGED_IN_ANNOUNCEMENT).await;
        Outbound::LoggedIn { name }
    }

    async fn logout(&self, connection: &ConnectionHandle, name: String) -> Outbound {
        if let Err(violation) = self.registry.logout(&name, connection.id()).await {
            debug!(%name, %violation, "logout rejected");
            return Outbound::rejection(name, violation);
        }

        info!(%name, "logged out");
        self.dispatcher.broadcast(&name, LOGGED_OUT_ANNOUNCEMENT).await;
        Outbound::LoggedOut { name }
    }

    async fn message(
        &self,
        connection: &ConnectionHandle,
        name: String,
        text: String,
    ) -> Option<Outbound> {
        if !self.registry.is_logged_in(&name, connection.id()).await {
            return Some(Outbound::rejection(name, ProtocolViolation::NeedLogin));
        }
        if text.trim().is_empty() {
            return None;
        }
        self.dispatcher.broadcast(&name, &text).await;
        None
    }
}
