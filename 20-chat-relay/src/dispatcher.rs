use std::{collections::HashSet, sync::Arc};

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::{
    config::BroadcastScope,
    message::Outbound,
    registry::{Session, SessionRegistry},
};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans broadcast frames out to every session except the origin.
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    scope: BroadcastScope,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>, scope: BroadcastScope) -> Self {
        Self { registry, scope }
    }

    /// Sends `text` attributed to `origin` to every addressed session.
    ///
    /// Recipients come from a registry snapshot, so the registry lock is free
    /// while frames are written. Writes run concurrently and each is bounded
    /// by its outbox's write timeout; a failed recipient is logged and
    /// counted without affecting the others. No retries.
    pub async fn broadcast(&self, origin: &str, text: &str) -> Delivery {
        let sessions = self.registry.snapshot().await;
        let recipients = self.recipients(origin, &sessions);
        let frame = Outbound::Broadcast {
            name: origin.to_string(),
            text: text.to_string(),
        };

        let results = join_all(recipients.iter().map(|session| {
            let frame = frame.clone();
            async move { (*session, session.connection().send(frame).await) }
        }))
        .await;

        let mut delivery = Delivery::default();
        for (session, result) in results {
            match result {
                Ok(()) => delivery.delivered += 1,
                Err(err) => {
                    delivery.failed += 1;
                    warn!(
                        recipient = session.name(),
                        connection = session.connection().id(),
                        error = %err,
                        "failed to deliver broadcast"
                    );
                }
            }
        }

        debug!(
            origin,
            delivered = delivery.delivered,
            failed = delivery.failed,
            "broadcast finished"
        );
        delivery
    }

    /// Sessions in scope on a still-open connection, excluding `origin` and
    /// anything sharing its connection, with at most one entry per connection.
    fn recipients<'a>(&self, origin: &str, sessions: &'a [Session]) -> Vec<&'a Session> {
        let origin_connection = sessions
            .iter()
            .find(|session| session.name() == origin)
            .map(|session| session.connection().id());

        let mut seen = HashSet::new();
        sessions
            .iter()
            .filter(|session| session.name() != origin)
            .filter(|session| Some(session.connection().id()) != origin_connection)
            .filter(|session| !session.connection().is_closed())
            .filter(|session| match self.scope {
                BroadcastScope::LoggedIn => session.is_logged_in(),
                BroadcastScope::All => true,
            })
            .filter(|session| seen.insert(session.connection().id()))
            .collect()
    }
}
