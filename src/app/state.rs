//! Application state shared across routes

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::session::SessionHandle;

/// An open WebSocket connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedClient {
    pub name: String,
    pub connected_at: DateTime<Utc>,
}

/// Registry of open connections, keyed by connection id
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<Uuid, ConnectedClient>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.clients.insert(
            id,
            ConnectedClient {
                name: name.to_string(),
                connected_at: Utc::now(),
            },
        );
        id
    }

    pub fn remove(&self, id: &Uuid) -> Option<ConnectedClient> {
        self.clients.remove(id).map(|(_, client)| client)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session: SessionHandle,
    pub clients: Arc<ClientRegistry>,
}

impl AppState {
    pub fn new(config: Config, session: SessionHandle) -> Self {
        Self {
            config: Arc::new(config),
            session,
            clients: Arc::new(ClientRegistry::new()),
        }
    }
}
