//! Shared application state for the Axum server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use coderoom_config::CoderoomConfig;
use coderoom_core::ai::ScriptedCollaborator;
use coderoom_core::{AiCollaborator, IdentityVerifier, ProjectStore, StaticTokenVerifier, TreeSync};

use crate::rooms::RoomRegistry;

/// Tunables for the HTTP layer and the session channel.
#[derive(Debug, Clone)]
pub struct Settings {
    pub handshake_timeout: Duration,
    pub outbound_buffer: usize,
    pub mention: String,
    pub request_timeout: Duration,
    pub body_limit: usize,
    pub concurrency_limit: usize,
    pub cors_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from_config(&CoderoomConfig::default())
    }
}

impl Settings {
    pub fn from_config(config: &CoderoomConfig) -> Self {
        let server = &config.server;
        Settings {
            handshake_timeout: server.handshake_timeout.as_duration(),
            outbound_buffer: server.outbound_buffer.max(1),
            mention: config.ai.mention.clone(),
            request_timeout: server.request_timeout.as_duration(),
            body_limit: server.body_limit.as_bytes() as usize,
            concurrency_limit: 256,
            cors_origins: server.cors_origins.clone(),
        }
    }
}

/// Shared state accessible to all route handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn ProjectStore>,
    verifier: Arc<dyn IdentityVerifier>,
    ai: Arc<dyn AiCollaborator>,
    sync: TreeSync,
    rooms: RoomRegistry,
    settings: Settings,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        verifier: Arc<dyn IdentityVerifier>,
        ai: Arc<dyn AiCollaborator>,
        settings: Settings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sync: TreeSync::new(store.clone()),
                store,
                verifier,
                ai,
                rooms: RoomRegistry::new(),
                settings,
                started_at: Instant::now(),
            }),
        }
    }

    /// Build the store, verifier and collaborator named in the config.
    pub fn from_config(config: &CoderoomConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = coderoom_core::store::from_config(&config.store)?;
        let verifier = Arc::new(StaticTokenVerifier::from_config(&config.auth));
        let ai = coderoom_core::ai::from_config(&config.ai)?;
        Ok(Self::new(store, verifier, ai, Settings::from_config(config)))
    }

    /// State with an echoing assistant and default settings, for tests and demos.
    pub fn with_stub_ai(store: Arc<dyn ProjectStore>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self::new(
            store,
            verifier,
            Arc::new(ScriptedCollaborator::echo()),
            Settings::default(),
        )
    }

    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.inner.store
    }

    pub fn verifier(&self) -> &dyn IdentityVerifier {
        self.inner.verifier.as_ref()
    }

    pub fn ai(&self) -> &dyn AiCollaborator {
        self.inner.ai.as_ref()
    }

    pub fn sync(&self) -> &TreeSync {
        &self.inner.sync
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.inner.rooms
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Get server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }
}
