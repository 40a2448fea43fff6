//! `WashdayServer` builder and server loop.
//!
//! This is the entry point for running a Washday server. It ties together
//! all the layers: transport → protocol → room registry → room actors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use washday_model::{BuiltinContent, ContentProvider};
use washday_protocol::{Codec, JsonCodec};
use washday_room::{PersistenceSink, RoomConfig, RoomRegistry};
use washday_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{ServerConfig, WashdayError};

/// The current protocol version. Clients must send this in their
/// handshake or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<S, C> {
    pub(crate) rooms: Mutex<RoomRegistry<S>>,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a Washday server.
///
/// # Example
///
/// ```rust,no_run
/// use washday::{TracingSink, WashdayServer};
///
/// # async fn run() -> Result<(), washday::WashdayError> {
/// let server = WashdayServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(TracingSink)
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct WashdayServerBuilder {
    config: ServerConfig,
    content: Option<Arc<dyn ContentProvider>>,
    seed: Option<u64>,
}

impl WashdayServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::from_config(ServerConfig::default())
    }

    /// Starts from a loaded configuration.
    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            config,
            content: None,
            seed: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    /// Sets the rules for every room.
    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.config.room = config;
        self
    }

    /// Replaces the built-in prompts, events, and catalog.
    pub fn content(mut self, content: Arc<dyn ContentProvider>) -> Self {
        self.content = Some(content);
        self
    }

    /// Seeds room codes, dice, and bots for reproducible runs.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Drops connections that stay silent for `timeout`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// How often expired rooms are removed.
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.config.reap_interval = interval;
        self
    }

    /// Binds the listener. Finished sessions go to `sink`.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<S: PersistenceSink>(
        self,
        sink: S,
    ) -> Result<WashdayServer<S, JsonCodec>, WashdayError> {
        let content: Arc<dyn ContentProvider> = match self.content {
            Some(content) => content,
            None => Arc::new(BuiltinContent::load()?),
        };
        let transport = WebSocketTransport::bind(&self.config.bind).await?;

        let sink = Arc::new(sink);
        let room_config = self.config.room.clone();
        let registry = match self.seed {
            Some(seed) => RoomRegistry::seeded(room_config, content, sink, seed),
            None => RoomRegistry::new(room_config, content, sink),
        };

        let state = Arc::new(ServerState {
            rooms: Mutex::new(registry),
            codec: JsonCodec,
            config: self.config,
        });

        Ok(WashdayServer { transport, state })
    }
}

impl Default for WashdayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Washday server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct WashdayServer<S, C> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S, C>>,
}

impl WashdayServer<(), JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> WashdayServerBuilder {
        WashdayServerBuilder::new()
    }
}

impl<S, C> WashdayServer<S, C>
where
    S: PersistenceSink,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the server accept loop.
    ///
    /// Accepts incoming connections and spawns a handler task for each.
    /// Also removes expired rooms on the configured interval. Runs until
    /// the process is terminated.
    pub async fn run(mut self) -> Result<(), WashdayError> {
        tracing::info!(addr = %self.state.config.bind, "washday server running");
        tokio::spawn(reap_rooms(Arc::clone(&self.state)));

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Periodically forgets rooms whose actors have stopped.
async fn reap_rooms<S: PersistenceSink, C: Codec>(state: Arc<ServerState<S, C>>) {
    // `interval` panics on a zero period.
    let period = state.config.reap_interval.max(Duration::from_millis(10));
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let reaped = state.rooms.lock().await.reap_expired();
        for code in reaped {
            tracing::debug!(room = %code, "room reaped");
        }
    }
}
