//! Shard manager
//!
//! Owns the shards of one bot and routes guild-scoped commands to the shard
//! that serves the guild. Shards share the identify gate, the connector and
//! the event handler; nothing else crosses shard boundaries.

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway_info::GatewayInfoProvider;
use crate::handler::EventHandler;
use crate::protocol::{
    GatewayMessage, PresenceUpdatePayload, RequestGuildMembersPayload, VoiceStateUpdatePayload,
};
use crate::ratelimit::{IdentifyGate, IdentifyLimiter};
use crate::shard::{ConnectionState, ShardConnection, ShardDescriptor};
use crate::transport::{Connector, WebSocketConnector};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fluxer_core::Snowflake;
use futures::future::join_all;
use std::sync::Arc;

/// Pool of shard connections
pub struct ShardManager {
    config: Arc<GatewayConfig>,
    shard_count: u32,
    connector: Arc<dyn Connector>,
    identify: Arc<dyn IdentifyLimiter>,
    handler: Arc<dyn EventHandler>,

    /// Shards by id
    shards: DashMap<u32, Arc<ShardConnection>>,
}

impl ShardManager {
    /// Manager for `shard_count` shards over WebSocket
    pub fn new(
        config: GatewayConfig,
        shard_count: u32,
        identify: Arc<dyn IdentifyLimiter>,
        handler: Arc<dyn EventHandler>,
    ) -> GatewayResult<Self> {
        config.validate()?;
        if shard_count == 0 {
            return Err(GatewayError::InvalidConfig("shard count must be positive".to_string()));
        }

        Ok(Self {
            config: Arc::new(config),
            shard_count,
            connector: Arc::new(WebSocketConnector),
            identify,
            handler,
            shards: DashMap::new(),
        })
    }

    /// Size the manager from gateway discovery.
    ///
    /// The discovered URL replaces the configured one; an explicit
    /// `shard_count` in the config wins over the recommended count. The
    /// identify gate follows the advertised session start limit.
    pub async fn from_gateway_info(
        mut config: GatewayConfig,
        provider: &dyn GatewayInfoProvider,
        handler: Arc<dyn EventHandler>,
    ) -> GatewayResult<Self> {
        let info = provider.fetch_gateway_info().await?;
        let shard_count = config.shard_count.unwrap_or(info.shards).max(1);
        config.gateway_url = info.url;

        let gate = IdentifyGate::from_session_start_limit(&info.session_start_limit);
        tracing::info!(
            shard_count,
            max_concurrency = gate.max_concurrency(),
            "Shard manager sized from gateway info"
        );

        Self::new(config, shard_count, Arc::new(gate), handler)
    }

    /// Use another transport, e.g. an in-process gateway in tests
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Open the given shards and wait until each is connected.
    ///
    /// Shards that are already running are waited on, not replaced; closed
    /// ones are replaced. The check and the replacement happen under the
    /// map entry's lock, so concurrent calls share one connection per shard.
    /// All shards start together and the identify gate spaces out their
    /// handshakes. Returns the first failure after every shard has settled;
    /// the other shards keep running.
    pub async fn open(&self, shard_ids: &[u32]) -> GatewayResult<()> {
        let mut opening = Vec::with_capacity(shard_ids.len());

        for &shard_id in shard_ids {
            let descriptor = ShardDescriptor::new(shard_id, self.shard_count)?;
            let shard = match self.shards.entry(shard_id) {
                Entry::Occupied(mut entry) => {
                    if entry.get().state() == ConnectionState::Closed {
                        let shard = self.new_shard(descriptor);
                        entry.insert(Arc::clone(&shard));
                        shard
                    } else {
                        tracing::debug!(shard_id, "Shard already running");
                        Arc::clone(entry.get())
                    }
                }
                Entry::Vacant(entry) => {
                    let shard = self.new_shard(descriptor);
                    entry.insert(Arc::clone(&shard));
                    shard
                }
            };
            opening.push(shard);
        }

        tracing::info!(count = opening.len(), shard_count = self.shard_count, "Opening shards");

        let results = join_all(opening.iter().map(|shard| shard.open())).await;
        results.into_iter().collect()
    }

    fn new_shard(&self, descriptor: ShardDescriptor) -> Arc<ShardConnection> {
        ShardConnection::new(
            descriptor,
            Arc::clone(&self.config),
            Arc::clone(&self.connector),
            Arc::clone(&self.identify),
            Arc::clone(&self.handler),
        )
    }

    /// Open every shard `0..shard_count`
    pub async fn open_all(&self) -> GatewayResult<()> {
        let ids: Vec<u32> = (0..self.shard_count).collect();
        self.open(&ids).await
    }

    /// Shard serving `guild_id`: `(guild_id >> 22) % shard_count`
    #[must_use]
    pub fn shard_id_for(&self, guild_id: Snowflake) -> u32 {
        guild_id.shard_id(self.shard_count)
    }

    /// Running shard serving `guild_id`
    pub fn route(&self, guild_id: Snowflake) -> GatewayResult<Arc<ShardConnection>> {
        let shard_id = self.shard_id_for(guild_id);
        self.shard(shard_id)
            .filter(|shard| !shard.state().is_terminal())
            .ok_or(GatewayError::ShardNotRunning(shard_id))
    }

    #[must_use]
    pub fn shard(&self, shard_id: u32) -> Option<Arc<ShardConnection>> {
        self.shards.get(&shard_id).map(|entry| Arc::clone(entry.value()))
    }

    /// All shards, ordered by id
    #[must_use]
    pub fn shards(&self) -> Vec<Arc<ShardConnection>> {
        let mut shards: Vec<_> = self.shards.iter().map(|e| Arc::clone(e.value())).collect();
        shards.sort_by_key(|shard| shard.shard_id());
        shards
    }

    /// Send a command on the shard serving `guild_id`
    pub async fn send(&self, guild_id: Snowflake, message: GatewayMessage) -> GatewayResult<()> {
        self.route(guild_id)?.send(message).await
    }

    /// Update presence on every running shard
    pub async fn update_presence(&self, presence: PresenceUpdatePayload) -> GatewayResult<()> {
        let shards: Vec<_> = self
            .shards()
            .into_iter()
            .filter(|shard| !shard.state().is_terminal())
            .collect();

        let results = join_all(
            shards
                .iter()
                .map(|shard| shard.update_presence(presence.clone())),
        )
        .await;
        results.into_iter().collect()
    }

    pub async fn update_presence_for_shard(
        &self,
        shard_id: u32,
        presence: PresenceUpdatePayload,
    ) -> GatewayResult<()> {
        self.shard(shard_id)
            .ok_or(GatewayError::ShardNotRunning(shard_id))?
            .update_presence(presence)
            .await
    }

    /// Join, move or leave a voice channel in the payload's guild
    pub async fn update_voice_state(&self, payload: VoiceStateUpdatePayload) -> GatewayResult<()> {
        self.route(payload.guild_id)?.update_voice_state(payload).await
    }

    /// Request members of the payload's guild; returns the nonce
    pub async fn request_guild_members(
        &self,
        payload: RequestGuildMembersPayload,
    ) -> GatewayResult<String> {
        self.route(payload.guild_id)?
            .request_guild_members(payload)
            .await
    }

    /// Close every shard concurrently.
    ///
    /// Each shard gets `shutdown_timeout`; shards that miss it are aborted
    /// and reported in `GatewayError::ShutdownTimeout`.
    pub async fn close(&self) -> GatewayResult<()> {
        let timeout = self.config.shutdown_timeout;
        let shards = self.shards();
        tracing::info!(count = shards.len(), "Closing shards");

        let results = join_all(shards.iter().map(|shard| async move {
            if tokio::time::timeout(timeout, shard.close()).await.is_err() {
                tracing::warn!(shard_id = shard.shard_id(), "Shard did not close in time, aborting");
                shard.abort();
                return Some(shard.shard_id());
            }
            None
        }))
        .await;

        let timed_out: Vec<u32> = results.into_iter().flatten().collect();
        if timed_out.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::ShutdownTimeout(timed_out))
        }
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("shard_count", &self.shard_count)
            .field("shards", &self.shards.len())
            .finish()
    }
}
