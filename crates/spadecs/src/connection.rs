//! Connection interception.
//!
//! The game server owns the real connection and protocol objects. This module
//! defines the slice of them the runtime bridge needs and wraps a connection
//! so managed event handlers get a say before and after the default connect
//! logic runs.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Why a player was disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Kicked,
}

/// A connected player as seen by the bridge.
pub trait Player: Send + Sync {
    fn disconnect(&self, reason: DisconnectReason);
}

/// The server protocol object: maps player ids to players.
pub trait Protocol: Send + Sync {
    fn player(&self, id: u8) -> Option<Arc<dyn Player>>;
}

/// One client connection.
pub trait Connection: Send + Sync {
    /// Remote IP address, without the port.
    fn address(&self) -> &str;

    /// Default connect handling. Returns whether the client is admitted.
    fn on_connect(&self) -> bool;

    /// Id assigned to the player, once connected.
    fn player_id(&self) -> Option<u8>;
}

/// Result of a managed connect event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectVerdict {
    /// Refuse the connection.
    Deny = 0,
    /// Admit the connection.
    Allow = 1,
    /// No opinion; use the default logic.
    Pass = 2,
}

impl ConnectVerdict {
    /// Decodes a raw verdict. Anything unknown is treated as [`ConnectVerdict::Pass`].
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Deny,
            1 => Self::Allow,
            2 => Self::Pass,
            other => {
                warn!("Unknown connect verdict {}, treating as pass", other);
                Self::Pass
            }
        }
    }
}

/// Managed connect event handlers.
pub trait ConnectHooks: Send + Sync {
    fn pre_connect(&self, address: &str) -> clr_bridge::Result<ConnectVerdict>;

    fn post_connect(&self, address: &str, player_id: u8) -> clr_bridge::Result<ConnectVerdict>;
}

/// A connection whose connect event is routed through [`ConnectHooks`].
pub struct BridgedConnection<C> {
    inner: Arc<C>,
    hooks: Arc<dyn ConnectHooks>,
}

impl<C: Connection> BridgedConnection<C> {
    pub fn new(inner: Arc<C>, hooks: Arc<dyn ConnectHooks>) -> Self {
        Self { inner, hooks }
    }

    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }

    /// Runs the connect event.
    ///
    /// The pre-connect verdict can refuse or admit outright. On pass the
    /// default logic runs and the post-connect verdict can still override
    /// its outcome. A failing handler counts as a pass.
    pub fn on_connect(&self) -> bool {
        let address = self.inner.address();
        match self.verdict("pre-connect", self.hooks.pre_connect(address)) {
            ConnectVerdict::Deny => {
                info!("Connection from {} denied before connect", address);
                return false;
            }
            ConnectVerdict::Allow => {
                debug!("Connection from {} allowed before connect", address);
                return true;
            }
            ConnectVerdict::Pass => {}
        }

        let admitted = self.inner.on_connect();
        let Some(player_id) = self.inner.player_id() else {
            return admitted;
        };

        match self.verdict("post-connect", self.hooks.post_connect(address, player_id)) {
            ConnectVerdict::Deny => false,
            ConnectVerdict::Allow => true,
            ConnectVerdict::Pass => admitted,
        }
    }

    fn verdict(&self, event: &str, result: clr_bridge::Result<ConnectVerdict>) -> ConnectVerdict {
        result.unwrap_or_else(|e| {
            warn!("{} handler failed for {}: {}", event, self.inner.address(), e);
            ConnectVerdict::Pass
        })
    }
}

impl<C: Connection> Connection for BridgedConnection<C> {
    fn address(&self) -> &str {
        self.inner.address()
    }

    fn on_connect(&self) -> bool {
        BridgedConnection::on_connect(self)
    }

    fn player_id(&self) -> Option<u8> {
        self.inner.player_id()
    }
}

// ============================================================================
// Stand-ins used when no game server is attached
// ============================================================================

/// Player that only records whether it was disconnected.
#[derive(Debug, Default)]
pub struct StandInPlayer {
    disconnected: AtomicBool,
}

impl StandInPlayer {
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl Player for StandInPlayer {
    fn disconnect(&self, reason: DisconnectReason) {
        debug!("Stand-in player disconnected ({:?})", reason);
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct StandInProtocol {
    players: DashMap<u8, Arc<StandInPlayer>>,
}

impl StandInProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a player under the lowest free id.
    pub fn join(&self) -> Option<(u8, Arc<StandInPlayer>)> {
        (0..=u8::MAX).find_map(|id| match self.players.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let player = Arc::new(StandInPlayer::default());
                slot.insert(player.clone());
                Some((id, player))
            }
        })
    }

    /// Removes a player, freeing its id.
    pub fn leave(&self, id: u8) -> Option<Arc<StandInPlayer>> {
        self.players.remove(&id).map(|(_, player)| player)
    }

    pub fn stand_in(&self, id: u8) -> Option<Arc<StandInPlayer>> {
        self.players.get(&id).map(|player| player.clone())
    }
}

impl Protocol for StandInProtocol {
    fn player(&self, id: u8) -> Option<Arc<dyn Player>> {
        self.players
            .get(&id)
            .map(|player| player.clone() as Arc<dyn Player>)
    }
}

/// Connection that admits every client and joins it to a protocol.
pub struct StandInConnection {
    address: String,
    protocol: Arc<StandInProtocol>,
    player_id: Mutex<Option<u8>>,
}

impl StandInConnection {
    pub fn new(address: impl Into<String>, protocol: Arc<StandInProtocol>) -> Self {
        Self {
            address: address.into(),
            protocol,
            player_id: Mutex::new(None),
        }
    }
}

impl Connection for StandInConnection {
    fn address(&self) -> &str {
        &self.address
    }

    fn on_connect(&self) -> bool {
        match self.protocol.join() {
            Some((id, _)) => {
                *self.player_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
                true
            }
            None => false,
        }
    }

    fn player_id(&self) -> Option<u8> {
        *self.player_id.lock().unwrap_or_else(|e| e.into_inner())
    }
}
