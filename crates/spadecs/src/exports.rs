//! Game-server glue: native functions exported to managed scripts and the
//! managed event handlers imported back.

use clr_bridge::{Bridge, ImportTarget, Signature, TypedImport, WireType};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::config::ImportSettings;
use crate::connection::{ConnectHooks, ConnectVerdict, DisconnectReason, Protocol};

/// Value returned to managed code by `my_pythonic_function`.
pub const ECHO_RESULT: i32 = 123;

// ============================================================================
// Outbound bindings
// ============================================================================

/// Registers the native functions managed scripts may call.
///
/// Must run before the host is loaded so the bindings are part of the map
/// handed to the bootstrapper. The protocol is held weakly.
pub fn register_exports<P: Protocol + 'static>(bridge: &Bridge, protocol: &Arc<P>) -> clr_bridge::Result<()> {
    bridge.register_outbound(
        "my_pythonic_function",
        Signature::new(WireType::Int32, [WireType::Utf8String]),
        |value: String| {
            info!("(.NET to native) {}", value);
            ECHO_RESULT
        },
    )?;

    let weak: Weak<P> = Arc::downgrade(protocol);
    bridge.register_outbound(
        "cplayer_kick_by_id",
        Signature::new(WireType::Void, [WireType::UInt8]),
        move |player_id: u8| {
            kick(&weak, player_id);
        },
    )?;

    Ok(())
}

fn kick<P: Protocol>(protocol: &Weak<P>, player_id: u8) -> bool {
    let Some(protocol) = protocol.upgrade() else {
        debug!("Kick of player {} ignored: protocol is gone", player_id);
        return false;
    };
    match protocol.player(player_id) {
        Some(player) => {
            info!("Kicking player {}", player_id);
            player.disconnect(DisconnectReason::Kicked);
            true
        }
        None => false,
    }
}

// ============================================================================
// Inbound imports
// ============================================================================

/// Handlers exposed by the managed event manager.
#[derive(Debug, Clone)]
pub struct EventImports {
    pub get_test_string: TypedImport<(), String>,
    pub on_pre_player_connect: TypedImport<(String,), u8>,
    pub on_post_player_connect: TypedImport<(String, u8), u8>,
}

impl EventImports {
    /// Declares the imports. Nothing is resolved until the first call.
    pub fn declare(bridge: &Bridge, settings: &ImportSettings) -> clr_bridge::Result<Self> {
        let target = |method: &str| {
            ImportTarget::new(
                settings.assembly_identity.as_str(),
                settings.event_type.as_str(),
                method,
            )
        };

        Ok(Self {
            get_test_string: bridge.declare_import(
                "GetTestString",
                target("GetTestString"),
                Signature::new(WireType::Utf8String, Vec::new()),
            )?,
            on_pre_player_connect: bridge.declare_import(
                "OnPrePlayerConnect",
                target("OnPrePlayerConnect"),
                Signature::new(WireType::UInt8, [WireType::Utf8String]),
            )?,
            on_post_player_connect: bridge.declare_import(
                "OnPostPlayerConnect",
                target("OnPostPlayerConnect"),
                Signature::new(WireType::UInt8, [WireType::Utf8String, WireType::UInt8]),
            )?,
        })
    }

    pub fn test_string(&self) -> clr_bridge::Result<String> {
        self.get_test_string.call(())
    }
}

impl ConnectHooks for EventImports {
    fn pre_connect(&self, address: &str) -> clr_bridge::Result<ConnectVerdict> {
        let raw = self.on_pre_player_connect.call((address.to_string(),))?;
        Ok(ConnectVerdict::from_raw(raw))
    }

    fn post_connect(&self, address: &str, player_id: u8) -> clr_bridge::Result<ConnectVerdict> {
        let raw = self.on_post_player_connect.call((address.to_string(), player_id))?;
        Ok(ConnectVerdict::from_raw(raw))
    }
}
