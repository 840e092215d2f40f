//! Application wiring: configuration, runtime bring-up and shutdown.

use anyhow::{anyhow, Result};
use clr_bridge::{Bridge, HostLoader};
use std::any::Any;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cli::CliArgs;
use crate::config::AppConfig;
use crate::connection::{BridgedConnection, StandInConnection, StandInProtocol};
use crate::exports::{register_exports, EventImports};
use crate::logging::setup_logging;
use crate::signals;

/// Address the stand-in connection reports.
pub const STAND_IN_ADDRESS: &str = "127.0.0.1";

pub fn platform_name() -> &'static str {
    if cfg!(windows) {
        "Windows"
    } else if cfg!(target_os = "macos") {
        "Mac"
    } else {
        "Linux"
    }
}

pub fn platform_banner() -> String {
    let bits = if cfg!(target_pointer_width = "64") { 64 } else { 32 };
    format!("Running on {} ({}-bit)", platform_name(), bits)
}

/// Tracks `value` under `name`, logging when the table refuses it.
fn track_named<T: Any + Send + Sync>(bridge: &Bridge, value: &Arc<T>, name: &str) -> bool {
    let tracked = bridge.track(value, Some(name));
    if !tracked {
        warn!("Failed to track {}: value already tracked or name taken", name);
    }
    tracked
}

// ============================================================================
// Session
// ============================================================================

/// A loaded runtime with the game-server glue attached.
pub struct Session {
    bridge: Bridge,
    imports: Arc<EventImports>,
    protocol: Arc<StandInProtocol>,
    connection: Arc<BridgedConnection<StandInConnection>>,
}

impl Session {
    /// Registers the exports, loads the host and attaches stand-in
    /// connection and protocol objects.
    pub fn start(config: &AppConfig, loader: HostLoader) -> Result<Self> {
        let bridge = Bridge::new();
        let protocol = Arc::new(StandInProtocol::new());
        register_exports(&bridge, &protocol)?;

        bridge.load_host(loader)?;

        let imports = Arc::new(EventImports::declare(&bridge, &config.imports)?);
        let connection = Arc::new(BridgedConnection::new(
            Arc::new(StandInConnection::new(STAND_IN_ADDRESS, protocol.clone())),
            imports.clone(),
        ));
        track_named(&bridge, &connection, "connection");
        track_named(&bridge, &protocol, "protocol");

        Ok(Self {
            bridge,
            imports,
            protocol,
            connection,
        })
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn imports(&self) -> &EventImports {
        &self.imports
    }

    pub fn protocol(&self) -> &Arc<StandInProtocol> {
        &self.protocol
    }

    pub fn connection(&self) -> &Arc<BridgedConnection<StandInConnection>> {
        &self.connection
    }

    /// One managed round-trip call.
    pub fn self_test(&self) -> Result<String> {
        Ok(self.imports.test_string()?)
    }

    /// Tears the runtime down. Returns `false` if that already happened.
    pub fn shutdown(&self) -> bool {
        self.bridge.teardown()
    }
}

// ============================================================================
// Application
// ============================================================================

pub struct Application {
    config: AppConfig,
    args: CliArgs,
}

impl Application {
    /// Loads the configuration and applies the command-line overrides.
    pub async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(assembly) = &args.assembly {
            config.bootstrap.assembly_path = assembly.to_string_lossy().to_string();
        }
        if let Some(log_level) = &args.log_level {
            config.logging.level = log_level.clone();
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        Ok(Self { config, args })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn run(self) -> Result<()> {
        setup_logging(&self.config.logging, self.args.json_logs)?;
        info!("{}", platform_banner());
        info!(
            "Config: {} | Bootstrap: {}",
            self.args.config_path.display(),
            self.config.bootstrap.assembly_path
        );

        let session = match Session::start(&self.config, self.config.host_loader()?) {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to start the .NET runtime: {:#}", e);
                return Err(e);
            }
        };

        if self.args.self_test {
            let text = session.self_test();
            session.shutdown();
            println!("[dotnet] round-trip: {}", text?);
            return Ok(());
        }

        info!("Spadecs runtime host is running, press Ctrl+C to stop");
        if signals::teardown_on_signal(session.bridge().clone()).await? {
            info!("Runtime shut down");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn args(config_path: PathBuf) -> CliArgs {
        CliArgs {
            config_path,
            assembly: None,
            log_level: None,
            json_logs: false,
            self_test: false,
        }
    }

    #[test]
    fn test_platform_banner() {
        let banner = platform_banner();
        assert!(banner.starts_with("Running on "));
        assert!(banner.ends_with("-bit)"));
        assert!(banner.contains(platform_name()));
    }

    #[test]
    fn test_track_named_refuses_taken_name() {
        let bridge = Bridge::new();
        let first = Arc::new(StandInProtocol::new());
        let second = Arc::new(StandInProtocol::new());
        assert!(track_named(&bridge, &first, "protocol"));
        assert!(!track_named(&bridge, &second, "protocol"));
        assert!(!track_named(&bridge, &first, "protocol-again"));

        let found = bridge.find::<StandInProtocol>("protocol").unwrap();
        assert!(Arc::ptr_eq(&found, &first));
    }

    #[tokio::test]
    async fn test_cli_overrides_config() {
        let dir = TempDir::new().unwrap();
        let mut args = args(dir.path().join("spadecs.toml"));
        args.assembly = Some(PathBuf::from("/srv/Spadecs.Boot.dll"));
        args.log_level = Some("debug".to_string());
        args.json_logs = true;

        let app = Application::new(args).await.unwrap();
        assert_eq!(app.config().bootstrap.assembly_path, "/srv/Spadecs.Boot.dll");
        assert_eq!(app.config().logging.level, "debug");
        assert!(app.config().logging.json_format);
        assert!(dir.path().join("spadecs.toml").exists());
    }

    #[tokio::test]
    async fn test_invalid_override_rejected() {
        let dir = TempDir::new().unwrap();
        let mut args = args(dir.path().join("spadecs.toml"));
        args.log_level = Some("loud".to_string());
        assert!(Application::new(args).await.is_err());
    }
}
