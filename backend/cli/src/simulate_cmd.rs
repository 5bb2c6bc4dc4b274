//! `canopy simulate`: drive the orchestrator through a list of paths with
//! headless modules standing in for every configured application. The host
//! bridge is built from the config's messaging section and paired with an
//! in-memory peer.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::info;

use canopy_config::{FileConfigService, HostConfig};
use canopy_core::{EventBus, ModuleRef, MountContext, RemoteModule, DEFAULT_EXPOSED_MODULE};
use canopy_loader::{StaticContainer, StaticModuleRegistry};
use canopy_logging::EventLogger;
use canopy_messaging::{BridgeStats, ChannelTransport, PostMessageBridge};
use canopy_orchestrator::{ApplicationInfo, HeadlessSurface, Orchestrator};
use canopy_state::StateSlice;

use crate::terminal_output::{note_error, note_info, note_success, note_warn, render_table, Column};

struct HeadlessModule {
    app: String,
    fail_mount: bool,
}

#[async_trait]
impl RemoteModule for HeadlessModule {
    fn name(&self) -> &str {
        &self.app
    }

    async fn bootstrap(&self) -> Result<()> {
        info!(app = %self.app, "Headless module bootstrapped");
        Ok(())
    }

    async fn mount(&self, ctx: &MountContext) -> Result<()> {
        if self.fail_mount {
            bail!("simulated mount failure");
        }
        info!(app = %self.app, container = %ctx.container, path = %ctx.path, "Rendered into container");
        Ok(())
    }

    async fn unmount(&self, ctx: &MountContext) -> Result<()> {
        info!(app = %self.app, container = %ctx.container, "Removed from container");
        Ok(())
    }
}

struct Simulation {
    /// `(path, Ok(app) | Err(message))` per navigation.
    outcomes: Vec<(String, std::result::Result<String, String>)>,
    applications: Vec<ApplicationInfo>,
    navigation: serde_json::Value,
    bridge_running: bool,
    bridge_stats: BridgeStats,
}

/// Origin the simulated host runs on.
const SIMULATED_HOST_ORIGIN: &str = "http://localhost";

pub async fn run(
    config_path: &Path,
    config: &HostConfig,
    paths: &[String],
    fail_mount: &[String],
) -> Result<()> {
    let sim = simulate(config_path, config, paths, fail_mount).await?;

    let mut failures = 0;
    for (path, outcome) in &sim.outcomes {
        match outcome {
            Ok(app) => note_success(&format!("{path} → {app}")),
            Err(e) => {
                failures += 1;
                note_error(&format!("{path}: {e}"));
            }
        }
    }

    let rows: Vec<Vec<String>> = sim
        .applications
        .iter()
        .map(|a| {
            vec![
                a.name.clone(),
                a.state.to_string(),
                a.container.clone(),
                a.routes.join(", "),
            ]
        })
        .collect();
    println!();
    print!(
        "{}",
        render_table(
            &[
                Column::new("Application"),
                Column::new("State"),
                Column::new("Container"),
                Column::new("Routes"),
            ],
            &rows
        )
    );
    println!();
    note_info(&format!(
        "navigation: {}",
        serde_json::to_string_pretty(&sim.navigation)?
    ));
    note_info(&format!(
        "bridge: {} (received {}, rejected by origin {})",
        if sim.bridge_running { "running" } else { "stopped" },
        sim.bridge_stats.received,
        sim.bridge_stats.rejected_origin
    ));
    if failures > 0 {
        note_warn(&format!("{failures} navigation(s) failed"));
    }
    Ok(())
}

async fn simulate(
    config_path: &Path,
    config: &HostConfig,
    paths: &[String],
    fail_mount: &[String],
) -> Result<Simulation> {
    let surface = Arc::new(HeadlessSurface::new(
        config.applications.iter().map(|a| a.container.clone()),
    ));
    let modules = Arc::new(StaticModuleRegistry::new());
    let bus = EventBus::new();
    let events = EventLogger::attach(&bus);

    let bridge_config = config.bridge_config();
    let (host_side, peer_side) =
        ChannelTransport::pair(SIMULATED_HOST_ORIGIN, bridge_config.target_origin.clone());
    let bridge = PostMessageBridge::new(bridge_config, Arc::new(host_side));
    bridge.start()?;

    let orchestrator = Orchestrator::builder(modules.clone(), surface)
        .bus(bus)
        .bridge(bridge.clone())
        .max_update_depth(config.max_update_depth())
        .request_timeout(config.request_timeout())
        .shared_scope(config.shared.clone())
        .build();

    let seeded = orchestrator
        .seed_remotes(&FileConfigService::new(config_path))
        .await?;
    info!(seeded, "Seeded remotes from config");

    for app in &config.applications {
        let (url, scope) = match orchestrator.loader().remote(&app.name) {
            Some(remote) => (remote.url, remote.scope),
            None => (app.entry.clone(), app.name.clone()),
        };
        let container = StaticContainer::new(scope);
        let exposed = app.entry_module().unwrap_or(DEFAULT_EXPOSED_MODULE).to_string();
        let name = app.name.clone();
        let fail = fail_mount.contains(&app.name);
        container.expose(exposed, move || {
            Ok(Arc::new(HeadlessModule {
                app: name.clone(),
                fail_mount: fail,
            }) as ModuleRef)
        });
        modules.register_script(url, container);

        if let Err(e) = orchestrator.register_application(app.clone()) {
            note_error(&format!("{}: {}", app.name, e));
        }
    }

    let mut outcomes = Vec::with_capacity(paths.len());
    for path in paths {
        let outcome = orchestrator
            .route_to(path)
            .await
            .map(|m| m.app)
            .map_err(|e| e.to_string());
        outcomes.push((path.clone(), outcome));
    }

    let sim = Simulation {
        outcomes,
        applications: orchestrator.applications(),
        navigation: orchestrator.state().get_slice(StateSlice::Navigation),
        bridge_running: bridge.is_running(),
        bridge_stats: bridge.stats(),
    };
    events.detach();
    orchestrator.destroy().await;
    drop(peer_side);
    if bridge.is_running() {
        note_warn("bridge still running after shutdown");
    }
    Ok(sim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::{ApplicationDescriptor, LifecycleState};

    fn config() -> HostConfig {
        let mut config = HostConfig::default();
        config.applications.push(
            ApplicationDescriptor::new("shop", "https://cdn.example/shop.js", "#main")
                .with_route("/shop"),
        );
        config.applications.push(
            ApplicationDescriptor::new("account", "https://cdn.example/account.js", "#main")
                .with_route("/account")
                .expose("./Profile", "./src/Profile"),
        );
        config
    }

    #[tokio::test]
    async fn test_simulation_navigates_headlessly() {
        let dir = std::env::temp_dir().join("canopy-sim-missing.yaml");
        let paths = vec!["/shop".to_string(), "/account".to_string(), "/nope".to_string()];
        let sim = simulate(&dir, &config(), &paths, &[]).await.unwrap();

        assert_eq!(sim.outcomes[0].1, Ok("shop".to_string()));
        assert_eq!(sim.outcomes[1].1, Ok("account".to_string()));
        assert!(sim.outcomes[2].1.is_err());
        let states: Vec<(String, LifecycleState)> = sim
            .applications
            .iter()
            .map(|a| (a.name.clone(), a.state))
            .collect();
        assert!(states.contains(&("shop".to_string(), LifecycleState::Unmounted)));
        assert!(states.contains(&("account".to_string(), LifecycleState::Mounted)));
        assert_eq!(sim.navigation["activeApp"], "account");
        assert!(sim.bridge_running);
    }

    #[tokio::test]
    async fn test_bridge_uses_configured_origins() {
        let mut config = config();
        config.messaging = Some(canopy_config::MessagingConfig {
            self_id: Some("shell".into()),
            target_origin: None,
            allowed_origins: vec!["https://shop.example".into()],
            request_timeout_ms: Some(250),
        });
        let bridge_config = config.bridge_config();
        assert_eq!(bridge_config.target_origin, "https://shop.example");

        let dir = std::env::temp_dir().join("canopy-sim-missing.yaml");
        let sim = simulate(&dir, &config, &["/shop".to_string()], &[])
            .await
            .unwrap();
        assert!(sim.bridge_running);
        assert_eq!(sim.bridge_stats.rejected_origin, 0);
    }

    #[tokio::test]
    async fn test_simulated_mount_failure_is_reported() {
        let dir = std::env::temp_dir().join("canopy-sim-missing.yaml");
        let paths = vec!["/shop".to_string()];
        let sim = simulate(&dir, &config(), &paths, &["shop".to_string()])
            .await
            .unwrap();
        let err = sim.outcomes[0].1.clone().unwrap_err();
        assert!(err.contains("simulated mount failure"));
        assert_eq!(sim.navigation["activeApp"], serde_json::Value::Null);
    }
}
