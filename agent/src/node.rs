// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The node: every long-lived component of the agent, wired together

use api::{ApiState, Credentials};
use chute::ChuteCatalog;
use color_eyre::eyre::{Result, bail, eyre};
use config::{HostConfigStore, Settings};
use confd::ConfigManager;
use exec::{HostExecutor, Runner};
use std::sync::Arc;
use std::time::Duration;
use sysfs::{NetProbe, SysNet};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uci::UciConfigDir;
use update::{ContainerRuntime, DockerCli, LogReporter, UpdateEnv, UpdateManager};

/// Grace period of in-flight API requests on shutdown
const API_DRAIN: Duration = Duration::from_secs(5);

fn container_runtime(settings: &Settings, runner: &Runner) -> Result<Arc<dyn ContainerRuntime>> {
    match settings.container_runtime.as_str() {
        "docker" => Ok(Arc::new(DockerCli::new(runner.clone()))),
        other => bail!("Unsupported container runtime '{other}'"),
    }
}

/// Build the environment updates run in
pub fn build_env(
    settings: &Settings,
    runner: Runner,
    probe: Arc<dyn NetProbe>,
) -> Result<UpdateEnv> {
    for dir in [&settings.home_dir, &settings.uci_config_dir, &settings.write_dir] {
        std::fs::create_dir_all(dir).map_err(|e| eyre!("Failed to create {}: {e}", dir.display()))?;
    }
    let host_store = HostConfigStore::new(
        &settings.host_config_file,
        settings.default_host_config_file.as_deref(),
        probe,
    );
    let catalog = ChuteCatalog::load(&settings.catalog_file())?;
    info!("Catalog holds {} chutes", catalog.list().len());
    Ok(UpdateEnv {
        settings: settings.clone(),
        catalog: Arc::new(catalog),
        host_store: Arc::new(host_store),
        uci: UciConfigDir::new(&settings.uci_config_dir),
        confd: Arc::new(ConfigManager::new(
            &settings.uci_config_dir,
            &settings.write_dir,
            runner.clone(),
        )),
        runtime: container_runtime(settings, &runner)?,
        runner,
    })
}

async fn wait_stop(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Run the node until `stop` turns true: the update worker, the catalog flusher and the
/// local API. A failing API stops the node too. On the way out, the configuration confd
/// applied is reverted.
pub async fn run(settings: &Settings, stop: &watch::Sender<bool>) -> Result<()> {
    let mut shutdown = stop.subscribe();
    let runner = Runner::new(
        HostExecutor::new().as_executor(),
        settings.command_timeouts,
    );
    let probe: Arc<dyn NetProbe> = Arc::new(SysNet::host()?);
    let env = Arc::new(build_env(settings, runner, probe)?);
    let flusher = ChuteCatalog::spawn_flusher(env.catalog.clone(), settings.catalog_flush_period());

    let manager = Arc::new(UpdateManager::new(env.clone(), Arc::new(LogReporter)));
    let worker = tokio::spawn(manager.clone().run(shutdown.clone()));

    let credentials = Credentials::load(&settings.password_path())?;
    let handle = axum_server::Handle::new();
    let mut server = tokio::spawn(api::serve(
        settings.api_address,
        ApiState::new(manager, credentials),
        handle.clone(),
    ));

    tokio::select! {
        () = wait_stop(&mut shutdown) => {
            info!("Stopping the API");
            handle.graceful_shutdown(Some(API_DRAIN));
            if let Err(e) = (&mut server).await {
                warn!("API task failed: {e}");
            }
        }
        result = &mut server => {
            /* the API only returns on failure */
            error!("API stopped: {result:?}");
            stop.send_replace(true);
        }
    }

    /* the worker finishes the update it runs, then stops */
    match worker.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Update worker failed: {e}"),
        Err(e) => error!("Update worker panicked: {e}"),
    }

    flusher.abort();
    if let Err(e) = env.catalog.flush() {
        warn!("Final catalog flush failed: {e}");
    }
    env.confd.unload().await;
    info!("Node stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysfs::StaticProbe;

    #[test]
    fn environment_layout() {
        let home = tempfile::tempdir().unwrap();
        let settings = Settings::with_home(home.path());
        let runner = Runner::new(HostExecutor::new().as_executor(), settings.command_timeouts);
        let env = build_env(&settings, runner, Arc::new(StaticProbe::new(vec![]))).unwrap();
        assert!(settings.write_dir.is_dir());
        assert!(settings.uci_config_dir.is_dir());
        assert!(env.catalog.list().is_empty());
    }

    #[test]
    fn only_docker_runs_containers() {
        let home = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_home(home.path());
        settings.container_runtime = "podman".to_string();
        let runner = Runner::new(HostExecutor::new().as_executor(), settings.command_timeouts);
        let err = build_env(&settings, runner, Arc::new(StaticProbe::new(vec![]))).err().expect("build_env should fail");
        assert!(err.to_string().contains("podman"));
    }

    #[tokio::test]
    async fn stop_is_noticed() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        wait_stop(&mut rx).await;
        drop(tx);
        let (_tx, mut rx) = watch::channel(true);
        wait_stop(&mut rx).await;
    }
}
