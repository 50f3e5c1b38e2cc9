// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The chute lifecycle: admission checks, images, containers and the catalog entry

use chute::{Chute, ChuteState, Service, ServiceType, compare_versions};
use exec::Command;
use plan::PlanGraph;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::Planner;
use crate::context::UpdateContext;
use crate::errors::UpdateError;
use crate::ops::Op;
use crate::prio;
use crate::reservations::Allocation;
use crate::runtime::{
    BuildSpec, ContainerRuntime, ContainerSpec, light_dockerfile, light_dockerfile_path,
};
use crate::update::{UpdateRequest, UpdateType};

/// Base image of light services not naming one
const LIGHT_BASE_IMAGE: &str = "python:3-slim";

pub struct StatePlanner;

impl Planner for StatePlanner {
    fn name(&self) -> &'static str {
        "state"
    }

    fn plan(&self, request: &UpdateRequest, graph: &mut PlanGraph<Op>) -> Result<(), UpdateError> {
        graph.add(prio::SECURITY_CHECK, Op::SecurityCheck, vec![]);
        let stop = |graph: &mut PlanGraph<Op>| {
            graph.add(
                prio::STOP_OLD_CONTAINER,
                Op::StopContainers,
                vec![Op::StartOldContainers],
            );
        };
        let start = |graph: &mut PlanGraph<Op>| {
            graph.add(
                prio::START_NEW_CONTAINER,
                Op::StartContainers,
                vec![Op::RemoveNewContainers],
            );
        };
        match request.kind {
            UpdateType::Create | UpdateType::Update => {
                let services = request
                    .chute
                    .as_ref()
                    .map(|c| c.services.keys().cloned().collect::<Vec<_>>())
                    .unwrap_or_default();
                for service in services {
                    graph.add(
                        prio::BUILD_IMAGE,
                        Op::PrepareImage {
                            service: service.clone(),
                        },
                        vec![Op::RemoveImage { service }],
                    );
                }
                stop(graph);
                start(graph);
                graph.add(prio::CLEANUP_OLD_IMAGE, Op::CleanupOldImages, vec![]);
            }
            UpdateType::Start => start(graph),
            UpdateType::Restart => {
                stop(graph);
                start(graph);
            }
            UpdateType::Stop => stop(graph),
            UpdateType::Delete => {
                stop(graph);
                graph.add(
                    prio::REMOVE_OLD_CONTAINER,
                    Op::RemoveOldContainers,
                    vec![Op::StartOldContainers],
                );
                graph.add(prio::CLEANUP_OLD_IMAGE, Op::CleanupOldImages, vec![]);
                graph.add(prio::RELEASE_RESOURCES, Op::ReleaseChuteResources, vec![]);
            }
            UpdateType::SetHostConfig | UpdateType::FactoryReset | UpdateType::InitHostConfig => {
                return Ok(());
            }
        }
        graph.add(prio::SAVE_STATE, Op::SaveState, vec![]);
        Ok(())
    }
}

/// Name of the container running `service`
#[must_use]
pub fn container_name(chute: &str, service: &str) -> String {
    format!("{chute}-{service}")
}

/// Tag of the image built for `service`
#[must_use]
pub fn image_tag(chute: &Chute, service: &str) -> String {
    let version = chute.version.as_deref().unwrap_or("latest");
    format!("paradrop/{}-{service}:{version}", chute.name).to_lowercase()
}

/// The image a service runs: pulled as named, or built and tagged
fn image_of(chute: &Chute, name: &str, service: &Service) -> Result<String, UpdateError> {
    match service.kind {
        ServiceType::Image => service.image.clone().ok_or_else(|| {
            UpdateError::Validation(format!("service {name} of {} names no image", chute.name))
        }),
        ServiceType::Light | ServiceType::Normal => Ok(image_tag(chute, name)),
    }
}

fn is_built(chute: &Chute, service: &str) -> bool {
    chute
        .services
        .get(service)
        .is_some_and(|s| s.kind != ServiceType::Image)
}

pub(crate) fn security_check(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    let name = &ctx.chute.name;
    match ctx.kind {
        UpdateType::Create | UpdateType::Update => {
            let old_version = ctx.old.as_ref().and_then(|old| old.version.as_deref());
            if ctx.env.settings.reject_downgrade
                && let (Some(new), Some(old)) = (ctx.chute.version.as_deref(), old_version)
                && compare_versions(new, old) != Ordering::Greater
            {
                return Err(UpdateError::Validation(format!(
                    "version {new} of {name} does not supersede installed version {old}"
                )));
            }
        }
        UpdateType::Start | UpdateType::Stop | UpdateType::Restart | UpdateType::Delete => {
            if ctx.old.is_none() {
                return Err(UpdateError::Validation(format!("chute {name} is not installed")));
            }
        }
        UpdateType::SetHostConfig | UpdateType::FactoryReset | UpdateType::InitHostConfig => {}
    }
    Ok(())
}

pub(crate) async fn prepare_image(
    ctx: &mut UpdateContext,
    name: &String,
) -> Result<(), UpdateError> {
    let Some(service) = ctx.chute.services.get(name).cloned() else {
        return Err(UpdateError::Validation(format!(
            "chute {} has no service {name}",
            ctx.chute.name
        )));
    };
    let image = image_of(&ctx.chute, name, &service)?;
    let runtime = ctx.env.runtime.clone();
    if service.kind == ServiceType::Image {
        runtime.pull(&image).await?;
    } else {
        let source_dir = ctx.chute.source_dir.clone().ok_or_else(|| {
            UpdateError::Validation(format!("chute {} has no source to build", ctx.chute.name))
        })?;
        let context = source_dir.join(service.source.as_deref().unwrap_or("."));
        let dockerfile = if service.kind == ServiceType::Light {
            let path = light_dockerfile_path(&context);
            let base = service.image.as_deref().unwrap_or(LIGHT_BASE_IMAGE);
            ctx.env
                .runner
                .execute(&Command::write_file(&path, light_dockerfile(base, &service.command)))
                .await?;
            Some(path)
        } else {
            None
        };
        let spec = BuildSpec {
            context,
            dockerfile,
            tag: image.clone(),
        };
        runtime.build(&spec).await?;
    }
    ctx.chute.cache.images.insert(name.clone(), image);
    Ok(())
}

/// Remove an image built by this update. Images the installed chute still uses stay.
pub(crate) async fn remove_image(ctx: &mut UpdateContext, name: &str) {
    if !is_built(&ctx.chute, name) {
        return;
    }
    let Some(image) = ctx.chute.cache.images.remove(name) else {
        return;
    };
    let in_use = ctx
        .old
        .as_ref()
        .is_some_and(|old| old.cache.images.values().any(|i| *i == image));
    if in_use {
        return;
    }
    if let Err(e) = ctx.env.runtime.remove_image(&image).await {
        warn!("Failed to remove image {image}: {e}");
    }
}

fn container_spec(
    chute: &Chute,
    name: &str,
    service: &Service,
) -> Result<ContainerSpec, UpdateError> {
    let image = match chute.cache.images.get(name) {
        Some(image) => image.clone(),
        None => image_of(chute, name, service)?,
    };
    let mut environment: BTreeMap<String, String> = chute.environment.clone();
    environment.extend(service.environment.clone());
    environment.insert("PARADROP_CHUTE_NAME".to_string(), chute.name.clone());
    if let Some(version) = &chute.version {
        environment.insert("PARADROP_CHUTE_VERSION".to_string(), version.clone());
    }
    environment.insert("PARADROP_SERVICE_NAME".to_string(), name.to_string());
    Ok(ContainerSpec {
        name: container_name(&chute.name, name),
        image,
        command: if service.kind == ServiceType::Light {
            vec![]
        } else {
            service.command.clone()
        },
        environment,
        port_bindings: service.requests.port_bindings.clone(),
        privileged: service.requests.as_root,
    })
}

/// Run every service of `chute` and hand it its interfaces. Fills in the container names and
/// the web address.
async fn launch(runtime: &dyn ContainerRuntime, chute: &mut Chute) -> Result<(), UpdateError> {
    let services: Vec<(String, Service)> = chute
        .services
        .iter()
        .map(|(name, s)| (name.clone(), s.clone()))
        .collect();
    for (name, service) in &services {
        let spec = container_spec(chute, name, service)?;
        chute.cache.containers.insert(name.clone(), spec.name.clone());
        /* a leftover of an earlier run */
        runtime.remove(&spec.name).await?;
        runtime.run(&spec).await?;
        for iface in chute
            .cache
            .network_interfaces
            .iter()
            .filter(|i| i.service == *name)
        {
            runtime.attach(&spec.name, iface).await?;
        }
    }
    chute.cache.web_url = None;
    if let Some(web) = chute.web.clone() {
        let container = container_name(&chute.name, &web.service);
        match runtime.ip_address(&container).await? {
            Some(ip) => chute.cache.web_url = Some(format!("http://{ip}:{}", web.port)),
            None => warn!(
                "Container {container} has no address, {} has no web service",
                chute.name
            ),
        }
    }
    Ok(())
}

async fn stop_all(runtime: &dyn ContainerRuntime, chute: &Chute) {
    for service in chute.services.keys() {
        let container = container_name(&chute.name, service);
        if let Err(e) = runtime.stop(&container).await {
            warn!("Failed to stop container {container}: {e}");
        }
    }
}

async fn remove_all(runtime: &dyn ContainerRuntime, chute: &Chute) -> Result<(), UpdateError> {
    for service in chute.services.keys() {
        runtime.remove(&container_name(&chute.name, service)).await?;
    }
    Ok(())
}

pub(crate) async fn stop_containers(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    if let Some(old) = ctx.old.clone().filter(|old| old.is_running()) {
        info!("Stopping chute {}", old.name);
        stop_all(ctx.env.runtime.as_ref(), &old).await;
    }
    Ok(())
}

pub(crate) async fn start_old_containers(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    if let Some(old) = ctx.old.clone().filter(|old| old.is_running()) {
        info!("Restarting chute {} as it was", old.name);
        let mut old = Chute::clone(&old);
        launch(ctx.env.runtime.as_ref(), &mut old).await?;
    }
    Ok(())
}

pub(crate) async fn remove_old_containers(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    if let Some(old) = ctx.old.clone() {
        remove_all(ctx.env.runtime.as_ref(), &old).await?;
    }
    Ok(())
}

pub(crate) async fn start_containers(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    info!("Starting chute {}", ctx.chute.name);
    let runtime = ctx.env.runtime.clone();
    launch(runtime.as_ref(), &mut ctx.chute).await
}

pub(crate) async fn remove_new_containers(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    let containers: Vec<String> = ctx.chute.cache.containers.values().cloned().collect();
    for container in containers {
        ctx.env.runtime.remove(&container).await?;
    }
    Ok(())
}

/// Remove images of the installed version the update no longer uses
pub(crate) async fn cleanup_old_images(ctx: &mut UpdateContext) {
    let Some(old) = ctx.old.clone() else {
        return;
    };
    let removes = ctx.removes();
    for (service, image) in &old.cache.images {
        let still_used = !removes && ctx.chute.cache.images.values().any(|i| i == image);
        if still_used || !is_built(&old, service) {
            continue;
        }
        debug!("Removing image {image} of {}", old.name);
        if let Err(e) = ctx.env.runtime.remove_image(image).await {
            warn!("Failed to remove image {image}: {e}");
        }
    }
}

pub(crate) fn save_state(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    let catalog = &ctx.env.catalog;
    if ctx.removes() {
        catalog.remove(&ctx.chute.name)?;
        info!("Removed chute {}", ctx.chute.name);
        return Ok(());
    }
    let state = ctx.kind.target_state().unwrap_or(ChuteState::Stopped);
    ctx.chute.state = state;
    ctx.chute.cache.uci = ctx
        .sections
        .iter()
        .filter(|(_, sections)| !sections.is_empty())
        .map(|(file, sections)| (file.to_string(), sections.clone()))
        .collect();
    if state != ChuteState::Running {
        ctx.chute.cache.web_url = None;
    }

    /* what the installed version held and this one does not */
    if let Some(old) = ctx.old.clone() {
        let current = &ctx.chute.cache.network_interfaces;
        for iface in &old.cache.network_interfaces {
            if !current.iter().any(|i| i.ext_intf_number == iface.ext_intf_number) {
                ctx.pools.release(Allocation::Number(iface.ext_intf_number));
            }
            if let Some(subnet) = iface.subnet
                && !current.iter().any(|i| i.subnet == Some(subnet))
            {
                ctx.pools.release(Allocation::Subnet(subnet));
            }
        }
    }
    catalog.commit(ctx.chute.clone())?;
    info!("Chute {} is {state}", ctx.chute.name);
    Ok(())
}

pub(crate) fn release_chute_resources(ctx: &mut UpdateContext) {
    if let Some(old) = ctx.old.clone() {
        debug!("Releasing resources of {}", old.name);
        ctx.pools.release_chute(&old);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HELLO: &str = r"
name: Hello
version: 1.0.2
environment:
  GREETING: hi
services:
  main:
    type: normal
    source: .
    command: [python, main.py]
    environment:
      GREETING: hello
  proxy:
    type: image
    image: nginx:latest
";

    #[test]
    fn image_names() {
        let chute = Chute::from_yaml(HELLO).unwrap();
        assert_eq!(image_tag(&chute, "main"), "paradrop/hello-main:1.0.2");
        let proxy = &chute.services["proxy"];
        assert_eq!(image_of(&chute, "proxy", proxy).unwrap(), "nginx:latest");
        assert!(is_built(&chute, "main"));
        assert!(!is_built(&chute, "proxy"));
    }

    #[test]
    fn service_environment() {
        let chute = Chute::from_yaml(HELLO).unwrap();
        let spec = container_spec(&chute, "main", &chute.services["main"]).unwrap();
        assert_eq!(spec.name, "Hello-main");
        assert_eq!(spec.environment["GREETING"], "hello");
        assert_eq!(spec.environment["PARADROP_CHUTE_NAME"], "Hello");
        assert_eq!(spec.environment["PARADROP_CHUTE_VERSION"], "1.0.2");
        assert_eq!(spec.environment["PARADROP_SERVICE_NAME"], "main");
        assert_eq!(spec.command, vec!["python", "main.py"]);
    }
}
