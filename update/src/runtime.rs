// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The container runtime boundary.
//!
//! Updates only need a handful of operations from the runtime: get an image (pull or build),
//! run and stop containers, and move the chute's network interfaces into the container's
//! namespace. [`DockerCli`] implements them with the `docker` command line, run through the
//! agent's [`Runner`] so that tests can script it.

use async_trait::async_trait;
use chute::{NetKind, NetworkInterface, PortBinding};
use exec::{Runner, TimeoutClass};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::UpdateError;

/// What to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub port_bindings: Vec<PortBinding>,
    pub privileged: bool,
}

/// An image to build from a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub context: PathBuf,
    /// Dockerfile to use instead of the one in the context
    pub dockerfile: Option<PathBuf>,
    pub tag: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fail if the runtime cannot serve requests
    async fn ping(&self) -> Result<(), UpdateError>;
    async fn pull(&self, image: &str) -> Result<(), UpdateError>;
    async fn build(&self, spec: &BuildSpec) -> Result<(), UpdateError>;
    async fn remove_image(&self, image: &str) -> Result<(), UpdateError>;
    /// Create and start a container
    async fn run(&self, spec: &ContainerSpec) -> Result<(), UpdateError>;
    async fn stop(&self, name: &str) -> Result<(), UpdateError>;
    /// Remove a container, running or not. Removing a missing container succeeds.
    async fn remove(&self, name: &str) -> Result<(), UpdateError>;
    /// Address of the container on the runtime's own network
    async fn ip_address(&self, name: &str) -> Result<Option<Ipv4Addr>, UpdateError>;
    /// Give the container the chute end of a network interface
    async fn attach(&self, name: &str, iface: &NetworkInterface) -> Result<(), UpdateError>;
}

/// The `docker` command line
#[derive(Debug, Clone)]
pub struct DockerCli {
    runner: Runner,
    program: String,
}

impl DockerCli {
    #[must_use]
    pub fn new(runner: Runner) -> Self {
        Self {
            runner,
            program: "docker".to_string(),
        }
    }

    async fn docker(&self, args: &[&str], class: TimeoutClass) -> Result<Vec<String>, UpdateError> {
        let mut argv = vec![self.program.clone()];
        argv.extend(args.iter().map(ToString::to_string));
        let output = self.runner.run(&argv, class).await?;
        Ok(output.stdout)
    }

    async fn ip(&self, args: &[String]) -> Result<(), UpdateError> {
        let mut argv = vec!["ip".to_string()];
        argv.extend_from_slice(args);
        self.runner.run(&argv, TimeoutClass::Short).await?;
        Ok(())
    }

    /// Run `ip` inside the network namespace of `pid`
    async fn ns_ip(&self, pid: &str, args: &[String]) -> Result<(), UpdateError> {
        let mut argv: Vec<String> = ["nsenter", "-t", pid, "-n", "ip"]
            .iter()
            .map(ToString::to_string)
            .collect();
        argv.extend_from_slice(args);
        self.runner.run(&argv, TimeoutClass::Short).await?;
        Ok(())
    }

    async fn pid(&self, name: &str) -> Result<String, UpdateError> {
        let out = self
            .docker(&["inspect", "-f", "{{.State.Pid}}", name], TimeoutClass::Short)
            .await?;
        match out.first().map(|s| s.trim()) {
            Some(pid) if pid.parse::<u32>().is_ok_and(|p| p > 0) => Ok(pid.to_string()),
            other => Err(UpdateError::Runtime(format!(
                "container {name} has no process ({other:?})"
            ))),
        }
    }
}

fn words(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ping(&self) -> Result<(), UpdateError> {
        self.docker(&["version", "--format", "{{.Server.Version}}"], TimeoutClass::Short)
            .await
            .map(|_| ())
    }

    async fn pull(&self, image: &str) -> Result<(), UpdateError> {
        info!("Pulling image {image}");
        self.docker(&["pull", image], TimeoutClass::Container).await?;
        Ok(())
    }

    async fn build(&self, spec: &BuildSpec) -> Result<(), UpdateError> {
        info!("Building image {} from {}", spec.tag, spec.context.display());
        let context = spec.context.display().to_string();
        let dockerfile = spec.dockerfile.as_ref().map(|p| p.display().to_string());
        let mut args = vec!["build", "--tag", spec.tag.as_str()];
        if let Some(dockerfile) = &dockerfile {
            args.extend(["--file", dockerfile.as_str()]);
        }
        args.push(context.as_str());
        self.docker(&args, TimeoutClass::Container).await?;
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<(), UpdateError> {
        self.docker(&["rmi", image], TimeoutClass::Long).await?;
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<(), UpdateError> {
        let mut args: Vec<String> = words(&["run", "--detach", "--name", spec.name.as_str()]);
        args.extend(words(&["--restart", "on-failure"]));
        if spec.privileged {
            args.push("--privileged".to_string());
        }
        for (key, value) in &spec.environment {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        for binding in &spec.port_bindings {
            args.push("--publish".to_string());
            args.push(format!("{}:{}", binding.external, binding.internal));
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        info!("Starting container {} from {}", spec.name, spec.image);
        self.docker(&args, TimeoutClass::Long).await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), UpdateError> {
        info!("Stopping container {name}");
        self.docker(&["stop", name], TimeoutClass::Long).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), UpdateError> {
        match self.docker(&["rm", "--force", name], TimeoutClass::Long).await {
            Ok(_) => Ok(()),
            Err(UpdateError::Execution(e)) if e.status().is_some() => {
                debug!("Container {name} not removed: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn ip_address(&self, name: &str) -> Result<Option<Ipv4Addr>, UpdateError> {
        let format = "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}";
        let out = self
            .docker(&["inspect", "-f", format, name], TimeoutClass::Short)
            .await?;
        Ok(out.first().and_then(|s| s.trim().parse().ok()))
    }

    async fn attach(&self, name: &str, iface: &NetworkInterface) -> Result<(), UpdateError> {
        let pid = self.pid(name).await?;
        let internal = iface.internal_intf.as_str();
        debug!(
            "Attaching {} to container {name} (pid {pid}) as {internal}",
            iface.external_intf
        );
        let moved = match iface.kind {
            NetKind::Wifi | NetKind::Vlan => {
                /* a macvlan child of the host end moves into the container */
                let child = format!("mv{:04}", iface.ext_intf_number);
                let (parent, child_name) = (iface.external_intf.as_str(), child.as_str());
                self.ip(&words(&[
                    "link", "add", "link", parent, "name", child_name, "type", "macvlan", "mode",
                    "bridge",
                ]))
                .await?;
                child
            }
            /* the host end itself moves */
            NetKind::Monitor => iface.external_intf.clone(),
        };
        self.ip(&words(&["link", "set", "dev", moved.as_str(), "netns", pid.as_str()]))
            .await?;
        self.ns_ip(&pid, &words(&["link", "set", "dev", moved.as_str(), "name", internal]))
            .await?;
        if let Some(address) = &iface.ipaddr_with_prefix {
            self.ns_ip(&pid, &words(&["addr", "add", address.as_str(), "dev", internal]))
                .await?;
        }
        self.ns_ip(&pid, &words(&["link", "set", "dev", internal, "up"]))
            .await
    }
}

/// Dockerfile of a `light` service: the source on a stock language image
#[must_use]
pub fn light_dockerfile(base: &str, command: &[String]) -> String {
    let mut out = format!("FROM {base}\nWORKDIR /opt/chute\nCOPY . /opt/chute\n");
    if !command.is_empty() {
        let quoted: Vec<String> = command.iter().map(|w| format!("{w:?}")).collect();
        out += &format!("CMD [{}]\n", quoted.join(", "));
    }
    out
}

/// Wait until the runtime answers, retrying with a doubling delay. Returns whether it did.
pub async fn wait_ready(
    runtime: &dyn ContainerRuntime,
    retries: u32,
    base: std::time::Duration,
) -> bool {
    let mut delay = base;
    for attempt in 0..=retries {
        match runtime.ping().await {
            Ok(()) => return true,
            Err(e) if attempt < retries => {
                warn!("Container runtime not ready ({e}), retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) => warn!("Container runtime not ready ({e}), giving up"),
        }
    }
    false
}

/// The path a light service's generated Dockerfile is written to
#[must_use]
pub fn light_dockerfile_path(context: &Path) -> PathBuf {
    context.join("Dockerfile.paradrop")
}
