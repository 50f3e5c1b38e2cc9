// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![allow(dead_code)]

use chute::{Chute, ChuteCatalog};
use config::{HostConfigStore, Settings};
use confd::ConfigManager;
use exec::{CommandTimeouts, FakeExecutor, Output, Runner};
use std::path::Path;
use std::sync::Arc;
use sysfs::{Bus, DeviceKind, NetDevice, NetProbe, StaticProbe};
use uci::UciConfigDir;
use update::{
    ChangeRecord, DockerCli, LogReporter, Pools, UpdateEnv, UpdateManager, UpdateRequest,
    UpdateType,
};

pub const HOST: &str = r"
wan:
  interface: eth0
  proto: dhcp
lan:
  interfaces: [eth1]
  ipaddr: 192.168.1.1
  netmask: 255.255.255.0
  dhcp:
    leasetime: 12h
wifi:
  - id: pci-wifi-0
    channel: 1
wifi-interfaces:
  - device: pci-wifi-0
    ssid: ParaDrop
system:
  chuteSubnetPool: 192.168.128.0/17
";

/// The same node without an access point of its own
pub const HOST_WITHOUT_AP: &str = r"
wan:
  interface: eth0
  proto: dhcp
lan:
  interfaces: [eth1]
  ipaddr: 192.168.1.1
  netmask: 255.255.255.0
wifi:
  - id: pci-wifi-0
    channel: 1
system:
  chuteSubnetPool: 192.168.128.0/17
";

pub const HELLO: &str = r"
name: hello
services:
  main:
    type: image
    image: nginx:latest
    interfaces:
      wlan0:
        type: wifi-ap
        intfName: wlan0
        wireless: {ssid: Paradrop, key: password123, encryption: psk2}
        dhcp: {leasetime: 12h, limit: 100, start: 100}
web: {service: main, port: 80}
";

pub const CONTAINER_PID: &str = "4242";
pub const CONTAINER_IP: &str = "172.17.0.2";

fn probe() -> Arc<dyn NetProbe> {
    Arc::new(StaticProbe::new(vec![
        NetDevice::new("eth0", "00:00:00:00:00:01", DeviceKind::Wired, Bus::Pci),
        NetDevice::new("eth1", "00:00:00:00:00:02", DeviceKind::Wired, Bus::Pci),
        NetDevice::new("wlan0", "00:00:00:00:00:03", DeviceKind::Wireless, Bus::Pci)
            .with_phy("phy0")
            .with_path("/sys/devices/pci0000:00/0000:00:1c.0"),
    ]))
}

/// A node whose commands all go to a fake executor
pub struct Node {
    pub fake: Arc<FakeExecutor>,
    pub manager: Arc<UpdateManager>,
    pub settings: Settings,
    pools: Option<Pools>,
}

impl Node {
    /// Boot a node rooted at `home`, installing `host` as its configuration if it has none
    pub async fn boot(home: &Path, host: &str) -> Self {
        Self::boot_with(home, host, |_| {}).await
    }

    pub async fn boot_with(home: &Path, host: &str, tweak: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = Settings::with_home(home);
        settings.runtime_retries = 0;
        tweak(&mut settings);
        if !settings.host_config_file.exists() {
            std::fs::write(&settings.host_config_file, host).unwrap();
        }

        let fake = FakeExecutor::new();
        fake.on(
            &["docker", "inspect", "-f", "{{.State.Pid}}"],
            Output::success().with_stdout(CONTAINER_PID),
        );
        let ip_format = "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}";
        fake.on(
            &["docker", "inspect", "-f", ip_format],
            Output::success().with_stdout(CONTAINER_IP),
        );
        let runner = Runner::new(fake.clone().as_executor(), CommandTimeouts::default());
        let env = UpdateEnv {
            catalog: Arc::new(ChuteCatalog::load(&settings.catalog_file()).unwrap()),
            host_store: Arc::new(HostConfigStore::new(
                &settings.host_config_file,
                None,
                probe(),
            )),
            uci: UciConfigDir::new(&settings.uci_config_dir),
            confd: Arc::new(ConfigManager::new(
                &settings.uci_config_dir,
                &settings.write_dir,
                runner.clone(),
            )),
            runtime: Arc::new(DockerCli::new(runner.clone())),
            runner,
            settings: settings.clone(),
        };
        let manager = Arc::new(UpdateManager::new(Arc::new(env), Arc::new(LogReporter)));
        let pools = manager.bootstrap().await.expect("Should succeed");
        let mut node = Self {
            fake,
            manager,
            settings,
            pools: Some(pools),
        };
        node.drain().await;
        node
    }

    pub async fn drain(&mut self) -> usize {
        let pools = self.pools.take().unwrap();
        let (pools, count) = self.manager.drain(pools).await;
        self.pools = Some(pools);
        count
    }

    pub async fn submit(&mut self, request: UpdateRequest) -> ChangeRecord {
        let handle = self.manager.add_update(request).expect("Should succeed");
        self.drain().await;
        handle.wait().await.expect("Should succeed")
    }

    pub async fn install(&mut self, yaml: &str) -> ChangeRecord {
        let chute = Chute::from_yaml(yaml).unwrap();
        self.submit(UpdateRequest::install(UpdateType::Create, chute)).await
    }

    pub async fn chute_op(&mut self, kind: UpdateType, name: &str) -> ChangeRecord {
        self.submit(UpdateRequest::chute_named(kind, name)).await
    }

    pub fn chute(&self, name: &str) -> Option<Arc<Chute>> {
        self.manager.env().catalog.get(name)
    }

    pub fn pools(&self) -> &Pools {
        self.pools.as_ref().unwrap()
    }

    pub fn uci_text(&self, file: &str) -> String {
        std::fs::read_to_string(self.settings.uci_config_dir.join(file)).unwrap_or_default()
    }

    pub fn written(&self, prefix: &str) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.settings.write_dir) else {
            return vec![];
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with(prefix))
            .collect();
        names.sort();
        names
    }
}
