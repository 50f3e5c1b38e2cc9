// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The local API, driven in process against a node whose commands go to a fake executor

extern crate paradrop_api as api;

use api::{ApiState, Credentials, router};
use axum::Router;
use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chute::ChuteCatalog;
use config::{HostConfigStore, Settings};
use confd::ConfigManager;
use exec::{CommandTimeouts, FakeExecutor, Output, Runner};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sysfs::{Bus, DeviceKind, NetDevice, StaticProbe};
use tar::{Builder, Header};
use tempfile::TempDir;
use tokio::sync::watch;
use tower::ServiceExt;
use uci::UciConfigDir;
use update::{DockerCli, LogReporter, UpdateEnv, UpdateManager};

const HOST: &str = r"
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

const HELLO: &str = r"
name: hello
version: 1
services:
  main:
    type: image
    image: nginx:latest
    interfaces:
      wlan0:
        type: wifi-ap
        wireless: {ssid: Paradrop, key: password123, encryption: psk2}
        dhcp: {leasetime: 12h, limit: 100, start: 100}
web: {service: main, port: 80}
";

const STATION_DUMP: &str = "Station 11:22:33:44:55:66 (on vwlan0.0000)
\tinactive time:\t120 ms
\trx bytes:\t4242
";

struct Node {
    app: Router,
    fake: Arc<FakeExecutor>,
    settings: Settings,
    _shutdown: watch::Sender<bool>,
}

fn package(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = Header::new_gnu();
        let name = &mut header.as_old_mut().name;
        name[..path.len()].copy_from_slice(path.as_bytes());
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, content.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap()
}

fn boot(home: &Path) -> Node {
    let mut settings = Settings::with_home(home);
    settings.runtime_retries = 0;
    std::fs::write(&settings.host_config_file, HOST).unwrap();

    let fake = FakeExecutor::new();
    fake.on(
        &["docker", "inspect", "-f", "{{.State.Pid}}"],
        Output::success().with_stdout("4242"),
    );
    fake.on(
        &["docker", "inspect", "-f", "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}"],
        Output::success().with_stdout("172.17.0.2"),
    );
    fake.on(
        &["iw", "dev", "vwlan0.0000", "station", "dump"],
        Output::success().with_stdout(STATION_DUMP),
    );
    let probe = Arc::new(StaticProbe::new(vec![
        NetDevice::new("eth0", "00:00:00:00:00:01", DeviceKind::Wired, Bus::Pci),
        NetDevice::new("eth1", "00:00:00:00:00:02", DeviceKind::Wired, Bus::Pci),
        NetDevice::new("wlan0", "00:00:00:00:00:03", DeviceKind::Wireless, Bus::Pci)
            .with_phy("phy0")
            .with_path("/sys/devices/pci0000:00/0000:00:1c.0"),
    ]));
    let runner = Runner::new(fake.clone().as_executor(), CommandTimeouts::default());
    let env = UpdateEnv {
        catalog: Arc::new(ChuteCatalog::load(&settings.catalog_file()).unwrap()),
        host_store: Arc::new(HostConfigStore::new(&settings.host_config_file, None, probe)),
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
    let (shutdown, rx) = watch::channel(false);
    tokio::spawn(manager.clone().run(rx));

    let credentials = Credentials::parse(&Credentials::entry("admin", "pepper", "secret")).unwrap();
    Node {
        app: router(ApiState::new(manager, credentials)),
        fake,
        settings,
        _shutdown: shutdown,
    }
}

impl Node {
    async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Body,
        auth: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            request = request.header(AUTHORIZATION, format!("Basic {}", STANDARD.encode(auth)));
        }
        if method != "GET" {
            request = request.header("content-type", "application/json");
        }
        let response = self
            .app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn call(&self, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
        self.send(method, uri, body, Some("admin:secret")).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call("GET", uri, Body::empty()).await
    }

    /// Poll a change until it completes
    async fn wait(&self, change: &Value) -> Value {
        let id = change["change_id"].as_u64().expect("a change id");
        for _ in 0..500 {
            let (status, record) = self.get(&format!("/api/v1/changes/{id}")).await;
            assert_eq!(status, StatusCode::OK);
            if record["status"] == "done" {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("change {id} did not complete");
    }

    async fn install(&self, yaml: &str) -> Value {
        let (status, change) = self
            .call("POST", "/api/v1/chutes/", Body::from(package(&[("paradrop.yaml", yaml)])))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED, "{change}");
        self.wait(&change).await
    }
}

#[tokio::test]
async fn credentials_are_required() {
    let home = TempDir::new().unwrap();
    let node = boot(home.path());
    let (status, _) = node.send("GET", "/api/v1/chutes/", Body::empty(), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = node
        .send("GET", "/api/v1/chutes/", Body::empty(), Some("admin:wrong"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = node.get("/api/v1/chutes/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn install_and_inspect() {
    let home = TempDir::new().unwrap();
    let node = boot(home.path());
    let record = node.install(HELLO).await;
    assert_eq!(record["success"], true, "{record}");
    assert_eq!(record["updateType"], "create");

    let (status, chutes) = node.get("/api/v1/chutes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chutes[0]["name"], "hello");
    assert_eq!(chutes[0]["state"], "running");
    assert_eq!(chutes[0]["web_url"], "http://172.17.0.2:80");

    let (status, networks) = node.get("/api/v1/chutes/hello/networks").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(networks[0]["name"], "wlan0");
    assert_eq!(networks[0]["external_intf"], "vwlan0.0000");
    assert_eq!(networks[0]["ssid"], "Paradrop");
    assert!(networks[0].get("key").is_none());

    let (_, ssid) = node.get("/api/v1/chutes/hello/networks/wlan0/ssid").await;
    assert_eq!(ssid, json!({"ssid": "Paradrop"}));
    let (status, _) = node.get("/api/v1/chutes/hello/networks/eth9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, leases) = node.get("/api/v1/chutes/hello/networks/wlan0/leases").await;
    assert_eq!(leases, json!([]));
    std::fs::write(
        node.settings.write_dir.join("dnsmasq-hello-wlan0.leases"),
        "1700000000 aa:bb:cc:dd:ee:ff 192.168.128.150 laptop *\n",
    )
    .unwrap();
    let (_, leases) = node.get("/api/v1/chutes/hello/networks/wlan0/leases").await;
    assert_eq!(leases[0]["hostname"], "laptop");

    let (status, stations) = node.get("/api/v1/chutes/hello/networks/wlan0/stations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stations[0]["mac_addr"], "11:22:33:44:55:66");
    assert_eq!(stations[0]["rx_bytes"], "4242");

    let (status, cache) = node.get("/api/v1/chutes/hello/cache").await;
    assert_eq!(status, StatusCode::OK);
    assert!(cache.is_object());
}

#[tokio::test]
async fn chute_control() {
    let home = TempDir::new().unwrap();
    let node = boot(home.path());
    node.install(HELLO).await;

    let (status, change) = node.call("POST", "/api/v1/chutes/hello/stop", Body::empty()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(node.wait(&change).await["success"], true);
    let (_, chute) = node.get("/api/v1/chutes/hello").await;
    assert_eq!(chute["state"], "stopped");

    let (_, change) = node.call("POST", "/api/v1/chutes/hello/start", Body::empty()).await;
    assert_eq!(node.wait(&change).await["success"], true);

    let (status, change) = node.call("DELETE", "/api/v1/chutes/hello", Body::empty()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(node.wait(&change).await["success"], true);
    let (status, _) = node.get("/api/v1/chutes/hello").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(node.fake.command_lines().iter().any(|l| l == "docker rm --force hello-main"));
}

#[tokio::test]
async fn unknown_chutes() {
    let home = TempDir::new().unwrap();
    let node = boot(home.path());
    for (method, uri) in [
        ("GET", "/api/v1/chutes/ghost"),
        ("POST", "/api/v1/chutes/ghost/start"),
        ("DELETE", "/api/v1/chutes/ghost"),
        ("GET", "/api/v1/chutes/ghost/networks"),
    ] {
        let (status, body) = node.call(method, uri, Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body["error"], "chute ghost not found");
    }
}

#[tokio::test]
async fn bad_packages() {
    let home = TempDir::new().unwrap();
    let node = boot(home.path());

    let escaping = package(&[("paradrop.yaml", HELLO), ("../evil", "x")]);
    let (status, _) = node.call("POST", "/api/v1/chutes/", Body::from(escaping)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let nameless = package(&[("README", "no manifest")]);
    let (status, _) = node.call("POST", "/api/v1/chutes/", Body::from(nameless)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    /* a package uploaded under another name is refused and cleaned up */
    let hello = package(&[("paradrop.yaml", HELLO)]);
    let (status, body) = node.call("PUT", "/api/v1/chutes/other", Body::from(hello)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    let leftovers = std::fs::read_dir(node.settings.sources_dir())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn host_configuration() {
    let home = TempDir::new().unwrap();
    let node = boot(home.path());
    let (status, mut host) = node.get("/api/v1/config/hostconfig").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(host["wifi"][0]["channel"], 1);

    host["wifi"][0]["channel"] = json!(11);
    let (status, change) = node
        .call("PUT", "/api/v1/config/hostconfig", Body::from(host.to_string()))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{change}");
    assert_eq!(node.wait(&change).await["success"], true);
    let (_, host) = node.get("/api/v1/config/hostconfig").await;
    assert_eq!(host["wifi"][0]["channel"], 11);

    let (status, sections) = node.get("/api/v1/config/pdconf").await;
    assert_eq!(status, StatusCode::OK);
    assert!(sections.as_array().is_some_and(|s| !s.is_empty()));
}

#[tokio::test]
async fn provisioning() {
    let home = TempDir::new().unwrap();
    let node = boot(home.path());
    let (_, state) = node.get("/api/v1/config/provision").await;
    assert_eq!(state["provisioned"], false);

    let incomplete = json!({"id": "node-1", "key": "", "controller": "https://paradrop.org"});
    let (status, _) = node
        .call("POST", "/api/v1/config/provision", Body::from(incomplete.to_string()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let identity = json!({"id": "node-1", "key": "k3y", "controller": "https://paradrop.org"});
    let (status, _) = node
        .call("POST", "/api/v1/config/provision", Body::from(identity.to_string()))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, state) = node.get("/api/v1/config/provision").await;
    assert_eq!(state["provisioned"], true);
    assert_eq!(state["id"], "node-1");
    assert!(node.settings.identity_file().exists());
}

#[tokio::test]
async fn unknown_changes() {
    let home = TempDir::new().unwrap();
    let node = boot(home.path());
    let (status, _) = node.get("/api/v1/changes/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
