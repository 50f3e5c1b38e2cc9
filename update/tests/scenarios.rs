// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Updates run end to end on a node whose commands go to a fake executor

extern crate paradrop_update as update;

mod common;

use chute::ChuteState;
use common::{CONTAINER_IP, HELLO, HOST, HOST_WITHOUT_AP, Node};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use update::{ChangeStatus, UpdateRequest, UpdateType};

fn with_aps(name: &str, count: usize) -> String {
    let mut yaml = format!(
        "name: {name}\nservices:\n  main:\n    type: image\n    image: nginx:latest\n    interfaces:\n"
    );
    for i in 0..count {
        yaml += &format!(
            "      wlan{i}:\n        type: wifi-ap\n        wireless: {{ssid: ap{i}}}\n"
        );
    }
    yaml
}

/// `HELLO` under another name
fn hello_named(name: &str) -> String {
    HELLO.replace("name: hello", &format!("name: {name}"))
}

#[tokio::test]
async fn install_hello() {
    let home = TempDir::new().unwrap();
    let mut node = Node::boot(home.path(), HOST).await;
    let record = node.install(HELLO).await;
    assert_eq!(record.success, Some(true), "{:?}", record.messages);
    assert_eq!(record.status, ChangeStatus::Done);

    let hello = node.chute("hello").expect("hello is installed");
    assert_eq!(hello.state, ChuteState::Running);
    let iface = &hello.cache.network_interfaces[0];
    assert_eq!(iface.external_intf, "vwlan0.0000");
    assert_eq!(iface.subnet.unwrap().to_string(), "192.168.128.0/24");
    assert_eq!(iface.device.as_deref(), Some("pci-wifi-0"));
    assert_eq!(hello.cache.web_url.as_deref(), Some(&*format!("http://{CONTAINER_IP}:80")));
    assert!(node.pools().subnets.is_used(&"192.168.128.0/24".parse().unwrap()));

    assert!(node.uci_text("network").contains("config interface 'hello-wlan0' #hello"));
    assert_eq!(node.written("hostapd-vwlan0.0000"), vec!["hostapd-vwlan0.0000.conf"]);
    let dnsmasq = node.written("dnsmasq-hello-wlan0.conf");
    assert_eq!(dnsmasq.len(), 1);
    let text = std::fs::read_to_string(node.settings.write_dir.join(&dnsmasq[0])).unwrap();
    assert!(text.contains("12h"), "{text}");

    let haproxy = std::fs::read_to_string(node.settings.write_dir.join("haproxy.conf")).unwrap();
    assert!(haproxy.contains("acl host_hello hdr(host) -i hello.chute.paradrop.org"));
    let lines = node.fake.command_lines();
    assert!(lines.iter().any(|l| l.starts_with("docker run --detach --name hello-main")));
    assert!(record.messages[0].contains("create of hello succeeded"));
}

#[tokio::test]
async fn restart_keeps_resources() {
    let home = TempDir::new().unwrap();
    let mut node = Node::boot(home.path(), HOST).await;
    node.install(HELLO).await;
    let before = node.chute("hello").unwrap().cache.network_interfaces.clone();
    node.fake.clear_commands();

    let record = node.chute_op(UpdateType::Restart, "hello").await;
    assert_eq!(record.success, Some(true), "{:?}", record.messages);
    let after = node.chute("hello").unwrap().cache.network_interfaces.clone();
    assert_eq!(after, before);

    let lines = node.fake.command_lines();
    assert!(lines.iter().any(|l| l == "docker stop hello-main"), "{lines:?}");
    assert!(lines.iter().any(|l| l.starts_with("docker run")), "{lines:?}");
    /* nothing changed in the configuration: hostapd stays up */
    assert_eq!(node.fake.count("hostapd"), 0, "{lines:?}");
    assert!(!lines.iter().any(|l| l.starts_with("iw ")), "{lines:?}");
}

#[tokio::test]
async fn failed_pull_aborts() {
    let home = TempDir::new().unwrap();
    let mut node = Node::boot(home.path(), HOST).await;
    node.fake.fail_on(&["docker", "pull", "does-not-exist:99"], 1);
    let network_before = node.uci_text("network");

    let record = node.install(&HELLO.replace("nginx:latest", "does-not-exist:99")).await;
    assert_eq!(record.success, Some(false));
    assert!(!record.fatal);
    assert!(record.messages[0].contains("PrepareImage"), "{:?}", record.messages);

    assert!(node.chute("hello").is_none());
    assert!(!node.pools().subnets.is_used(&"192.168.128.0/24".parse().unwrap()));
    assert!(!node.pools().numbers.is_used(&0));
    assert_eq!(node.uci_text("network"), network_before);
    assert!(!node.fake.command_lines().iter().any(|l| l.starts_with("docker run")));
}

#[tokio::test]
async fn channel_change_restarts_hostapd() {
    let home = TempDir::new().unwrap();
    let mut node = Node::boot(home.path(), HOST).await;
    let mut host = node.manager.env().host_store.read().unwrap();
    host.wifi[0].channel = 6;
    node.fake.clear_commands();

    let record = node
        .submit(UpdateRequest::host(UpdateType::SetHostConfig, Some(host)))
        .await;
    assert_eq!(record.success, Some(true), "{:?}", record.messages);
    assert_eq!(node.manager.env().host_store.read().unwrap().wifi[0].channel, 6);
    assert!(node.uci_text("wireless").contains("option channel '6'"));

    let lines = node.fake.command_lines();
    assert_eq!(node.fake.count("hostapd"), 1, "{lines:?}");
    assert!(!lines.iter().any(|l| l.starts_with("iw ")), "{lines:?}");
}

#[tokio::test]
async fn restart_of_the_agent_reclaims_subnets() {
    let home = TempDir::new().unwrap();
    {
        let mut node = Node::boot(home.path(), HOST).await;
        node.install(HELLO).await;
    }
    let mut node = Node::boot(home.path(), HOST).await;
    assert!(node.pools().subnets.is_used(&"192.168.128.0/24".parse().unwrap()));
    /* the bootstrap started hello again */
    let lines = node.fake.command_lines();
    assert!(lines.iter().any(|l| l.starts_with("docker run --detach --name hello-main")));

    let record = node.install(&hello_named("second")).await;
    assert_eq!(record.success, Some(true), "{:?}", record.messages);
    let second = node.chute("second").unwrap();
    assert_eq!(
        second.cache.network_interfaces[0].subnet.unwrap().to_string(),
        "192.168.129.0/24"
    );
}

#[tokio::test]
async fn downgrades_are_rejected() {
    let home = TempDir::new().unwrap();
    let mut node = Node::boot(home.path(), HOST).await;
    let v2 = HELLO.replace("name: hello", "name: hello\nversion: 2");
    assert_eq!(node.install(&v2).await.success, Some(true));

    let v1 = HELLO.replace("name: hello", "name: hello\nversion: 1");
    let chute = chute::Chute::from_yaml(&v1).unwrap();
    let record = node
        .submit(UpdateRequest::install(UpdateType::Update, chute))
        .await;
    assert_eq!(record.success, Some(false));
    assert!(record.messages[0].contains("does not supersede"), "{:?}", record.messages);
    assert_eq!(node.chute("hello").unwrap().version.as_deref(), Some("2"));
}

#[tokio::test]
async fn downgrades_pass_when_allowed() {
    let home = TempDir::new().unwrap();
    let mut node = Node::boot_with(home.path(), HOST, |s| s.reject_downgrade = false).await;
    let v2 = HELLO.replace("name: hello", "name: hello\nversion: 2");
    node.install(&v2).await;
    let v1 = HELLO.replace("name: hello", "name: hello\nversion: 1");
    let v1 = chute::Chute::from_yaml(&v1).unwrap();
    let record = node.submit(UpdateRequest::install(UpdateType::Update, v1)).await;
    assert_eq!(record.success, Some(true), "{:?}", record.messages);
}

#[tokio::test]
async fn access_points_per_radio() {
    let home = TempDir::new().unwrap();
    let mut node = Node::boot(home.path(), HOST_WITHOUT_AP).await;

    let record = node.install(&with_aps("crowded", 9)).await;
    assert_eq!(record.success, Some(false));
    assert!(record.messages[0].contains("Resource exhausted"), "{:?}", record.messages);
    assert!(node.chute("crowded").is_none());

    let record = node.install(&with_aps("full", 8)).await;
    assert_eq!(record.success, Some(true), "{:?}", record.messages);
    assert_eq!(node.chute("full").unwrap().cache.network_interfaces.len(), 8);
}

#[tokio::test]
async fn stop_then_delete() {
    let home = TempDir::new().unwrap();
    let mut node = Node::boot(home.path(), HOST).await;
    node.install(HELLO).await;

    let record = node.chute_op(UpdateType::Stop, "hello").await;
    assert_eq!(record.success, Some(true), "{:?}", record.messages);
    let hello = node.chute("hello").unwrap();
    assert_eq!(hello.state, ChuteState::Stopped);
    assert!(hello.cache.web_url.is_none());
    assert!(!node.uci_text("network").contains("hello-wlan0"));
    /* a stopped chute keeps its subnet */
    assert!(node.pools().subnets.is_used(&"192.168.128.0/24".parse().unwrap()));

    let record = node.chute_op(UpdateType::Delete, "hello").await;
    assert_eq!(record.success, Some(true), "{:?}", record.messages);
    assert!(node.chute("hello").is_none());
    assert!(!node.pools().subnets.is_used(&"192.168.128.0/24".parse().unwrap()));
    assert!(node.fake.command_lines().iter().any(|l| l == "docker rm --force hello-main"));
}

#[tokio::test]
async fn unknown_chutes_cannot_start() {
    let home = TempDir::new().unwrap();
    let mut node = Node::boot(home.path(), HOST).await;
    let record = node.chute_op(UpdateType::Start, "ghost").await;
    assert_eq!(record.success, Some(false));
    assert!(record.messages[0].contains("not installed"));
}

#[tokio::test]
async fn invalid_requests_are_not_queued() {
    let home = TempDir::new().unwrap();
    let node = Node::boot(home.path(), HOST).await;
    let err = node
        .manager
        .add_update(UpdateRequest::chute_named(UpdateType::Create, "hello"))
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(node.manager.pending(), 0);
}

#[tokio::test]
async fn stopped_chutes_keep_their_interfaces_across_restarts() {
    let home = TempDir::new().unwrap();
    {
        let mut node = Node::boot(home.path(), HOST).await;
        node.install(HELLO).await;
        node.chute_op(UpdateType::Stop, "hello").await;
    }
    let mut node = Node::boot(home.path(), HOST).await;
    assert!(node.pools().numbers.is_used(&0));
    assert!(node.pools().subnets.is_used(&"192.168.128.0/24".parse().unwrap()));

    /* same interface name as hello */
    let record = node.install(&hello_named("second")).await;
    assert_eq!(record.success, Some(true), "{:?}", record.messages);
    let second = node.chute("second").unwrap();
    assert_eq!(second.cache.network_interfaces[0].external_intf, "vwlan0.0001");

    let third = hello_named("third").replace("wlan0", "wlan1");
    let record = node.install(&third).await;
    assert_eq!(record.success, Some(true), "{:?}", record.messages);

    let record = node.chute_op(UpdateType::Start, "hello").await;
    assert_eq!(record.success, Some(true), "{:?}", record.messages);
    let hello = &node.chute("hello").unwrap().cache.network_interfaces[0];
    assert_eq!(hello.external_intf, "vwlan0.0000");
    assert_eq!(hello.subnet.unwrap().to_string(), "192.168.128.0/24");

    let mut numbers: Vec<u32> = ["hello", "second", "third"]
        .iter()
        .map(|name| node.chute(name).unwrap().cache.network_interfaces[0].ext_intf_number)
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![0, 1, 2]);
    let subnets: std::collections::BTreeSet<_> = ["hello", "second", "third"]
        .iter()
        .map(|name| node.chute(name).unwrap().cache.network_interfaces[0].subnet)
        .collect();
    assert_eq!(subnets.len(), 3);
}

#[tokio::test]
async fn same_version_is_rejected() {
    let home = TempDir::new().unwrap();
    let mut node = Node::boot(home.path(), HOST).await;
    let v2 = HELLO.replace("name: hello", "name: hello\nversion: 2");
    assert_eq!(node.install(&v2).await.success, Some(true));

    let again = chute::Chute::from_yaml(&v2).unwrap();
    let record = node
        .submit(UpdateRequest::install(UpdateType::Update, again))
        .await;
    assert_eq!(record.success, Some(false));
    assert!(record.messages[0].contains("does not supersede"), "{:?}", record.messages);
}

#[tokio::test]
async fn subnet_pool_runs_out() {
    let home = TempDir::new().unwrap();
    let host = HOST.replace("192.168.128.0/17", "10.10.0.0/22");
    let mut node = Node::boot(home.path(), &host).await;
    for name in ["a", "b", "c", "d"] {
        let record = node.install(&hello_named(name)).await;
        assert_eq!(record.success, Some(true), "{name}: {:?}", record.messages);
    }

    let record = node.install(&hello_named("e")).await;
    assert_eq!(record.success, Some(false));
    assert!(!record.fatal);
    assert!(record.messages[0].contains("Resource exhausted"), "{:?}", record.messages);
    assert!(node.chute("e").is_none());
    /* the number taken for e went back to the pool */
    assert!(!node.pools().numbers.is_used(&4));
}
