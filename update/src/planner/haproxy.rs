// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The HTTP front end routing `<chute>.chute.<domain>` and `/chutes/<chute>/` to chute web
//! services

use exec::{Command, TimeoutClass};
use plan::PlanGraph;
use std::fmt::Write;
use tracing::{debug, info};

use super::Planner;
use crate::context::UpdateContext;
use crate::errors::UpdateError;
use crate::ops::Op;
use crate::prio;
use crate::update::UpdateRequest;

const HEADER: &str = "\
global
    maxconn 256

defaults
    mode http
    timeout connect 5s
    timeout client 50s
    timeout server 50s

frontend http-in
    bind *:80
";

pub struct HaproxyPlanner;

impl Planner for HaproxyPlanner {
    fn name(&self) -> &'static str {
        "haproxy"
    }

    fn plan(&self, _request: &UpdateRequest, graph: &mut PlanGraph<Op>) -> Result<(), UpdateError> {
        graph.add(
            prio::HAPROXY,
            Op::Haproxy { with_update: true },
            vec![Op::Haproxy { with_update: false }],
        );
        Ok(())
    }
}

/// A chute web service reachable through the front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRoute {
    pub chute: String,
    /// `http://<address>:<port>`
    pub url: String,
}

/// Render the configuration. Routes are sorted by chute name.
#[must_use]
pub fn render(routes: &[WebRoute], domain: &str) -> String {
    let mut routes = routes.to_vec();
    routes.sort_by(|a, b| a.chute.cmp(&b.chute));
    let mut out = HEADER.to_string();
    for r in &routes {
        let name = &r.chute;
        let _ = writeln!(out, "    acl host_{name} hdr(host) -i {name}.chute.{domain}");
        let _ = writeln!(out, "    use_backend {name} if host_{name}");
        /* ports change across restarts: temporary redirect */
        let _ = writeln!(out, "    acl path_{name} path_beg /chutes/{name}/");
        let _ = writeln!(
            out,
            "    http-request redirect location http://{name}.chute.{domain}/ code 302 if path_{name}"
        );
    }
    for r in &routes {
        let server = r.url.trim_start_matches("http://").trim_end_matches('/');
        let _ = write!(out, "\nbackend {}\n    server {} {server}\n", r.chute, r.chute);
    }
    out
}

/// Routes once the update is done, or as they were if `with_update` is false
fn routes(ctx: &UpdateContext, with_update: bool) -> Vec<WebRoute> {
    let route = |chute: &str, url: Option<&String>| {
        url.map(|url| WebRoute {
            chute: chute.to_string(),
            url: url.clone(),
        })
    };
    let mut routes: Vec<WebRoute> = ctx
        .env
        .catalog
        .list()
        .iter()
        .filter(|c| c.name != ctx.chute.name && c.is_running())
        .filter_map(|c| route(&c.name, c.cache.web_url.as_ref()))
        .collect();
    let updated = if with_update {
        ctx.deploys()
            .then(|| route(&ctx.chute.name, ctx.chute.cache.web_url.as_ref()))
            .flatten()
    } else {
        ctx.old
            .as_ref()
            .filter(|old| old.is_running())
            .and_then(|old| route(&old.name, old.cache.web_url.as_ref()))
    };
    routes.extend(updated);
    routes
}

/// Write the configuration and restart haproxy if the routes changed
pub(crate) async fn reconfigure(
    ctx: &mut UpdateContext,
    with_update: bool,
) -> Result<(), UpdateError> {
    let write_dir = ctx.env.settings.write_dir.clone();
    let conf = write_dir.join("haproxy.conf");
    let pid = write_dir.join("haproxy.pid");
    let text = render(&routes(ctx, with_update), &ctx.env.settings.chute_domain);
    if std::fs::read_to_string(&conf).is_ok_and(|current| current == text) {
        debug!("haproxy configuration unchanged");
        return Ok(());
    }
    let runner = &ctx.env.runner;
    runner.execute(&Command::write_file(&conf, text)).await?;
    runner
        .execute(&Command::kill_pid_file(&pid).ignore_failure())
        .await?;
    let argv = [
        "haproxy".to_string(),
        "-f".to_string(),
        conf.display().to_string(),
        "-p".to_string(),
        pid.display().to_string(),
        "-D".to_string(),
    ];
    runner.run(&argv, TimeoutClass::Short).await?;
    info!("Reconfigured haproxy");
    Ok(())
}
