// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(rustdoc::all)]
#![allow(rustdoc::missing_crate_level_docs)]

mod node;

use args::{CmdArgs, Parser};
use color_eyre::eyre::{Result, WrapErr};
use tokio::sync::watch;
use tracectl::{LogOutput, custom_target, get_trace_ctl, trace_target};
use tracing::{error, info};

trace_target!("paradrop", LevelFilter::INFO, &[]);
custom_target!("hyper", LevelFilter::WARN, &["http"]);
custom_target!("axum", LevelFilter::WARN, &["http", "api"]);

fn main() -> Result<()> {
    /* parse cmd line args */
    let args = CmdArgs::parse();
    let tctl = get_trace_ctl();
    if let Some(tracing) = args.tracing() {
        tctl.setup_from_string(tracing)
            .wrap_err("Invalid tracing configuration")?;
    }
    if args.show_tracing_tags() {
        println!("{}", tctl.dump_by_tag());
        return Ok(());
    }
    if args.show_tracing_targets() {
        println!("{}", tctl.dump());
        return Ok(());
    }
    if args.tracing_config_generate() {
        println!("{}", tctl.as_config_string());
        return Ok(());
    }

    let settings = args.settings().wrap_err("Bad settings")?;

    /* initialize logging */
    let output = if args.log_stdout() {
        LogOutput::Stdout
    } else {
        LogOutput::File(settings.log_dir().join("paradrop.log"))
    };
    tctl.install(output).wrap_err("Failed to set up logging")?;
    info!("Starting paradrop agent, home {}", settings.home_dir.display());

    let (stop_tx, _) = watch::channel(false);
    let on_signal = stop_tx.clone();
    ctrlc::set_handler(move || {
        on_signal.send_replace(true);
    })
    .wrap_err("Failed to set SIGINT handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("paradrop")
        .enable_all()
        .build()
        .wrap_err("Failed to create the runtime")?;
    let result = runtime.block_on(node::run(&settings, &stop_tx));
    if let Err(e) = &result {
        error!("Agent failed: {e:#}");
    }
    info!("Shutting down paradrop agent");
    result
}
