// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

pub use clap::Parser;
use config::{ConfigError, Settings};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "paradrop")]
#[command(version)]
#[command(
    about = "Edge compute node agent: runs chutes and manages the host network",
    long_about = None
)]
#[allow(clippy::struct_excessive_bools)]
pub struct CmdArgs {
    #[arg(
        long,
        env = "PARADROP_SETTINGS",
        value_name = "FILE",
        help = "YAML settings file. Settings not in the file keep their defaults"
    )]
    settings: Option<PathBuf>,

    #[arg(
        long,
        env = "PARADROP_HOME",
        value_name = "DIR",
        help = "Home directory of the agent: identity, chute catalog, logs and chute sources"
    )]
    home: Option<PathBuf>,

    #[arg(
        long,
        env = "UCI_CONFIG_DIR",
        value_name = "DIR",
        help = "Directory of the UCI configuration files"
    )]
    uci_config_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "PDCONFD_WRITE_DIR",
        value_name = "DIR",
        help = "Directory for generated daemon configuration, pid and lease files"
    )]
    write_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "HOST_CONFIG_FILE",
        value_name = "FILE",
        help = "Host configuration file"
    )]
    host_config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "IP:PORT",
        help = "Bind address and port of the local HTTP API"
    )]
    api_address: Option<SocketAddr>,

    #[arg(long, default_value_t = false, help = "Log to stdout instead of the log file")]
    log_stdout: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Show the available tracing tags and exit"
    )]
    show_tracing_tags: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Show configurable tracing targets and exit"
    )]
    show_tracing_targets: bool,

    #[arg(long, help = "generate tracing configuration as a string and exit")]
    tracing_config_generate: bool,

    #[arg(
        long,
        value_name = "tracing configuration",
        help = "Tracing config string as comma-separated sequence of tag=level, with level one in [off,error,warn,info,debug,trace].
Passing default=level sets the default log-level.
Passing all=level allows setting the log-level of all targets to level.
E.g. default=error,all=info,confd=debug will set the default target to error, and all the registered targets to info, but enable debug for confd"
    )]
    tracing: Option<String>,
}

impl CmdArgs {
    pub fn show_tracing_tags(&self) -> bool {
        self.show_tracing_tags
    }
    pub fn show_tracing_targets(&self) -> bool {
        self.show_tracing_targets
    }
    pub fn tracing_config_generate(&self) -> bool {
        self.tracing_config_generate
    }
    pub fn tracing(&self) -> Option<&String> {
        self.tracing.as_ref()
    }
    pub fn log_stdout(&self) -> bool {
        self.log_stdout
    }

    /// Build the agent settings: the settings file if any, then the command line on top.
    ///
    /// A home directory given on the command line moves every path under it, as
    /// [`Settings::with_home`] does, unless the path is given explicitly too.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let mut settings = match &self.settings {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        if let Some(home) = &self.home {
            let rooted = Settings::with_home(home);
            settings.home_dir = rooted.home_dir;
            settings.uci_config_dir = rooted.uci_config_dir;
            settings.write_dir = rooted.write_dir;
            settings.host_config_file = rooted.host_config_file;
        }
        if let Some(dir) = &self.uci_config_dir {
            settings.uci_config_dir.clone_from(dir);
        }
        if let Some(dir) = &self.write_dir {
            settings.write_dir.clone_from(dir);
        }
        if let Some(file) = &self.host_config {
            settings.host_config_file.clone_from(file);
        }
        if let Some(address) = self.api_address {
            settings.api_address = address;
        }
        settings.validate()?;
        debug!("Settings: {settings:?}");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::{CmdArgs, Parser};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn defaults_without_arguments() {
        let args = CmdArgs::try_parse_from(["paradrop"]).unwrap();
        let settings = args.settings().unwrap();
        assert_eq!(settings, config::Settings::default());
        assert!(!args.log_stdout());
        assert!(args.tracing().is_none());
    }

    #[test]
    fn home_moves_every_path() {
        let args = CmdArgs::try_parse_from(["paradrop", "--home", "/tmp/pd"]).unwrap();
        let settings = args.settings().unwrap();
        assert_eq!(settings.home_dir, PathBuf::from("/tmp/pd"));
        assert_eq!(settings.uci_config_dir, PathBuf::from("/tmp/pd/uci"));
        assert_eq!(settings.write_dir, PathBuf::from("/tmp/pd/run"));
        assert_eq!(settings.catalog_file(), PathBuf::from("/tmp/pd/chutes"));
    }

    #[test]
    fn explicit_paths_win_over_home() {
        let args = CmdArgs::try_parse_from([
            "paradrop",
            "--home",
            "/tmp/pd",
            "--write-dir",
            "/run/pdconfd",
            "--api-address",
            "127.0.0.1:8080",
        ])
        .unwrap();
        let settings = args.settings().unwrap();
        assert_eq!(settings.write_dir, PathBuf::from("/run/pdconfd"));
        assert_eq!(settings.uci_config_dir, PathBuf::from("/tmp/pd/uci"));
        assert_eq!(settings.api_address.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn settings_file_under_the_command_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "chute_domain: example.net\nmax_ap_interfaces: 4\n").unwrap();
        let args = CmdArgs::try_parse_from([
            "paradrop",
            "--settings",
            path.to_str().unwrap(),
            "--tracing",
            "default=info,confd=debug",
        ])
        .unwrap();
        let settings = args.settings().unwrap();
        assert_eq!(settings.chute_domain, "example.net");
        assert_eq!(settings.max_ap_interfaces, 4);
        assert_eq!(args.tracing().map(String::as_str), Some("default=info,confd=debug"));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "max_ap_interfaces: 0\n").unwrap();
        let args =
            CmdArgs::try_parse_from(["paradrop", "--settings", path.to_str().unwrap()]).unwrap();
        assert!(args.settings().is_err());
    }

    #[test]
    fn bad_api_address() {
        assert!(CmdArgs::try_parse_from(["paradrop", "--api-address", "nowhere"]).is_err());
    }
}
