// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracing runtime control.

use ordermap::OrderMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, OnceLock};
use tracing::{info, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Registry, filter::LevelFilter, prelude::*, reload};

use crate::display::ByTag;
use crate::targets::TRACING_TARGETS;
use crate::trace_target;

trace_target!("tracectl", LevelFilter::INFO, &[]);

/// Errors raised when installing or configuring tracing
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing has already been installed")]
    AlreadyInstalled,
    #[error("bad tracing directive '{0}': expected tag=level")]
    BadDirective(String),
    #[error("bad tracing level '{0}'")]
    BadLevel(String),
    #[error("failed to open log file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to install subscriber: {0}")]
    Subscriber(String),
}

/// Where formatted log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    /// Append to a file; typically `HOME_DIR/logs/paradrop.log`
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct TargetCfg {
    pub target: &'static str,
    pub name: &'static str,
    pub level: LevelFilter,
    pub tags: Vec<&'static str>,
    pub custom: bool,
}

#[derive(Debug)]
pub(crate) struct TargetCfgDb {
    pub(crate) level: LevelFilter,
    pub(crate) targets: OrderMap<&'static str, TargetCfg>,
    pub(crate) tags: OrderMap<&'static str, Vec<&'static str>>, /* tag -> targets */
}

impl TargetCfgDb {
    fn load(level: LevelFilter) -> Self {
        let mut db = Self {
            level,
            targets: OrderMap::new(),
            tags: OrderMap::new(),
        };
        for t in TRACING_TARGETS {
            db.register(TargetCfg {
                target: t.target,
                name: t.name,
                level: t.level,
                tags: t.tags.to_vec(),
                custom: t.custom,
            });
        }
        db
    }

    fn register(&mut self, mut cfg: TargetCfg) {
        // a target can always be addressed by its name
        if !cfg.tags.contains(&cfg.name) {
            cfg.tags.push(cfg.name);
        }
        for tag in &cfg.tags {
            let members = self.tags.entry(tag).or_default();
            if !members.contains(&cfg.target) {
                members.push(cfg.target);
            }
        }
        if let Some(prior) = self.targets.insert(cfg.target, cfg) {
            warn!("Tracing target {} declared more than once", prior.target);
        }
    }

    fn env_filter(&self) -> EnvFilter {
        self.targets
            .values()
            .filter_map(|t| format!("{}={}", t.target, t.level).parse().ok())
            .fold(EnvFilter::new(self.level.to_string()), |f, d| {
                f.add_directive(d)
            })
    }

    /// Targets carrying `tag`, mutably
    fn tagged_mut(&mut self, tag: &str) -> Vec<&mut TargetCfg> {
        let Some(members) = self.tags.get(tag).cloned() else {
            return vec![];
        };
        self.targets
            .values_mut()
            .filter(|t| members.contains(&t.target))
            .collect()
    }

    pub(crate) fn tagged(&self, tag: &str) -> Vec<&TargetCfg> {
        let Some(members) = self.tags.get(tag) else {
            return vec![];
        };
        self.targets
            .values()
            .filter(|t| members.contains(&t.target))
            .collect()
    }

    fn as_config_string(&self) -> String {
        let mut out = format!("default={}", self.level);
        for t in self.targets.values() {
            out += &format!(",{}={}", t.name, t.level);
        }
        out
    }
}

/// Handle to change log levels at runtime
#[derive(Debug)]
pub struct TracingControl {
    db: Mutex<TargetCfgDb>,
    reload: OnceLock<reload::Handle<EnvFilter, Registry>>,
}

static TRACING_CTL: OnceLock<TracingControl> = OnceLock::new();

/// Get the process-wide [`TracingControl`]. The control exists before a subscriber is
/// installed, so that levels can be configured first and applied on [`TracingControl::install`].
pub fn get_trace_ctl() -> &'static TracingControl {
    TRACING_CTL.get_or_init(|| TracingControl {
        db: Mutex::new(TargetCfgDb::load(LevelFilter::INFO)),
        reload: OnceLock::new(),
    })
}

impl TracingControl {
    fn db(&self) -> MutexGuard<'_, TargetCfgDb> {
        // a poisoned lock only means a panic happened while logging config was being edited
        self.db.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn apply(&self, db: &TargetCfgDb) {
        if let Some(handle) = self.reload.get()
            && let Err(e) = handle.reload(db.env_filter())
        {
            warn!("Failed to reload tracing filter: {e}");
        }
    }

    /// Install the global subscriber: reloadable filter, formatter and span-trace capture.
    ///
    /// # Errors
    ///
    /// Fails if a subscriber was already installed or the log file cannot be opened.
    pub fn install(&self, output: LogOutput) -> Result<(), TracingError> {
        if self.reload.get().is_some() {
            return Err(TracingError::AlreadyInstalled);
        }
        let (filter, handle) = reload::Layer::new(self.db().env_filter());
        let (writer, ansi) = match &output {
            LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
            LogOutput::File(path) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                (BoxMakeWriter::new(Mutex::new(file)), false)
            }
        };
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .with(ErrorLayer::default())
            .try_init()
            .map_err(|e| TracingError::Subscriber(e.to_string()))?;
        color_eyre::install().map_err(|e| TracingError::Subscriber(e.to_string()))?;

        self.reload
            .set(handle)
            .map_err(|_| TracingError::AlreadyInstalled)?;
        info!("Tracing installed, output: {output:?}");
        Ok(())
    }

    pub fn set_default_level(&self, level: LevelFilter) {
        let mut db = self.db();
        if db.level != level {
            db.level = level;
            self.apply(&db);
        }
    }

    #[must_use]
    pub fn default_level(&self) -> LevelFilter {
        self.db().level
    }

    pub fn set_level_all(&self, level: LevelFilter) {
        let mut db = self.db();
        db.targets.values_mut().for_each(|t| t.level = level);
        self.apply(&db);
    }

    /// Set the level of every target carrying `tag`. Returns the number of targets changed.
    pub fn set_tag_level(&self, tag: &str, level: LevelFilter) -> usize {
        let mut db = self.db();
        let mut changed = 0;
        for target in db.tagged_mut(tag) {
            if target.level != level {
                target.level = level;
                changed += 1;
            }
        }
        if changed > 0 {
            self.apply(&db);
        }
        changed
    }

    /// Parse `tag=level[,tag=level]*`. The pseudo-tags `default` and `all` set the default
    /// level and the level of every target respectively.
    fn parse(input: &str) -> Result<OrderMap<String, LevelFilter>, TracingError> {
        let mut parsed = OrderMap::new();
        for item in input.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let Some((tag, level)) = item.split_once('=') else {
                return Err(TracingError::BadDirective(item.to_string()));
            };
            let level = LevelFilter::from_str(level.trim())
                .map_err(|_| TracingError::BadLevel(level.trim().to_string()))?;
            parsed.insert(tag.trim().to_string(), level);
        }
        Ok(parsed)
    }

    /// Configure levels from a string as accepted on the command line.
    ///
    /// # Errors
    ///
    /// Fails without changing anything if any directive is malformed.
    pub fn setup_from_string(&self, input: &str) -> Result<(), TracingError> {
        let config = Self::parse(input)?;
        if let Some(level) = config.get("default") {
            self.set_default_level(*level);
        }
        if let Some(level) = config.get("all") {
            self.set_level_all(*level);
        }
        for (tag, level) in config.iter().filter(|(t, _)| *t != "default" && *t != "all") {
            self.set_tag_level(tag, *level);
        }
        Ok(())
    }

    #[must_use]
    pub fn target(&self, target: &str) -> Option<TargetCfg> {
        self.db().targets.get(target).cloned()
    }

    #[must_use]
    pub fn targets_by_tag(&self, tag: &str) -> Vec<TargetCfg> {
        self.db().tagged(tag).into_iter().cloned().collect()
    }

    #[must_use]
    pub fn as_config_string(&self) -> String {
        self.db().as_config_string()
    }

    /// Render all targets as a table
    #[must_use]
    pub fn dump(&self) -> String {
        self.db().to_string()
    }

    /// Render all targets grouped by tag
    #[must_use]
    pub fn dump_by_tag(&self) -> String {
        ByTag(&self.db()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{TracingControl, TracingError, get_trace_ctl};
    use crate::targets::TRACING_TARGETS;
    use crate::{LevelFilter, custom_target};
    use serial_test::serial;

    custom_target!("test-confd-a", LevelFilter::DEBUG, &["test-net"]);
    custom_target!("test-confd-b", LevelFilter::ERROR, &["test-net"]);
    custom_target!("test-update", LevelFilter::INFO, &[]);

    #[test]
    fn targets_are_collected_at_link_time() {
        let names: Vec<_> = TRACING_TARGETS.iter().map(|t| t.target).collect();
        assert!(names.contains(&"test-confd-a"));
        assert!(names.contains(&"test-update"));
        // the crate's own module target
        assert!(names.iter().any(|n| n.starts_with("paradrop_tracectl")));
    }

    #[test]
    #[serial]
    fn tag_level_applies_to_all_members() {
        let tctl = get_trace_ctl();
        tctl.set_tag_level("test-net", LevelFilter::INFO);
        let changed = tctl.set_tag_level("test-net", LevelFilter::OFF);
        assert_eq!(changed, 2);
        for t in tctl.targets_by_tag("test-net") {
            assert_eq!(t.level, LevelFilter::OFF);
        }
        // unrelated target untouched
        assert_eq!(
            tctl.target("test-update").expect("registered").level,
            LevelFilter::INFO
        );
    }

    #[test]
    #[serial]
    fn setup_from_string() {
        let tctl = get_trace_ctl();
        tctl.setup_from_string("default=warn, test-net=debug,test-update=trace")
            .expect("valid directives");
        assert_eq!(tctl.default_level(), LevelFilter::WARN);
        assert_eq!(
            tctl.target("test-confd-b").expect("registered").level,
            LevelFilter::DEBUG
        );
        assert_eq!(
            tctl.target("test-update").expect("registered").level,
            LevelFilter::TRACE
        );
        assert!(tctl.as_config_string().starts_with("default=warn"));
    }

    #[test]
    fn malformed_directives_are_rejected() {
        assert!(matches!(
            TracingControl::parse("test-net"),
            Err(TracingError::BadDirective(_))
        ));
        assert!(matches!(
            TracingControl::parse("test-net=loud"),
            Err(TracingError::BadLevel(_))
        ));
        assert_eq!(TracingControl::parse("").expect("empty is fine").len(), 0);
    }

    #[test]
    #[serial]
    fn dumps_mention_targets() {
        let tctl = get_trace_ctl();
        assert!(tctl.dump().contains("test-update"));
        assert!(tctl.dump_by_tag().contains("[test-net] 2 targets"));
    }
}
