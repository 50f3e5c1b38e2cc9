// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A directory of UCI files

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::UciError;
use crate::parse::parse;
use crate::section::{UciFile, UciSection};

const HEADER: &str = "####################################################################\n\
# UCI configuration file written by Paradrop. Sections carry their owner\n\
# in a trailing comment; edits to owned sections are overwritten.\n\
####################################################################\n\n";

#[derive(Debug, Clone)]
pub struct UciConfigDir {
    dir: PathBuf,
}

impl UciConfigDir {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Read a file; a missing file is empty
    pub fn read(&self, name: &str) -> Result<UciFile, UciError> {
        let path = self.path(name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(UciFile::default()),
            Err(err) => return Err(UciError::Io { path, err }),
        };
        parse(&text).map_err(|e| match e {
            UciError::Syntax { line, reason } => UciError::File { path, line, reason },
            other => other,
        })
    }

    /// Atomically replace a file
    pub fn write(&self, name: &str, file: &UciFile) -> Result<(), UciError> {
        let path = self.path(name);
        let io = |err| UciError::Io {
            path: path.clone(),
            err,
        };
        std::fs::create_dir_all(&self.dir).map_err(io)?;
        let tmp = self.dir.join(format!(".{name}.tmp"));
        std::fs::write(&tmp, format!("{HEADER}{}", file.render())).map_err(io)?;
        std::fs::rename(&tmp, &path).map_err(io)?;
        debug!("Wrote {} sections to {}", file.sections.len(), path.display());
        Ok(())
    }

    /// Replace the sections of `owner` in file `name`, writing only if something changed.
    pub fn set_owner_sections(
        &self,
        name: &str,
        owner: &str,
        sections: Vec<UciSection>,
    ) -> Result<bool, UciError> {
        let mut file = self.read(name)?;
        let changed = file.set_owner_sections(owner, sections);
        if changed {
            self.write(name, &file)?;
        }
        Ok(changed)
    }

    /// Snapshot of the files planners write, for restoring on abort
    pub fn snapshot(&self) -> Result<Vec<(String, UciFile)>, UciError> {
        crate::CONFIG_FILES
            .iter()
            .map(|name| Ok(((*name).to_string(), self.read(name)?)))
            .collect()
    }

    pub fn restore(&self, snapshot: &[(String, UciFile)]) -> Result<(), UciError> {
        for (name, file) in snapshot {
            if self.read(name)? != *file {
                self.write(name, file)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn save_then_read_matches() {
        let dir = tempfile::tempdir().unwrap();
        let uci = UciConfigDir::new(dir.path());
        assert_eq!(uci.read("network").unwrap(), UciFile::default());

        let sections = vec![
            UciSection::new("interface", Some("hello-wlan0"))
                .option("proto", "static")
                .option("ipaddr", "192.168.128.1"),
        ];
        assert!(uci.set_owner_sections("network", "hello", sections.clone()).unwrap());
        assert!(!uci.set_owner_sections("network", "hello", sections).unwrap());

        let text = std::fs::read_to_string(uci.path("network")).unwrap();
        assert!(text.starts_with("####"));
        let file = uci.read("network").unwrap();
        // modulo the header, the bytes are what was rendered
        assert!(text.ends_with(&file.render()));
        assert_eq!(file.sections[0].comment.as_deref(), Some("hello"));
    }

    #[test]
    fn snapshot_restore() {
        let dir = tempfile::tempdir().unwrap();
        let uci = UciConfigDir::new(dir.path());
        let before = uci.snapshot().unwrap();
        uci.set_owner_sections("firewall", "hello", vec![UciSection::new("zone", None)])
            .unwrap();
        uci.restore(&before).unwrap();
        assert_eq!(uci.read("firewall").unwrap(), UciFile::default());
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dhcp"), "config dnsmasq\n\tbogus x y\n").unwrap();
        let uci = UciConfigDir::new(dir.path());
        assert!(matches!(uci.read("dhcp"), Err(UciError::File { line: 2, .. })));
    }
}
