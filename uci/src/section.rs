// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! UCI sections and files

use ordermap::OrderMap;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Write};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UciValue {
    Option(String),
    List(Vec<String>),
}

impl UciValue {
    /// The value of an `option`, or the first element of a `list`
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            UciValue::Option(v) => Some(v),
            UciValue::List(l) => l.first().map(String::as_str),
        }
    }
    /// The elements of a `list`; an `option` is a list of one
    #[must_use]
    pub fn as_list(&self) -> Vec<&str> {
        match self {
            UciValue::Option(v) => vec![v.as_str()],
            UciValue::List(l) => l.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UciSection {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub options: OrderMap<String, UciValue>,
}

impl UciSection {
    #[must_use]
    pub fn new(kind: &str, name: Option<&str>) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.map(str::to_string),
            comment: None,
            options: OrderMap::new(),
        }
    }
    #[must_use]
    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }
    /// Set an option
    #[must_use]
    pub fn option(mut self, key: &str, value: impl ToString) -> Self {
        self.options
            .insert(key.to_string(), UciValue::Option(value.to_string()));
        self
    }
    /// Set an option only if there is a value
    #[must_use]
    pub fn option_if<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.option(key, v),
            None => self,
        }
    }
    /// Append to a list
    #[must_use]
    pub fn list(mut self, key: &str, value: impl ToString) -> Self {
        self.push_list(key, value.to_string());
        self
    }
    pub fn push_list(&mut self, key: &str, value: String) {
        match self.options.get_mut(key) {
            Some(UciValue::List(l)) => l.push(value),
            Some(UciValue::Option(o)) => {
                let first = std::mem::take(o);
                self.options
                    .insert(key.to_string(), UciValue::List(vec![first, value]));
            }
            None => {
                self.options.insert(key.to_string(), UciValue::List(vec![value]));
            }
        }
    }
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(UciValue::as_str)
    }
    #[must_use]
    pub fn get_list(&self, key: &str) -> Vec<&str> {
        self.options.get(key).map(UciValue::as_list).unwrap_or_default()
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl Display for UciSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config {}", self.kind)?;
        if let Some(name) = &self.name {
            write!(f, " {}", quote(name))?;
        }
        if let Some(comment) = &self.comment {
            write!(f, " #{comment}")?;
        }
        writeln!(f)?;
        for (key, value) in &self.options {
            match value {
                UciValue::Option(v) => writeln!(f, "\toption {key} {}", quote(v))?,
                UciValue::List(l) => {
                    for v in l {
                        writeln!(f, "\tlist {key} {}", quote(v))?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// The sections of one UCI file, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UciFile {
    pub sections: Vec<UciSection>,
}

impl UciFile {
    #[must_use]
    pub fn new(sections: Vec<UciSection>) -> Self {
        Self { sections }
    }

    /// Render without a header
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            let _ = writeln!(out, "{section}");
        }
        out
    }

    /// Sections tagged with `owner`
    pub fn owned_by<'a>(&'a self, owner: &'a str) -> impl Iterator<Item = &'a UciSection> + 'a {
        self.sections
            .iter()
            .filter(move |s| s.comment.as_deref() == Some(owner))
    }

    /// Replace the sections of `owner` with `sections`, tagging them. Sections of other owners
    /// keep their place; new sections go at the end. Returns whether anything changed.
    pub fn set_owner_sections(&mut self, owner: &str, sections: Vec<UciSection>) -> bool {
        let tagged: Vec<UciSection> = sections
            .into_iter()
            .map(|mut s| {
                s.comment = Some(owner.to_string());
                s
            })
            .collect();
        let current: Vec<&UciSection> = self.owned_by(owner).collect();
        if current.len() == tagged.len() && current.iter().zip(&tagged).all(|(a, b)| *a == b) {
            return false;
        }
        self.sections
            .retain(|s| s.comment.as_deref() != Some(owner));
        self.sections.extend(tagged);
        true
    }

    /// Remove the sections of `owner`. Returns whether anything changed.
    pub fn remove_owner(&mut self, owner: &str) -> bool {
        self.set_owner_sections(owner, vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn render_quotes() {
        let section = UciSection::new("wifi-iface", Some("hello-wlan0"))
            .comment("hello")
            .option("ssid", "it's mine")
            .list("server", "8.8.8.8")
            .list("server", "1.1.1.1");
        assert_eq!(
            section.to_string(),
            "config wifi-iface 'hello-wlan0' #hello\n\toption ssid 'it'\\''s mine'\n\tlist server '8.8.8.8'\n\tlist server '1.1.1.1'\n"
        );
    }

    #[test]
    fn owner_replacement() {
        let mut file = UciFile::new(vec![
            UciSection::new("interface", Some("lan")).comment(crate::HOST_OWNER),
            UciSection::new("interface", Some("hello-wlan0")).comment("hello"),
            UciSection::new("interface", Some("other-eth0")).comment("other"),
        ]);
        let hello = vec![UciSection::new("interface", Some("hello-wlan0"))];
        assert!(!file.set_owner_sections("hello", hello.clone()));

        let hello = vec![
            UciSection::new("interface", Some("hello-wlan0")).option("proto", "static"),
        ];
        assert!(file.set_owner_sections("hello", hello));
        let names: Vec<_> = file.sections.iter().filter_map(|s| s.name.as_deref()).collect();
        assert_eq!(names, vec!["lan", "other-eth0", "hello-wlan0"]);

        assert!(file.remove_owner("hello"));
        assert!(!file.remove_owner("hello"));
        assert_eq!(file.sections.len(), 2);
    }

    #[test]
    fn option_becomes_list() {
        let mut section = UciSection::new("zone", None).option("network", "lan");
        section.push_list("network", "wan".to_string());
        assert_eq!(section.get_list("network"), vec!["lan", "wan"]);
        assert_eq!(section.get("network"), Some("lan"));
    }
}
