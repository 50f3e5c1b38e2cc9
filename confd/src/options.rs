// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Typed access to section options

use std::str::FromStr;
use uci::UciSection;

use crate::errors::ConfdError;
use crate::section::SectionKey;

pub(crate) struct Options<'a> {
    key: &'a SectionKey,
    section: &'a UciSection,
}

impl<'a> Options<'a> {
    pub(crate) fn new(key: &'a SectionKey, section: &'a UciSection) -> Self {
        Self { key, section }
    }

    pub(crate) fn bad_value(&self, option: &str, value: &str) -> ConfdError {
        ConfdError::BadValue {
            key: self.key.clone(),
            option: option.to_string(),
            value: value.to_string(),
        }
    }

    /// Name of the section, for types that can also carry it in an option
    pub(crate) fn section_name(&self) -> &str {
        &self.key.name
    }

    pub(crate) fn opt(&self, option: &str) -> Option<String> {
        self.section.get(option).map(str::to_string)
    }

    pub(crate) fn required(&self, option: &str) -> Result<String, ConfdError> {
        self.opt(option).ok_or_else(|| ConfdError::MissingOption {
            key: self.key.clone(),
            option: option.to_string(),
        })
    }

    pub(crate) fn parse<T: FromStr>(&self, option: &str) -> Result<Option<T>, ConfdError> {
        match self.section.get(option) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.bad_value(option, value)),
        }
    }

    pub(crate) fn parse_or<T: FromStr>(&self, option: &str, default: T) -> Result<T, ConfdError> {
        Ok(self.parse(option)?.unwrap_or(default))
    }

    pub(crate) fn parse_required<T: FromStr>(&self, option: &str) -> Result<T, ConfdError> {
        let value = self.required(option)?;
        value.trim().parse().map_err(|_| self.bad_value(option, &value))
    }

    /// `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off`
    pub(crate) fn bool(&self, option: &str, default: bool) -> Result<bool, ConfdError> {
        match self.section.get(option) {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on" | "enabled") => Ok(true),
            Some("0" | "false" | "no" | "off" | "disabled") => Ok(false),
            Some(other) => Err(self.bad_value(option, other)),
        }
    }

    /// A list; a whitespace-separated option is accepted as a list too
    pub(crate) fn list(&self, option: &str) -> Vec<String> {
        match self.section.options.get(option) {
            Some(uci::UciValue::Option(v)) => v.split_whitespace().map(str::to_string).collect(),
            Some(uci::UciValue::List(l)) => l.clone(),
            None => vec![],
        }
    }
}
