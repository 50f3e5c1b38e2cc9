// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! UCI text parser

use crate::UciError;
use crate::section::{UciFile, UciSection};

/// Split a line into shell-like words. Single and double quotes group, backslash escapes
/// outside single quotes, an unquoted `#` starts a trailing comment.
fn tokenize(line: &str, lineno: usize) -> Result<(Vec<String>, Option<String>), UciError> {
    let mut words = vec![];
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '#' if !in_word => {
                let comment: String = chars.collect();
                let comment = comment.trim().to_string();
                return Ok((words, (!comment.is_empty()).then_some(comment)));
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => {
                            return Err(UciError::Syntax {
                                line: lineno,
                                reason: "unterminated single quote".to_string(),
                            });
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                word.push(escaped);
                            }
                        }
                        Some(c) => word.push(c),
                        None => {
                            return Err(UciError::Syntax {
                                line: lineno,
                                reason: "unterminated double quote".to_string(),
                            });
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(escaped) = chars.next() {
                    word.push(escaped);
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    Ok((words, None))
}

/// Parse the text of a UCI file
pub fn parse(text: &str) -> Result<UciFile, UciError> {
    let mut file = UciFile::default();
    let mut current: Option<UciSection> = None;
    for (index, line) in text.lines().enumerate() {
        let lineno = index + 1;
        let (words, comment) = tokenize(line, lineno)?;
        let Some(keyword) = words.first() else {
            continue;
        };
        let syntax = |reason: &str| UciError::Syntax {
            line: lineno,
            reason: reason.to_string(),
        };
        match keyword.as_str() {
            "package" => {}
            "config" => {
                if let Some(done) = current.take() {
                    file.sections.push(done);
                }
                let kind = words.get(1).ok_or_else(|| syntax("config without a type"))?;
                if words.len() > 3 {
                    return Err(syntax("trailing words after section name"));
                }
                let mut section = UciSection::new(kind, words.get(2).map(String::as_str));
                section.comment = comment;
                current = Some(section);
            }
            "option" | "list" => {
                let section = current
                    .as_mut()
                    .ok_or_else(|| syntax("option outside of a section"))?;
                let (Some(key), Some(value)) = (words.get(1), words.get(2)) else {
                    return Err(syntax("expected a key and a value"));
                };
                if words.len() > 3 {
                    return Err(syntax("trailing words after value"));
                }
                if keyword == "option" {
                    section.options.insert(
                        key.clone(),
                        crate::section::UciValue::Option(value.clone()),
                    );
                } else {
                    section.push_list(key, value.clone());
                }
            }
            other => return Err(syntax(&format!("unknown keyword {other}"))),
        }
    }
    if let Some(done) = current.take() {
        file.sections.push(done);
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::parse;
    use crate::UciError;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
# written by hand
config interface 'lan' #__PARADROP__
	option proto 'static'
	option ipaddr "192.168.1.1"
	list ifname eth1
	list ifname 'eth2'

config wifi-iface #hello
	option ssid 'Para drop'
	option key 'it'\''s'

config defaults
"#;

    #[test]
    fn parse_sample() {
        let file = parse(SAMPLE).expect("Should parse");
        assert_eq!(file.sections.len(), 3);
        let lan = &file.sections[0];
        assert_eq!(lan.name.as_deref(), Some("lan"));
        assert_eq!(lan.comment.as_deref(), Some("__PARADROP__"));
        assert_eq!(lan.get("ipaddr"), Some("192.168.1.1"));
        assert_eq!(lan.get_list("ifname"), vec!["eth1", "eth2"]);
        let wifi = &file.sections[1];
        assert_eq!(wifi.name, None);
        assert_eq!(wifi.comment.as_deref(), Some("hello"));
        assert_eq!(wifi.get("ssid"), Some("Para drop"));
        assert_eq!(wifi.get("key"), Some("it's"));
    }

    #[test]
    fn render_then_parse_is_stable() {
        let file = parse(SAMPLE).unwrap();
        let rendered = file.render();
        let again = parse(&rendered).unwrap();
        assert_eq!(again, file);
        assert_eq!(again.render(), rendered);
    }

    #[test]
    fn syntax_errors() {
        assert!(matches!(
            parse("option a b\n"),
            Err(UciError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            parse("config interface lan\n\toption proto 'static\n"),
            Err(UciError::Syntax { line: 2, .. })
        ));
        assert!(parse("config\n").is_err());
        assert!(parse("frobnicate x\n").is_err());
    }
}
