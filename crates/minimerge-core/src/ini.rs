//! Minimal reader/writer for the INI dialect minibuilds are written in.
//!
//! Follows the `ConfigParser` rules minibuild authors rely on: keys are
//! case-insensitive, `=` or `:` separate keys from values, indented lines
//! continue the previous value and `#`/`;` start comment lines.

use std::collections::BTreeMap;

use thiserror::Error;

/// A syntax error in an INI document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct IniError {
    /// 1-based line number.
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

/// Key/value pairs of one section, keys lowercased.
pub type Section = BTreeMap<String, String>;

/// A parsed INI document.
#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    sections: Vec<(String, Section)>,
}

impl IniDocument {
    /// Parse `content`.
    ///
    /// # Errors
    ///
    /// Returns an [`IniError`] for a key before any section header, an
    /// unterminated header or a line that is neither a key nor a
    /// continuation.
    pub fn parse(content: &str) -> Result<Self, IniError> {
        let mut doc = Self::default();
        let mut last_key: Option<String> = None;

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end_matches('\r');
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            if line.starts_with([' ', '\t']) {
                let (Some(key), Some((_, section))) = (&last_key, doc.sections.last_mut()) else {
                    return Err(IniError {
                        line: line_no,
                        message: "continuation line without a key".to_string(),
                    });
                };
                if let Some(value) = section.get_mut(key) {
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    value.push_str(trimmed);
                }
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                let Some(name) = rest.strip_suffix(']') else {
                    return Err(IniError {
                        line: line_no,
                        message: format!("unterminated section header: {trimmed}"),
                    });
                };
                doc.sections.push((name.trim().to_string(), Section::new()));
                last_key = None;
                continue;
            }

            let Some((key, value)) = split_key_value(trimmed) else {
                return Err(IniError {
                    line: line_no,
                    message: format!("expected 'key = value', got: {trimmed}"),
                });
            };
            let Some((_, section)) = doc.sections.last_mut() else {
                return Err(IniError {
                    line: line_no,
                    message: "key outside of any section".to_string(),
                });
            };
            let key = key.to_lowercase();
            section.insert(key.clone(), value.to_string());
            last_key = Some(key);
        }

        Ok(doc)
    }

    /// The section named `name`, if present. Repeated sections are merged,
    /// later keys winning.
    pub fn section(&self, name: &str) -> Option<Section> {
        let mut found: Option<Section> = None;
        for (section_name, values) in &self.sections {
            if section_name == name {
                found
                    .get_or_insert_with(Section::new)
                    .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        found
    }
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let pos = line.find(['=', ':'])?;
    let key = line[..pos].trim();
    if key.is_empty() {
        return None;
    }
    Some((key, line[pos + 1..].trim()))
}

/// Set `key` to `value` inside `[section]` of `content`, keeping every other
/// line (comments included) untouched.
///
/// An existing key is replaced together with its continuation lines; a
/// missing key is appended at the end of the section; a missing section is
/// appended at the end of the document.
pub fn set_value(content: &str, section: &str, key: &str, value: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let new_line = format!("{key} = {value}");
    let key_lower = key.to_lowercase();

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 2);
    let mut in_section = false;
    let mut seen_section = false;
    let mut written = false;
    let mut skipping_continuation = false;
    // Index in `out` after the last meaningful line of the target section.
    let mut insert_at: Option<usize> = None;

    for line in &lines {
        let trimmed = line.trim();

        if skipping_continuation {
            if line.starts_with([' ', '\t']) && !trimmed.is_empty() {
                continue;
            }
            skipping_continuation = false;
        }

        if let Some(rest) = trimmed.strip_prefix('[') {
            if in_section && !written {
                insert_at.get_or_insert(out.len());
            }
            in_section = rest.strip_suffix(']').is_some_and(|n| n.trim() == section);
            seen_section |= in_section;
            out.push((*line).to_string());
            if in_section {
                insert_at = Some(out.len());
            }
            continue;
        }

        if in_section && !written {
            if let Some((k, _)) = split_key_value(trimmed) {
                if !line.starts_with([' ', '\t']) && k.to_lowercase() == key_lower {
                    out.push(new_line.clone());
                    written = true;
                    skipping_continuation = true;
                    continue;
                }
            }
            if !trimmed.is_empty() {
                out.push((*line).to_string());
                insert_at = Some(out.len());
                continue;
            }
        }

        out.push((*line).to_string());
    }

    if !written {
        if seen_section {
            let at = insert_at.unwrap_or(out.len());
            out.insert(at, new_line);
        } else {
            if out.last().is_some_and(|l| !l.trim().is_empty()) {
                out.push(String::new());
            }
            out.push(format!("[{section}]"));
            out.push(new_line);
        }
    }

    let mut text = out.join("\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_section() {
        let doc = IniDocument::parse(
            "# comment\n[minibuild]\ndependencies = a b\nCategory: eggs\nsrc_uri = http://x/y\n",
        )
        .unwrap();
        let section = doc.section("minibuild").unwrap();
        assert_eq!(section["dependencies"], "a b");
        assert_eq!(section["category"], "eggs");
        assert_eq!(section["src_uri"], "http://x/y");
        assert!(doc.section("other").is_none());
    }

    #[test]
    fn test_parse_continuation_lines() {
        let doc = IniDocument::parse("[minibuild]\ndependencies = a\n    b\n\tc\nrevision = 2\n")
            .unwrap();
        let section = doc.section("minibuild").unwrap();
        assert_eq!(section["dependencies"], "a\nb\nc");
        assert_eq!(section["revision"], "2");
    }

    #[test]
    fn test_parse_errors() {
        let err = IniDocument::parse("key = value\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(IniDocument::parse("[minibuild\n").is_err());
        assert!(IniDocument::parse("[minibuild]\njust words\n").is_err());
    }

    #[test]
    fn test_set_value_replaces_existing_key() {
        let content = "[minibuild]\n# keep me\ndependencies = a\n    b\nrevision = 1\n";
        let updated = set_value(content, "minibuild", "dependencies", "c d");
        assert_eq!(
            updated,
            "[minibuild]\n# keep me\ndependencies = c d\nrevision = 1\n"
        );
    }

    #[test]
    fn test_set_value_appends_missing_key_to_section() {
        let content = "[minibuild]\ndependencies = a\n\n[other]\nx = 1\n";
        let updated = set_value(content, "minibuild", "revision", "3");
        let doc = IniDocument::parse(&updated).unwrap();
        assert_eq!(doc.section("minibuild").unwrap()["revision"], "3");
        assert!(!doc.section("other").unwrap().contains_key("revision"));
    }

    #[test]
    fn test_set_value_creates_section() {
        let updated = set_value("[other]\nx = 1\n", "minibuild", "revision", "1");
        let doc = IniDocument::parse(&updated).unwrap();
        assert_eq!(doc.section("minibuild").unwrap()["revision"], "1");
    }
}
