//! Minimal ini reader: `[section]` headers, `key = value` entries, `;` and `#`
//! comments, optional double quotes around values and `\` line continuation.

use std::path::Path;

use crate::error::{DbcopyError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniEntry {
    pub section: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniFile {
    entries: Vec<IniEntry>,
}

impl IniFile {
    /// # Errors
    /// Returns `Io` when the file cannot be read.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| DbcopyError::Io(format!("failed to read ini file {}: {err}", path.display())))?;
        Self::parse(&text)
    }

    /// # Errors
    /// Returns `Syntax` for a line that is neither a section, an entry nor a comment.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut entries = Vec::new();
        let mut section = String::new();
        let mut pending: Option<IniEntry> = None;

        for (line_no, raw) in text.lines().enumerate() {
            if let Some(mut entry) = pending.take() {
                let line = raw.trim();
                if let Some(head) = line.strip_suffix('\\') {
                    entry.value.push_str(head);
                    pending = Some(entry);
                } else {
                    entry.value.push_str(line);
                    entry.value = unquote(&entry.value);
                    entries.push(entry);
                }
                continue;
            }

            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| {
                    DbcopyError::syntax(format!("ini line {}: unterminated section header", line_no + 1))
                })?;
                section = name.trim().to_string();
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(DbcopyError::syntax(format!(
                    "ini line {}: expected key = value",
                    line_no + 1
                )));
            };
            let value = strip_comment(value.trim());
            let entry = IniEntry {
                section: section.clone(),
                key: key.trim().to_string(),
                value: String::new(),
            };
            if let Some(head) = value.strip_suffix('\\') {
                pending = Some(IniEntry { value: head.to_string(), ..entry });
            } else {
                entries.push(IniEntry { value: unquote(value), ..entry });
            }
        }
        if let Some(mut entry) = pending {
            entry.value = unquote(&entry.value);
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    /// Section and key names compare case-insensitively.
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.section.eq_ignore_ascii_case(section) && e.key.eq_ignore_ascii_case(key))
            .map(|e| e.value.as_str())
    }

    pub fn section<'a>(&'a self, section: &'a str) -> impl Iterator<Item = &'a IniEntry> + 'a {
        self.entries.iter().filter(move |e| e.section.eq_ignore_ascii_case(section))
    }

    #[must_use]
    pub fn sections(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for e in &self.entries {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&e.section)) {
                names.push(&e.section);
            }
        }
        names
    }

    #[must_use]
    pub fn entries(&self) -> &[IniEntry] {
        &self.entries
    }
}

fn strip_comment(value: &str) -> &str {
    if value.starts_with('"') {
        return value;
    }
    match value.find(" ;").or_else(|| value.find(" #")) {
        Some(pos) => value[..pos].trim_end(),
        None => value,
    }
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_comments_and_quotes() -> anyhow::Result<()> {
        let ini = IniFile::parse(
            "; leading comment\n[Test]\nSrc_1 = Expr0 + 1\nName = \"a ; b\"\n\n[dbcopy]\nmodelName = modelOne ; trailing\n",
        )?;
        assert_eq!(ini.get("test", "src_1"), Some("Expr0 + 1"));
        assert_eq!(ini.get("Test", "Name"), Some("a ; b"));
        assert_eq!(ini.get("dbcopy", "modelName"), Some("modelOne"));
        assert_eq!(ini.get("dbcopy", "missing"), None);
        assert_eq!(ini.sections(), vec!["Test", "dbcopy"]);
        Ok(())
    }

    #[test]
    fn joins_continuation_lines() -> anyhow::Result<()> {
        let ini = IniFile::parse("[s]\nk = SELECT a,\\\n  b FROM t\nnext = 1\n")?;
        assert_eq!(ini.get("s", "k"), Some("SELECT a,b FROM t"));
        assert_eq!(ini.get("s", "next"), Some("1"));
        Ok(())
    }

    #[test]
    fn rejects_garbage_line() {
        assert!(IniFile::parse("[s]\nnot an entry\n").is_err());
        assert!(IniFile::parse("[s\n").is_err());
    }
}
