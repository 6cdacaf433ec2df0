//! `key=value` property files.

use std::{fmt::Write as _, fs, path::Path};

use crate::error::Result;

/// Ordered property mapping.
///
/// Setting an existing key replaces its value but keeps the position of the
/// first insertion, so merging several files keeps the order in which keys
/// first appeared while the last file wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    items: Vec<(String, String)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses property text.
    ///
    /// Blank lines and lines starting with `#` or `//` are ignored. Keys and
    /// values are trimmed; lines without `=` are skipped with a warning.
    pub fn parse(text: &str) -> Self {
        let mut props = Self::new();
        props.merge_text(text);
        props
    }

    /// Reads and merges every existing file in `paths`, in order.
    ///
    /// Missing files are skipped with a warning.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut props = Self::new();
        for path in paths {
            let path = path.as_ref();
            if !path.is_file() {
                warn!("NVRAM: property file {} not found, skipped", path.display());
                continue;
            }
            info!("NVRAM: process property file {}", path.display());
            props.merge_text(&fs::read_to_string(path)?);
        }
        Ok(props)
    }

    fn merge_text(&mut self, text: &str) {
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    self.set(key.trim(), value.trim());
                }
                _ => warn!("NVRAM: line {}: `{line}` is not a property", lineno + 1),
            }
        }
    }

    /// Inserts or replaces a property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.items.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.items.push((key, value)),
        }
    }

    /// Merges `other` into `self`; values of `other` win.
    pub fn merge(&mut self, other: &Properties) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serializes the mapping back to `key=value` lines.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for (key, value) in self.iter() {
            let _ = writeln!(text, "{key}={value}");
        }
        text
    }

    /// Writes the mapping as a property file.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_text())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let props = Properties::parse(
            "# comment\n\
             // another comment\n\
             \n\
             BT_NAME = speaker \n\
             ota.ver=1.0=rc\n\
             broken line\n\
             =novalue\n",
        );
        let items: Vec<_> = props.iter().collect();
        assert_eq!(items, [("BT_NAME", "speaker"), ("ota.ver", "1.0=rc")]);
    }

    #[test]
    fn test_merge_keeps_first_position() {
        let mut base = Properties::parse("a=1\nb=2\nc=3\n");
        base.merge(&Properties::parse("b=20\nd=4\n"));
        let items: Vec<_> = base.iter().collect();
        assert_eq!(items, [("a", "1"), ("b", "20"), ("c", "3"), ("d", "4")]);
        assert_eq!(base.get("b"), Some("20"));
        assert_eq!(base.get("x"), None);
    }

    #[test]
    fn test_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("defcfg.prop");
        let second = dir.path().join("board.prop");
        fs::write(&first, "name=a\nvol=3\n").unwrap();
        fs::write(&second, "name=b\n").unwrap();

        let props =
            Properties::from_files(&[first, dir.path().join("missing.prop"), second]).unwrap();
        assert_eq!(props.to_text(), "name=b\nvol=3\n");

        let out = dir.path().join("nvram.prop");
        props.write_to(&out).unwrap();
        assert_eq!(Properties::parse(&fs::read_to_string(out).unwrap()), props);
    }
}
