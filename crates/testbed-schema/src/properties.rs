use crate::ConfigError;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Flat key/value configuration read from a Java-style `.properties` file.
///
/// Supports `#`/`!` comments, `=`, `:` or whitespace separators, backslash
/// line continuation, and the usual escapes (`\t`, `\n`, `\r`, `\f`, `\\`,
/// `\uXXXX`). Later keys override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse properties text. `origin` only labels error messages.
    pub fn parse(input: &str, origin: &str) -> Result<Self, ConfigError> {
        let mut entries = BTreeMap::new();
        let mut lines = input.lines().enumerate();

        while let Some((idx, raw)) = lines.next() {
            let trimmed = raw.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                continue;
            }

            let line_no = idx + 1;
            let mut logical = trimmed.to_owned();
            while ends_with_continuation(&logical) {
                logical.pop();
                match lines.next() {
                    Some((_, next)) => logical.push_str(next.trim_start()),
                    None => break,
                }
            }

            let (key, value) = split_entry(&logical);
            let key = unescape(key).map_err(|reason| ConfigError::InvalidProperties {
                path: origin.to_owned(),
                line: line_no,
                reason,
            })?;
            let value = unescape(value).map_err(|reason| ConfigError::InvalidProperties {
                path: origin.to_owned(),
                line: line_no,
                reason,
            })?;
            entries.insert(key, value);
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Values of `prefix.0`, `prefix.1`, ... up to the first missing index.
    pub fn indexed(&self, prefix: &str) -> Vec<String> {
        (0..)
            .map_while(|i| self.get(&format!("{prefix}.{i}")).map(str::to_owned))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn ends_with_continuation(line: &str) -> bool {
    let slashes = line.bytes().rev().take_while(|b| *b == b'\\').count();
    slashes % 2 == 1
}

fn split_entry(line: &str) -> (&str, &str) {
    let bytes = line.as_bytes();
    let mut i = 0;
    let mut key_end = line.len();
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'=' | b':' | b' ' | b'\t' | b'\x0c' => {
                key_end = i;
                break;
            }
            _ => i += 1,
        }
    }
    if key_end >= line.len() {
        return (line, "");
    }

    let rest = line[key_end..].trim_start_matches([' ', '\t', '\x0c']);
    let rest = rest
        .strip_prefix('=')
        .or_else(|| rest.strip_prefix(':'))
        .unwrap_or(rest);
    (&line[..key_end], rest.trim_start_matches([' ', '\t', '\x0c']))
}

fn unescape(s: &str) -> Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .ok_or_else(|| format!("malformed \\u escape: \\u{hex}"))?;
                let ch = char::from_u32(code)
                    .ok_or_else(|| format!("invalid unicode escape: \\u{hex}"))?;
                out.push(ch);
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_separators_and_comments() {
        let props = Properties::parse(
            "# comment\n! also comment\n\na=1\nb : 2\nc 3\n  d=  spaced value  \n",
            "test",
        )
        .unwrap();
        assert_eq!(props.get("a"), Some("1"));
        assert_eq!(props.get("b"), Some("2"));
        assert_eq!(props.get("c"), Some("3"));
        assert_eq!(props.get("d"), Some("spaced value  "));
        assert_eq!(props.len(), 4);
    }

    #[test]
    fn continuation_lines_are_joined() {
        let props = Properties::parse("url=jdbc:mysql://\\\n    localhost:3306/\n", "test").unwrap();
        assert_eq!(props.get("url"), Some("jdbc:mysql://localhost:3306/"));
    }

    #[test]
    fn escaped_backslash_is_not_continuation() {
        let props = Properties::parse("path=C:\\\\data\\\\\nnext=x\n", "test").unwrap();
        assert_eq!(props.get("path"), Some("C:\\data\\"));
        assert_eq!(props.get("next"), Some("x"));
    }

    #[test]
    fn escapes_in_keys_and_values() {
        let props = Properties::parse("my\\ key=tab\\there\ngreek=\\u03b1\n", "test").unwrap();
        assert_eq!(props.get("my key"), Some("tab\there"));
        assert_eq!(props.get("greek"), Some("\u{3b1}"));
    }

    #[test]
    fn malformed_unicode_escape_is_error() {
        let err = Properties::parse("a=1\nbad=\\u12\n", "db.properties").unwrap_err();
        match err {
            ConfigError::InvalidProperties { line, path, .. } => {
                assert_eq!(line, 2);
                assert_eq!(path, "db.properties");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn key_without_value() {
        let props = Properties::parse("flag\n", "test").unwrap();
        assert!(props.contains_key("flag"));
        assert_eq!(props.get("flag"), Some(""));
    }

    #[test]
    fn later_keys_override() {
        let props = Properties::parse("k=1\nk=2\n", "test").unwrap();
        assert_eq!(props.get("k"), Some("2"));
    }

    #[test]
    fn indexed_stops_at_first_gap() {
        let props =
            Properties::parse("testDataPath.0=/a\ntestDataPath.1=/b\ntestDataPath.3=/d\n", "t")
                .unwrap();
        assert_eq!(props.indexed("testDataPath"), vec!["/a", "/b"]);
        assert!(props.indexed("missing").is_empty());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.properties");
        fs::write(&path, "pool.setup.dbName=sandbox\n").unwrap();
        let props = Properties::load(&path).unwrap();
        assert_eq!(props.get("pool.setup.dbName"), Some("sandbox"));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Properties::load(&dir.path().join("nope.properties")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
