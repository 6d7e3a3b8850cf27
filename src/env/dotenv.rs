use std::fs;
use std::path::{Path, PathBuf};

use crate::env::template::Template;
use crate::error::{DockerizedError, Result};

/// A single `KEY=VALUE` line of an override file.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub key: String,
    pub value: Template,
}

/// Parsed `dockerized.env` style file. Values are kept unexpanded until the
/// layers are resolved.
#[derive(Debug, Clone)]
pub struct EnvFile {
    pub path: PathBuf,
    pub assignments: Vec<Assignment>,
}

impl EnvFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| DockerizedError::EnvFile {
            path: path.to_path_buf(),
            line: 0,
            message: format!("cannot read file: {}", e),
        })?;
        Self::from_string(path, &content)
    }

    pub fn from_string(path: &Path, content: &str) -> Result<Self> {
        let mut assignments = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            let line_num = line_num + 1;
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let assignment = Self::parse_line(trimmed).map_err(|message| DockerizedError::EnvFile {
                path: path.to_path_buf(),
                line: line_num,
                message,
            })?;
            assignments.push(assignment);
        }

        Ok(Self {
            path: path.to_path_buf(),
            assignments,
        })
    }

    fn parse_line(line: &str) -> std::result::Result<Assignment, String> {
        let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

        let (key, raw_value) = line
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", line))?;
        let key = key.trim();

        let valid_key = key.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !valid_key {
            return Err(format!("invalid variable name '{}'", key));
        }

        let value = Self::parse_value(raw_value.trim())?;

        Ok(Assignment {
            key: key.to_string(),
            value,
        })
    }

    fn parse_value(raw: &str) -> std::result::Result<Template, String> {
        if let Some(rest) = raw.strip_prefix('\'') {
            let end = rest
                .find('\'')
                .ok_or_else(|| "unterminated single-quoted value".to_string())?;
            // Single quotes are literal: escape '$' so nothing is substituted.
            let literal = rest[..end].replace('$', "$$");
            return Template::parse(&literal).map_err(|e| e.to_string());
        }

        if let Some(rest) = raw.strip_prefix('"') {
            let mut value = String::new();
            let mut chars = rest.chars();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some('"') => value.push('"'),
                        Some('\\') => value.push('\\'),
                        Some(other) => {
                            value.push('\\');
                            value.push(other);
                        }
                        None => value.push('\\'),
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err("unterminated double-quoted value".to_string());
            }
            return Template::parse(&value).map_err(|e| e.to_string());
        }

        let unquoted = match raw.find(" #") {
            Some(pos) => raw[..pos].trim_end(),
            None => raw,
        };
        Template::parse(unquoted).map_err(|e| e.to_string())
    }

    pub fn get(&self, key: &str) -> Option<&Template> {
        self.assignments
            .iter()
            .rev()
            .find(|a| a.key == key)
            .map(|a| &a.value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.assignments.iter().map(|a| a.key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn literal(env: &EnvFile, key: &str) -> String {
        env.get(key)
            .unwrap()
            .render(&mut |_: &str| Ok(None))
            .unwrap()
    }

    #[test]
    fn test_parse_simple_assignments() {
        let content = "# versions\nGO_VERSION=1.18\n\nexport NODE_VERSION=18.4.0\n";
        let env = EnvFile::from_string(Path::new("test.env"), content).unwrap();
        assert_eq!(env.assignments.len(), 2);
        assert_eq!(literal(&env, "GO_VERSION"), "1.18");
        assert_eq!(literal(&env, "NODE_VERSION"), "18.4.0");
    }

    #[test]
    fn test_quoted_values() {
        let content = r#"
DOUBLE="a b\tc"
SINGLE='${NOT_EXPANDED}'
INLINE=value # trailing comment
HASH="keep # this"
"#;
        let env = EnvFile::from_string(Path::new("test.env"), content).unwrap();
        assert_eq!(literal(&env, "DOUBLE"), "a b\tc");
        assert_eq!(literal(&env, "SINGLE"), "${NOT_EXPANDED}");
        assert_eq!(literal(&env, "INLINE"), "value");
        assert_eq!(literal(&env, "HASH"), "keep # this");
    }

    #[test]
    fn test_substitution_is_deferred() {
        let env = EnvFile::from_string(
            Path::new("test.env"),
            r#"COMPOSE_FILE="${COMPOSE_FILE};${HOME}/docker-compose.yml""#,
        )
        .unwrap();
        let template = env.get("COMPOSE_FILE").unwrap();
        assert_eq!(template.variables(), vec!["COMPOSE_FILE", "HOME"]);
    }

    #[test]
    fn test_last_assignment_wins() {
        let env = EnvFile::from_string(Path::new("test.env"), "A=1\nA=2\n").unwrap();
        assert_eq!(literal(&env, "A"), "2");
    }

    #[test]
    fn test_missing_equals_reports_line() {
        let err = EnvFile::from_string(Path::new("bad.env"), "A=1\nNOT AN ASSIGNMENT\n").unwrap_err();
        match err {
            DockerizedError::EnvFile { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_key() {
        assert!(EnvFile::from_string(Path::new("bad.env"), "1ABC=x").is_err());
        assert!(EnvFile::from_string(Path::new("bad.env"), "=x").is_err());
    }

    #[test]
    fn test_unterminated_quotes() {
        assert!(EnvFile::from_string(Path::new("bad.env"), "A=\"open").is_err());
        assert!(EnvFile::from_string(Path::new("bad.env"), "A='open").is_err());
    }

    #[test]
    fn test_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dockerized.env");
        std::fs::write(&path, "PROTOC_VERSION=3.8.0\n").unwrap();

        let env = EnvFile::from_file(&path).unwrap();
        assert_eq!(env.path, path);
        assert_eq!(env.keys().collect::<Vec<_>>(), vec!["PROTOC_VERSION"]);
    }
}
