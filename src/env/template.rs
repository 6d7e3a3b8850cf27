//! `$VAR` / `${VAR}` substitution shared by env files and compose documents.

use thiserror::Error;

use crate::error::{DockerizedError, Result};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TemplateError(pub String);

/// A string split into literal text and variable placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Placeholder {
    name: String,
    modifier: Modifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Modifier {
    None,
    /// `${VAR:-default}` (when_empty) or `${VAR-default}`
    Default { value: Template, when_empty: bool },
    /// `${VAR:?message}` (when_empty) or `${VAR?message}`
    Required { message: String, when_empty: bool },
}

impl Template {
    pub fn parse(input: &str) -> std::result::Result<Self, TemplateError> {
        let chars: Vec<char> = input.chars().collect();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < chars.len() {
            if chars[i] != '$' {
                literal.push(chars[i]);
                i += 1;
                continue;
            }

            match chars.get(i + 1) {
                Some('$') => {
                    literal.push('$');
                    i += 2;
                }
                Some('{') => {
                    let close = find_closing_brace(&chars, i + 2).ok_or_else(|| {
                        TemplateError(format!("unterminated variable reference in '{}'", input))
                    })?;
                    let body: String = chars[i + 2..close].iter().collect();
                    flush(&mut segments, &mut literal);
                    segments.push(Segment::Variable(Self::parse_braced(&body)?));
                    i = close + 1;
                }
                Some(c) if is_name_start(*c) => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && is_name_char(chars[end]) {
                        end += 1;
                    }
                    flush(&mut segments, &mut literal);
                    segments.push(Segment::Variable(Placeholder {
                        name: chars[start..end].iter().collect(),
                        modifier: Modifier::None,
                    }));
                    i = end;
                }
                _ => {
                    literal.push('$');
                    i += 1;
                }
            }
        }
        flush(&mut segments, &mut literal);

        Ok(Self { segments })
    }

    fn parse_braced(body: &str) -> std::result::Result<Placeholder, TemplateError> {
        let name_len = body.chars().take_while(|c| is_name_char(*c)).count();
        let (name, rest) = body.split_at(name_len);

        if name.is_empty() || !name.starts_with(is_name_start) {
            return Err(TemplateError(format!("invalid variable name in '${{{}}}'", body)));
        }

        let modifier = if rest.is_empty() {
            Modifier::None
        } else if let Some(value) = rest.strip_prefix(":-") {
            Modifier::Default { value: Template::parse(value)?, when_empty: true }
        } else if let Some(value) = rest.strip_prefix('-') {
            Modifier::Default { value: Template::parse(value)?, when_empty: false }
        } else if let Some(message) = rest.strip_prefix(":?") {
            Modifier::Required { message: message.to_string(), when_empty: true }
        } else if let Some(message) = rest.strip_prefix('?') {
            Modifier::Required { message: message.to_string(), when_empty: false }
        } else {
            return Err(TemplateError(format!("invalid variable reference '${{{}}}'", body)));
        };

        Ok(Placeholder { name: name.to_string(), modifier })
    }

    /// Names of all referenced variables, in order of appearance, including
    /// those inside default values.
    pub fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        for segment in &self.segments {
            if let Segment::Variable(placeholder) = segment {
                names.push(placeholder.name.clone());
                if let Modifier::Default { value, .. } = &placeholder.modifier {
                    names.extend(value.variables());
                }
            }
        }
        names
    }

    /// Renders the template, asking `lookup` for each variable value.
    pub fn render<F>(&self, lookup: &mut F) -> Result<String>
    where
        F: FnMut(&str) -> Result<Option<String>>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(placeholder) => {
                    out.push_str(&placeholder.render(lookup)?);
                }
            }
        }
        Ok(out)
    }
}

impl Placeholder {
    fn render<F>(&self, lookup: &mut F) -> Result<String>
    where
        F: FnMut(&str) -> Result<Option<String>>,
    {
        let value = lookup(&self.name)?;
        match &self.modifier {
            Modifier::None => Ok(value.unwrap_or_default()),
            Modifier::Default { value: default, when_empty } => match value {
                Some(v) if !(*when_empty && v.is_empty()) => Ok(v),
                _ => default.render(lookup),
            },
            Modifier::Required { message, when_empty } => match value {
                Some(v) if !(*when_empty && v.is_empty()) => Ok(v),
                _ => Err(DockerizedError::InvalidConfiguration(format!(
                    "required variable {} is missing a value: {}",
                    self.name, message
                ))),
            },
        }
    }
}

fn flush(segments: &mut Vec<Segment>, literal: &mut String) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(literal)));
    }
}

fn find_closing_brace(chars: &[char], from: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = from;
    while i < chars.len() {
        match chars[i] {
            '$' if chars.get(i + 1) == Some(&'{') => {
                depth += 1;
                i += 2;
                continue;
            }
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    None
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Collects the variable names referenced by `value`. Malformed references
/// are ignored.
pub fn referenced_variables(value: &str) -> Vec<String> {
    Template::parse(value).map(|t| t.variables()).unwrap_or_default()
}
