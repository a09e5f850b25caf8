use crate::error::MemoryError;
use tdbm_api::{DriverError, Params, TemplateEngine, Value};

/// Expands named placeholders into SQL literals.
///
/// - `:name` is replaced by the literal of parameter `name`; a missing
///   parameter is an error. Placeholders inside single-quoted strings and
///   `::` casts are left alone.
/// - `[[ ... ]]` marks an optional section, kept only when every parameter
///   it references is supplied. This lets one template serve filters whose
///   parameters are optional.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamedTemplateEngine;

impl NamedTemplateEngine {
    pub fn expand(&self, template: &str, params: &Params) -> crate::Result<String> {
        let resolved = strip_optional_sections(template, params)?;
        substitute(&resolved, params)
    }
}

impl TemplateEngine for NamedTemplateEngine {
    fn build(&self, template: &str, params: &Params) -> Result<String, DriverError> {
        Ok(self.expand(template, params)?)
    }
}

fn strip_optional_sections(template: &str, params: &Params) -> crate::Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut consumed = 0;

    while let Some(open) = rest.find("[[") {
        if let Some(stray) = rest[..open].find("]]") {
            return Err(MemoryError::UnbalancedSection(consumed + stray));
        }
        let body_start = open + 2;
        let close = rest[body_start..]
            .find("]]")
            .map(|i| body_start + i)
            .ok_or(MemoryError::UnbalancedSection(consumed + open))?;
        let body = &rest[body_start..close];
        if body.contains("[[") {
            return Err(MemoryError::UnbalancedSection(consumed + open));
        }

        out.push_str(&rest[..open]);
        if placeholders(body).iter().all(|p| params.contains(p.name)) {
            out.push_str(body);
        }
        consumed += close + 2;
        rest = &rest[close + 2..];
    }

    if let Some(stray) = rest.find("]]") {
        return Err(MemoryError::UnbalancedSection(consumed + stray));
    }
    out.push_str(rest);
    Ok(out)
}

fn substitute(sql: &str, params: &Params) -> crate::Result<String> {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for p in placeholders(sql) {
        let value = params
            .get(p.name)
            .ok_or_else(|| MemoryError::MissingParameter(p.name.to_string()))?;
        out.push_str(&sql[last..p.start]);
        out.push_str(&literal(value));
        last = p.end;
    }
    out.push_str(&sql[last..]);
    Ok(out)
}

struct Placeholder<'a> {
    start: usize,
    end: usize,
    name: &'a str,
}

fn placeholders(sql: &str) -> Vec<Placeholder<'_>> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b':' if !in_quote => {
                if bytes.get(i + 1) == Some(&b':') {
                    i += 2;
                    continue;
                }
                let start = i;
                let mut end = i + 1;
                if bytes.get(end).is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') {
                    while bytes.get(end).is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_') {
                        end += 1;
                    }
                    found.push(Placeholder {
                        start,
                        end,
                        name: &sql[start + 1..end],
                    });
                    i = end;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    found
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(i) | Value::DateTime(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Bytes(_) => format!("X'{value}'"),
    }
}
