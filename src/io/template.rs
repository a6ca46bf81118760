use crate::types::{ClosureError, ClosureResult};
use std::collections::BTreeMap;
use std::path::Path;

/// Read a `key = value  # comment` template file.
///
/// Blank lines and lines starting with `#` or `%` are skipped; values keep
/// their inner spaces but lose surrounding quotes.
pub fn read_template<P: AsRef<Path>>(path: P) -> ClosureResult<BTreeMap<String, String>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    log::info!("read options from template file: {}", path.as_ref().display());
    parse_template(&text)
}

pub fn parse_template(text: &str) -> ClosureResult<BTreeMap<String, String>> {
    let mut options = BTreeMap::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
            continue;
        }
        let content = line.split('#').next().unwrap_or("").trim();
        let (key, value) = content.split_once('=').ok_or_else(|| {
            ClosureError::InvalidFormat(format!("Template line {} has no '=': {}", line_no + 1, line))
        })?;
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        if !value.is_empty() {
            options.insert(key.trim().to_string(), value.to_string());
        }
    }
    Ok(options)
}

/// Template value with `auto` mapped to `None`
pub fn non_auto<'a>(options: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    options
        .get(key)
        .map(|v| v.as_str())
        .filter(|v| !v.eq_ignore_ascii_case("auto"))
}

/// Parse yes/no style template flags
pub fn parse_flag(value: &str) -> ClosureResult<bool> {
    match value.to_lowercase().as_str() {
        "yes" | "true" | "y" | "on" | "1" => Ok(true),
        "no" | "false" | "n" | "off" | "0" => Ok(false),
        other => Err(ClosureError::InvalidFormat(format!("Invalid yes/no value: {}", other))),
    }
}
