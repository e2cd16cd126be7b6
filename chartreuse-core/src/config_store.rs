//! In-place rewriting of connection strings in the migration tools' ini files.
//!
//! Several databases usually share one multi-section `alembic.ini`. Only the target
//! section's connection key is touched; every other byte of the file is preserved.
//! Writers take `&mut self`, so whoever owns the store serializes all rewrites.

use crate::error::{ChartreuseError, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// Key holding the database URL in an alembic section
pub const ALEMBIC_URL_KEY: &str = "sqlalchemy.url";

/// Key holding the cluster URLs in an eslembic section
pub const ESLEMBIC_URL_KEY: &str = "elasticsearch_urls";

/// Where the migration tools read their connection strings from
#[cfg_attr(test, mockall::automock)]
pub trait ConfigurationStore: Send {
    /// Point `section` of `file` at `url`
    fn set_connection_string(&mut self, file: &Path, section: &str, url: &str) -> Result<()>;
}

/// Rewrites one key inside ini files on disk
#[derive(Debug, Clone)]
pub struct IniFileStore {
    key: String,
}

impl IniFileStore {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Store for alembic's `sqlalchemy.url`
    pub fn alembic() -> Self {
        Self::new(ALEMBIC_URL_KEY)
    }

    /// Store for eslembic's `elasticsearch_urls`
    pub fn eslembic() -> Self {
        Self::new(ESLEMBIC_URL_KEY)
    }
}

impl ConfigurationStore for IniFileStore {
    fn set_connection_string(&mut self, file: &Path, section: &str, url: &str) -> Result<()> {
        let content = fs::read_to_string(file).map_err(|e| {
            ChartreuseError::config(format!(
                "Could not read migration tool configuration {}: {}",
                file.display(),
                e
            ))
        })?;

        let rewritten = rewrite_section_key(&content, section, &self.key, &escape_interpolation(url))
            .map_err(|e| ChartreuseError::config(format!("{} in {}", e, file.display())))?;

        fs::write(file, rewritten)?;
        info!(
            file = %file.display(),
            section = %section,
            key = %self.key,
            "Connection string updated"
        );
        Ok(())
    }
}

/// ConfigParser treats `%` as interpolation syntax
fn escape_interpolation(value: &str) -> String {
    value.replace('%', "%%")
}

/// Replace `key` inside `[section]`, leaving all other lines untouched
pub fn rewrite_section_key(
    content: &str,
    section: &str,
    key: &str,
    value: &str,
) -> std::result::Result<String, String> {
    let mut output = String::with_capacity(content.len() + value.len());
    let mut in_section = false;
    let mut section_found = false;
    let mut replaced = 0usize;

    for line in content.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);
        let trimmed = body.trim();

        if let Some(name) = section_header(trimmed) {
            in_section = name == section;
            section_found |= in_section;
            output.push_str(line);
            continue;
        }

        if in_section && is_key_line(trimmed, key) {
            let indent = &body[..body.len() - body.trim_start().len()];
            output.push_str(indent);
            output.push_str(key);
            output.push_str(" = ");
            output.push_str(value);
            output.push_str(ending);
            replaced += 1;
            continue;
        }

        output.push_str(line);
    }

    if !section_found {
        return Err(format!("Section [{}] not found", section));
    }
    if replaced == 0 {
        return Err(format!("No `{}` key found in section [{}]", key, section));
    }
    Ok(output)
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

fn section_header(trimmed: &str) -> Option<&str> {
    trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

fn is_key_line(trimmed: &str, key: &str) -> bool {
    trimmed
        .strip_prefix(key)
        .map(|rest| {
            let rest = rest.trim_start();
            rest.starts_with('=') || rest.starts_with(':')
        })
        .unwrap_or(false)
}
