//! Outbound file naming
//!
//! Output patterns are plain text with `${...}` placeholders:
//!
//! | Placeholder       | Value                                        |
//! |-------------------|----------------------------------------------|
//! | `${ORIGINALNAME}` | name of the file the payload came from       |
//! | `${COUNT}`        | per-parser counter, starting at 1            |
//! | `${SYSTIME}`      | milliseconds since the Unix epoch            |
//! | `${DATE}`         | local time as `yyyyMMddHHmmss`               |
//! | `${DATE:<fmt>}`   | local time in a `chrono` strftime format     |
//! | `${UUID}`         | random UUID                                  |
//!
//! Unknown placeholders are kept verbatim.

use crate::helper::epoch_millis;
use chrono::Local;
use std::fmt::{Debug, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use uuid::Uuid;

/// Default layout of `${DATE}`
pub const DEFAULT_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

/// Computes the remote name of an outbound file
pub trait FilenameParser: Debug + Send + Sync {
    /// Name for a payload originally called `original`, following `pattern`
    ///
    /// Without a pattern the original name is used, or a generated one.
    fn get_filename(&self, original: Option<&str>, pattern: Option<&str>) -> String;
}

/// `${...}` template expansion
#[derive(Debug, Default)]
pub struct TemplateFilenameParser {
    count: AtomicU64,
}

impl TemplateFilenameParser {
    /// Create a parser with its counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    fn expand(&self, key: &str, original: Option<&str>) -> Option<String> {
        match key {
            "ORIGINALNAME" => Some(original.unwrap_or_default().to_string()),
            "COUNT" => Some((self.count.fetch_add(1, Ordering::SeqCst) + 1).to_string()),
            "SYSTIME" => Some(epoch_millis(SystemTime::now()).to_string()),
            "DATE" => Some(Local::now().format(DEFAULT_DATE_FORMAT).to_string()),
            "UUID" => Some(Uuid::new_v4().to_string()),
            _ => {
                let format = key.strip_prefix("DATE:")?;
                let mut value = String::new();
                // invalid strftime items make chrono's Display fail
                write!(value, "{}", Local::now().format(format)).ok()?;
                Some(value)
            }
        }
    }
}

impl FilenameParser for TemplateFilenameParser {
    fn get_filename(&self, original: Option<&str>, pattern: Option<&str>) -> String {
        let Some(pattern) = pattern else {
            return match original {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => format!("{}.dat", Uuid::new_v4()),
            };
        };

        let mut out = String::with_capacity(pattern.len());
        let mut rest = pattern;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let tail = &rest[start + 2..];
            let Some(end) = tail.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };
            match self.expand(&tail[..end], original) {
                Some(value) => out.push_str(&value),
                None => out.push_str(&rest[start..start + end + 3]),
            }
            rest = &tail[end + 1..];
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_pattern_uses_original() {
        let parser = TemplateFilenameParser::new();
        assert_eq!(parser.get_filename(Some("a.txt"), None), "a.txt");
        assert!(parser.get_filename(None, None).ends_with(".dat"));
    }

    #[test]
    fn test_original_name_and_count() {
        let parser = TemplateFilenameParser::new();
        assert_eq!(
            parser.get_filename(Some("a.txt"), Some("${ORIGINALNAME}.${COUNT}")),
            "a.txt.1"
        );
        assert_eq!(
            parser.get_filename(Some("a.txt"), Some("out-${COUNT}.csv")),
            "out-2.csv"
        );
    }

    #[test]
    fn test_dates_and_uuid() {
        let parser = TemplateFilenameParser::new();
        let name = parser.get_filename(None, Some("r_${DATE}.txt"));
        assert_eq!(name.len(), "r_.txt".len() + 14);

        let name = parser.get_filename(None, Some("${DATE:%Y}"));
        assert_eq!(name, Local::now().format("%Y").to_string());

        let name = parser.get_filename(None, Some("${UUID}"));
        assert!(Uuid::parse_str(&name).is_ok());

        let name = parser.get_filename(None, Some("${SYSTIME}"));
        assert!(name.parse::<u64>().is_ok());
    }

    #[test]
    fn test_unknown_and_unterminated_placeholders() {
        let parser = TemplateFilenameParser::new();
        assert_eq!(parser.get_filename(None, Some("x${NOPE}y")), "x${NOPE}y");
        assert_eq!(parser.get_filename(None, Some("x${DATE")), "x${DATE");
        assert_eq!(parser.get_filename(None, Some("${DATE:%Q}")), "${DATE:%Q}");
    }
}
