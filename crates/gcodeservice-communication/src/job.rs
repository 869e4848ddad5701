//! Job file producer
//!
//! Loads a G-code file and yields `(line, attributes)` pairs together with
//! static file information used for progress accounting.

use chrono::{DateTime, Utc};
use gcodeservice_core::JobFileError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pause and resume codes handled by the engine; never sent, never acknowledged
pub const INTERCEPTED_CODES: &[&str] = &["M24", "M25"];

/// Whether the first word of `code` is handled by the engine itself
pub fn is_intercepted(code: &str) -> bool {
    code.split_whitespace()
        .next()
        .is_some_and(|word| INTERCEPTED_CODES.iter().any(|c| c.eq_ignore_ascii_case(word)))
}

/// Static information about a job file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    /// File name as requested
    pub filename: String,
    /// Number of lines including blanks and comments
    pub line_count: usize,
    /// Number of lines that will be sent to the firmware and acknowledged
    pub gcode_line_count: usize,
    /// Number of `;LAYER:` markers
    pub layer_count: usize,
    /// When the file was loaded
    pub opened_at: DateTime<Utc>,
}

/// Attributes of a single job file line
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineAttributes {
    /// 1-based line number
    pub line_number: usize,
    /// Whether the whole line is a comment
    pub is_comment: bool,
    /// Comment text, for comment lines or trailing `;` comments
    pub comment: Option<String>,
    /// Layer in effect at this line
    pub layer: Option<u32>,
}

#[derive(Debug, Clone)]
struct JobLine {
    code: String,
    attrs: LineAttributes,
}

/// A loaded job file
#[derive(Debug, Clone)]
pub struct GcodeFile {
    info: JobInfo,
    lines: Vec<JobLine>,
}

impl GcodeFile {
    /// Load and classify a file from disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JobFileError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => JobFileError::NotFound {
                path: display.clone(),
            },
            _ => JobFileError::ReadFailed {
                path: display.clone(),
                reason: e.to_string(),
            },
        })?;

        let file = Self::from_str(&display, &content);
        let loaded_path = &display;
        tracing::debug!(
            "Loaded {}: {} lines, {} gcode, {} layers",
            loaded_path,
            file.info.line_count,
            file.info.gcode_line_count,
            file.info.layer_count
        );
        Ok(file)
    }

    /// Classify in-memory content
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(filename: &str, content: &str) -> Self {
        let mut lines = Vec::new();
        let mut layer: Option<u32> = None;
        let mut gcode_line_count = 0;
        let mut layer_count = 0;

        for (idx, raw) in content.lines().enumerate() {
            let trimmed = raw.trim();
            let mut attrs = LineAttributes {
                line_number: idx + 1,
                ..Default::default()
            };

            let code = if let Some(comment) = trimmed.strip_prefix(';') {
                let comment = comment.trim();
                if let Some(n) = parse_layer(comment) {
                    layer = Some(n);
                    layer_count += 1;
                }
                attrs.is_comment = true;
                attrs.comment = Some(comment.to_string());
                String::new()
            } else if trimmed.starts_with('(') {
                attrs.is_comment = true;
                attrs.comment = Some(
                    trimmed
                        .trim_start_matches('(')
                        .trim_end_matches(')')
                        .trim()
                        .to_string(),
                );
                String::new()
            } else {
                match trimmed.split_once(';') {
                    Some((code, comment)) => {
                        attrs.comment = Some(comment.trim().to_string());
                        code.trim().to_string()
                    }
                    None => trimmed.to_string(),
                }
            };

            attrs.layer = layer;
            if !code.is_empty() && !is_intercepted(&code) {
                gcode_line_count += 1;
            }
            lines.push(JobLine { code, attrs });
        }

        Self {
            info: JobInfo {
                filename: filename.to_string(),
                line_count: lines.len(),
                gcode_line_count,
                layer_count,
                opened_at: Utc::now(),
            },
            lines,
        }
    }

    pub fn info(&self) -> &JobInfo {
        &self.info
    }

    /// Iterate `(code, attributes)`; `code` is empty for blank and comment lines
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LineAttributes)> {
        self.lines.iter().map(|l| (l.code.as_str(), &l.attrs))
    }
}

fn parse_layer(comment: &str) -> Option<u32> {
    comment
        .strip_prefix("LAYER:")
        .and_then(|n| n.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
;Generated for test
;LAYER:0
G28
G1 X10 ; move
(clamp check)

;LAYER:1
M400
";

    #[test]
    fn test_classification() {
        let file = GcodeFile::from_str("sample.gcode", SAMPLE);
        let info = file.info();
        assert_eq!(info.line_count, 8);
        assert_eq!(info.gcode_line_count, 3);
        assert_eq!(info.layer_count, 2);

        let lines: Vec<_> = file.iter().collect();
        assert_eq!(lines[0].0, "");
        assert!(lines[0].1.is_comment);
        assert_eq!(lines[2].0, "G28");
        assert_eq!(lines[2].1.layer, Some(0));
        assert_eq!(lines[3].0, "G1 X10");
        assert_eq!(lines[3].1.comment.as_deref(), Some("move"));
        assert!(!lines[3].1.is_comment);
        assert_eq!(lines[4].1.comment.as_deref(), Some("clamp check"));
        assert_eq!(lines[5].0, "");
        assert!(!lines[5].1.is_comment);
        assert_eq!(lines[7].1.layer, Some(1));
        assert_eq!(lines[7].1.line_number, 8);
    }

    #[test]
    fn test_intercepted_codes_not_counted() {
        let file = GcodeFile::from_str("pause.gcode", "G1 X1\nM25\nG1 X2\nm24\nM400\n");
        assert_eq!(file.info().gcode_line_count, 3);
        // still yielded so the engine can act on them
        assert_eq!(file.iter().filter(|(code, _)| !code.is_empty()).count(), 5);

        assert!(is_intercepted("M25"));
        assert!(is_intercepted("m24 ; resume"));
        assert!(!is_intercepted("M250"));
        assert!(!is_intercepted(""));
    }

    #[test]
    fn test_open_from_disk() {
        let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
        write!(tmp, "G28\nG1 X10\nM400\n").expect("write");
        let file = GcodeFile::open(tmp.path()).expect("open");
        assert_eq!(file.info().gcode_line_count, 3);
    }

    #[test]
    fn test_open_missing() {
        let err = GcodeFile::open("/nonexistent/job.gcode").unwrap_err();
        assert!(matches!(err, JobFileError::NotFound { .. }));
    }
}
