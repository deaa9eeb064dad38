// Parser for the platform's revision-history report.
//
// The report is an opaque tabular dump in which every field is encoded as a
// quoted pair `{"#","label"}`. A literal quote inside a free-text field is
// escaped as a doubled quote `""`; those must be normalized before field
// extraction or the pair boundaries break. Groups are delimited by the
// version marker label: every label/value pair after a marker belongs to
// that marker's record until the next one.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::types::RevisionRecord;

/// Marker label that opens a new record group.
pub const LABEL_VERSION: &str = "Версия:";
/// Author field label.
pub const LABEL_AUTHOR: &str = "Пользователь:";
/// Comment field label.
pub const LABEL_COMMENT: &str = "Комментарий:";
/// Creation date field label.
pub const LABEL_DATE: &str = "Дата создания:";
/// Creation time field label.
pub const LABEL_TIME: &str = "Время создания:";
/// Continuation label the upstream report emits in place of an absent
/// comment. Upstream-format-dependent quirk, not a general parsing rule.
pub const LABEL_CHANGED: &str = "Изменены:";

const DATE_FORMAT: &str = "%d.%m.%Y";
const DATE_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    /// The platform produced no report text at all.
    #[error("revision report is empty")]
    Empty,
    /// A recognized label had no following value (truncated report).
    #[error("malformed revision report: label {label:?} has no value")]
    Parse { label: String },
}

fn field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r##"\{"#","([^"]+)"\}"##).expect("report field pattern should compile")
    })
}

/// Parse a raw report dump into revision records, in marker order.
///
/// An empty report text is an error; a non-empty report that yields no
/// groups is an empty, non-error sequence ("no new revisions").
pub fn parse_report(text: &str) -> Result<Vec<RevisionRecord>, ReportError> {
    if text.trim().is_empty() {
        return Err(ReportError::Empty);
    }

    // Doubled quotes inside comments break pair detection; substitute
    // single quotes before scanning.
    let normalized = text.replace("\"\"", "'");

    let mut groups: Vec<Vec<String>> = Vec::new();
    for capture in field_pattern().captures_iter(&normalized) {
        let token = &capture[1];
        if token == LABEL_VERSION {
            groups.push(Vec::new());
        }
        if let Some(group) = groups.last_mut() {
            group.push(token.to_string());
        }
    }

    groups.iter().map(|group| parse_group(group)).collect()
}

fn parse_group(tokens: &[String]) -> Result<RevisionRecord, ReportError> {
    let mut record = RevisionRecord::new(0);

    for (index, token) in tokens.iter().enumerate() {
        let label = token.as_str();
        if !is_recognized_label(label) {
            continue;
        }
        let value = tokens
            .get(index + 1)
            .ok_or_else(|| ReportError::Parse { label: label.to_string() })?;

        match label {
            LABEL_VERSION => {
                // Unparsable version values are silently left at zero.
                if let Ok(number) = value.parse::<u64>() {
                    record.number = number;
                }
            }
            LABEL_AUTHOR => {
                record.author = value.trim().to_string();
            }
            LABEL_COMMENT => {
                // An absent comment shows up as the continuation label.
                if value != LABEL_CHANGED {
                    record.comment = value.replace('\r', "").replace('\n', " ");
                }
            }
            LABEL_DATE => {
                if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
                    record.created_at = date.and_hms_opt(0, 0, 0);
                }
            }
            LABEL_TIME => {
                // Only meaningful once a date was found.
                if let Some(date) = record.created_at {
                    let combined = format!("{} {}", date.format(DATE_FORMAT), value);
                    if let Ok(stamp) = NaiveDateTime::parse_from_str(&combined, DATE_TIME_FORMAT) {
                        record.created_at = Some(stamp);
                    }
                }
            }
            _ => unreachable!("is_recognized_label covers all matched labels"),
        }
    }

    Ok(record)
}

fn is_recognized_label(label: &str) -> bool {
    matches!(label, LABEL_VERSION | LABEL_AUTHOR | LABEL_COMMENT | LABEL_DATE | LABEL_TIME)
}
