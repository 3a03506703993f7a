//! Flat tabular pipeline status, for polling from outside the process.
//!
//! The column order is fixed; see [`STATUS_COLUMNS`]. Fields containing the
//! separator, a quote or a line break are quoted, with quotes doubled.

use crate::error::{FlowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STATUS_COLUMNS: [&str; 7] = [
    "id",
    "name",
    "pausable",
    "paused",
    "stoppable",
    "stopped",
    "interactive",
];

/// One row of the status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Identifier of the owning flow.
    pub id: String,
    pub name: String,
    pub pausable: bool,
    pub paused: bool,
    pub stoppable: bool,
    pub stopped: bool,
    /// Needs a human in the loop; never stopped in bulk without confirmation.
    pub interactive: bool,
}

impl PipelineStatus {
    fn fields(&self) -> [String; 7] {
        [
            self.id.clone(),
            self.name.clone(),
            self.pausable.to_string(),
            self.paused.to_string(),
            self.stoppable.to_string(),
            self.stopped.to_string(),
            self.interactive.to_string(),
        ]
    }

    fn from_fields(fields: &[String], line: usize) -> Result<Self> {
        if fields.len() != STATUS_COLUMNS.len() {
            return Err(FlowError::StatusFormat(format!(
                "line {}: expected {} fields, found {}",
                line,
                STATUS_COLUMNS.len(),
                fields.len()
            )));
        }
        let flag = |index: usize| -> Result<bool> {
            match fields[index].trim() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(FlowError::StatusFormat(format!(
                    "line {}: column '{}' is not a boolean: {:?}",
                    line, STATUS_COLUMNS[index], other
                ))),
            }
        };
        Ok(Self {
            id: fields[0].clone(),
            name: fields[1].clone(),
            pausable: flag(2)?,
            paused: flag(3)?,
            stoppable: flag(4)?,
            stopped: flag(5)?,
            interactive: flag(6)?,
        })
    }
}

/// Status of every pipeline of one supervisor at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTable {
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<PipelineStatus>,
}

impl StatusTable {
    pub fn new(rows: Vec<PipelineStatus>) -> Self {
        Self {
            generated_at: Utc::now(),
            rows,
        }
    }

    pub fn get(&self, name: &str) -> Option<&PipelineStatus> {
        self.rows.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header line followed by one line per row.
    pub fn to_delimited(&self, sep: char) -> String {
        let mut out = String::new();
        write_line(&mut out, STATUS_COLUMNS.iter().copied(), sep);
        for row in &self.rows {
            write_line(&mut out, row.fields().iter().map(String::as_str), sep);
        }
        out
    }

    /// Parse text produced by [`to_delimited`](Self::to_delimited). The header
    /// must match the fixed column order.
    pub fn from_delimited(text: &str, sep: char) -> Result<Self> {
        let mut records = parse_records(text, sep)?.into_iter();
        let header = records
            .next()
            .ok_or_else(|| FlowError::StatusFormat("empty status text".into()))?;
        if header.iter().map(|h| h.trim()).ne(STATUS_COLUMNS.iter().copied()) {
            return Err(FlowError::StatusFormat(format!(
                "unexpected header {:?}, expected {:?}",
                header, STATUS_COLUMNS
            )));
        }
        let rows = records
            .enumerate()
            .map(|(i, fields)| PipelineStatus::from_fields(&fields, i + 2))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rows))
    }

    pub fn to_csv(&self) -> String {
        self.to_delimited(',')
    }

    pub fn from_csv(text: &str) -> Result<Self> {
        Self::from_delimited(text, ',')
    }
}

fn write_line<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>, sep: char) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(sep);
        }
        if field.contains([sep, '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

/// Split `text` into records of fields. Blank lines are skipped.
fn parse_records(text: &str, sep: char) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut touched = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => quoted = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => {
                quoted = true;
                touched = true;
            }
            c if c == sep => {
                record.push(std::mem::take(&mut field));
                touched = true;
            }
            '\r' => {}
            '\n' => {
                if touched || !field.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                touched = false;
            }
            _ => {
                field.push(c);
                touched = true;
            }
        }
    }
    if quoted {
        return Err(FlowError::StatusFormat("unterminated quoted field".into()));
    }
    if touched || !field.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, paused: bool) -> PipelineStatus {
        PipelineStatus {
            id: "flow".into(),
            name: name.into(),
            pausable: true,
            paused,
            stoppable: true,
            stopped: false,
            interactive: false,
        }
    }

    #[test]
    fn test_header_has_fixed_order() {
        let text = StatusTable::new(vec![]).to_csv();
        assert_eq!(text, "id,name,pausable,paused,stoppable,stopped,interactive\n");
    }

    #[test]
    fn test_csv_round_trip_with_awkward_names() {
        let table = StatusTable::new(vec![row("plain", false), row("with,comma \"q\"", true)]);
        let parsed = StatusTable::from_csv(&table.to_csv()).unwrap();
        assert_eq!(parsed.rows, table.rows);
        assert!(parsed.get("with,comma \"q\"").unwrap().paused);
    }

    #[test]
    fn test_tab_separated() {
        let table = StatusTable::new(vec![row("a", false)]);
        let text = table.to_delimited('\t');
        assert!(text.lines().nth(1).unwrap().starts_with("flow\ta\ttrue"));
        assert_eq!(StatusTable::from_delimited(&text, '\t').unwrap().rows, table.rows);
    }

    #[test]
    fn test_rejects_wrong_header() {
        let err = StatusTable::from_csv("name,id\n").unwrap_err();
        assert!(matches!(err, FlowError::StatusFormat(_)));
    }

    #[test]
    fn test_rejects_bad_flag_and_width() {
        let header = STATUS_COLUMNS.join(",");
        let bad_flag = format!("{}\nflow,a,yes,false,true,false,false\n", header);
        assert!(StatusTable::from_csv(&bad_flag).is_err());
        let short = format!("{}\nflow,a,true\n", header);
        assert!(StatusTable::from_csv(&short).is_err());
    }

    #[test]
    fn test_rejects_unterminated_quote() {
        let text = format!("{}\n\"flow,a", STATUS_COLUMNS.join(","));
        assert!(StatusTable::from_csv(&text).is_err());
    }
}
