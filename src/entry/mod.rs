use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::sender::{LogContent, LogRecord};

/// A single log observation waiting to be shipped
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl LogEntry {
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level.into(),
            message: message.into(),
            data: None,
            module: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Length of the JSON text of this entry.
    ///
    /// Only an approximation of the bytes sent on the wire, used to decide when
    /// the buffer is large enough to be flushed.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or_default()
    }

    /// Translate the entry into the wire record, appending `extra` after the
    /// entry's own fields.
    pub fn into_record(self, extra: &[(String, String)]) -> LogRecord {
        let mut contents = Vec::with_capacity(
            3 + self.data.as_ref().map_or(0, Map::len) + extra.len(),
        );

        contents.push(LogContent::new("level".to_owned(), self.level));
        contents.push(LogContent::new("message".to_owned(), self.message));

        if let Some(module) = self.module {
            contents.push(LogContent::new("module".to_owned(), module));
        }

        if let Some(data) = self.data {
            contents.extend(
                data.into_iter()
                    .map(|(key, value)| LogContent::new(key, stringify(value))),
            );
        }

        contents.extend(
            extra
                .iter()
                .map(|(key, value)| LogContent::new(key.clone(), value.clone())),
        );

        LogRecord::new(self.timestamp.timestamp(), contents)
    }
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod entry_tests {
    use chrono::TimeZone;
    use serde_json::json;

    use crate::entry::*;

    fn contents(record: &LogRecord) -> Vec<(&str, &str)> {
        record
            .contents
            .iter()
            .map(|c| (c.key.as_str(), c.value.as_str()))
            .collect()
    }

    #[test]
    fn test_record_layout() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_987).unwrap();
        let entry = LogEntry::new("info", "task planned")
            .at(ts)
            .with_module("agent")
            .with_field("steps", 3)
            .with_field("goal", "open page")
            .with_field("dry_run", json!(false));

        let record = entry.into_record(&[("host".to_owned(), "box-1".to_owned())]);

        assert_eq!(record.time, 1_700_000_000);
        assert_eq!(
            contents(&record),
            vec![
                ("level", "info"),
                ("message", "task planned"),
                ("module", "agent"),
                ("dry_run", "false"),
                ("goal", "open page"),
                ("steps", "3"),
                ("host", "box-1"),
            ]
        );
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let record = LogEntry::new("warn", "").into_record(&[]);
        assert_eq!(contents(&record), vec![("level", "warn"), ("message", "")]);
    }

    #[test]
    fn test_serialized_len_matches_json() {
        let entry = LogEntry::new("error", "boom").with_field("code", json!({"a": [1, 2]}));
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(entry.serialized_len(), json.len());
        assert!(!json.contains("module"));
    }
}
