//! The in-memory record of one sandbox run.

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Scheduled,
    InProgress,
    Finished,
}

/// What the process runner reported for one command.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CommandDetails {
    pub code: Option<i32>,
    pub out: String,
    pub err: String,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CommandEntry {
    pub status: CommandStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub details: Option<CommandDetails>,
}

impl CommandEntry {
    fn scheduled() -> Self {
        Self {
            status: CommandStatus::Scheduled,
            started_at: None,
            finished_at: None,
            duration_secs: None,
            details: None,
        }
    }
}

/// Ordered `command text -> entry` map.
///
/// A command text listed twice shares one entry, which reflects its most
/// recent execution.
#[derive(Debug, Clone, Default)]
pub struct CommandMap(Vec<(String, CommandEntry)>);

impl CommandMap {
    pub fn get(&self, command: &str) -> Option<&CommandEntry> {
        self.0.iter().find(|(c, _)| c == command).map(|(_, e)| e)
    }

    pub(crate) fn get_mut(&mut self, command: &str) -> Option<&mut CommandEntry> {
        self.0.iter_mut().find(|(c, _)| c == command).map(|(_, e)| e)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommandEntry)> {
        self.0.iter().map(|(c, e)| (c.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for CommandMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (command, entry) in &self.0 {
            map.serialize_entry(command, entry)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CommandRunRecord {
    pub started: bool,
    pub finished: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    /// Pid of the most recently executed command.
    pub pid: Option<u32>,
    pub commands: CommandMap,
}

impl CommandRunRecord {
    /// A record with every command scheduled and nothing started.
    pub fn scheduled<S: AsRef<str>>(commands: &[S]) -> Self {
        let mut map = CommandMap::default();
        for command in commands {
            let command = command.as_ref();
            if map.get(command).is_none() {
                map.0.push((command.to_string(), CommandEntry::scheduled()));
            }
        }
        Self {
            commands: map,
            ..Default::default()
        }
    }

    pub(crate) fn begin(&mut self) {
        self.started = true;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn begin_command(&mut self, command: &str) {
        if let Some(entry) = self.commands.get_mut(command) {
            entry.status = CommandStatus::InProgress;
            entry.started_at = Some(Utc::now());
            entry.finished_at = None;
            entry.duration_secs = None;
        }
    }

    pub(crate) fn finish_command(&mut self, command: &str, details: CommandDetails) {
        if details.pid.is_some() {
            self.pid = details.pid;
        }
        if let Some(entry) = self.commands.get_mut(command) {
            let now = Utc::now();
            entry.status = CommandStatus::Finished;
            entry.duration_secs = entry.started_at.map(|s| elapsed_secs(s, now));
            entry.finished_at = Some(now);
            entry.details = Some(details);
        }
    }

    pub(crate) fn finish(&mut self) {
        let now = Utc::now();
        self.finished = true;
        self.duration_secs = self.started_at.map(|s| elapsed_secs(s, now));
        self.finished_at = Some(now);
    }
}

fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds().max(0) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_record_keeps_order_and_collapses_duplicates() {
        let record = CommandRunRecord::scheduled(&["b", "a", "b"]);
        let order: Vec<&str> = record.commands.iter().map(|(c, _)| c).collect();
        assert_eq!(order, ["b", "a"]);
        assert!(!record.started);
        assert!(
            record
                .commands
                .iter()
                .all(|(_, e)| e.status == CommandStatus::Scheduled)
        );
    }

    #[test]
    fn serializes_commands_as_ordered_object() {
        let mut record = CommandRunRecord::scheduled(&["zz", "aa"]);
        record.begin();
        record.begin_command("zz");
        record.finish_command(
            "zz",
            CommandDetails {
                code: Some(0),
                out: "ok\n".into(),
                err: String::new(),
                pid: Some(7),
            },
        );

        let json = serde_json::to_string(&record).unwrap();
        let zz = json.find("\"zz\"").unwrap();
        let aa = json.find("\"aa\"").unwrap();
        assert!(zz < aa);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["pid"], 7);
        assert_eq!(value["commands"]["zz"]["status"], "finished");
        assert_eq!(value["commands"]["zz"]["details"]["out"], "ok\n");
        assert_eq!(value["commands"]["aa"]["status"], "scheduled");
        assert!(value["commands"]["aa"]["details"].is_null());
    }
}
