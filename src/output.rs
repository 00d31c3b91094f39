use chrono::{DateTime, Local, Utc};
use chrono_humanize::HumanTime;
use colored::Colorize;
use design_session::types::HistoryRecord;
use std::io::IsTerminal;

pub struct OutputFormatter {
    use_color: bool,
    terminal_width: Option<usize>,
}

impl OutputFormatter {
    pub fn new(color_enabled: bool) -> Self {
        let use_color = color_enabled
            && std::env::var("NO_COLOR").is_err()
            && std::io::stdout().is_terminal();
        let terminal_width = terminal_size::terminal_size().map(|(w, _)| w.0 as usize);

        Self {
            use_color,
            terminal_width,
        }
    }

    /// One block per record, oldest first. The active record is marked, and records
    /// past it (reachable with redo) are dimmed.
    pub fn format_history(
        &self,
        records: &[HistoryRecord],
        current: Option<usize>,
        session_name: &str,
    ) -> String {
        if records.is_empty() {
            return format!("No history for session '{}'", session_name);
        }

        let mut output = Vec::new();
        for (index, record) in records.iter().enumerate() {
            let state = match current {
                Some(active) if index == active => RecordState::Current,
                Some(active) if index > active => RecordState::Redo,
                None => RecordState::Redo,
                _ => RecordState::Undo,
            };
            output.push(self.format_record(index, record, state));
        }

        output.join("\n")
    }

    fn format_record(&self, index: usize, record: &HistoryRecord, state: RecordState) -> String {
        let marker = match state {
            RecordState::Current => "▶",
            RecordState::Undo | RecordState::Redo => " ",
        };
        let time_str = self.format_relative_time(record.created_at);
        // Continuation lines of a long name stay under the name column.
        let prefix = format!("{} {:>3}  ", marker, index);
        let indent = prefix.chars().count();
        let name = self.wrap_text(&record.name, indent);
        let header = format!("{}{}", prefix, &name[indent..]);

        if !self.use_color {
            let suffix = if matches!(state, RecordState::Redo) {
                " [redo]"
            } else {
                ""
            };
            return format!("{}{}  {}", header, suffix, time_str);
        }

        let header = match state {
            RecordState::Current => header.green().bold().to_string(),
            RecordState::Undo => header,
            RecordState::Redo => header.dimmed().to_string(),
        };
        format!("{}  {}", header, time_str.dimmed())
    }

    fn format_relative_time(&self, timestamp: DateTime<Utc>) -> String {
        let local_time: DateTime<Local> = timestamp.into();
        let human_time = HumanTime::from(timestamp);
        format!("{} ({})", human_time, local_time.format("%Y-%m-%d %H:%M"))
    }

    /// Status line after a history move.
    pub fn format_move(&self, action: &str, moved: bool, record: Option<&HistoryRecord>) -> String {
        match (moved, record) {
            (true, Some(record)) => {
                let name = if self.use_color {
                    record.name.bold().to_string()
                } else {
                    record.name.clone()
                };
                format!("{}: now at '{}'", action, name)
            }
            _ => format!("Nothing more to {}", action.to_lowercase()),
        }
    }

    fn wrap_text(&self, text: &str, indent: usize) -> String {
        let width = self.terminal_width.unwrap_or(80);
        let available = width.saturating_sub(indent);

        if text.chars().count() <= available {
            return format!("{:indent$}{}", "", text, indent = indent);
        }

        let mut lines = Vec::new();
        let mut current_line = String::new();
        let indent_str = " ".repeat(indent);

        for word in text.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.chars().count() + 1 + word.chars().count() <= available {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(format!("{}{}", indent_str, current_line));
                current_line = word.to_string();
            }
        }

        if !current_line.is_empty() {
            lines.push(format!("{}{}", indent_str, current_line));
        }

        lines.join("\n")
    }
}

#[derive(Debug, Clone, Copy)]
enum RecordState {
    Undo,
    Current,
    Redo,
}
