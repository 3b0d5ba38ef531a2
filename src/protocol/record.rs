//! Notification records and their pipe-delimited text form.

use std::str::FromStr;

/// The three lifecycle events reported to the coordinating server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    ExperimentHasStarted,
    MovementInfo,
    ExperimentHasEnded,
}

impl RecordKind {
    /// Name used as the first field on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::ExperimentHasStarted => "ExperimentHasStarted",
            RecordKind::MovementInfo => "MovementInfo",
            RecordKind::ExperimentHasEnded => "ExperimentHasEnded",
        }
    }

    /// Field names listed in the second field on the wire.
    pub fn field_names(&self) -> &'static str {
        match self {
            RecordKind::ExperimentHasStarted => "StartTime",
            RecordKind::MovementInfo => "Rep, Movement Number, startTimeInFuture",
            RecordKind::ExperimentHasEnded => "EndTime",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = RecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ExperimentHasStarted" => Ok(RecordKind::ExperimentHasStarted),
            "MovementInfo" => Ok(RecordKind::MovementInfo),
            "ExperimentHasEnded" => Ok(RecordKind::ExperimentHasEnded),
            other => Err(RecordParseError::UnknownKind(other.to_string())),
        }
    }
}

/// One notification, built per call and sent as a single text frame.
///
/// Timestamps are milliseconds since the Unix epoch, reproduced verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationRecord {
    ExperimentStarted {
        timestamp_ms: i64,
    },
    Movement {
        rep: u32,
        movement: u32,
        /// When the movement is due to start (usually slightly in the future)
        timestamp_ms: i64,
    },
    ExperimentEnded {
        timestamp_ms: i64,
    },
}

impl NotificationRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            NotificationRecord::ExperimentStarted { .. } => RecordKind::ExperimentHasStarted,
            NotificationRecord::Movement { .. } => RecordKind::MovementInfo,
            NotificationRecord::ExperimentEnded { .. } => RecordKind::ExperimentHasEnded,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        match *self {
            NotificationRecord::ExperimentStarted { timestamp_ms }
            | NotificationRecord::Movement { timestamp_ms, .. }
            | NotificationRecord::ExperimentEnded { timestamp_ms } => timestamp_ms,
        }
    }

    /// Render the wire text.
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    /// Parse a received text frame.
    pub fn parse(text: &str) -> Result<Self, RecordParseError> {
        text.parse()
    }
}

impl std::fmt::Display for NotificationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = self.kind();
        write!(f, "{} | {} | ", kind.as_str(), kind.field_names())?;
        match *self {
            NotificationRecord::Movement {
                rep,
                movement,
                timestamp_ms,
            } => write!(f, "{rep}, {movement}, {timestamp_ms}"),
            NotificationRecord::ExperimentStarted { timestamp_ms }
            | NotificationRecord::ExperimentEnded { timestamp_ms } => write!(f, "{timestamp_ms}"),
        }
    }
}

impl FromStr for NotificationRecord {
    type Err = RecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(RecordParseError::Empty);
        }

        let mut parts = s.split('|');
        let kind: RecordKind = parts.next().unwrap_or_default().parse()?;
        // Field names are informational only.
        let _names = parts.next().ok_or(RecordParseError::MissingField("field names"))?;
        let values = parts
            .next()
            .ok_or(RecordParseError::MissingField("field values"))?;

        match kind {
            RecordKind::ExperimentHasStarted => Ok(NotificationRecord::ExperimentStarted {
                timestamp_ms: parse_number(values, "StartTime")?,
            }),
            RecordKind::ExperimentHasEnded => Ok(NotificationRecord::ExperimentEnded {
                timestamp_ms: parse_number(values, "EndTime")?,
            }),
            RecordKind::MovementInfo => {
                let mut values = values.split(',');
                let rep = values.next().ok_or(RecordParseError::MissingField("Rep"))?;
                let movement = values
                    .next()
                    .ok_or(RecordParseError::MissingField("Movement Number"))?;
                let start = values
                    .next()
                    .ok_or(RecordParseError::MissingField("startTimeInFuture"))?;
                Ok(NotificationRecord::Movement {
                    rep: parse_number(rep, "Rep")?,
                    movement: parse_number(movement, "Movement Number")?,
                    timestamp_ms: parse_number(start, "startTimeInFuture")?,
                })
            }
        }
    }
}

fn parse_number<N: FromStr>(value: &str, field: &'static str) -> Result<N, RecordParseError> {
    let value = value.trim();
    value.parse().map_err(|_| RecordParseError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Errors raised when a received frame is not a valid record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordParseError {
    Empty,
    UnknownKind(String),
    MissingField(&'static str),
    InvalidNumber { field: &'static str, value: String },
}

impl std::fmt::Display for RecordParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordParseError::Empty => write!(f, "empty message"),
            RecordParseError::UnknownKind(kind) => write!(f, "unknown record kind '{kind}'"),
            RecordParseError::MissingField(field) => write!(f, "missing field: {field}"),
            RecordParseError::InvalidNumber { field, value } => {
                write!(f, "invalid number for {field}: '{value}'")
            }
        }
    }
}

impl std::error::Error for RecordParseError {}
