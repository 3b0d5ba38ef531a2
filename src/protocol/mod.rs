//! Wire vocabulary shared by the notifier and the coordinating server.
//!
//! Every message is a single UTF-8 text frame of the form
//! `<Kind> | <FieldNames> | <FieldValues>`.

pub mod gesture;
pub mod record;

pub use gesture::Gesture;
pub use record::{NotificationRecord, RecordKind, RecordParseError};
