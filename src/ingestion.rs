pub mod organizer;
pub mod validator;

pub use organizer::{IngestOutcome, Organizer};
pub use validator::{CaptureName, FilenameValidator};
