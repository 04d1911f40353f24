pub use self::classifier::{classify, detect_language, is_command_or_link, MessageKind};
pub use self::sanitizer::{sanitize, SanitizedText};

pub mod classifier;
pub mod sanitizer;
