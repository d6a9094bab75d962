//! Locale detection and localized error messages.
//!
//! # Data Flow
//! ```text
//! prompt text
//!     → classifier.rs (count script-defining characters)
//!     → Locale (attached to the request context)
//!     → messages.rs (error templates for that locale)
//! ```
//!
//! # Design Decisions
//! - The locale only localizes error records; scanning and admission never read it
//! - Detection is one pass over the text with a fixed-size counter array
//! - No signal means the configured default, never an error

pub mod classifier;
pub mod messages;

use std::fmt;

use serde::{Serialize, Serializer};

pub use classifier::LanguageClassifier;
pub use messages::MessageCatalog;

/// Supported locales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locale {
    En,
    Zh,
    Ja,
    Ko,
    Ru,
    Vi,
}

impl Locale {
    pub const ALL: [Locale; 6] = [
        Locale::En,
        Locale::Zh,
        Locale::Ja,
        Locale::Ko,
        Locale::Ru,
        Locale::Vi,
    ];

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "en" => Some(Locale::En),
            "zh" => Some(Locale::Zh),
            "ja" => Some(Locale::Ja),
            "ko" => Some(Locale::Ko),
            "ru" => Some(Locale::Ru),
            "vi" => Some(Locale::Vi),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Zh => "zh",
            Locale::Ja => "ja",
            Locale::Ko => "ko",
            Locale::Ru => "ru",
            Locale::Vi => "vi",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl Serialize for Locale {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.tag())
    }
}
