//! Keyword classification of user requests.
//!
//! The client sends a numeric `type`, but the text of the request has the last
//! word: an organize keyword forces [`Intent::Organize`], and an image keyword
//! forces [`Intent::Image`] even if an organize keyword also matched.

use std::fmt;

/// Phrases that mean "tidy up my desktop".
pub const ORGANIZE_KEYWORDS: [&str; 4] = ["分类", "整理桌面", "整理", "收拾"];

/// Phrases that mean "make me a wallpaper".
pub const IMAGE_KEYWORDS: [&str; 2] = ["壁纸", "图片"];

/// What the user wants the relay to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Intent {
    /// Free-form conversation with the chat model.
    #[default]
    Chat,
    /// Ask the chat model to lay out desktop icons using the classify prompt.
    Organize,
    /// Generate a wallpaper with the text-to-image provider.
    Image,
}

impl Intent {
    /// Maps the wire code (`0`, `1`, `2`) to an intent.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Chat),
            1 => Some(Self::Organize),
            2 => Some(Self::Image),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Chat => 0,
            Self::Organize => 1,
            Self::Image => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Organize => "organize",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the intent forced by keywords in `input`, if any.
///
/// Both scans always run; the image scan runs second so it wins when both
/// match.
pub fn keyword_intent(input: &str) -> Option<Intent> {
    let mut intent = None;
    if ORGANIZE_KEYWORDS.iter().any(|k| input.contains(k)) {
        intent = Some(Intent::Organize);
    }
    if IMAGE_KEYWORDS.iter().any(|k| input.contains(k)) {
        intent = Some(Intent::Image);
    }
    intent
}

/// Returns the effective intent for `input`: the keyword intent when one
/// matches, `requested` otherwise.
///
/// # Examples
///
/// ```
/// use deskrelay::intent::{Intent, classify};
///
/// assert_eq!(classify("帮我整理一下桌面", Intent::Chat), Intent::Organize);
/// assert_eq!(classify("整理图片", Intent::Chat), Intent::Image);
/// assert_eq!(classify("hello", Intent::Organize), Intent::Organize);
/// ```
pub fn classify(input: &str, requested: Intent) -> Intent {
    keyword_intent(input).unwrap_or(requested)
}
