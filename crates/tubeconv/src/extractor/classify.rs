use regex::Regex;

/// Default text signature of the platform blocking automated access
pub const DEFAULT_BOT_BLOCK_PATTERN: &str =
    r"(?i)(confirm (you('|’)re|you are) not a bot|extract functions|captcha|signature)";

const TRANSIENT_PATTERN: &str =
    r"(?i)(timed? ?out|connection (reset|refused|closed)|temporarily unavailable|too many requests|\b50[0234]\b)";

/// How a primary extractor error should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network hiccup; resubmitting later may work
    Transient,
    /// The platform refused us; the secondary extractor may get through
    BotBlocked,
    /// Anything else (bad URL, private video, ...)
    Fatal,
}

/// Text-pattern classifier for primary extractor errors
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    bot_blocked: Regex,
    transient: Regex,
}

impl ErrorClassifier {
    /// Build a classifier with a custom bot-block pattern
    pub fn new(bot_block_pattern: &str) -> Result<Self, regex::Error> {
        Ok(ErrorClassifier {
            bot_blocked: Regex::new(bot_block_pattern)?,
            transient: Regex::new(TRANSIENT_PATTERN)?,
        })
    }

    /// Classify an error by its full context chain
    pub fn classify(&self, error: &anyhow::Error) -> ErrorClass {
        self.classify_message(&format!("{:#}", error))
    }

    pub fn classify_message(&self, message: &str) -> ErrorClass {
        if self.bot_blocked.is_match(message) {
            ErrorClass::BotBlocked
        } else if self.transient.is_match(message) {
            ErrorClass::Transient
        } else {
            ErrorClass::Fatal
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        // Both patterns are constants covered by tests
        ErrorClassifier::new(DEFAULT_BOT_BLOCK_PATTERN).expect("default patterns compile")
    }
}
