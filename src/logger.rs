//!
//! Shared retarget log.
//!
//! Every failure in the pipeline is reported here instead of being raised. Messages are
//! forwarded to the `log` facade and kept in memory so hosts (and tests) can inspect what
//! happened during the last initialization.
//!

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub level: LogLevel,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct RetargetLog {
    name: String,
    messages: Vec<LogMessage>,
}

impl RetargetLog {
    /// Creates a log whose forwarded messages are prefixed with `name`.
    pub fn new(name: impl Into<String>) -> RetargetLog {
        return RetargetLog {
            name: name.into(),
            messages: Vec::new(),
        };
    }

    #[inline]
    pub fn name(&self) -> &str {
        return &self.name;
    }

    #[inline]
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn info(&mut self, text: impl Into<String>) {
        let text = text.into();
        log::info!("[{}] {}", self.name, text);
        self.messages.push(LogMessage {
            level: LogLevel::Info,
            text,
        });
    }

    pub fn warning(&mut self, text: impl Into<String>) {
        let text = text.into();
        log::warn!("[{}] {}", self.name, text);
        self.messages.push(LogMessage {
            level: LogLevel::Warning,
            text,
        });
    }

    pub fn error(&mut self, text: impl Into<String>) {
        let text = text.into();
        log::error!("[{}] {}", self.name, text);
        self.messages.push(LogMessage {
            level: LogLevel::Error,
            text,
        });
    }

    #[inline]
    pub fn messages(&self) -> &[LogMessage] {
        return &self.messages;
    }

    /// Messages of exactly `level`.
    pub fn messages_of(&self, level: LogLevel) -> impl Iterator<Item = &LogMessage> {
        return self.messages.iter().filter(move |m| m.level == level);
    }

    pub fn num_warnings(&self) -> usize {
        return self.messages_of(LogLevel::Warning).count();
    }

    pub fn num_errors(&self) -> usize {
        return self.messages_of(LogLevel::Error).count();
    }

    /// Tests if any message of `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        return self.messages_of(level).any(|m| m.text.contains(needle));
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels() {
        let mut log = RetargetLog::new("unit");
        log.info("started");
        log.warning("chain 'leg' is invalid");
        log.warning("bone 'toe' missing");
        log.error("asset missing");

        assert_eq!(log.messages().len(), 4);
        assert_eq!(log.num_warnings(), 2);
        assert_eq!(log.num_errors(), 1);
        assert!(log.contains(LogLevel::Warning, "toe"));
        assert!(!log.contains(LogLevel::Error, "toe"));

        log.clear();
        assert!(log.messages().is_empty());
        assert_eq!(log.name(), "unit");
    }
}
