// Caller-owned message sink handed to every engine entry point. Messages are
// forwarded to the `log` facade as they arrive and kept so the caller can
// decide what to do with them afterwards (attach to output metadata, show,
// or drop).

use log::Level;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub level: Level,
    pub text: String,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.text)
    }
}

#[derive(Default, Debug)]
pub struct Diagnostics {
    messages: Vec<Message>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics {
            messages: Vec::new(),
        }
    }

    pub fn record(&mut self, level: Level, text: impl Into<String>) {
        let text = text.into();
        log::log!(level, "{}", text);
        self.messages.push(Message { level, text });
    }

    pub fn trace(&mut self, text: impl Into<String>) {
        self.record(Level::Trace, text);
    }

    pub fn debug(&mut self, text: impl Into<String>) {
        self.record(Level::Debug, text);
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.record(Level::Info, text);
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.record(Level::Warn, text);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    // Messages at `level` or more severe.
    pub fn at_least(&self, level: Level) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.level <= level)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
