//! Append-only, categorised message log shown in the tester's log view.

use std::{
    collections::{BTreeSet, VecDeque},
    fmt,
    sync::{Arc, RwLock},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

use crate::{config::LogConfig, notify::Notifier, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogCategory {
    Info,
    Warning,
    /// Debug output forwarded from the protocol component.
    Debug,
    /// Socket level debug output forwarded from the protocol component.
    DebugSocket,
    /// A rejected point or module mutation.
    Validation,
    SocketError,
    ProtocolError,
    SequenceError,
    UnknownError,
}

impl LogCategory {
    pub const ALL: [LogCategory; 9] = [
        Self::Info,
        Self::Warning,
        Self::Debug,
        Self::DebugSocket,
        Self::Validation,
        Self::SocketError,
        Self::ProtocolError,
        Self::SequenceError,
        Self::UnknownError,
    ];
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Debug => "debug",
            Self::DebugSocket => "debug socket",
            Self::Validation => "validation error",
            Self::SocketError => "socket error",
            Self::ProtocolError => "protocol error",
            Self::SequenceError => "sequence error",
            Self::UnknownError => "unknown error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub timestamp: SystemTime,
    pub category: LogCategory,
    pub text: String,
}

/// Set of categories a log view wants to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    categories: BTreeSet<LogCategory>,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl LogFilter {
    pub fn all() -> Self {
        Self {
            categories: LogCategory::ALL.into_iter().collect(),
        }
    }

    pub fn only(categories: &[LogCategory]) -> Self {
        Self {
            categories: categories.iter().copied().collect(),
        }
    }

    pub fn set(&mut self, category: LogCategory, enabled: bool) {
        if enabled {
            self.categories.insert(category);
        } else {
            self.categories.remove(&category);
        }
    }

    pub fn matches(&self, message: &LogMessage) -> bool {
        self.categories.contains(&message.category)
    }
}

/// View-side receiver of log changes. Called on the log's notifier thread.
pub trait LogDelegate: Send + Sync {
    fn new_log_message(&self, message: &LogMessage);
    fn logs_cleared(&self);
}

struct LogState {
    messages: VecDeque<LogMessage>,
    capacity: usize,
}

struct Shared {
    state: RwLock<LogState>,
    delegate: RwLock<Option<Arc<dyn LogDelegate>>>,
    notifier: Notifier,
}

/// Cloneable handle to a message log. Every message is also emitted as a
/// `tracing` event.
#[derive(Clone)]
pub struct Log {
    shared: Arc<Shared>,
}

impl Log {
    pub fn new(config: &LogConfig) -> Result<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                state: RwLock::new(LogState {
                    messages: VecDeque::new(),
                    capacity: config.capacity.max(1),
                }),
                delegate: RwLock::new(None),
                notifier: Notifier::new("log")?,
            }),
        })
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn LogDelegate>>) {
        *self
            .shared
            .delegate
            .write()
            .unwrap_or_else(|e| e.into_inner()) = delegate;
    }

    pub fn add(&self, category: LogCategory, text: impl Into<String>) {
        let message = LogMessage {
            timestamp: SystemTime::now(),
            category,
            text: text.into(),
        };
        trace_message(&message);

        {
            let mut state = self.shared.state.write().unwrap_or_else(|e| e.into_inner());
            if state.messages.len() >= state.capacity {
                state.messages.pop_front();
            }
            state.messages.push_back(message.clone());
        }

        if let Some(delegate) = self.delegate() {
            self.shared
                .notifier
                .post(move || delegate.new_log_message(&message));
        }
    }

    pub fn clear(&self) {
        self.shared
            .state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .messages
            .clear();
        if let Some(delegate) = self.delegate() {
            self.shared.notifier.post(move || delegate.logs_cleared());
        }
    }

    pub fn messages(&self) -> Vec<LogMessage> {
        self.read_messages(|_| true)
    }

    pub fn filtered(&self, filter: &LogFilter) -> Vec<LogMessage> {
        self.read_messages(|message| filter.matches(message))
    }

    pub fn len(&self) -> usize {
        self.shared
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .messages
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for pending delegate notifications to be delivered.
    pub fn flush(&self) {
        self.shared.notifier.flush();
    }

    fn read_messages(&self, keep: impl Fn(&LogMessage) -> bool) -> Vec<LogMessage> {
        self.shared
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .messages
            .iter()
            .filter(|message| keep(message))
            .cloned()
            .collect()
    }

    fn delegate(&self) -> Option<Arc<dyn LogDelegate>> {
        self.shared
            .delegate
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl fmt::Debug for Log {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Log").field("messages", &self.len()).finish()
    }
}

fn trace_message(message: &LogMessage) {
    let category = message.category;
    let text = message.text.as_str();
    match category {
        LogCategory::Info => tracing::info!(%category, "{text}"),
        LogCategory::Debug | LogCategory::DebugSocket => tracing::debug!(%category, "{text}"),
        LogCategory::Warning | LogCategory::Validation | LogCategory::SequenceError => {
            tracing::warn!(%category, "{text}")
        }
        LogCategory::SocketError | LogCategory::ProtocolError | LogCategory::UnknownError => {
            tracing::error!(%category, "{text}")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl LogDelegate for Recorder {
        fn new_log_message(&self, message: &LogMessage) {
            self.events.lock().unwrap().push(message.text.clone());
        }

        fn logs_cleared(&self) {
            self.events.lock().unwrap().push("<cleared>".to_string());
        }
    }

    fn log(capacity: usize) -> Log {
        Log::new(&LogConfig { capacity }).unwrap()
    }

    #[test]
    fn evicts_oldest_messages_past_capacity() {
        let log = log(3);
        for i in 0..5 {
            log.add(LogCategory::Info, format!("message {i}"));
        }

        let texts: Vec<_> = log.messages().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, ["message 2", "message 3", "message 4"]);
    }

    #[test]
    fn filters_by_category() {
        let log = log(100);
        log.add(LogCategory::Info, "started");
        log.add(LogCategory::Validation, "duplicate point");
        log.add(LogCategory::DebugSocket, "bound socket");

        let errors = log.filtered(&LogFilter::only(&[LogCategory::Validation]));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].text, "duplicate point");

        let mut filter = LogFilter::all();
        filter.set(LogCategory::DebugSocket, false);
        assert_eq!(log.filtered(&filter).len(), 2);
    }

    #[test]
    fn notifies_delegate_of_messages_and_clears() {
        let log = log(100);
        let recorder = Arc::new(Recorder::default());
        log.set_delegate(Some(recorder.clone() as Arc<dyn LogDelegate>));

        log.add(LogCategory::Info, "hello");
        log.clear();
        log.flush();

        assert!(log.is_empty());
        assert_eq!(*recorder.events.lock().unwrap(), ["hello", "<cleared>"]);
    }
}
