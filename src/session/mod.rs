//! Per-command execution context.
//!
//! A `CommandSession` is created at dispatch, lives across however many
//! packets the command needs (duplex commands span several), and ends in
//! exactly one of completed, cancelled, or failed. Results either accumulate
//! in order or stream through a callback; registering a callback permanently
//! bypasses buffering for that session.

pub mod handler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, WireError};
use crate::protocol::field::{CommandArgs, FieldMap};

pub use handler::{Handler, HandlerId, HandlerTable, HANDLER_CAPACITY};

/// Severity of a server-reported message. Ordered: `Fatal` outranks `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Empty,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn from_code(code: u32) -> Severity {
        match code {
            0 => Severity::Empty,
            1 => Severity::Info,
            2 => Severity::Warning,
            3 => Severity::Error,
            _ => Severity::Fatal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Empty => "empty",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

/// A server `error`/`warning` result. This is data, not a Rust error: the
/// packet that carried it was well-formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    pub severity: Severity,
    pub code: u32,
    pub text: String,
}

impl ServerMessage {
    /// Extract a server message from a result map, if it carries one.
    pub fn from_fields(map: &FieldMap) -> Option<ServerMessage> {
        let severity = map
            .get("severity")
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.parse::<u32>().ok())
            .map(Severity::from_code)?;
        let code = map
            .get("code")
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0);
        let text = map
            .get("data")
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default();
        Some(ServerMessage {
            severity,
            code,
            text,
        })
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Dispatched,
    AwaitingResponse,
    ProcessingResult,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

/// Terminal status reported to the orchestration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    /// Completed, but the server reported at least one error-severity message.
    Error,
    Cancelled,
}

/// Cooperative cancellation flag. Cloneable so another task can request a
/// cancel; it takes effect at the session's next result-delivery point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Streaming delivery callback. An `Err` return is logged and treated as an
/// implicit cancellation, never propagated into the dispatch loop.
pub type ResultCallback = Box<dyn FnMut(FieldMap) -> Result<()> + Send>;

enum ResultSink {
    Buffered(Vec<FieldMap>),
    Streaming(ResultCallback),
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultSink::Buffered(maps) => f.debug_tuple("Buffered").field(&maps.len()).finish(),
            ResultSink::Streaming(_) => f.debug_tuple("Streaming").finish(),
        }
    }
}

/// Per-command context threading state across a multi-packet exchange.
#[derive(Debug)]
pub struct CommandSession {
    func: String,
    args: CommandArgs,
    ticket: Option<String>,
    input: Option<Bytes>,
    sink: ResultSink,
    handlers: HandlerTable,
    cancel: CancelToken,
    state: SessionState,
    error: Option<WireError>,
    messages: Vec<ServerMessage>,
}

impl CommandSession {
    pub fn new(func: impl Into<String>, args: CommandArgs) -> Self {
        Self {
            func: func.into(),
            args,
            ticket: None,
            input: None,
            sink: ResultSink::Buffered(Vec::new()),
            handlers: HandlerTable::new(),
            cancel: CancelToken::new(),
            state: SessionState::Created,
            error: None,
            messages: Vec::new(),
        }
    }

    pub fn set_ticket(&mut self, ticket: impl Into<String>) {
        self.ticket = Some(ticket.into());
    }

    pub fn set_input(&mut self, input: Bytes) {
        self.input = Some(input);
    }

    /// Register a streaming callback. Buffering is bypassed for the rest of
    /// this session; anything already buffered is dropped.
    pub fn stream_to(&mut self, callback: ResultCallback) {
        self.sink = ResultSink::Streaming(callback);
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn func(&self) -> &str {
        &self.func
    }

    pub fn args(&self) -> &CommandArgs {
        &self.args
    }

    pub fn ticket(&self) -> Option<&str> {
        self.ticket.as_deref()
    }

    pub fn input(&self) -> Option<&[u8]> {
        self.input.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerTable {
        &mut self.handlers
    }

    /// Server messages of warning severity or above seen so far.
    pub fn server_messages(&self) -> &[ServerMessage] {
        &self.messages
    }

    /// Buffered results. Empty for streaming sessions.
    pub fn results(&self) -> &[FieldMap] {
        match &self.sink {
            ResultSink::Buffered(maps) => maps,
            ResultSink::Streaming(_) => &[],
        }
    }

    pub fn take_results(&mut self) -> Vec<FieldMap> {
        match &mut self.sink {
            ResultSink::Buffered(maps) => std::mem::take(maps),
            ResultSink::Streaming(_) => Vec::new(),
        }
    }

    /// The first fatal error, if the session failed.
    pub fn error(&self) -> Option<&WireError> {
        self.error.as_ref()
    }

    /// Terminal status, once the session has ended.
    pub fn outcome(&self) -> Option<Outcome> {
        match self.state {
            SessionState::Completed => {
                if self.messages.iter().any(|m| m.severity >= Severity::Error) {
                    Some(Outcome::Error)
                } else {
                    Some(Outcome::Ok)
                }
            }
            SessionState::Cancelled => Some(Outcome::Cancelled),
            SessionState::Failed => Some(Outcome::Error),
            _ => None,
        }
    }

    pub(crate) fn mark_dispatched(&mut self) {
        debug_assert_eq!(self.state, SessionState::Created);
        self.state = SessionState::Dispatched;
    }

    pub(crate) fn mark_awaiting(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::AwaitingResponse;
        }
    }

    /// Deliver one decoded result map.
    ///
    /// Returns `false` when delivery must stop: the cancel flag was observed
    /// (this is the cooperative cancellation point) or a streaming callback
    /// failed.
    pub fn deliver(&mut self, map: FieldMap) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if self.cancel.is_cancelled() {
            self.state = SessionState::Cancelled;
            return false;
        }
        self.state = SessionState::ProcessingResult;

        if let Some(msg) = ServerMessage::from_fields(&map) {
            if msg.severity >= Severity::Warning {
                self.messages.push(msg);
            }
        }

        match &mut self.sink {
            ResultSink::Buffered(maps) => maps.push(map),
            ResultSink::Streaming(callback) => {
                if let Err(err) = callback(map) {
                    tracing::warn!(func = %self.func, %err, "result callback failed; cancelling command");
                    self.state = SessionState::Cancelled;
                    return false;
                }
            }
        }

        self.state = SessionState::AwaitingResponse;
        true
    }

    pub(crate) fn complete(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Completed;
        }
    }

    pub(crate) fn fail(&mut self, err: WireError) {
        if !self.state.is_terminal() {
            self.error = Some(err);
            self.state = SessionState::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn result_map(pairs: &[(&str, &str)]) -> FieldMap {
        let mut map = FieldMap::new();
        for (k, v) in pairs {
            map.insert_text(k, v);
        }
        map
    }

    #[test]
    fn test_buffered_results_keep_order() {
        let mut session = CommandSession::new("files", CommandArgs::none());
        session.mark_dispatched();
        session.mark_awaiting();

        assert!(session.deliver(result_map(&[("depotFile", "//depot/a")])));
        assert!(session.deliver(result_map(&[("depotFile", "//depot/b")])));
        session.complete();

        let results = session.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].get("depotFile"), Some(b"//depot/a".as_ref()));
        assert_eq!(results[1].get("depotFile"), Some(b"//depot/b".as_ref()));
        assert_eq!(session.outcome(), Some(Outcome::Ok));
    }

    #[test]
    fn test_streaming_bypasses_buffering() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let seen = delivered.clone();

        let mut session = CommandSession::new("sync", CommandArgs::none());
        session.stream_to(Box::new(move |_map| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        session.mark_dispatched();

        assert!(session.deliver(result_map(&[("clientFile", "a.c")])));
        assert!(session.deliver(result_map(&[("clientFile", "b.c")])));
        session.complete();

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert!(session.results().is_empty());
    }

    #[test]
    fn test_cancel_observed_at_delivery_point() {
        let mut session = CommandSession::new("sync", CommandArgs::none());
        let token = session.cancel_token();
        session.mark_dispatched();

        assert!(session.deliver(result_map(&[("n", "1")])));
        token.cancel();
        assert!(!session.deliver(result_map(&[("n", "2")])));

        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(session.outcome(), Some(Outcome::Cancelled));
        // Only the pre-cancel result was kept.
        assert_eq!(session.results().len(), 1);
    }

    #[test]
    fn test_callback_error_is_implicit_cancellation() {
        let mut session = CommandSession::new("print", CommandArgs::none());
        session.stream_to(Box::new(|_map| Err(WireError::Cancelled)));
        session.mark_dispatched();

        assert!(!session.deliver(result_map(&[("data", "x")])));
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(session.outcome(), Some(Outcome::Cancelled));
    }

    #[test]
    fn test_failure_records_first_error_only() {
        let mut session = CommandSession::new("sync", CommandArgs::none());
        session.mark_dispatched();
        session.fail(WireError::Config("first".to_string()));
        session.fail(WireError::Config("second".to_string()));

        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.error().unwrap().to_string().contains("first"));
        assert!(!session.deliver(result_map(&[("n", "1")])));
    }

    #[test]
    fn test_session_owns_its_handler_slots() {
        let mut session = CommandSession::new("sync", CommandArgs::none());
        let id = session
            .handlers_mut()
            .insert(Handler::new("//depot/main/a.c"))
            .unwrap();
        session.handlers_mut().get_mut(id).unwrap().is_error = true;

        assert!(session.handlers().any_errored());
        assert_eq!(session.handlers().len(), 1);
    }

    #[test]
    fn test_server_error_is_data_not_failure() {
        let mut session = CommandSession::new("sync", CommandArgs::none());
        session.mark_dispatched();

        assert!(session.deliver(result_map(&[
            ("severity", "3"),
            ("code", "6532"),
            ("data", "file(s) up-to-date"),
        ])));
        session.complete();

        assert_eq!(session.outcome(), Some(Outcome::Error));
        let msg = &session.server_messages()[0];
        assert_eq!(msg.severity, Severity::Error);
        assert_eq!(msg.code, 6532);
        assert_eq!(msg.text, "file(s) up-to-date");
        assert!(session.error().is_none());
    }
}
