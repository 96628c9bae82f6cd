//! Shared result accumulation for tabular responses.

use std::sync::Arc;

use tds_protocol::{LoginAck, ServerMessage};

use crate::error::{CodecError, ServerError};
use crate::row::{Column, InfoMessage, QueryResult, ResultSet};
use crate::session::SessionState;
use crate::tokens::{DoneKind, ReturnValue, Token, TokenReader};

/// Command-specific reactions to tokens the accumulator does not own.
pub(crate) trait TokenHooks {
    /// An output parameter arrived.
    fn return_value(&mut self, _value: &ReturnValue, _session: &mut SessionState) {}

    /// An INFO message arrived.
    fn info(&mut self, _message: &ServerMessage, _session: &mut SessionState) {}

    /// A row arrived.
    fn row(&mut self, _session: &mut SessionState) {}

    /// The server acknowledged the login.
    fn login_ack(&mut self, _ack: &LoginAck) {}
}

/// Hooks that ignore everything.
pub(crate) struct NoHooks;

impl TokenHooks for NoHooks {}

/// Collects result sets, messages and the first server error of a command.
///
/// An ERROR token does not stop decoding: the rest of the message is still
/// consumed and the error is reported when the command completes.
///
/// Completion signals are counted across messages: `finals` counts DONE and
/// DONEPROC tokens without the MORE bit, `procs` counts DONEPROC tokens, one
/// per finished RPC call.
#[derive(Debug, Default)]
pub(crate) struct ResultAccumulator {
    result: QueryResult,
    current: ResultSet,
    error: Option<ServerError>,
    finals: usize,
    procs: usize,
}

impl ResultAccumulator {
    /// Decode every token in `reader`.
    pub(crate) fn consume(
        &mut self,
        reader: &mut TokenReader,
        session: &mut SessionState,
        hooks: &mut impl TokenHooks,
    ) -> Result<(), CodecError> {
        while let Some(token) = reader.next_token()? {
            match token {
                Token::ColMetaData(descriptor) => {
                    self.flush();
                    self.current.columns = Some(descriptor.columns().clone());
                }
                Token::Row(row) => {
                    hooks.row(session);
                    self.current.rows.push(row);
                }
                Token::Done(kind, done) => {
                    if let Some(count) = done.count() {
                        *self.current.rows_affected.get_or_insert(0) += count;
                    }
                    self.flush();
                    if kind == DoneKind::DoneProc {
                        self.procs += 1;
                    }
                    if kind != DoneKind::DoneInProc && !done.has_more() {
                        self.finals += 1;
                    }
                }
                Token::Error(message) => {
                    tracing::debug!(
                        number = message.number,
                        class = message.class,
                        message = %message.message,
                        "server error"
                    );
                    if self.error.is_none() {
                        self.error = Some(message.into());
                    }
                }
                Token::Info(message) => {
                    if message.class > 10 {
                        tracing::warn!(
                            number = message.number,
                            class = message.class,
                            message = %message.message,
                            "server message"
                        );
                    } else {
                        tracing::debug!(number = message.number, message = %message.message, "server info");
                    }
                    hooks.info(&message, session);
                    self.result.messages.push(InfoMessage {
                        number: message.number,
                        class: message.class,
                        message: message.message,
                    });
                }
                Token::ReturnValue(value) => hooks.return_value(&value, session),
                Token::ReturnStatus(status) => self.result.return_status = Some(status),
                Token::EnvChange(change) => session.apply_env_change(&change),
                Token::LoginAck(ack) => hooks.login_ack(&ack),
                Token::Order(_) => {}
            }
        }
        Ok(())
    }

    /// Final DONE or DONEPROC tokens seen so far.
    pub(crate) fn finals(&self) -> usize {
        self.finals
    }

    /// RPC calls the server reported complete so far.
    pub(crate) fn completed_calls(&self) -> usize {
        self.procs
    }

    fn flush(&mut self) {
        if self.current.columns.is_some() || self.current.rows_affected.is_some() {
            self.result
                .result_sets
                .push(std::mem::take(&mut self.current));
        }
    }

    /// Drop the result sets and completion counts collected so far and start
    /// a new result set whose rows arrive without metadata.
    pub(crate) fn restart(&mut self, columns: Option<Arc<[Column]>>) {
        self.result.result_sets.clear();
        self.finals = 0;
        self.procs = 0;
        self.current = ResultSet {
            columns,
            ..ResultSet::default()
        };
    }

    /// Whether an ERROR token has been seen.
    pub(crate) fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Final outcome: the first server error, or everything collected.
    pub(crate) fn finish(&mut self) -> Result<QueryResult, CodecError> {
        self.flush();
        let result = std::mem::take(&mut self.result);
        match self.error.take() {
            Some(error) => Err(CodecError::Server(error)),
            None => Ok(result),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mssql_testing::tokens::{MockColumn, ScalarValue, TokenStream};
    use tds_protocol::DoneStatus;

    fn run(payload: bytes::Bytes) -> (ResultAccumulator, Result<QueryResult, CodecError>) {
        let mut acc = ResultAccumulator::default();
        let mut session = SessionState::default();
        acc.consume(&mut TokenReader::new(payload), &mut session, &mut NoHooks)
            .unwrap();
        let result = acc.finish();
        (acc, result)
    }

    #[test]
    fn test_two_result_sets() {
        let payload = TokenStream::new()
            .col_metadata(&[MockColumn::int("a")])
            .row(&[ScalarValue::Int(1)])
            .done(DoneStatus::COUNT | DoneStatus::MORE, 1)
            .col_metadata(&[MockColumn::int("b")])
            .row(&[ScalarValue::Int(2)])
            .row(&[ScalarValue::Int(3)])
            .done(DoneStatus::COUNT, 2)
            .build();

        let (acc, result) = run(payload);
        let result = result.unwrap();
        assert_eq!(acc.finals(), 1);
        assert_eq!(acc.completed_calls(), 0);
        assert_eq!(result.result_sets.len(), 2);
        assert_eq!(result.result_sets[1].rows.len(), 2);
        assert_eq!(result.rows_affected(), 3);
    }

    #[test]
    fn test_error_keeps_decoding_rows() {
        let payload = TokenStream::new()
            .col_metadata(&[MockColumn::int("a")])
            .error(515, 16, "first")
            .row(&[ScalarValue::Int(1)])
            .error(547, 16, "second")
            .row(&[ScalarValue::Int(2)])
            .done(DoneStatus::ERROR, 0)
            .build();

        let mut acc = ResultAccumulator::default();
        let mut session = SessionState::default();
        let mut reader = TokenReader::new(payload);
        acc.consume(&mut reader, &mut session, &mut NoHooks).unwrap();
        assert!(reader.is_empty());
        acc.flush();
        assert_eq!(acc.result.result_sets[0].rows.len(), 2);

        match acc.finish() {
            Err(CodecError::Server(e)) => {
                assert_eq!(e.number, 515);
                assert_eq!(e.message, "first");
            }
            other => unreachable!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn test_done_in_proc_is_not_final() {
        let payload = TokenStream::new()
            .done_in_proc(DoneStatus::COUNT, 4)
            .done_proc(DoneStatus::FINAL, 0)
            .build();
        let (acc, result) = run(payload);
        assert_eq!(acc.finals(), 1);
        assert_eq!(acc.completed_calls(), 1);
        assert_eq!(result.unwrap().rows_affected(), 4);
    }

    #[test]
    fn test_completion_counts_span_messages() {
        let mut acc = ResultAccumulator::default();
        let mut session = SessionState::default();
        let first = TokenStream::new()
            .done_in_proc(DoneStatus::COUNT, 1)
            .done_proc(DoneStatus::MORE, 0)
            .build();
        acc.consume(&mut TokenReader::new(first), &mut session, &mut NoHooks)
            .unwrap();
        assert_eq!(acc.completed_calls(), 1);
        assert_eq!(acc.finals(), 0);

        let second = TokenStream::new().done_proc(DoneStatus::FINAL, 0).build();
        acc.consume(&mut TokenReader::new(second), &mut session, &mut NoHooks)
            .unwrap();
        assert_eq!(acc.completed_calls(), 2);
        assert_eq!(acc.finals(), 1);

        acc.restart(None);
        assert_eq!(acc.completed_calls(), 0);
        assert_eq!(acc.finals(), 0);
    }

    #[test]
    fn test_env_change_reaches_session() {
        let payload = TokenStream::new()
            .env_change(&tds_protocol::EnvChange::BeginTransaction(42))
            .done(DoneStatus::FINAL, 0)
            .build();
        let mut acc = ResultAccumulator::default();
        let mut session = SessionState::default();
        acc.consume(&mut TokenReader::new(payload), &mut session, &mut NoHooks)
            .unwrap();
        assert_eq!(session.transaction_descriptor, 42);
    }
}
