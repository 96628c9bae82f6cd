//! Releasing prepared statements and cursors.
//!
//! Closing something the server never allocated completes locally.

use tds_protocol::{ParamStatus, ProcId, RpcCall, RpcRequest};

use super::accumulator::{NoHooks, ResultAccumulator};
use super::{Encoded, Outbound, Response, Step};
use crate::error::CodecError;
use crate::message::Message;
use crate::session::{CursorId, SessionState};
use crate::statement::PreparedStatement;
use crate::tokens::{TokenReader, expect_tabular};

fn call_with_handle(proc_id: ProcId, handle: i32) -> Result<RpcCall, CodecError> {
    let mut call = RpcCall::new(proc_id);
    call.int_param(ParamStatus::empty(), Some(handle))?;
    Ok(call)
}

fn closed(results: &mut ResultAccumulator, message: Message, session: &mut SessionState) -> Step {
    let consumed = expect_tabular(message.packet_type).and_then(|()| {
        results.consume(&mut TokenReader::new(message.payload), session, &mut NoHooks)
    });
    if let Err(e) = consumed {
        return Step::Done(Err(e));
    }
    if results.completed_calls() == 0 {
        return Step::Pending;
    }
    Step::Done(results.finish().map(|_| Response::Closed))
}

/// `sp_unprepare` for a prepared statement.
#[derive(Debug)]
pub struct CloseStatementCommand {
    statement: PreparedStatement,
    results: ResultAccumulator,
}

impl CloseStatementCommand {
    pub(crate) fn new(statement: PreparedStatement) -> Self {
        Self {
            statement,
            results: ResultAccumulator::default(),
        }
    }

    pub(crate) fn encode(&self, session: &SessionState) -> Encoded {
        let handle = self.statement.handle();
        if handle <= 0 {
            return Encoded::Local(Ok(Response::Closed));
        }
        match call_with_handle(ProcId::Unprepare, handle) {
            Ok(call) => {
                // Later executions prepare again.
                self.statement.set_handle(0);
                Encoded::Send(Outbound::rpc(
                    RpcRequest::new(call).encode(session.transaction_descriptor),
                ))
            }
            Err(e) => Encoded::Local(Err(e)),
        }
    }

    pub(crate) fn on_message(&mut self, message: Message, session: &mut SessionState) -> Step {
        closed(&mut self.results, message, session)
    }
}

/// `sp_cursorclose` and `sp_cursorunprepare` for a server cursor.
///
/// The cursor is forgotten as soon as the request is built, whether or not
/// the server confirms.
#[derive(Debug)]
pub struct CloseCursorCommand {
    id: CursorId,
    results: ResultAccumulator,
}

impl CloseCursorCommand {
    pub(crate) fn new(id: CursorId) -> Self {
        Self {
            id,
            results: ResultAccumulator::default(),
        }
    }

    fn request(&self, session: &mut SessionState) -> Result<Option<RpcRequest>, CodecError> {
        let Some(state) = session.cursors.remove(&self.id) else {
            return Ok(None);
        };
        let mut calls = Vec::with_capacity(2);
        if state.has_server_cursor() {
            calls.push(call_with_handle(ProcId::CursorClose, state.server_cursor_id)?);
        }
        if state.prepared_handle != 0 {
            calls.push(call_with_handle(
                ProcId::CursorUnprepare,
                state.prepared_handle,
            )?);
        }
        tracing::debug!(
            cursor = self.id,
            server_cursor = state.server_cursor_id,
            handle = state.prepared_handle,
            calls = calls.len(),
            "closing cursor"
        );

        let mut calls = calls.into_iter();
        Ok(calls.next().map(|first| {
            let mut request = RpcRequest::new(first);
            for call in calls {
                request.push(call);
            }
            request
        }))
    }

    pub(crate) fn encode(&self, session: &mut SessionState) -> Encoded {
        match self.request(session) {
            Ok(Some(request)) => Encoded::Send(Outbound::rpc(
                request.encode(session.transaction_descriptor),
            )),
            Ok(None) => Encoded::Local(Ok(Response::Closed)),
            Err(e) => Encoded::Local(Err(e)),
        }
    }

    pub(crate) fn on_message(&mut self, message: Message, session: &mut SessionState) -> Step {
        closed(&mut self.results, message, session)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::CursorState;
    use mssql_testing::rpc::RpcRequestView;
    use mssql_testing::tokens::TokenStream;
    use tds_protocol::{DoneStatus, PacketType};

    #[test]
    fn test_unprepared_statement_closes_locally() {
        let cmd = CloseStatementCommand::new(PreparedStatement::new("SELECT 1"));
        assert!(matches!(
            cmd.encode(&SessionState::default()),
            Encoded::Local(Ok(Response::Closed))
        ));
    }

    #[test]
    fn test_prepared_statement_sends_unprepare() {
        let stmt = PreparedStatement::new("SELECT 1");
        stmt.set_handle(12);
        let mut cmd = CloseStatementCommand::new(stmt.clone());
        let Encoded::Send(out) = cmd.encode(&SessionState::default()) else {
            unreachable!("expected sp_unprepare");
        };
        let view = RpcRequestView::parse(&out.payload).unwrap();
        assert_eq!(view.calls[0].proc_id, ProcId::Unprepare as u16);
        assert_eq!(view.calls[0].params[0].int(), Some(12));
        assert!(!stmt.is_prepared());

        let mut session = SessionState::default();
        let status = TokenStream::new().return_status(0).build();
        let step = cmd.on_message(Message::new(PacketType::TabularResult, status), &mut session);
        assert!(matches!(step, Step::Pending));

        let done = TokenStream::new().done_proc(DoneStatus::FINAL, 0).build();
        let step = cmd.on_message(Message::new(PacketType::TabularResult, done), &mut session);
        assert!(matches!(step, Step::Done(Ok(Response::Closed))));
    }

    #[test]
    fn test_unknown_or_unallocated_cursor_closes_locally() {
        let mut session = SessionState::default();
        let cmd = CloseCursorCommand::new(8);
        assert!(matches!(cmd.encode(&mut session), Encoded::Local(Ok(Response::Closed))));

        session.cursors.insert(8, CursorState::default());
        assert!(matches!(cmd.encode(&mut session), Encoded::Local(Ok(Response::Closed))));
        assert!(session.cursors.is_empty());
    }

    #[test]
    fn test_open_cursor_sends_close_and_unprepare() {
        let mut session = SessionState::default();
        session.cursors.insert(
            2,
            CursorState {
                prepared_handle: 5,
                server_cursor_id: 180_150_003,
                ..Default::default()
            },
        );
        let Encoded::Send(out) = CloseCursorCommand::new(2).encode(&mut session) else {
            unreachable!("expected a close request");
        };
        let view = RpcRequestView::parse(&out.payload).unwrap();
        assert_eq!(view.calls.len(), 2);
        assert_eq!(view.calls[0].proc_id, ProcId::CursorClose as u16);
        assert_eq!(view.calls[0].params[0].int(), Some(180_150_003));
        assert_eq!(view.calls[1].proc_id, ProcId::CursorUnprepare as u16);
        assert_eq!(view.calls[1].params[0].int(), Some(5));
        assert!(session.cursors.is_empty());
    }

    #[test]
    fn test_directly_executed_cursor_only_unprepares() {
        let mut session = SessionState::default();
        session.cursors.insert(
            3,
            CursorState {
                prepared_handle: 5,
                executed_directly: true,
                ..Default::default()
            },
        );
        let Encoded::Send(out) = CloseCursorCommand::new(3).encode(&mut session) else {
            unreachable!("expected sp_cursorunprepare");
        };
        let view = RpcRequestView::parse(&out.payload).unwrap();
        assert_eq!(view.calls.len(), 1);
        assert_eq!(view.calls[0].proc_id, ProcId::CursorUnprepare as u16);
    }
}
