//! Server cursor protocol.
//!
//! The first query on a cursor id opens the cursor with `sp_cursorprepexec`
//! and then fetches the first page with `sp_cursorfetch`. Later queries on
//! the same id fetch the next page. Fetches ask for no metadata: their rows
//! are decoded with the descriptor captured when the cursor was opened.
//!
//! Servers run some statements directly instead of opening a cursor and
//! say so with INFO 16954. The rows then arrive with the open response and
//! no fetch is ever sent.

use mssql_types::{SqlValue, encode_params, param_definitions};
use tds_protocol::{ParamStatus, ProcId, RpcCall, RpcOptionFlags, RpcRequest, ServerMessage};

use super::accumulator::{ResultAccumulator, TokenHooks};
use super::{Encoded, Outbound, Response, Step};
use crate::error::CodecError;
use crate::message::Message;
use crate::row::QueryResult;
use crate::session::{CursorId, CursorState, SessionState};
use crate::tokens::{ReturnValue, TokenReader, expect_tabular};

/// INFO number sent when a statement ran without a server cursor.
pub const EXECUTED_DIRECTLY: i32 = 16954;

const SCROLLOPT_STATIC: i32 = 0x0008;
const SCROLLOPT_PARAMETERIZED: i32 = 0x1000;
const CCOPT_READ_ONLY: i32 = 0x0001;
const CCOPT_ALLOW_DIRECT: i32 = 0x2000;
const FETCH_NEXT: i32 = 0x0002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Fetch,
}

/// One page of a cursor query.
#[derive(Debug)]
pub struct CursorCommand {
    id: CursorId,
    sql: String,
    params: Vec<SqlValue>,
    fetch_size: u32,
    phase: Phase,
    results: ResultAccumulator,
}

struct CursorHooks(CursorId);

impl CursorHooks {
    fn state<'a>(&self, session: &'a mut SessionState) -> &'a mut CursorState {
        session.cursors.entry(self.0).or_default()
    }
}

impl TokenHooks for CursorHooks {
    fn return_value(&mut self, value: &ReturnValue, session: &mut SessionState) {
        if let SqlValue::Int(v) = value.value {
            self.state(session).assign_output(v);
        }
    }

    fn info(&mut self, message: &ServerMessage, session: &mut SessionState) {
        if message.number == EXECUTED_DIRECTLY {
            tracing::debug!(cursor = self.0, "statement executed without a server cursor");
            self.state(session).executed_directly = true;
        }
    }

    fn row(&mut self, session: &mut SessionState) {
        self.state(session).rows_fetched += 1;
    }
}

impl CursorCommand {
    pub(crate) fn new(
        id: CursorId,
        sql: impl Into<String>,
        params: Vec<SqlValue>,
        fetch_size: u32,
    ) -> Self {
        Self {
            id,
            sql: sql.into(),
            params,
            fetch_size,
            phase: Phase::Open,
            results: ResultAccumulator::default(),
        }
    }

    pub(crate) fn holds_back_requests(&self) -> bool {
        self.phase == Phase::Open
    }

    fn prep_exec_call(&self) -> Result<RpcCall, CodecError> {
        let scroll = if self.params.is_empty() {
            SCROLLOPT_STATIC
        } else {
            SCROLLOPT_PARAMETERIZED | SCROLLOPT_STATIC
        };
        let mut call = RpcCall::new(ProcId::CursorPrepExec);
        call.int_param(ParamStatus::BY_REF, Some(0))?;
        call.int_param(ParamStatus::BY_REF, Some(0))?;
        call.nvarchar_param(&param_definitions(&self.params))?;
        call.nvarchar_param(&self.sql)?;
        call.int_param(ParamStatus::empty(), Some(scroll))?;
        call.int_param(ParamStatus::empty(), Some(CCOPT_READ_ONLY | CCOPT_ALLOW_DIRECT))?;
        call.int_param(ParamStatus::BY_REF, Some(0))?;
        encode_params(call.params_mut(), &self.params)?;
        Ok(call)
    }

    fn fetch_call(&self, server_cursor_id: i32) -> Result<RpcCall, CodecError> {
        let rows = i32::try_from(self.fetch_size).unwrap_or(i32::MAX);
        let mut call = RpcCall::new(ProcId::CursorFetch).with_options(RpcOptionFlags::NO_METADATA);
        call.int_param(ParamStatus::empty(), Some(server_cursor_id))?;
        call.int_param(ParamStatus::empty(), Some(FETCH_NEXT))?;
        call.int_param(ParamStatus::empty(), Some(0))?;
        call.int_param(ParamStatus::empty(), Some(rows))?;
        Ok(call)
    }

    /// Build the fetch request and move to the fetch phase.
    fn send_fetch(&mut self, session: &mut SessionState) -> Result<Outbound, CodecError> {
        let state = session.cursors.entry(self.id).or_default();
        let call = self.fetch_call(state.server_cursor_id)?;
        state.fetch_sent = true;
        self.phase = Phase::Fetch;
        self.results
            .restart(state.descriptor.as_ref().map(|d| d.columns().clone()));
        tracing::debug!(
            cursor = self.id,
            server_cursor = state.server_cursor_id,
            fetch_size = self.fetch_size,
            "fetching"
        );
        Ok(Outbound::rpc(
            RpcRequest::new(call).encode(session.transaction_descriptor),
        ))
    }

    pub(crate) fn encode(&mut self, session: &mut SessionState) -> Encoded {
        let state = session.cursors.entry(self.id).or_default();
        if state.prepared_handle == 0 {
            return match self.prep_exec_call() {
                Ok(call) => Encoded::Send(Outbound::rpc(
                    RpcRequest::new(call).encode(session.transaction_descriptor),
                )),
                Err(e) => Encoded::Local(Err(e)),
            };
        }
        if state.executed_directly || !state.has_server_cursor() {
            self.phase = Phase::Fetch;
            return Encoded::Local(Ok(Response::Cursor {
                result: QueryResult::default(),
                has_more: false,
            }));
        }
        match self.send_fetch(session) {
            Ok(out) => Encoded::Send(out),
            Err(e) => Encoded::Local(Err(e)),
        }
    }

    pub(crate) fn on_message(&mut self, message: Message, session: &mut SessionState) -> Step {
        if let Err(e) = expect_tabular(message.packet_type) {
            self.phase = Phase::Fetch;
            return Step::Done(Err(e));
        }

        let cached = session
            .cursors
            .get(&self.id)
            .and_then(|s| s.descriptor.clone());
        let mut reader = TokenReader::for_cursor(message.payload, cached);
        if let Err(e) = self
            .results
            .consume(&mut reader, session, &mut CursorHooks(self.id))
        {
            self.phase = Phase::Fetch;
            return Step::Done(Err(e));
        }

        let state = session.cursors.entry(self.id).or_default();
        if let Some(descriptor) = reader.descriptor() {
            state.descriptor = Some(descriptor.clone());
        }
        if self.results.completed_calls() == 0 {
            return Step::Pending;
        }

        if self.phase == Phase::Open {
            tracing::debug!(
                cursor = self.id,
                handle = state.prepared_handle,
                server_cursor = state.server_cursor_id,
                rows_total = state.rows_total,
                "cursor opened"
            );
            let open_only =
                state.executed_directly || !state.has_server_cursor() || self.results.has_error();
            if !open_only {
                return match self.send_fetch(session) {
                    Ok(out) => Step::Send(out),
                    Err(e) => {
                        self.phase = Phase::Fetch;
                        Step::Done(Err(e))
                    }
                };
            }
            self.phase = Phase::Fetch;
        }

        let has_more = session.cursors.get(&self.id).is_some_and(CursorState::has_more);
        Step::Done(
            self.results
                .finish()
                .map(|result| Response::Cursor { result, has_more }),
        )
    }
}
