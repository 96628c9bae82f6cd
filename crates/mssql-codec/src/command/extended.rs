//! Prepared statement execution over `sp_prepexec` and `sp_execute`.
//!
//! A statement is prepared on the server by its first execution:
//! `sp_prepexec` takes an output slot for the handle, the parameter
//! declarations, the SQL text and the values, and returns the handle as a
//! RETURNVALUE. Later executions send `sp_execute` with the handle only.

use std::collections::VecDeque;

use mssql_types::{SqlValue, encode_params, param_definitions};
use tds_protocol::{ParamStatus, ProcId, RpcCall, RpcRequest};

use super::accumulator::{ResultAccumulator, TokenHooks};
use super::{Encoded, Outbound, Response, Step};
use crate::error::CodecError;
use crate::message::Message;
use crate::session::SessionState;
use crate::statement::PreparedStatement;
use crate::tokens::{ReturnValue, TokenReader, expect_tabular};

/// `sp_prepexec` call for `statement` with `params`.
pub(crate) fn prep_exec_call(
    statement: &PreparedStatement,
    params: &[SqlValue],
) -> Result<RpcCall, CodecError> {
    let mut call = RpcCall::new(ProcId::PrepExec);
    call.int_param(ParamStatus::BY_REF, Some(statement.handle()))?;
    call.nvarchar_param(&param_definitions(params))?;
    call.nvarchar_param(statement.sql())?;
    encode_params(call.params_mut(), params)?;
    Ok(call)
}

/// `sp_execute` call for an already prepared handle.
pub(crate) fn execute_call(handle: i32, params: &[SqlValue]) -> Result<RpcCall, CodecError> {
    let mut call = RpcCall::new(ProcId::Execute);
    call.int_param(ParamStatus::empty(), Some(handle))?;
    encode_params(call.params_mut(), params)?;
    Ok(call)
}

/// Captures the handle returned by `sp_prepexec`.
struct HandleHook<'a>(&'a PreparedStatement);

impl TokenHooks for HandleHook<'_> {
    fn return_value(&mut self, value: &ReturnValue, _session: &mut SessionState) {
        let SqlValue::Int(handle) = value.value else {
            return;
        };
        if self.0.is_prepared() {
            if handle != self.0.handle() {
                tracing::warn!(
                    kept = self.0.handle(),
                    ignored = handle,
                    "statement already prepared"
                );
            }
            return;
        }
        tracing::debug!(handle, sql = self.0.sql(), "statement prepared");
        self.0.set_handle(handle);
    }
}

fn consume(
    results: &mut ResultAccumulator,
    statement: &PreparedStatement,
    message: Message,
    session: &mut SessionState,
) -> Result<(), CodecError> {
    expect_tabular(message.packet_type)?;
    results.consume(
        &mut TokenReader::new(message.payload),
        session,
        &mut HandleHook(statement),
    )
}

/// One execution of a prepared statement.
///
/// The first execution holds back later requests until its handle arrives.
#[derive(Debug)]
pub struct ExecuteCommand {
    statement: PreparedStatement,
    params: Vec<SqlValue>,
    results: ResultAccumulator,
    preparing: bool,
}

impl ExecuteCommand {
    pub(crate) fn new(statement: PreparedStatement, params: Vec<SqlValue>) -> Self {
        Self {
            statement,
            params,
            results: ResultAccumulator::default(),
            preparing: false,
        }
    }

    pub(crate) fn holds_back_requests(&self) -> bool {
        self.preparing
    }

    pub(crate) fn encode(&mut self, session: &SessionState) -> Encoded {
        let preparing = !self.statement.is_prepared();
        let call = if preparing {
            prep_exec_call(&self.statement, &self.params)
        } else {
            execute_call(self.statement.handle(), &self.params)
        };
        match call {
            Ok(call) => {
                self.preparing = preparing;
                Encoded::Send(Outbound::rpc(
                    RpcRequest::new(call).encode(session.transaction_descriptor),
                ))
            }
            Err(e) => Encoded::Local(Err(e)),
        }
    }

    pub(crate) fn on_message(&mut self, message: Message, session: &mut SessionState) -> Step {
        if let Err(e) = consume(&mut self.results, &self.statement, message, session) {
            self.preparing = false;
            return Step::Done(Err(e));
        }
        if self.results.completed_calls() == 0 {
            return Step::Pending;
        }
        self.preparing = false;
        Step::Done(self.results.finish().map(Response::Query))
    }
}

/// A prepared statement executed once per parameter set.
///
/// With one set, or a statement already prepared, everything goes out in a
/// single request. Otherwise the first set is sent with `sp_prepexec` and,
/// once the handle is known, the remaining sets follow as one request of
/// `sp_execute` calls. Each phase ends when the server has reported every
/// call it carried complete with a DONEPROC. Later requests wait for the
/// `sp_prepexec` phase.
#[derive(Debug)]
pub struct ExecuteBatchCommand {
    statement: PreparedStatement,
    batch: VecDeque<Vec<SqlValue>>,
    results: ResultAccumulator,
    follow_up: bool,
    preparing: bool,
    calls_sent: usize,
}

impl ExecuteBatchCommand {
    pub(crate) fn new(statement: PreparedStatement, batch: Vec<Vec<SqlValue>>) -> Self {
        Self {
            statement,
            batch: batch.into(),
            results: ResultAccumulator::default(),
            follow_up: false,
            preparing: false,
            calls_sent: 0,
        }
    }

    pub(crate) fn holds_back_requests(&self) -> bool {
        self.follow_up || self.preparing
    }

    fn execute_request(&mut self, session: &SessionState) -> Result<Outbound, CodecError> {
        let handle = self.statement.handle();
        let mut request: Option<RpcRequest> = None;
        for params in self.batch.drain(..) {
            let call = execute_call(handle, &params)?;
            match request.as_mut() {
                Some(request) => request.push(call),
                None => request = Some(RpcRequest::new(call)),
            }
        }
        let request = request.ok_or(CodecError::EmptyBatch)?;
        self.calls_sent += request.len();
        tracing::debug!(calls = request.len(), handle, "sending batched sp_execute");
        Ok(Outbound::rpc(request.encode(session.transaction_descriptor)))
    }

    pub(crate) fn encode(&mut self, session: &SessionState) -> Encoded {
        if self.batch.is_empty() {
            return Encoded::Local(Err(CodecError::EmptyBatch));
        }
        if self.statement.is_prepared() {
            return match self.execute_request(session) {
                Ok(out) => Encoded::Send(out),
                Err(e) => Encoded::Local(Err(e)),
            };
        }

        let Some(first) = self.batch.pop_front() else {
            return Encoded::Local(Err(CodecError::EmptyBatch));
        };
        match prep_exec_call(&self.statement, &first) {
            Ok(call) => {
                self.follow_up = !self.batch.is_empty();
                self.preparing = true;
                self.calls_sent = 1;
                Encoded::Send(Outbound::rpc(
                    RpcRequest::new(call).encode(session.transaction_descriptor),
                ))
            }
            Err(e) => Encoded::Local(Err(e)),
        }
    }

    pub(crate) fn on_message(&mut self, message: Message, session: &mut SessionState) -> Step {
        if let Err(e) = consume(&mut self.results, &self.statement, message, session) {
            self.follow_up = false;
            self.preparing = false;
            return Step::Done(Err(e));
        }
        if self.results.completed_calls() < self.calls_sent {
            return Step::Pending;
        }
        self.preparing = false;
        if !self.follow_up {
            return Step::Done(self.results.finish().map(Response::Query));
        }

        self.follow_up = false;
        if !self.statement.is_prepared() {
            // sp_prepexec failed; the remaining sets have nothing to run.
            self.batch.clear();
            return Step::Done(self.results.finish().map(Response::Query));
        }
        match self.execute_request(session) {
            Ok(out) => Step::Send(out),
            Err(e) => Step::Done(Err(e)),
        }
    }
}
