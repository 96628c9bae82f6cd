//! Simple SQL batch.

use tds_protocol::{PacketType, encode_sql_batch};

use super::accumulator::{NoHooks, ResultAccumulator};
use super::{Encoded, Outbound, Response, Step};
use crate::message::Message;
use crate::session::SessionState;
use crate::tokens::{TokenReader, expect_tabular};

/// SQL text sent as a SQLBatch message.
#[derive(Debug)]
pub struct SqlBatchCommand {
    sql: String,
    results: ResultAccumulator,
}

impl SqlBatchCommand {
    pub(crate) fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            results: ResultAccumulator::default(),
        }
    }

    pub(crate) fn encode(&self, session: &SessionState) -> Encoded {
        Encoded::Send(Outbound::new(
            PacketType::SqlBatch,
            encode_sql_batch(&self.sql, session.transaction_descriptor),
        ))
    }

    pub(crate) fn on_message(&mut self, message: Message, session: &mut SessionState) -> Step {
        let consumed = expect_tabular(message.packet_type).and_then(|()| {
            self.results
                .consume(&mut TokenReader::new(message.payload), session, &mut NoHooks)
        });
        if let Err(e) = consumed {
            return Step::Done(Err(e));
        }
        if self.results.finals() == 0 {
            return Step::Pending;
        }
        Step::Done(self.results.finish().map(Response::Query))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mssql_testing::tokens::{MockColumn, ScalarValue, TokenStream};
    use tds_protocol::sql_batch::ALL_HEADERS_LEN;
    use tds_protocol::DoneStatus;

    #[test]
    fn test_encode_carries_transaction_descriptor() {
        let mut session = SessionState::default();
        session.transaction_descriptor = 0x0102_0304_0506_0708;
        let Encoded::Send(out) = SqlBatchCommand::new("SELECT 1").encode(&session) else {
            unreachable!("batch always sends");
        };
        assert_eq!(out.packet_type, PacketType::SqlBatch);
        assert_eq!(&out.payload[10..18], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(out.payload.len(), ALL_HEADERS_LEN + "SELECT 1".len() * 2);
    }

    #[test]
    fn test_rows_and_count() {
        let payload = TokenStream::new()
            .col_metadata(&[MockColumn::int("n"), MockColumn::nvarchar("s", 10)])
            .row(&[ScalarValue::Int(1), ScalarValue::String("a".into())])
            .nbc_row(&[ScalarValue::Int(2), ScalarValue::Null])
            .done(DoneStatus::COUNT, 2)
            .build();

        let mut session = SessionState::default();
        let mut cmd = SqlBatchCommand::new("SELECT n, s FROM t");
        let Step::Done(Ok(Response::Query(result))) =
            cmd.on_message(Message::new(PacketType::TabularResult, payload), &mut session)
        else {
            unreachable!("expected a query result");
        };

        assert_eq!(result.rows().len(), 2);
        assert_eq!(result.rows()[0].get::<String>(1).unwrap(), "a");
        assert_eq!(result.rows()[1].try_get::<String>(1).unwrap(), None);
        assert_eq!(result.rows_affected(), 2);
    }

    #[test]
    fn test_waits_for_final_done() {
        let first = TokenStream::new()
            .col_metadata(&[MockColumn::int("n")])
            .row(&[ScalarValue::Int(1)])
            .done(DoneStatus::COUNT | DoneStatus::MORE, 1)
            .build();
        let second = TokenStream::new().done(DoneStatus::COUNT, 0).build();

        let mut session = SessionState::default();
        let mut cmd = SqlBatchCommand::new("SELECT n FROM t; DELETE FROM t WHERE 1 = 0");
        assert!(matches!(
            cmd.on_message(Message::new(PacketType::TabularResult, first), &mut session),
            Step::Pending
        ));
        let Step::Done(Ok(Response::Query(result))) =
            cmd.on_message(Message::new(PacketType::TabularResult, second), &mut session)
        else {
            unreachable!("expected a query result");
        };
        assert_eq!(result.rows().len(), 1);
        assert_eq!(result.result_sets.len(), 2);
    }
}
