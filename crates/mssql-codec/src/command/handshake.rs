//! PRELOGIN and LOGIN7.

use tds_protocol::{Login7, LoginAck, PacketType, PreLogin};

use super::accumulator::{ResultAccumulator, TokenHooks};
use super::{Encoded, Outbound, Response, Step, send_or_fail};
use crate::error::CodecError;
use crate::message::Message;
use crate::session::{ServerInfo, SessionState};
use crate::tokens::{TokenReader, expect_tabular};

/// PRELOGIN option exchange.
#[derive(Debug)]
pub struct PreLoginCommand {
    request: PreLogin,
}

impl PreLoginCommand {
    pub(crate) fn new(request: PreLogin) -> Self {
        Self { request }
    }

    pub(crate) fn encode(&self) -> Encoded {
        Encoded::Send(Outbound::new(PacketType::PreLogin, self.request.encode()))
    }

    pub(crate) fn on_message(&mut self, message: Message) -> Step {
        // Servers answer PRELOGIN with either packet type.
        if !matches!(
            message.packet_type,
            PacketType::PreLogin | PacketType::TabularResult
        ) {
            return Step::Done(Err(CodecError::UnexpectedMessage {
                expected: PacketType::PreLogin,
                actual: message.packet_type,
            }));
        }
        let step = PreLogin::decode(&message.payload)
            .map(|response| {
                tracing::info!(
                    encryption = ?response.encryption,
                    server_version = ?response.server_version,
                    "prelogin response"
                );
                Response::PreLogin(response)
            })
            .map_err(CodecError::from);
        Step::Done(step)
    }
}

/// LOGIN7 authentication.
#[derive(Debug)]
pub struct LoginCommand {
    login: Login7,
    results: ResultAccumulator,
    ack: Option<ServerInfo>,
}

struct AckHook<'a>(&'a mut Option<ServerInfo>);

impl TokenHooks for AckHook<'_> {
    fn login_ack(&mut self, ack: &LoginAck) {
        *self.0 = Some(ServerInfo::from(ack));
    }
}

impl LoginCommand {
    pub(crate) fn new(login: Login7) -> Self {
        Self {
            login,
            results: ResultAccumulator::default(),
            ack: None,
        }
    }

    pub(crate) fn encode(&self) -> Encoded {
        send_or_fail(
            PacketType::Tds7Login,
            self.login.encode().map_err(CodecError::from),
        )
    }

    pub(crate) fn on_message(&mut self, message: Message, session: &mut SessionState) -> Step {
        if let Err(e) = expect_tabular(message.packet_type) {
            return Step::Done(Err(e));
        }
        let mut reader = TokenReader::new(message.payload);
        if let Err(e) = self
            .results
            .consume(&mut reader, session, &mut AckHook(&mut self.ack))
        {
            return Step::Done(Err(e));
        }

        let outcome = self.results.finish();
        let Some(info) = self.ack.take() else {
            let reason = match outcome {
                Err(CodecError::Server(e)) => e.message,
                _ => "server sent no LOGINACK".to_string(),
            };
            return Step::Done(Err(CodecError::AuthenticationFailed(reason)));
        };
        if let Err(e) = outcome {
            return Step::Done(Err(e));
        }

        tracing::info!(
            server = %info.prog_name,
            version = %info.server_version,
            tds_version = ?info.tds_version,
            packet_size = session.packet_size,
            "login acknowledged"
        );
        session.server = Some(info.clone());
        Step::Done(Ok(Response::Login(info)))
    }
}
