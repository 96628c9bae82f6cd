//! Connection driver task.
//!
//! One task owns the transport and the [`SessionState`]. Callers submit
//! commands through a [`DriverHandle`]; the driver writes each request as
//! soon as it arrives and queues the command. Responses come back in send
//! order, so the head of the queue always owns the next message.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::command::{Command, Encoded, Response, Step};
use crate::connection::Connection;
use crate::error::CodecError;
use crate::message::Message;
use crate::session::SessionState;

/// Default request channel capacity.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

type Responder = oneshot::Sender<Result<Response, CodecError>>;

struct Request {
    command: Command,
    respond: Responder,
}

struct InFlight {
    command: Command,
    respond: Responder,
}

/// Cloneable handle for submitting commands to a driver.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    requests: mpsc::Sender<Request>,
}

/// A submitted command whose response has not been awaited yet.
#[derive(Debug)]
#[must_use = "the response is lost unless awaited"]
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<Response, CodecError>>,
}

impl PendingResponse {
    /// Wait for the command's outcome.
    pub async fn wait(self) -> Result<Response, CodecError> {
        self.rx.await.map_err(|_| CodecError::ConnectionClosed)?
    }
}

impl DriverHandle {
    /// Queue a command without waiting for its response.
    ///
    /// Commands submitted from one task are written in submission order,
    /// which lets several requests be in flight at once.
    pub async fn submit(&self, command: Command) -> Result<PendingResponse, CodecError> {
        let (respond, rx) = oneshot::channel();
        self.requests
            .send(Request { command, respond })
            .await
            .map_err(|_| CodecError::ConnectionClosed)?;
        Ok(PendingResponse { rx })
    }

    /// Submit a command and wait for its outcome.
    pub async fn execute(&self, command: Command) -> Result<Response, CodecError> {
        self.submit(command).await?.wait().await
    }

    /// Whether the driver has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.command.name())
            .finish_non_exhaustive()
    }
}

/// The task driving one connection.
pub struct Driver<T>
where
    T: AsyncRead + AsyncWrite,
{
    conn: Connection<T>,
    session: SessionState,
    requests: mpsc::Receiver<Request>,
    in_flight: VecDeque<InFlight>,
}

enum Flow {
    Continue,
    Stop,
}

impl<T> Driver<T>
where
    T: AsyncRead + AsyncWrite + Send,
{
    /// Create a driver for an authenticated connection.
    pub fn new(conn: Connection<T>, session: SessionState, depth: usize) -> (Self, DriverHandle) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let driver = Self {
            conn,
            session,
            requests: rx,
            in_flight: VecDeque::new(),
        };
        (driver, DriverHandle { requests: tx })
    }

    /// Run until the connection closes or every handle is dropped.
    pub async fn run(mut self) {
        let mut accepting = true;
        loop {
            // A command that may still write a follow-up request holds back
            // every later request.
            let blocked = self.in_flight.iter().any(|c| c.command.holds_back_requests());
            let reading = !self.in_flight.is_empty();

            if !accepting && !reading {
                break;
            }

            tokio::select! {
                biased;
                message = self.conn.read_message(), if reading => {
                    let flow = match message {
                        Ok(Some(message)) => self.dispatch(message).await,
                        Ok(None) => Err(CodecError::ConnectionClosed),
                        Err(e) => Err(e),
                    };
                    if let Err(e) = flow {
                        self.fail_all(&e);
                        return;
                    }
                }
                request = self.requests.recv(), if accepting && !blocked => {
                    let Some(request) = request else {
                        accepting = false;
                        continue;
                    };
                    match self.submit(request).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => return,
                        Err(e) => {
                            self.fail_all(&e);
                            return;
                        }
                    }
                }
                else => break,
            }
        }

        tracing::debug!("all handles dropped, closing connection");
        if let Err(e) = self.conn.shutdown().await {
            tracing::debug!(error = %e, "shutdown failed");
        }
    }

    async fn submit(&mut self, request: Request) -> Result<Flow, CodecError> {
        let Request {
            mut command,
            respond,
        } = request;

        if command.is_close_connection() {
            tracing::debug!(in_flight = self.in_flight.len(), "closing connection");
            let result = self.conn.shutdown().await.map(|()| Response::Closed);
            self.fail_all(&CodecError::ConnectionClosed);
            let _ = respond.send(result);
            return Ok(Flow::Stop);
        }

        match command.encode(&mut self.session) {
            Encoded::Local(result) => {
                let _ = respond.send(result);
            }
            Encoded::Send(outbound) => {
                // queued before writing so a failed write fails it behind
                // every older command
                self.in_flight.push_back(InFlight { command, respond });
                self.conn.send(&outbound, self.session.packet_size).await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn dispatch(&mut self, message: Message) -> Result<(), CodecError> {
        let Some(head) = self.in_flight.front_mut() else {
            return Err(CodecError::UnexpectedMessage {
                expected: tds_protocol::PacketType::TabularResult,
                actual: message.packet_type,
            });
        };

        match head.command.on_message(message, &mut self.session) {
            Step::Pending => {}
            Step::Send(outbound) => {
                self.conn.send(&outbound, self.session.packet_size).await?;
            }
            Step::Done(result) => {
                if let Some(done) = self.in_flight.pop_front() {
                    tracing::trace!(
                        command = done.command.name(),
                        ok = result.is_ok(),
                        "command complete"
                    );
                    let _ = done.respond.send(result);
                }
            }
        }
        Ok(())
    }

    /// Fail every queued and not yet accepted command, oldest first.
    fn fail_all(&mut self, cause: &CodecError) {
        if !self.in_flight.is_empty() {
            tracing::warn!(
                error = %cause,
                in_flight = self.in_flight.len(),
                "connection lost, failing queued commands"
            );
        }
        for pending in self.in_flight.drain(..) {
            let _ = pending.respond.send(Err(CodecError::ConnectionClosed));
        }
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            let _ = request.respond.send(Err(CodecError::ConnectionClosed));
        }
    }
}

impl<T> std::fmt::Debug for Driver<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("conn", &self.conn)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for InFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight")
            .field("command", &self.command.name())
            .finish_non_exhaustive()
    }
}
