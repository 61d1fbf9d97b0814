// Copyright 2020-2022 The NATS Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::prelude::*;
use std::io::{self, BufWriter, Error, ErrorKind};
use std::mem;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use parking_lot::Mutex;

use crate::connector::{Connected, Connector, NatsStream};
use crate::message::Message;
use crate::proto::{self, ClientOp, ServerOp};
use crate::ServerInfo;

/// Outcome of a round trip, carrying the server's complaint if one arrived
/// before the PONG.
type Pong = Result<(), String>;

/// Client state.
struct State {
    /// Buffered writer with an active connection.
    ///
    /// When `None`, the connection is lost or closed.
    writer: Option<BufWriter<NatsStream>>,

    /// Next subscription ID.
    next_sid: u64,

    /// Message channels of the current subscriptions.
    subscriptions: HashMap<u64, channel::Sender<Message>>,

    /// Expected pongs and their notification channels.
    pongs: VecDeque<channel::Sender<Pong>>,

    /// The last `-ERR` received, reported by the next completed round trip.
    pending_error: Option<String>,
}

/// A NATS client.
#[derive(Clone)]
pub(crate) struct Client {
    /// Shared client state.
    state: Arc<Mutex<State>>,

    /// Server info provided by the last INFO message.
    server_info: Arc<Mutex<ServerInfo>>,

    /// Set to `true` once `close` is called.
    shutdown: Arc<Mutex<bool>>,

    /// The underlying stream, kept for shutting the socket down.
    stream: NatsStream,
}

impl Client {
    /// Connects to a server and starts the thread that reads from it.
    pub(crate) fn connect(connector: Connector) -> io::Result<Client> {
        let Connected {
            server_info,
            reader,
            writer,
        } = connector.connect()?;

        log::debug!(
            "connected to {} ({}), version {}",
            server_info.server_id,
            server_info.host,
            server_info.version
        );

        let client = Client {
            state: Arc::new(Mutex::new(State {
                writer: Some(BufWriter::new(writer.clone())),
                next_sid: 1,
                subscriptions: HashMap::new(),
                pongs: VecDeque::new(),
                pending_error: None,
            })),
            server_info: Arc::new(Mutex::new(server_info)),
            shutdown: Arc::new(Mutex::new(false)),
            stream: writer,
        };

        thread::Builder::new()
            .name("nats-siphon-reader".to_string())
            .spawn({
                let client = client.clone();
                move || {
                    let res = client.dispatch(reader);
                    client.disconnected(res);
                }
            })?;

        Ok(client)
    }

    /// Retrieves server info as received by the most recent INFO.
    pub(crate) fn server_info(&self) -> ServerInfo {
        self.server_info.lock().clone()
    }

    /// Returns `true` if the connection runs over TLS.
    pub(crate) fn is_secure(&self) -> bool {
        self.stream.is_tls()
    }

    /// Makes a round trip to the server.
    ///
    /// Fails if the server answers with `-ERR` before the PONG, if no PONG
    /// arrives within `timeout`, or if the connection is lost meanwhile.
    pub(crate) fn flush(&self, timeout: Duration) -> io::Result<()> {
        let pong = {
            let mut state = self.state.lock();

            if *self.shutdown.lock() {
                return Err(crate::closed_error());
            }

            let writer = state.writer.as_mut().ok_or_else(crate::closed_error)?;
            proto::encode(&mut *writer, ClientOp::Ping)?;
            writer.flush()?;

            let (sender, receiver) = channel::bounded(1);
            state.pongs.push_back(sender);
            receiver
        };

        match pong.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(msg)) => Err(Error::new(ErrorKind::PermissionDenied, msg)),
            Err(channel::RecvTimeoutError::Timeout) => Err(Error::new(
                ErrorKind::TimedOut,
                "timed out waiting for the server to respond",
            )),
            Err(channel::RecvTimeoutError::Disconnected) => Err(Error::new(
                ErrorKind::ConnectionReset,
                "connection lost while waiting for the server to respond",
            )),
        }
    }

    /// Subscribes to a subject pattern.
    ///
    /// The `SUB` is written out immediately; the caller decides whether to
    /// wait for the server to process it.
    pub(crate) fn subscribe(&self, subject: &str) -> io::Result<(u64, channel::Receiver<Message>)> {
        let mut state = self.state.lock();

        if *self.shutdown.lock() {
            return Err(crate::closed_error());
        }
        if state.writer.is_none() {
            return Err(crate::closed_error());
        }

        let sid = state.next_sid;
        state.next_sid += 1;

        let (sender, receiver) = channel::unbounded();
        state.subscriptions.insert(sid, sender);

        let res = state.writer.as_mut().map_or_else(
            || Err(crate::closed_error()),
            |writer| {
                proto::encode(&mut *writer, ClientOp::Sub { subject, sid })?;
                writer.flush()
            },
        );
        if let Err(err) = res {
            state.subscriptions.remove(&sid);
            return Err(err);
        }

        log::trace!("subscribed to {} with sid {}", subject, sid);
        Ok((sid, receiver))
    }

    /// Unsubscribes, dropping the subscription's message channel.
    pub(crate) fn unsubscribe(&self, sid: u64) -> io::Result<()> {
        let mut state = self.state.lock();

        if state.subscriptions.remove(&sid).is_none() {
            return Ok(());
        }

        if let Some(writer) = state.writer.as_mut() {
            proto::encode(&mut *writer, ClientOp::Unsub { sid })?;
            writer.flush()?;
        }

        Ok(())
    }

    /// Closes the client.
    ///
    /// Every live subscription is unsubscribed and the socket is shut down.
    /// Calling this more than once has no further effect.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();

        if mem::replace(&mut *self.shutdown.lock(), true) {
            return;
        }

        let subscriptions = mem::take(&mut state.subscriptions);
        if let Some(writer) = state.writer.as_mut() {
            for sid in subscriptions.keys() {
                proto::encode(&mut *writer, ClientOp::Unsub { sid: *sid }).ok();
            }
            writer.flush().ok();
        }

        // Wake up all pending flushes.
        state.pongs.clear();
        state.writer = None;
        drop(state);

        self.stream.shutdown();
    }

    /// Reads operations from the server and dispatches them until the
    /// connection ends.
    fn dispatch(&self, mut reader: impl BufRead) -> io::Result<()> {
        while let Some(op) = proto::decode(&mut reader)? {
            if *self.shutdown.lock() {
                break;
            }

            let mut state = self.state.lock();

            match op {
                ServerOp::Info(server_info) => {
                    *self.server_info.lock() = server_info;
                }

                ServerOp::Ping => {
                    if let Some(writer) = state.writer.as_mut() {
                        proto::encode(&mut *writer, ClientOp::Pong)?;
                        writer.flush()?;
                    }
                }

                ServerOp::Pong => {
                    let outcome = match state.pending_error.take() {
                        Some(msg) => Err(msg),
                        None => Ok(()),
                    };
                    if let Some(pong) = state.pongs.pop_front() {
                        pong.try_send(outcome).ok();
                    }
                }

                ServerOp::Msg {
                    subject,
                    sid,
                    payload,
                } => {
                    if let Some(messages) = state.subscriptions.get(&sid) {
                        // Dropped if the subscription went away meanwhile.
                        messages.try_send(Message::new(subject, payload)).ok();
                    }
                }

                ServerOp::Ok => {}

                // The server answers in order, so an error caused by a command
                // arrives before the PONG of the PING that followed it.
                ServerOp::Err(msg) => {
                    log::error!("server error: {}", msg);
                    state.pending_error = Some(msg);
                }

                ServerOp::Unknown(line) => log::warn!("unknown op: {}", line),
            }
        }

        Ok(())
    }

    /// Tears the state down after the reader stops.
    ///
    /// Dropping the senders wakes up every receiver and every pending flush.
    fn disconnected(&self, res: io::Result<()>) {
        let closing = *self.shutdown.lock();
        match res {
            Ok(()) if !closing => log::warn!("connection closed by the server"),
            Err(err) if !closing => log::error!("connection lost: {}", err),
            _ => log::debug!("reader stopped"),
        }

        let mut state = self.state.lock();
        state.writer = None;
        state.subscriptions.clear();
        state.pongs.clear();
        state.pending_error = None;
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("Client")
            .field("secure", &self.is_secure())
            .finish()
    }
}
