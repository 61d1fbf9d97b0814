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

//! The tap itself: connect, subscribe, print until every subscription gives
//! up.
//!
//! The broker is reached through the [`Broker`] trait so the lifecycle can be
//! driven against something other than a live server. [`Nats`] is the real
//! implementation.

use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::security::SecurityContext;
use crate::{Connection, Message, Options, Subscription};

/// The pattern used when none is requested.
pub const MATCH_ALL: &str = ">";

/// How long a receive loop waits for the next message before it ends.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Something that can be pulled for messages.
pub trait MessageSource {
    /// Blocks for the next message, failing after `timeout`.
    fn next_timeout(&self, timeout: Duration) -> io::Result<Message>;
}

/// An established broker connection.
pub trait BrokerConnection {
    /// The subscriptions this connection hands out.
    type Subscription: MessageSource + Send;

    /// Subscribes to `pattern`, failing if the broker rejects it.
    fn subscribe(&self, pattern: &str) -> io::Result<Self::Subscription>;

    /// Closes the connection.
    fn close(self);
}

/// A way of connecting to a broker.
pub trait Broker {
    /// The connection type.
    type Connection: BrokerConnection;

    /// Connects to `address`, securing the transport with `security` if
    /// present.
    fn connect(
        &self,
        address: &str,
        security: Option<&SecurityContext>,
    ) -> io::Result<Self::Connection>;
}

/// Connects to real NATS servers.
#[derive(Debug, Clone, Default)]
pub struct Nats {
    options: Options,
}

impl Nats {
    /// A broker with default connect options.
    pub fn new() -> Nats {
        Nats::default()
    }

    /// Sets the connection name sent to the server.
    pub fn with_name(mut self, name: &str) -> Nats {
        self.options = self.options.with_name(name);
        self
    }
}

impl Broker for Nats {
    type Connection = Connection;

    fn connect(&self, address: &str, security: Option<&SecurityContext>) -> io::Result<Connection> {
        let mut options = self.options.clone();
        if let Some(security) = security {
            options = options.security_context(security.clone());
        }
        options.connect(address)
    }
}

impl BrokerConnection for Connection {
    type Subscription = Subscription;

    fn subscribe(&self, pattern: &str) -> io::Result<Subscription> {
        Connection::subscribe(self, pattern)
    }

    fn close(self) {
        Connection::close(self);
    }
}

impl MessageSource for Subscription {
    fn next_timeout(&self, timeout: Duration) -> io::Result<Message> {
        Subscription::next_timeout(self, timeout)
    }
}

/// Drives one siphon run, writing message lines to a sink.
#[derive(Debug)]
pub struct Siphon<B, W> {
    broker: B,
    sink: Mutex<W>,
    receive_timeout: Duration,
}

impl<B, W> Siphon<B, W>
where
    B: Broker,
    W: Write + Send,
{
    /// Creates a siphon printing to `sink`.
    pub fn new(broker: B, sink: W) -> Siphon<B, W> {
        Siphon {
            broker,
            sink: Mutex::new(sink),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }

    /// Overrides how long each receive loop waits for the next message.
    pub fn receive_timeout(mut self, timeout: Duration) -> Siphon<B, W> {
        self.receive_timeout = timeout;
        self
    }

    /// Consumes the siphon, returning the sink.
    pub fn into_sink(self) -> W {
        self.sink.into_inner()
    }

    /// Runs the whole lifecycle for `config`.
    ///
    /// Returns once every receive loop has ended and the connection is
    /// closed. A subscription failure stops the setup before any loop starts;
    /// the subscriptions made so far are dropped and the connection closed.
    pub fn run(&self, config: &Config) -> Result<()>
    where
        B: Sync,
    {
        let security = SecurityContext::from_files(&config.tls_files()).map_err(Error::Config)?;

        if security.is_some() {
            log::info!("[tls] connecting to: {}", config.address);
        } else {
            log::info!("connecting to: {}", config.address);
        }
        let connection = self
            .broker
            .connect(&config.address, security.as_ref())
            .map_err(Error::Connection)?;

        let patterns = config.patterns();
        let subscriptions = match subscribe_all(&connection, &patterns) {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                connection.close();
                return Err(err);
            }
        };

        thread::scope(|s| {
            for (pattern, subscription) in patterns.iter().zip(subscriptions) {
                let spawned = thread::Builder::new()
                    .name(format!("siphon {pattern}"))
                    .spawn_scoped(s, move || {
                        let err = self.receive_loop(&subscription, pattern);
                        log::error!("{}", err);
                    });
                if let Err(err) = spawned {
                    log::error!("failed to start receive loop for {}: {}", pattern, err);
                }
            }
        });

        connection.close();
        Ok(())
    }

    /// Prints messages from `subscription` until a wait fails, returning the
    /// failure.
    pub fn receive_loop<S: MessageSource>(&self, subscription: &S, subject: &str) -> Error {
        loop {
            match subscription.next_timeout(self.receive_timeout) {
                Ok(msg) => self.print(&msg),
                Err(source) => {
                    return Error::Receive {
                        subject: subject.to_string(),
                        source,
                    }
                }
            }
        }
    }

    fn print(&self, msg: &Message) {
        let mut sink = self.sink.lock();
        if let Err(err) = writeln!(sink, "{msg}").and_then(|()| sink.flush()) {
            log::warn!("failed to write message on {}: {}", msg.subject, err);
        }
    }
}

/// Subscribes to every pattern in order, stopping at the first failure.
fn subscribe_all<C: BrokerConnection>(
    connection: &C,
    patterns: &[String],
) -> Result<Vec<C::Subscription>> {
    let mut subscriptions = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        log::info!("subscribing to: {}", pattern);
        let subscription = connection
            .subscribe(pattern)
            .map_err(|source| Error::Subscription {
                subject: pattern.clone(),
                source,
            })?;
        subscriptions.push(subscription);
    }
    Ok(subscriptions)
}
