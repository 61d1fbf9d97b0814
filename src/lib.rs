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

//! A firehose tap for NATS.
//!
//! `nats-siphon` connects to a NATS server, subscribes to one or more subject
//! patterns (`>` by default) and writes every message it receives as a
//! `[<subject>] <payload>` line. It never publishes.
//!
//! The crate carries the small synchronous client it needs: a blocking
//! connection with an optional mutually authenticated TLS transport, and
//! pull-style subscriptions with a per-call timeout.
//!
//! ```no_run
//! # fn main() -> std::io::Result<()> {
//! use std::time::Duration;
//!
//! let nc = nats_siphon::Options::new()
//!     .with_name("inspector")
//!     .connect("nats://127.0.0.1:4222")?;
//! let sub = nc.subscribe("orders.>")?;
//! let msg = sub.next_timeout(Duration::from_secs(5))?;
//! println!("[{}] {}", msg.subject, String::from_utf8_lossy(&msg.data));
//! # Ok(())
//! # }
//! ```
//!
//! The [`Siphon`] type drives the whole tap: security context, connection,
//! one receive loop per pattern, and shutdown.
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    unused_qualifications
)]
#![deny(
    clippy::cast_lossless,
    clippy::decimal_literal_representation,
    clippy::doc_markdown,
    clippy::explicit_iter_loop,
    clippy::if_not_else,
    clippy::map_flatten,
    clippy::needless_borrow,
    clippy::redundant_closure_for_method_calls,
    clippy::string_add,
    clippy::unimplemented,
    clippy::wildcard_dependencies
)]

mod client;
mod connect;
mod connector;
mod message;
mod proto;
mod subscription;

pub mod config;
pub mod error;
pub mod security;
pub mod siphon;
pub mod subject;

use std::io::{self, Error, ErrorKind};
use std::time::Duration;

pub use config::Config;
pub use connector::{IntoServerList, ServerAddress};
pub use error::{Error as SiphonError, Result};
pub use message::Message;
pub use security::SecurityContext;
pub use siphon::{Broker, BrokerConnection, MessageSource, Nats, Siphon};
pub use subscription::Subscription;

use client::Client;
use connector::Connector;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LANG: &str = "rust";

/// How long `subscribe` waits for the server to acknowledge a `SUB`.
const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Information sent by the server back to this client
/// during initial connection, and possibly again later.
#[derive(Debug, Default, Clone)]
pub struct ServerInfo {
    /// The unique identifier of the NATS server.
    pub server_id: String,
    /// Generated Server Name.
    pub server_name: String,
    /// The host specified in the cluster parameter/options.
    pub host: String,
    /// The port number specified in the cluster parameter/options.
    pub port: u16,
    /// The version of the NATS server.
    pub version: String,
    /// If this is set, then the server should try to authenticate upon
    /// connect.
    pub auth_required: bool,
    /// If this is set, then the server must authenticate using TLS.
    pub tls_required: bool,
    /// Maximum payload size that the server will accept.
    pub max_payload: usize,
    /// The protocol version in use.
    pub proto: i8,
    /// The server-assigned client ID.
    pub client_id: u64,
}

impl ServerInfo {
    pub(crate) fn parse(s: &str) -> Option<ServerInfo> {
        let mut obj = json::parse(s).ok()?;
        Some(ServerInfo {
            server_id: obj["server_id"].take_string()?,
            server_name: obj["server_name"].take_string().unwrap_or_default(),
            host: obj["host"].take_string().unwrap_or_default(),
            port: obj["port"].as_u16().unwrap_or(4222),
            version: obj["version"].take_string().unwrap_or_default(),
            auth_required: obj["auth_required"].as_bool().unwrap_or(false),
            tls_required: obj["tls_required"].as_bool().unwrap_or(false),
            max_payload: obj["max_payload"].as_usize().unwrap_or(1024 * 1024),
            proto: obj["proto"].as_i8().unwrap_or(0),
            client_id: obj["client_id"].as_u64().unwrap_or(0),
        })
    }
}

/// Connect options.
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) name: Option<String>,
    pub(crate) tls_required: bool,
    pub(crate) security: Option<SecurityContext>,
    pub(crate) flush_timeout: Duration,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            name: None,
            tls_required: false,
            security: None,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

impl Options {
    /// `Options` for establishing a new NATS `Connection`.
    pub fn new() -> Options {
        Options::default()
    }

    /// Add a name option to this configuration.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> std::io::Result<()> {
    /// let nc = nats_siphon::Options::new()
    ///     .with_name("siphon")
    ///     .connect("demo.nats.io")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_name(mut self, name: &str) -> Options {
        self.name = Some(name.to_string());
        self
    }

    /// Secure the connection with a prepared [`SecurityContext`].
    ///
    /// Supplying a context requires TLS regardless of the address scheme.
    pub fn security_context(mut self, security: SecurityContext) -> Options {
        self.security = Some(security);
        self.tls_required = true;
        self
    }

    /// Establish a `Connection` with a NATS server.
    ///
    /// Multiple servers may be specified by separating them with commas;
    /// each one is tried once, in random order.
    pub fn connect<I: IntoServerList>(self, nats_urls: I) -> io::Result<Connection> {
        let flush_timeout = self.flush_timeout;
        let connector = Connector::new(nats_urls.into_server_list()?, self)?;
        let client = Client::connect(connector)?;
        Ok(Connection {
            client,
            flush_timeout,
        })
    }
}

/// Connect to one or more NATS servers at the given URLs.
///
/// If no scheme is provided the `nats://` scheme is assumed. The default port
/// is `4222`.
pub fn connect<I: IntoServerList>(nats_urls: I) -> io::Result<Connection> {
    Options::new().connect(nats_urls)
}

/// A NATS connection.
///
/// The connection may be shared between threads; every [`Subscription`]
/// created from it can be consumed independently.
#[derive(Debug)]
pub struct Connection {
    client: Client,
    flush_timeout: Duration,
}

impl Connection {
    /// Create a synchronous subscription for the given subject pattern.
    ///
    /// The pattern is validated locally, then the call blocks until the
    /// server has processed the `SUB`. A server-side rejection such as a
    /// permissions violation is reported as an error.
    pub fn subscribe(&self, subject: &str) -> io::Result<Subscription> {
        subject::validate(subject)?;

        let (sid, receiver) = self.client.subscribe(subject)?;
        if let Err(err) = self.client.flush(self.flush_timeout) {
            self.client.unsubscribe(sid).ok();
            return Err(err);
        }

        Ok(Subscription::new(
            sid,
            subject.to_string(),
            receiver,
            self.client.clone(),
        ))
    }

    /// Returns the most recent `INFO` received from the server.
    pub fn server_info(&self) -> ServerInfo {
        self.client.server_info()
    }

    /// Returns `true` if the transport to the server is TLS.
    pub fn is_secure(&self) -> bool {
        self.client.is_secure()
    }

    /// Close the connection, unsubscribing every live subscription.
    pub fn close(self) {
        self.client.close();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.client.close();
    }
}

pub(crate) fn closed_error() -> Error {
    Error::new(ErrorKind::NotConnected, "the connection is closed")
}
