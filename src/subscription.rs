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

use std::fmt;
use std::io::{self, Error, ErrorKind};
use std::time::Duration;

use crossbeam_channel::{self as channel, RecvTimeoutError};

use crate::client::Client;
use crate::message::Message;

/// A `Subscription` receives `Message`s published to subjects matching its
/// pattern.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    sid: u64,
    subject: String,
    messages: channel::Receiver<Message>,
    client: Client,
}

impl Subscription {
    pub(crate) fn new(
        sid: u64,
        subject: String,
        messages: channel::Receiver<Message>,
        client: Client,
    ) -> Subscription {
        Subscription {
            sid,
            subject,
            messages,
            client,
        }
    }

    /// The pattern this subscription was created with.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Get the next message, waiting at most `timeout`.
    ///
    /// Returns an error of kind [`ErrorKind::TimedOut`] if nothing arrived in
    /// time, and of kind [`ErrorKind::ConnectionReset`] once the connection
    /// is gone.
    ///
    /// # Example
    /// ```no_run
    /// # fn main() -> std::io::Result<()> {
    /// # let nc = nats_siphon::connect("demo.nats.io")?;
    /// # let sub = nc.subscribe("foo")?;
    /// if let Ok(msg) = sub.next_timeout(std::time::Duration::from_secs(1)) {}
    /// # Ok(())
    /// # }
    /// ```
    pub fn next_timeout(&self, timeout: Duration) -> io::Result<Message> {
        match self.messages.recv_timeout(timeout) {
            Ok(msg) => Ok(msg),
            Err(RecvTimeoutError::Timeout) => Err(Error::new(
                ErrorKind::TimedOut,
                "timed out waiting for the next message",
            )),
            Err(RecvTimeoutError::Disconnected) => Err(Error::new(
                ErrorKind::ConnectionReset,
                "subscription is no longer valid",
            )),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.client.unsubscribe(self.sid).ok();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("sid", &self.sid)
            .field("subject", &self.subject)
            .finish()
    }
}
