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

//! Errors reported by the siphon.

use std::io;

/// Result alias for siphon operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Ways a siphon run can fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The TLS material could not be read, decoded, or paired.
    #[error("failed to create tls config: {0}")]
    Config(#[source] io::Error),

    /// The broker could not be reached, or rejected the handshake.
    #[error("could not connect to nats: {0}")]
    Connection(#[source] io::Error),

    /// A pattern was rejected, locally or by the broker.
    #[error("failed to subscribe to {subject}: {source}")]
    Subscription {
        subject: String,
        #[source]
        source: io::Error,
    },

    /// Waiting for the next message failed.
    #[error("error getting nats msg on {subject}: {source}")]
    Receive {
        subject: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Returns `true` for errors that should end the process with a failure
    /// status.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Connection(_))
    }

    /// The underlying I/O error.
    pub fn io_error(&self) -> &io::Error {
        match self {
            Error::Config(err) | Error::Connection(err) => err,
            Error::Subscription { source, .. } | Error::Receive { source, .. } => source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors() {
        let err = || io::Error::new(io::ErrorKind::Other, "boom");
        assert!(Error::Config(err()).is_fatal());
        assert!(Error::Connection(err()).is_fatal());
        assert!(!Error::Subscription {
            subject: "foo".into(),
            source: err()
        }
        .is_fatal());
        assert!(!Error::Receive {
            subject: "foo".into(),
            source: err()
        }
        .is_fatal());
    }

    #[test]
    fn messages_name_the_subject() {
        let err = Error::Subscription {
            subject: "secret.>".into(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "Permissions Violation"),
        };
        assert_eq!(
            err.to_string(),
            "failed to subscribe to secret.>: Permissions Violation"
        );
        assert_eq!(err.io_error().kind(), io::ErrorKind::PermissionDenied);
    }
}
