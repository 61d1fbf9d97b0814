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

/// A message received on a subject.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    /// The concrete subject this message was published on.
    pub subject: String,

    /// The message contents.
    pub data: Vec<u8>,
}

impl Message {
    /// Creates a message.
    pub fn new(subject: impl Into<String>, data: impl Into<Vec<u8>>) -> Message {
        Message {
            subject: subject.into(),
            data: data.into(),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.subject)
            .field("length", &self.data.len())
            .finish()
    }
}

/// Formats the message the way the siphon prints it: `[<subject>] <payload>`.
///
/// The payload is shown as text, with invalid UTF-8 replaced.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.subject, String::from_utf8_lossy(&self.data))
    }
}
