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

//! Validation and matching of NATS subject patterns.
//!
//! Subjects are dot-separated tokens. In a pattern, `*` stands for exactly
//! one token and `>` for one or more trailing tokens.

use std::io;

/// Wildcard matching a single token.
pub const SINGLE_WILDCARD: &str = "*";

/// Wildcard matching all following tokens.
///
/// Only valid as the last token of a pattern.
pub const MULTI_WILDCARD: &str = ">";

/// Separator of tokens.
pub const TOKEN_SEPARATOR: char = '.';

/// Errors validating a NATS subject pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("NATS subjects must not be empty")]
    Empty,
    #[error("NATS subjects's tokens are not allowed to be empty or to contain whitespace")]
    InvalidToken,
    #[error("wildcards must make up a whole token")]
    PartialWildcard,
    #[error("the multi wildcard '>' is only allowed at the end of a subject")]
    MultiWildcardInMiddle,
    #[error("the separator '.' is not allowed at the end or beginning of a subject")]
    SeparatorAtEndOrBeginning,
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, err)
    }
}

/// Checks that `subject` is a pattern the server will accept in a `SUB`.
pub fn validate(subject: &str) -> Result<(), Error> {
    if subject.is_empty() {
        return Err(Error::Empty);
    }
    if subject.starts_with(TOKEN_SEPARATOR) || subject.ends_with(TOKEN_SEPARATOR) {
        return Err(Error::SeparatorAtEndOrBeginning);
    }

    let mut last_was_multi_wildcard = false;
    for token in subject.split(TOKEN_SEPARATOR) {
        if last_was_multi_wildcard {
            return Err(Error::MultiWildcardInMiddle);
        }
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return Err(Error::InvalidToken);
        }
        if token.len() > 1 && token.contains(['*', '>']) {
            return Err(Error::PartialWildcard);
        }
        last_was_multi_wildcard = token == MULTI_WILDCARD;
    }

    Ok(())
}

/// Checks if a concrete subject falls under a pattern.
///
/// ```
/// use nats_siphon::subject::matches;
///
/// assert!(matches(">", "orders.eu.created"));
/// assert!(matches("orders.*.created", "orders.eu.created"));
/// assert!(!matches("orders.*", "orders.eu.created"));
/// ```
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut p_tokens = pattern.split(TOKEN_SEPARATOR);
    let mut s_tokens = subject.split(TOKEN_SEPARATOR);

    loop {
        match (p_tokens.next(), s_tokens.next()) {
            (Some(MULTI_WILDCARD), Some(_)) => break true,
            (Some(p), Some(s)) if p == SINGLE_WILDCARD || p == s => continue,
            (None, None) => break true,
            _ => break false,
        }
    }
}
