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

use std::io::prelude::*;
use std::io::{self, Error, ErrorKind};
use std::str::{self, FromStr};

use crate::connect::ConnectInfo;
use crate::ServerInfo;

/// Longest control line accepted from the server.
pub(crate) const MAX_CONTROL_LINE: usize = 4096;

/// A protocol operation sent by the server.
#[derive(Debug)]
pub(crate) enum ServerOp {
    /// `INFO {["option_name":option_value],...}`
    Info(ServerInfo),

    /// `MSG <subject> <sid> [reply-to] <#bytes>\r\n[payload]\r\n`
    ///
    /// The reply subject is skipped; the siphon never answers.
    Msg {
        subject: String,
        sid: u64,
        payload: Vec<u8>,
    },

    /// `PING`
    Ping,

    /// `PONG`
    Pong,

    /// `+OK`
    Ok,

    /// `-ERR <error message>`
    Err(String),

    /// Unknown protocol message.
    Unknown(String),
}

/// Reads one CRLF-terminated control line into `buf`.
///
/// Returns the number of bytes read, zero meaning the stream is closed.
fn read_line<R: BufRead + ?Sized>(r: &mut R, buf: &mut Vec<u8>) -> io::Result<usize> {
    loop {
        let available = match r.fill_buf() {
            Ok(available) => available,
            Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if available.is_empty() {
            return Ok(buf.len());
        }

        let (done, len) = match memchr::memchr(b'\n', available) {
            Some(i) => (true, i + 1),
            None => (false, available.len()),
        };
        if buf.len() + len > MAX_CONTROL_LINE {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "received control line exceeds the maximum length",
            ));
        }
        buf.extend_from_slice(&available[..len]);
        r.consume(len);

        if done {
            return Ok(buf.len());
        }
    }
}

fn invalid(msg: &str) -> Error {
    Error::new(ErrorKind::InvalidInput, msg.to_string())
}

/// Decodes a single operation from the server.
///
/// If the connection is closed, `None` will be returned.
pub(crate) fn decode(mut stream: impl BufRead) -> io::Result<Option<ServerOp>> {
    let mut command = Vec::with_capacity(128);
    if read_line(&mut stream, &mut command)? == 0 {
        return Ok(None);
    }

    let line = str::from_utf8(&command).map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;
    let mut words = line.split_ascii_whitespace();
    let op = words.next().unwrap_or("").to_ascii_uppercase();

    match op.as_str() {
        "PING" => Ok(Some(ServerOp::Ping)),
        "PONG" => Ok(Some(ServerOp::Pong)),
        "+OK" => Ok(Some(ServerOp::Ok)),
        "INFO" => {
            let server_info = ServerInfo::parse(line["INFO".len()..].trim())
                .ok_or_else(|| invalid("cannot parse server info"))?;
            Ok(Some(ServerOp::Info(server_info)))
        }
        "MSG" => {
            let args: Vec<&str> = words.collect();
            let (subject, sid, num_bytes) = match args[..] {
                [subject, sid, num_bytes] | [subject, sid, _, num_bytes] => {
                    (subject, sid, num_bytes)
                }
                _ => return Err(invalid("invalid number of arguments after MSG")),
            };

            let sid = u64::from_str(sid).map_err(|_| invalid("cannot parse sid argument after MSG"))?;
            let num_bytes = usize::from_str(num_bytes)
                .map_err(|_| invalid("cannot parse the number of bytes argument after MSG"))?;

            let mut payload = vec![0_u8; num_bytes];
            stream.read_exact(&mut payload[..])?;
            // The payload is followed by "\r\n".
            stream.read_exact(&mut [0_u8; 2])?;

            Ok(Some(ServerOp::Msg {
                subject: subject.to_string(),
                sid,
                payload,
            }))
        }
        "-ERR" => {
            let msg = line["-ERR".len()..].trim().trim_matches('\'').to_string();
            Ok(Some(ServerOp::Err(msg)))
        }
        _ => Ok(Some(ServerOp::Unknown(line.trim_end().to_owned()))),
    }
}

/// A protocol operation sent by the client.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ClientOp<'a> {
    /// `CONNECT {["option_name":option_value],...}`
    Connect(&'a ConnectInfo),

    /// `SUB <subject> <sid>\r\n`
    Sub { subject: &'a str, sid: u64 },

    /// `UNSUB <sid>`
    Unsub { sid: u64 },

    /// `PING`
    Ping,

    /// `PONG`
    Pong,
}

/// Encodes a single operation from the client.
pub(crate) fn encode(mut stream: impl Write, op: ClientOp<'_>) -> io::Result<()> {
    match op {
        ClientOp::Connect(connect_info) => {
            let op = format!(
                "CONNECT {}\r\n",
                connect_info.dump().ok_or_else(|| Error::new(
                    ErrorKind::InvalidData,
                    "cannot serialize connect info"
                ))?
            );
            stream.write_all(op.as_bytes())
        }
        ClientOp::Sub { subject, sid } => {
            stream.write_all(format!("SUB {subject} {sid}\r\n").as_bytes())
        }
        ClientOp::Unsub { sid } => stream.write_all(format!("UNSUB {sid}\r\n").as_bytes()),
        ClientOp::Ping => stream.write_all(b"PING\r\n"),
        ClientOp::Pong => stream.write_all(b"PONG\r\n"),
    }
}
