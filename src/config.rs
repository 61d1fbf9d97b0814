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

//! Command-line configuration.

use std::ffi::OsString;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;

use crate::security::TlsFiles;
use crate::siphon::MATCH_ALL;

/// Broker address used when `-nats` is not given.
pub const DEFAULT_ADDRESS: &str = "nats://127.0.0.1:4222/";

/// Long flags that may also be spelled with a single dash, as in `-nats x`.
const SINGLE_DASH_FLAGS: &[&str] = &["nats", "key", "cert", "ca", "timeout", "name", "help"];

/// Subscribes to NATS subjects and prints every message as `[subject] payload`.
#[derive(Debug, Clone, PartialEq, Eq, StructOpt)]
#[structopt(name = "nats-siphon")]
pub struct Config {
    /// NATS server address, or a comma-separated list of them
    #[structopt(long = "nats", default_value = DEFAULT_ADDRESS)]
    pub address: String,

    /// Path to the client private key (PEM)
    #[structopt(long, parse(from_os_str))]
    pub key: Option<PathBuf>,

    /// Path to the client certificate (PEM)
    #[structopt(long, parse(from_os_str))]
    pub cert: Option<PathBuf>,

    /// Path to the trusted root certificate (a single PEM certificate)
    #[structopt(long, parse(from_os_str))]
    pub ca: Option<PathBuf>,

    /// Seconds to wait for the next message before a subscription gives up
    #[structopt(long = "timeout", default_value = "3600", parse(try_from_str = parse_seconds))]
    pub receive_timeout: Duration,

    /// Connection name sent to the server
    #[structopt(long, default_value = "nats-siphon")]
    pub name: String,

    /// Subject patterns to subscribe to [default: >]
    pub subjects: Vec<String>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            address: DEFAULT_ADDRESS.to_string(),
            key: None,
            cert: None,
            ca: None,
            receive_timeout: crate::siphon::DEFAULT_RECEIVE_TIMEOUT,
            name: "nats-siphon".to_string(),
            subjects: Vec::new(),
        }
    }
}

impl Config {
    /// Parses arguments, accepting single-dash long flags.
    ///
    /// The first item is the program name.
    pub fn try_from_args<I, T>(args: I) -> Result<Config, structopt::clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Config::from_iter_safe(normalize_flags(args))
    }

    /// The TLS files given on the command line, empty paths removed.
    pub fn tls_files(&self) -> TlsFiles {
        TlsFiles::new(self.cert.clone(), self.key.clone(), self.ca.clone())
    }

    /// The patterns to subscribe to, in order.
    ///
    /// With none requested, everything is matched.
    pub fn patterns(&self) -> Vec<String> {
        if self.subjects.is_empty() {
            vec![MATCH_ALL.to_string()]
        } else {
            self.subjects.clone()
        }
    }
}

fn parse_seconds(src: &str) -> Result<Duration, ParseIntError> {
    src.parse().map(Duration::from_secs)
}

/// Rewrites `-flag` and `-flag=value` into `--flag` and `--flag=value` for
/// the known long flags. Everything after `--` is left alone.
pub fn normalize_flags<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut passthrough = false;
    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            if passthrough {
                return arg;
            }
            let rewritten = arg.to_str().and_then(|s| {
                if s == "--" {
                    passthrough = true;
                    return None;
                }
                let flag = s.strip_prefix('-').filter(|rest| !rest.starts_with('-'))?;
                let name = flag.split('=').next().unwrap_or(flag);
                SINGLE_DASH_FLAGS
                    .contains(&name)
                    .then(|| OsString::from(format!("-{s}")))
            });
            rewritten.unwrap_or(arg)
        })
        .collect()
}
