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

/// Info to construct a CONNECT message.
#[derive(Clone, Debug)]
pub(crate) struct ConnectInfo {
    /// Turns on +OK protocol acknowledgements.
    pub verbose: bool,

    /// Turns on additional strict format checking, e.g. for properly formed
    /// subjects.
    pub pedantic: bool,

    /// Optional client name.
    pub name: Option<String>,

    /// When `false`, the server will not deliver messages published by this
    /// connection back to its own subscriptions.
    pub echo: bool,

    /// The implementation language of the client.
    pub lang: String,

    /// The version of the client.
    pub version: String,

    /// 1 announces support for asynchronous INFO updates.
    pub protocol: u8,

    /// Indicates whether the client requires an SSL connection.
    pub tls_required: bool,

    /// Connection username (if `auth_required` is set)
    pub user: Option<String>,

    /// Connection password (if `auth_required` is set)
    pub pass: Option<String>,

    /// Client authorization token (if `auth_required` is set)
    pub auth_token: Option<String>,
}

impl ConnectInfo {
    pub(crate) fn dump(&self) -> Option<String> {
        let mut obj = json::object! {
            verbose: self.verbose,
            pedantic: self.pedantic,
            echo: self.echo,
            lang: self.lang.clone(),
            version: self.version.clone(),
            protocol: self.protocol,
            tls_required: self.tls_required,
            headers: false,
            no_responders: false,
        };
        for (key, value) in [
            ("name", &self.name),
            ("user", &self.user),
            ("pass", &self.pass),
            ("auth_token", &self.auth_token),
        ] {
            if let Some(s) = value {
                obj.insert(key, s.as_str()).ok()?;
            }
        }
        Some(obj.dump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_skips_missing_credentials() {
        let info = ConnectInfo {
            verbose: false,
            pedantic: false,
            name: Some("siphon".to_string()),
            echo: true,
            lang: "rust".to_string(),
            version: "0.1.0".to_string(),
            protocol: 1,
            tls_required: true,
            user: None,
            pass: None,
            auth_token: Some("s3cr3t".to_string()),
        };

        let parsed = json::parse(&info.dump().unwrap()).unwrap();
        assert_eq!(parsed["name"], "siphon");
        assert_eq!(parsed["auth_token"], "s3cr3t");
        assert_eq!(parsed["tls_required"], true);
        assert_eq!(parsed["protocol"], 1);
        assert!(parsed["user"].is_null());
        assert!(parsed["pass"].is_null());
    }
}
