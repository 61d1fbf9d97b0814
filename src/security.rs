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

//! TLS material for securing a connection.
//!
//! A [`SecurityContext`] bundles an optional client identity (certificate
//! chain and private key) with the roots used to verify the server. It is
//! built once from PEM files and is immutable afterwards.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Error, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::ring as provider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

/// Signed with the client key and verified against the certificate to prove
/// that the two belong together.
const KEY_PAIR_CHALLENGE: &[u8] = b"nats-siphon client key pair challenge";

/// Paths to the PEM files that make up a [`SecurityContext`].
///
/// Empty paths count as not supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    /// Client certificate chain.
    pub cert: Option<PathBuf>,
    /// Client private key.
    pub key: Option<PathBuf>,
    /// Trusted root certificate.
    pub ca: Option<PathBuf>,
}

impl TlsFiles {
    /// Collects the paths, dropping empty ones.
    pub fn new(cert: Option<PathBuf>, key: Option<PathBuf>, ca: Option<PathBuf>) -> TlsFiles {
        let supplied = |path: Option<PathBuf>| path.filter(|p| !p.as_os_str().is_empty());
        TlsFiles {
            cert: supplied(cert),
            key: supplied(key),
            ca: supplied(ca),
        }
    }

    /// Returns `true` if no file was supplied at all.
    pub fn is_empty(&self) -> bool {
        self.cert.is_none() && self.key.is_none() && self.ca.is_none()
    }
}

/// An immutable TLS client configuration.
#[derive(Clone)]
pub struct SecurityContext {
    config: Arc<ClientConfig>,
    client_auth: bool,
    custom_root: bool,
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("client_auth", &self.client_auth)
            .field("custom_root", &self.custom_root)
            .finish()
    }
}

impl SecurityContext {
    /// Builds a context from PEM files.
    ///
    /// Returns `Ok(None)` when no file is supplied, leaving the transport to
    /// whatever the server address implies.
    ///
    /// - A trusted root, if supplied, must hold exactly one certificate.
    ///   Without one, the platform's native roots verify the server.
    /// - If either the client certificate or the key is supplied, both must
    ///   load and the key must match the certificate.
    pub fn from_files(files: &TlsFiles) -> io::Result<Option<SecurityContext>> {
        if files.is_empty() {
            return Ok(None);
        }

        let roots = match &files.ca {
            Some(ca) => single_root(ca)?,
            None => native_root_store()?,
        };
        let builder = ClientConfig::builder().with_root_certificates(roots);

        let config = match (&files.cert, &files.key) {
            (Some(cert), Some(key)) => {
                let chain = load_certs(cert)?;
                let key = load_key(key)?;
                verify_key_pair(&chain, &key)?;
                builder.with_client_auth_cert(chain, key).map_err(|err| {
                    Error::new(
                        ErrorKind::InvalidInput,
                        format!("invalid client certificate and key pair: {err}"),
                    )
                })?
            }
            (Some(_), None) => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "found a client certificate, but no key",
                ))
            }
            (None, Some(_)) => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "found a client key, but no certificate",
                ))
            }
            (None, None) => builder.with_no_client_auth(),
        };

        Ok(Some(SecurityContext {
            config: Arc::new(config),
            client_auth: files.cert.is_some(),
            custom_root: files.ca.is_some(),
        }))
    }

    /// A context that verifies the server against the platform's roots and
    /// presents no client identity.
    pub fn native_roots() -> io::Result<SecurityContext> {
        let config = ClientConfig::builder()
            .with_root_certificates(native_root_store()?)
            .with_no_client_auth();
        Ok(SecurityContext {
            config: Arc::new(config),
            client_auth: false,
            custom_root: false,
        })
    }

    /// Returns `true` if a client certificate will be presented.
    pub fn has_client_auth(&self) -> bool {
        self.client_auth
    }

    /// Returns `true` if the server is verified against a supplied root
    /// rather than the platform's roots.
    pub fn has_custom_root(&self) -> bool {
        self.custom_root
    }

    pub(crate) fn client_config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }
}

fn open(path: &Path) -> io::Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|err| Error::new(err.kind(), format!("cannot read {}: {}", path.display(), err)))
}

/// Loads a root store holding exactly the one certificate in `path`.
fn single_root(path: &Path) -> io::Result<RootCertStore> {
    let mut certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<io::Result<Vec<_>>>()
        .map_err(|err| {
            Error::new(
                ErrorKind::InvalidData,
                format!("{} is not valid PEM: {}", path.display(), err),
            )
        })?;
    let cert = match (certs.pop(), certs.is_empty()) {
        (Some(cert), true) => cert,
        (None, _) => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("{} does not contain a PEM certificate", path.display()),
            ))
        }
        (Some(_), false) => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("{} must contain exactly one certificate", path.display()),
            ))
        }
    };

    let anchor = webpki::anchor_from_trusted_cert(&cert)
        .map(|anchor| anchor.to_owned())
        .map_err(|err| {
            Error::new(
                ErrorKind::InvalidData,
                format!("failed to parse ca certificate {}: {:?}", path.display(), err),
            )
        })?;

    let mut roots = RootCertStore::empty();
    roots.extend([anchor]);
    Ok(roots)
}

fn native_root_store() -> io::Result<RootCertStore> {
    let native_certs = rustls_native_certs::load_native_certs().map_err(|err| {
        Error::new(
            ErrorKind::Other,
            format!("could not load platform certs: {err}"),
        )
    })?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native_certs);
    log::debug!("loaded {} platform root certificates, ignored {}", added, ignored);
    Ok(roots)
}

/// Loads a certificate chain from a `.pem` file.
pub(crate) fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<io::Result<Vec<_>>>()
        .map_err(|err| {
            Error::new(
                ErrorKind::InvalidData,
                format!("{} is not valid PEM: {}", path.display(), err),
            )
        })?;
    if certs.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("no certificates found in {}", path.display()),
        ));
    }
    Ok(certs)
}

/// Loads the first private key from a `.pem` file.
pub(crate) fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|err| {
            Error::new(
                ErrorKind::InvalidData,
                format!("{} is not valid PEM: {}", path.display(), err),
            )
        })?
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidData,
                format!("no private key found in {}", path.display()),
            )
        })
}

/// Fails unless `key` is the private half of the first certificate in
/// `chain`.
fn verify_key_pair(chain: &[CertificateDer<'_>], key: &PrivateKeyDer<'_>) -> io::Result<()> {
    let mismatch = || {
        Error::new(
            ErrorKind::InvalidInput,
            "client private key does not match the certificate",
        )
    };

    let end_entity = chain.first().ok_or_else(mismatch)?;
    let signing_key = provider::sign::any_supported_type(key).map_err(|err| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("unsupported client private key: {err}"),
        )
    })?;

    let algorithms = provider::default_provider().signature_verification_algorithms;
    let schemes: Vec<_> = algorithms.mapping.iter().map(|(scheme, _)| *scheme).collect();
    let signer = signing_key.choose_scheme(&schemes).ok_or_else(mismatch)?;
    let signature = signer
        .sign(KEY_PAIR_CHALLENGE)
        .map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;

    let cert = webpki::EndEntityCert::try_from(end_entity).map_err(|err| {
        Error::new(
            ErrorKind::InvalidData,
            format!("failed to parse client certificate: {err:?}"),
        )
    })?;
    let verified = algorithms
        .mapping
        .iter()
        .filter(|(scheme, _)| *scheme == signer.scheme())
        .flat_map(|(_, verifiers)| verifiers.iter())
        .any(|alg| cert.verify_signature(*alg, KEY_PAIR_CHALLENGE, &signature).is_ok());

    if verified {
        Ok(())
    } else {
        Err(mismatch())
    }
}
