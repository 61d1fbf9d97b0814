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

//! An in-process NATS server speaking just enough of the protocol for the
//! siphon: scripted deliveries, denied subjects, and optional mutual TLS.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned};

pub fn cert_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/configs/certs")
        .join(name)
}

/// What the server saw from its clients.
#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub connects: Vec<json::JsonValue>,
    pub subscriptions: Vec<String>,
    pub denied: Vec<String>,
    pub unsubscriptions: Vec<u64>,
}

/// A test server, stopped on drop.
pub struct TestServer {
    address: SocketAddr,
    shutdown: Arc<AtomicBool>,
    recorded: Arc<Mutex<Recorded>>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
pub struct TestServerBuilder {
    messages: Vec<(String, Vec<u8>)>,
    denied: Vec<String>,
    tls: Option<Arc<ServerConfig>>,
    hang_up: bool,
}

impl TestServer {
    pub fn build() -> TestServerBuilder {
        TestServerBuilder::default()
    }

    pub fn url(&self) -> String {
        format!("nats://{}", self.address)
    }

    pub fn recorded(&self) -> Recorded {
        self.recorded.lock().clone()
    }

    /// Waits up to five seconds for the server to record `count` UNSUBs.
    pub fn unsubscriptions(&self, count: usize) -> Vec<u64> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let unsubscriptions = self.recorded.lock().unsubscriptions.clone();
            if unsubscriptions.len() >= count || Instant::now() > deadline {
                return unsubscriptions;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("error joining test server thread for shutdown");
            }
        }
    }
}

impl TestServerBuilder {
    /// Delivers `payload` on `subject` to every subscription matching it.
    pub fn message(mut self, subject: &str, payload: &str) -> Self {
        self.messages
            .push((subject.to_string(), payload.as_bytes().to_vec()));
        self
    }

    /// Answers a `SUB` for exactly `subject` with a permissions violation.
    pub fn deny(mut self, subject: &str) -> Self {
        self.denied.push(subject.to_string());
        self
    }

    /// Requires TLS with a client certificate signed by the test root.
    pub fn mutual_tls(mut self) -> Self {
        self.tls = Some(server_tls_config());
        self
    }

    /// Closes a connection once a subscription's deliveries are acknowledged
    /// by the next PONG.
    pub fn hang_up_after_delivery(mut self) -> Self {
        self.hang_up = true;
        self
    }

    pub fn spawn(self) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("could not bind test server");
        listener
            .set_nonblocking(true)
            .expect("could not set listener non-blocking");
        let address = listener.local_addr().expect("no local address");

        let shutdown = Arc::new(AtomicBool::new(false));
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let settings = Arc::new(self);

        let handle = thread::spawn({
            let shutdown = shutdown.clone();
            let recorded = recorded.clone();
            move || {
                while !shutdown.load(Ordering::Acquire) {
                    match listener.accept() {
                        Ok((socket, _)) => {
                            let settings = settings.clone();
                            let recorded = recorded.clone();
                            thread::spawn(move || {
                                if let Err(err) = serve(socket, &settings, &recorded) {
                                    log::debug!("test server connection ended: {}", err);
                                }
                            });
                        }
                        Err(err) if err.kind() == ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(err) => panic!("test server accept failed: {err}"),
                    }
                }
            }
        });

        TestServer {
            address,
            shutdown,
            recorded,
            handle: Some(handle),
        }
    }
}

trait Conn: Read + Write {
    fn hang_up(&mut self);
}

impl Conn for TcpStream {
    fn hang_up(&mut self) {
        self.shutdown(Shutdown::Both).ok();
    }
}

impl Conn for StreamOwned<ServerConnection, TcpStream> {
    fn hang_up(&mut self) {
        self.conn.send_close_notify();
        self.flush().ok();
        self.sock.shutdown(Shutdown::Both).ok();
    }
}

fn serve(
    mut socket: TcpStream,
    settings: &TestServerBuilder,
    recorded: &Mutex<Recorded>,
) -> std::io::Result<()> {
    socket.set_nonblocking(false)?;

    let info = json::object! {
        server_id: "TEST",
        server_name: "siphon-test",
        version: "2.10.0",
        proto: 1,
        host: "127.0.0.1",
        port: socket.local_addr()?.port(),
        max_payload: 1_048_576,
        tls_required: settings.tls.is_some(),
    };
    socket.write_all(format!("INFO {}\r\n", info.dump()).as_bytes())?;

    let mut conn: Box<dyn Conn> = match &settings.tls {
        Some(config) => {
            let session = ServerConnection::new(config.clone())
                .map_err(|err| std::io::Error::new(ErrorKind::Other, err))?;
            Box::new(StreamOwned::new(session, socket))
        }
        None => Box::new(socket),
    };

    let mut hang_up_on_ping = false;
    while let Some(line) = read_line(&mut *conn) {
        let mut words = line.split_whitespace();
        match words.next().map(str::to_ascii_uppercase).as_deref() {
            Some("CONNECT") => {
                let connect = json::parse(line["CONNECT".len()..].trim())
                    .map_err(|err| std::io::Error::new(ErrorKind::InvalidData, err))?;
                recorded.lock().connects.push(connect);
            }
            Some("PING") => {
                conn.write_all(b"PONG\r\n")?;
                conn.flush()?;
                if hang_up_on_ping {
                    conn.hang_up();
                    return Ok(());
                }
            }
            Some("SUB") => {
                let subject = words.next().unwrap_or_default().to_string();
                let sid = words.last().unwrap_or_default().to_string();

                if settings.denied.contains(&subject) {
                    recorded.lock().denied.push(subject.clone());
                    conn.write_all(
                        format!(
                            "-ERR 'Permissions Violation for Subscription to \"{subject}\"'\r\n"
                        )
                        .as_bytes(),
                    )?;
                    conn.flush()?;
                    continue;
                }

                recorded.lock().subscriptions.push(subject.clone());
                for (msg_subject, payload) in &settings.messages {
                    if nats_siphon::subject::matches(&subject, msg_subject) {
                        conn.write_all(
                            format!("MSG {} {} {}\r\n", msg_subject, sid, payload.len()).as_bytes(),
                        )?;
                        conn.write_all(payload)?;
                        conn.write_all(b"\r\n")?;
                    }
                }
                conn.flush()?;
                hang_up_on_ping = settings.hang_up;
            }
            Some("UNSUB") => {
                if let Some(sid) = words.next().and_then(|sid| sid.parse().ok()) {
                    recorded.lock().unsubscriptions.push(sid);
                }
            }
            Some("PONG") => {}
            _ => {
                conn.write_all(b"-ERR 'Unknown Protocol Operation'\r\n")?;
                conn.flush()?;
            }
        }
    }

    Ok(())
}

fn read_line<R: Read + ?Sized>(stream: &mut R) -> Option<String> {
    let mut buf = vec![];
    while !buf.ends_with(b"\r\n") {
        let mut byte = [0];
        match stream.read(&mut byte) {
            Ok(1) => buf.push(byte[0]),
            _ => return None,
        }
    }
    buf.truncate(buf.len() - 2);
    String::from_utf8(buf).ok()
}

fn load_certs(path: &Path) -> Vec<CertificateDer<'static>> {
    let mut reader = BufReader::new(File::open(path).expect("missing certificate"));
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .expect("invalid certificate")
}

fn load_key(path: &Path) -> PrivateKeyDer<'static> {
    let mut reader = BufReader::new(File::open(path).expect("missing key"));
    rustls_pemfile::private_key(&mut reader)
        .expect("invalid key")
        .expect("no key")
}

fn server_tls_config() -> Arc<ServerConfig> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(&cert_path("rootCA.pem")) {
        roots.add(cert).expect("invalid root certificate");
    }
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .expect("could not build client verifier");

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(
            load_certs(&cert_path("server-cert.pem")),
            load_key(&cert_path("server-key.pem")),
        )
        .expect("invalid server certificate");
    Arc::new(config)
}
