//! Scripted device consoles for tests, served over in-memory duplex streams.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use super::{BoxedStream, Connector};
use crate::models::ConsoleEndpoint;

#[derive(Clone, Default)]
struct DeviceScript {
    prompt: String,
    reachable: HashSet<String>,
    drop_after: Option<usize>,
}

#[derive(Clone)]
enum Behavior {
    Serve(DeviceScript),
    Refuse,
    Hang,
}

/// Consoles keyed by port. Every line a device receives is recorded.
#[derive(Default)]
pub struct MockConsoles {
    behaviors: Mutex<HashMap<u16, Behavior>>,
    received: Arc<Mutex<HashMap<u16, Vec<String>>>>,
}

impl MockConsoles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self, port: u16, prompt: &str) {
        let script = DeviceScript {
            prompt: prompt.to_string(),
            ..Default::default()
        };
        self.behaviors.lock().unwrap().insert(port, Behavior::Serve(script));
    }

    pub fn refuse(&self, port: u16) {
        self.behaviors.lock().unwrap().insert(port, Behavior::Refuse);
    }

    /// Connection attempts never complete
    pub fn hang(&self, port: u16) {
        self.behaviors.lock().unwrap().insert(port, Behavior::Hang);
    }

    /// Pings from this console to `dest` get replies
    pub fn reachable(&self, port: u16, dest: &str) {
        self.with_script(port, |s| {
            s.reachable.insert(dest.to_string());
        });
    }

    /// The device hangs up after receiving `lines` lines
    pub fn drop_after(&self, port: u16, lines: usize) {
        self.with_script(port, |s| s.drop_after = Some(lines));
    }

    pub fn lines(&self, port: u16) -> Vec<String> {
        self.received.lock().unwrap().get(&port).cloned().unwrap_or_default()
    }

    fn with_script(&self, port: u16, f: impl FnOnce(&mut DeviceScript)) {
        if let Some(Behavior::Serve(script)) = self.behaviors.lock().unwrap().get_mut(&port) {
            f(script);
        }
    }
}

#[async_trait]
impl Connector for MockConsoles {
    async fn connect(&self, endpoint: &ConsoleEndpoint) -> io::Result<BoxedStream> {
        let behavior = self.behaviors.lock().unwrap().get(&endpoint.port).cloned();
        match behavior {
            Some(Behavior::Serve(script)) => {
                let (client, server) = tokio::io::duplex(256 * 1024);
                tokio::spawn(serve(server, script, self.received.clone(), endpoint.port));
                Ok(Box::new(client))
            }
            Some(Behavior::Hang) => std::future::pending().await,
            Some(Behavior::Refuse) | None => {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
            }
        }
    }
}

async fn serve(
    stream: DuplexStream,
    script: DeviceScript,
    received: Arc<Mutex<HashMap<u16, Vec<String>>>>,
    port: u16,
) {
    let (rd, mut wr) = tokio::io::split(stream);
    // IAC WILL ECHO, then the banner
    if wr.write_all(b"\xff\xfb\x01\r\n").await.is_err() {
        return;
    }
    if wr.write_all(script.prompt.as_bytes()).await.is_err() {
        return;
    }

    let mut lines = BufReader::new(rd).lines();
    let mut count = 0;
    while let Ok(Some(line)) = lines.next_line().await {
        received.lock().unwrap().entry(port).or_default().push(line.clone());
        count += 1;
        if script.drop_after.map_or(false, |n| count >= n) {
            return;
        }
        if wr.write_all(respond(&script, &line).as_bytes()).await.is_err() {
            return;
        }
    }
}

fn respond(script: &DeviceScript, line: &str) -> String {
    let Some(dest) = line.trim().strip_prefix("ping ") else {
        return format!("{}\r\n{}", line, script.prompt);
    };
    let dest = dest.split_whitespace().next().unwrap_or_default();
    if script.reachable.contains(dest) {
        format!(
            "{line}\r\n84 bytes from {dest} icmp_seq=1 ttl=64 time=0.912 ms\r\n\
             84 bytes from {dest} icmp_seq=2 ttl=64 time=0.744 ms\r\n\r\n{prompt}",
            line = line,
            dest = dest,
            prompt = script.prompt
        )
    } else {
        format!(
            "{}\r\nhost ({}) not reachable\r\n\r\n{}",
            line, dest, script.prompt
        )
    }
}

/// Refuses the first `failures` attempts, then accepts
pub struct FlakyConnector {
    failures: usize,
    attempts: AtomicUsize,
}

impl FlakyConnector {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FlakyConnector {
    async fn connect(&self, _endpoint: &ConsoleEndpoint) -> io::Result<BoxedStream> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        }
        let (client, _server) = tokio::io::duplex(64);
        Ok(Box::new(client))
    }
}
