#![forbid(unsafe_code)]

use crate::http::{HttpRequest, read_request, write_json};
use crate::routes::route;
use crate::service::{TreeBackend, TreeService};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const IO_TIMEOUT: Duration = Duration::from_secs(2);
const ACCEPT_IDLE: Duration = Duration::from_millis(25);

/// Accepts on one thread and hands connections to a fixed worker pool.
pub struct Server<B> {
    listener: TcpListener,
    service: Arc<TreeService<B>>,
    workers: usize,
    shutdown: Arc<AtomicBool>,
}

impl<B: TreeBackend + 'static> Server<B> {
    pub fn bind(
        addr: SocketAddr,
        service: Arc<TreeService<B>>,
        workers: usize,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            service,
            workers: workers.max(1),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Setting the flag stops the accept loop; queued connections are still served.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn run(self) -> std::io::Result<()> {
        let addr = self.listener.local_addr()?;
        self.listener.set_nonblocking(true)?;

        let (tx, rx) = mpsc::channel::<TcpStream>();
        let rx = Arc::new(Mutex::new(rx));
        let mut pool = Vec::with_capacity(self.workers);
        for index in 0..self.workers {
            let rx = Arc::clone(&rx);
            let service = Arc::clone(&self.service);
            let handle = std::thread::Builder::new()
                .name(format!("tt-worker-{index}"))
                .spawn(move || worker_loop(&rx, &service))?;
            pool.push(handle);
        }
        info!(%addr, workers = self.workers, "tree server listening");

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Err(err) = stream.set_nonblocking(false) {
                        debug!(error = %err, "dropping connection");
                        continue;
                    }
                    if tx.send(stream).is_err() {
                        warn!("worker pool is gone; stopping accept loop");
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_IDLE);
                }
                Err(err) => {
                    debug!(error = %err, "accept failed");
                    continue;
                }
            }
        }

        drop(tx);
        join_all(pool);
        info!(%addr, "tree server stopped");
        Ok(())
    }
}

fn join_all(pool: Vec<JoinHandle<()>>) {
    for handle in pool {
        if handle.join().is_err() {
            warn!("worker thread panicked");
        }
    }
}

fn worker_loop<B: TreeBackend>(rx: &Mutex<Receiver<TcpStream>>, service: &TreeService<B>) {
    loop {
        let next = {
            let guard = rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.recv()
        };
        let Ok(stream) = next else {
            return;
        };
        if let Err(err) = handle_connection(stream, service) {
            debug!(error = %err, "connection closed with error");
        }
    }
}

fn handle_connection<B: TreeBackend>(
    mut stream: TcpStream,
    service: &TreeService<B>,
) -> std::io::Result<()> {
    let _ = stream.set_read_timeout(Some(IO_TIMEOUT));
    let _ = stream.set_write_timeout(Some(IO_TIMEOUT));
    let Some(request) = read_request(&mut stream)? else {
        return Ok(());
    };
    let started = Instant::now();
    let head_only = request.method == "HEAD";
    let (status, body) = respond(service, &request);
    debug!(
        method = %request.method,
        path = %request.path(),
        status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request served"
    );
    write_json(&mut stream, status, &body, head_only)
}

fn respond<B: TreeBackend>(
    service: &TreeService<B>,
    request: &HttpRequest,
) -> (&'static str, serde_json::Value) {
    match route(service, request) {
        Ok(body) => ("200 OK", body),
        Err(err) => {
            if err.status >= 500 {
                warn!(code = err.code, message = %err.message, "request failed");
            }
            (err.status_line(), err.to_json())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tt_core::clock::ManualClock;
    use tt_core::memory::MemorySource;
    use tt_core::{CacheConfig, OwnerId, Rank, TaxonChain, TreePipeline, Visibility};

    fn http(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(raw.as_bytes()).unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn serves_over_a_socket_until_shut_down() {
        let source = MemorySource::new();
        source.insert(TaxonChain::new(
            "r1",
            OwnerId::new(4).unwrap(),
            Visibility::Public,
            1,
            vec![(Rank::Kingdom, "Fungi".to_string())],
        ));
        let service = Arc::new(TreeService::new(
            Arc::new(source),
            TreePipeline::default(),
            CacheConfig::default(),
            Arc::new(ManualClock::new(0)),
        ));
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), service, 2).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_flag();
        let thread = std::thread::spawn(move || server.run());

        let ok = http(
            addr,
            "GET /tree?mode=global HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        );
        assert!(ok.starts_with("HTTP/1.1 200 OK\r\n"));
        let body = ok.split_once("\r\n\r\n").unwrap().1;
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        // Life -> Fungi -> leaf
        assert_eq!(json["nodes"].as_array().unwrap().len(), 3);

        let missing = http(addr, "GET /tree HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert!(missing.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(missing.contains("\"VIEWER_REQUIRED\""));

        let head = http(addr, "HEAD /health HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.ends_with("\r\n\r\n"));

        shutdown.store(true, Ordering::Relaxed);
        thread.join().unwrap().unwrap();
    }
}
