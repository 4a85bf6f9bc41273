//! Remote backend: one WebSocket connection to an external generator process.
//!
//! The remote side fans out internally; the client sends a single `Find` (carrying
//! `concurrency` and `autosave`) and translates the event stream. The socket is polled with a
//! short read timeout so a stop request is forwarded promptly.

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use std::net::TcpStream;
use std::sync::Arc;
use tungstenite::{Message, WebSocket};

use crate::pipeline::{StopHandle, effective_concurrency};
use crate::types::{Artifact, GameDesc, MatchResult, SearchPlan, Termination};
use crate::utils::config::DispatchConsts;

use super::{
    LocalOracle, Oracle, OracleWorker, RemoteEvent, RemoteRequest, SearchSink, WorkerRequest,
    WorkerResponse,
};

type Socket = WebSocket<TcpStream>;

enum Poll {
    Event(RemoteEvent),
    Idle,
    Closed,
}

/// Oracle reached over `ws://host:port`.
#[derive(Clone, Debug)]
pub struct RemoteOracle {
    addr: String,
}

impl RemoteOracle {
    /// Accepts `host:port` or `ws://host:port[/path]`.
    pub fn new(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        if trimmed.starts_with("wss://") {
            bail!("TLS websocket URLs are not supported: {}", url);
        }
        let rest = trimmed.strip_prefix("ws://").unwrap_or(trimmed);
        let addr = rest.split('/').next().unwrap_or_default();
        if addr.is_empty() || !addr.contains(':') {
            bail!("remote address must be host:port, got {:?}", url);
        }
        Ok(Self {
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Pool backend whose workers answer `generate` through this remote, one connection per
    /// request. Used by export, which needs per-seed artifacts rather than a range scan.
    pub fn exporter(&self) -> LocalOracle {
        let remote = self.clone();
        LocalOracle::new(Arc::new(move |_slot| {
            Ok(Box::new(RemoteGenerateWorker {
                remote: remote.clone(),
            }) as Box<dyn OracleWorker + Send>)
        }))
    }

    fn connect(&self) -> Result<Socket> {
        let stream =
            TcpStream::connect(&self.addr).with_context(|| format!("connect to {}", self.addr))?;
        stream.set_nodelay(true).ok();
        let url = format!("ws://{}/", self.addr);
        let (socket, _response) = tungstenite::client(url.as_str(), stream)
            .map_err(|e| anyhow!("websocket handshake with {}: {}", self.addr, e))?;
        socket
            .get_ref()
            .set_read_timeout(Some(DispatchConsts::REMOTE_POLL))
            .context("set socket read timeout")?;
        debug!("connected to remote oracle at {}", self.addr);
        Ok(socket)
    }
}

struct RemoteGenerateWorker {
    remote: RemoteOracle,
}

impl OracleWorker for RemoteGenerateWorker {
    fn call(&mut self, request: &WorkerRequest) -> Result<WorkerResponse> {
        match request {
            WorkerRequest::Generate(game) => Ok(WorkerResponse::Generate {
                data: self.remote.generate(game)?,
            }),
            other => bail!(
                "remote export worker only generates (got a scan request for seed {})",
                other.seed()
            ),
        }
    }
}

fn send(socket: &mut Socket, request: &RemoteRequest) -> Result<()> {
    let text = serde_json::to_string(request).context("encode remote request")?;
    socket
        .send(Message::Text(text))
        .context("send to remote oracle")
}

fn poll(socket: &mut Socket) -> Result<Poll> {
    match socket.read() {
        Ok(Message::Text(text)) => {
            let event = serde_json::from_str(&text)
                .with_context(|| format!("decode remote event {:?}", text))?;
            Ok(Poll::Event(event))
        }
        Ok(Message::Close(_)) => Ok(Poll::Closed),
        Ok(_) => Ok(Poll::Idle),
        Err(tungstenite::Error::Io(e))
            if matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) =>
        {
            Ok(Poll::Idle)
        }
        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
            Ok(Poll::Closed)
        }
        Err(tungstenite::Error::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
            Ok(Poll::Closed)
        }
        Err(e) => Err(anyhow!("read from remote oracle: {}", e)),
    }
}

fn close(mut socket: Socket) {
    if let Err(e) = socket.close(None).and_then(|_| socket.flush()) {
        debug!("closing remote socket: {}", e);
    }
}

impl Oracle for RemoteOracle {
    fn generate(&self, game: &GameDesc) -> Result<Artifact> {
        let mut socket = self.connect()?;
        send(&mut socket, &RemoteRequest::Generate { game: game.clone() })?;
        loop {
            match poll(&mut socket)? {
                Poll::Event(RemoteEvent::Galaxy { galaxy }) => {
                    close(socket);
                    return Ok(galaxy);
                }
                Poll::Event(other) => debug!("ignoring {:?} while waiting for galaxy", other),
                Poll::Idle => {}
                Poll::Closed => bail!(
                    "remote oracle closed before answering generate for seed {}",
                    game.seed
                ),
            }
        }
    }

    fn search(
        &self,
        plan: &SearchPlan,
        stop: &StopHandle,
        sink: &mut dyn SearchSink,
    ) -> Result<Termination> {
        effective_concurrency(plan)?;
        let range = plan.range;
        let mut socket = self.connect()?;
        send(
            &mut socket,
            &RemoteRequest::Find {
                game: plan.game.with_seed(range.start),
                range: (range.start, range.end),
                rule: plan.rule.clone(),
                concurrency: plan.concurrency,
                autosave: plan.autosave,
            },
        )?;

        let mut frontier = range.start;
        let mut stop_sent = false;
        let mut matched = 0_u64;

        let outcome = loop {
            if stop.is_stopped() && !stop_sent {
                debug!("forwarding stop to remote oracle");
                if let Err(e) = send(&mut socket, &RemoteRequest::Stop) {
                    warn!("could not send stop: {:#}", e);
                }
                stop_sent = true;
            }
            let event = match poll(&mut socket) {
                Ok(Poll::Event(event)) => event,
                Ok(Poll::Idle) => continue,
                Ok(Poll::Closed) => {
                    warn!("remote oracle closed the connection before finishing");
                    break sink.on_progress(frontier).map(|_| false);
                }
                Err(e) => break Err(e),
            };
            let handled = match event {
                RemoteEvent::Result { seed, indexes } => {
                    if seed < range.start || seed >= range.end {
                        warn!(
                            "remote reported seed {} outside [{}, {})",
                            seed, range.start, range.end
                        );
                        Ok(())
                    } else if indexes.is_empty() {
                        Ok(())
                    } else {
                        matched += 1;
                        sink.on_result(MatchResult { seed, indexes })
                    }
                }
                RemoteEvent::Progress { end } => {
                    let end = end.min(range.end);
                    if end > frontier {
                        frontier = end;
                        sink.on_progress(frontier)
                    } else {
                        Ok(())
                    }
                }
                RemoteEvent::Done { end } => {
                    frontier = match end {
                        Some(end) => frontier.max(end.min(range.end)),
                        // Without a reported frontier only an unstopped run covers the range.
                        None if !stop_sent => range.end,
                        None => frontier,
                    };
                    break sink.on_progress(frontier).map(|_| true);
                }
                RemoteEvent::Galaxy { .. } => {
                    debug!("ignoring galaxy event during search");
                    Ok(())
                }
            };
            if let Err(e) = handled {
                if !stop_sent {
                    let _ = send(&mut socket, &RemoteRequest::Stop);
                }
                break Err(e);
            }
        };
        close(socket);

        let done = outcome?;
        debug!("remote run: {} match(es), frontier {}", matched, frontier);
        if done && frontier >= range.end {
            info!("Scanned [{}, {}) remotely", range.start, range.end);
            Ok(Termination::Completed)
        } else {
            info!(
                "Remote run stopped at seed {} of [{}, {})",
                frontier, range.start, range.end
            );
            Ok(Termination::Interrupted)
        }
    }
}

