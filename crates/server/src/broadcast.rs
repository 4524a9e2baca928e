//! Servidor TCP de broadcast.
//!
//! Um listener não bloqueante checa o sinal de shutdown a cada
//! `accept_poll`; cada cliente ganha uma thread própria que, a cada
//! intervalo, pega o último snapshot e escreve uma linha NDJSON. A falha de
//! um cliente fecha só o handler dele.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use telemetry_core::config::ServerConfig;
use telemetry_core::protocol::{ControlParser, encode_snapshot};
use telemetry_core::{AppContext, ServerError};
use tracing::{debug, info, warn};

/// Fatia de espera entre checagens de comandos do cliente.
const CONTROL_POLL: Duration = Duration::from_millis(50);

/// Timeout de leitura do canal de controle (a leitura nunca deve bloquear).
const CONTROL_READ_TIMEOUT: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Streaming,
    Closed,
}

/// Por que um handler terminou.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerExit {
    /// Escrita falhou ou o cliente fechou a conexão.
    ClientDisconnected,
    /// O cliente mandou `shutdown`.
    ShutdownRequested,
    /// O sinal de shutdown foi disparado por outro componente.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerSummary {
    pub accepted: u64,
    pub disconnected: u64,
    pub shutdown_requests: u64,
    pub cancelled: u64,
}

impl ServerSummary {
    fn count(&mut self, exit: HandlerExit) {
        match exit {
            HandlerExit::ClientDisconnected => self.disconnected += 1,
            HandlerExit::ShutdownRequested => self.shutdown_requests += 1,
            HandlerExit::Cancelled => self.cancelled += 1,
        }
    }
}

// ──────────────────────────────────────────────
// Conexão
// ──────────────────────────────────────────────

struct ClientConnection {
    stream: TcpStream,
    /// Clone do socket usado só para ler comandos.
    control: TcpStream,
    peer: SocketAddr,
    state: ConnectionState,
    parser: ControlParser,
    sent: u64,
}

impl ClientConnection {
    fn new(stream: TcpStream, peer: SocketAddr, write_timeout: Duration) -> io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(write_timeout))?;
        let control = stream.try_clone()?;
        control.set_read_timeout(Some(CONTROL_READ_TIMEOUT))?;
        Ok(Self {
            stream,
            control,
            peer,
            state: ConnectionState::Accepted,
            parser: ControlParser::new(),
            sent: 0,
        })
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Cliente {}: {:?} → {:?}", self.peer, self.state, state);
            self.state = state;
        }
    }

    /// Lê o que o cliente mandou, sem bloquear.
    fn poll_control(&mut self) -> Option<HandlerExit> {
        let mut buf = [0u8; 64];
        loop {
            match self.control.read(&mut buf) {
                Ok(0) => return Some(HandlerExit::ClientDisconnected),
                Ok(n) => {
                    if self.parser.push(&buf[..n]) {
                        return Some(HandlerExit::ShutdownRequested);
                    }
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return None;
                }
                Err(e) => {
                    debug!("Cliente {}: erro de leitura: {e}", self.peer);
                    return Some(HandlerExit::ClientDisconnected);
                }
            }
        }
    }

    /// Espera um intervalo inteiro, atento ao shutdown e a comandos.
    fn wait_interval(&mut self, ctx: &AppContext, interval: Duration) -> Option<HandlerExit> {
        let deadline = Instant::now() + interval;
        loop {
            if let Some(exit) = self.poll_control() {
                return Some(exit);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if ctx.shutdown.wait_timeout((deadline - now).min(CONTROL_POLL)) {
                return Some(HandlerExit::Cancelled);
            }
        }
    }

    fn push_latest(&mut self, ctx: &AppContext) -> Option<HandlerExit> {
        let snapshot = ctx.publisher.latest()?;
        let line = match encode_snapshot(&snapshot) {
            Ok(line) => line,
            Err(e) => {
                warn!("Snapshot não serializável: {e}");
                return None;
            }
        };
        if let Err(e) = self.stream.write_all(&line) {
            debug!("Cliente {}: escrita falhou: {e}", self.peer);
            return Some(HandlerExit::ClientDisconnected);
        }
        self.sent += 1;
        self.set_state(ConnectionState::Streaming);
        None
    }

    fn serve(mut self, ctx: &AppContext, interval: Duration) -> HandlerExit {
        let exit = loop {
            if let Some(exit) = self.wait_interval(ctx, interval) {
                break exit;
            }
            if let Some(exit) = self.push_latest(ctx) {
                break exit;
            }
        };

        if exit == HandlerExit::ShutdownRequested {
            warn!("Cliente {} pediu shutdown do servidor", self.peer);
            ctx.shutdown.trigger();
        }
        self.set_state(ConnectionState::Closed);
        info!(
            "Cliente {} desconectado ({:?}, {} snapshots enviados)",
            self.peer, exit, self.sent
        );
        exit
    }
}

// ──────────────────────────────────────────────
// Servidor
// ──────────────────────────────────────────────

pub struct BroadcastServer {
    listener: TcpListener,
    ctx: AppContext,
    interval: Duration,
    accept_poll: Duration,
    write_timeout: Duration,
}

impl BroadcastServer {
    pub fn bind(config: &ServerConfig, ctx: AppContext) -> Result<Self, ServerError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        info!("Servidor escutando em {}", listener.local_addr()?);

        Ok(Self {
            listener,
            ctx,
            interval: config.broadcast_interval(),
            accept_poll: config.accept_poll(),
            write_timeout: config.write_timeout(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn spawn_handler(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<JoinHandle<HandlerExit>> {
        let conn = ClientConnection::new(stream, peer, self.write_timeout)?;
        let ctx = self.ctx.clone();
        let interval = self.interval;
        thread::Builder::new()
            .name(format!("client-{peer}"))
            .spawn(move || conn.serve(&ctx, interval))
    }

    /// Aceita clientes até o shutdown, depois espera todos os handlers.
    pub fn run(self) -> ServerSummary {
        let mut summary = ServerSummary::default();
        let mut handlers: Vec<JoinHandle<HandlerExit>> = Vec::new();

        while !self.ctx.shutdown.is_triggered() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!("Cliente conectado: {peer}");
                    match self.spawn_handler(stream, peer) {
                        Ok(handle) => {
                            summary.accepted += 1;
                            handlers.push(handle);
                        }
                        Err(e) => warn!("Falha ao iniciar handler para {peer}: {e}"),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    reap_finished(&mut handlers, &mut summary);
                    self.ctx.shutdown.wait_timeout(self.accept_poll);
                }
                Err(e) => {
                    warn!("Erro no accept: {e}");
                    self.ctx.shutdown.wait_timeout(self.accept_poll);
                }
            }
        }

        info!("Shutdown: parando de aceitar, aguardando {} handlers", handlers.len());
        for handle in handlers {
            match handle.join() {
                Ok(exit) => summary.count(exit),
                Err(_) => warn!("Handler de cliente terminou em pânico"),
            }
        }
        info!("Servidor encerrado: {summary:?}");
        summary
    }
}

fn reap_finished(handlers: &mut Vec<JoinHandle<HandlerExit>>, summary: &mut ServerSummary) {
    let mut i = 0;
    while i < handlers.len() {
        if handlers[i].is_finished() {
            if let Ok(exit) = handlers.swap_remove(i).join() {
                summary.count(exit);
            }
        } else {
            i += 1;
        }
    }
}
