//! Thread de rede que conecta ao servidor TCP e envia snapshots para o
//! loop principal via channel.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;
use telemetry_core::ShutdownSignal;
use telemetry_core::protocol::{SHUTDOWN_COMMAND, decode_line};
use telemetry_core::types::WireSnapshot;
use tracing::{debug, error, info, warn};

const READ_TIMEOUT: Duration = Duration::from_secs(1);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Mensagem enviada da thread de rede para o loop principal.
#[derive(Debug, Clone)]
pub struct NetMessage {
    pub snapshot: WireSnapshot,
    pub raw_size: usize,
}

/// Inicia a thread de rede. Retorna o receiver do channel.
pub fn spawn_viewer_thread(addr: String, shutdown: ShutdownSignal) -> io::Result<Receiver<NetMessage>> {
    let (tx, rx) = bounded::<NetMessage>(64);

    std::thread::Builder::new()
        .name("tcp-viewer".into())
        .spawn(move || viewer_loop(&tx, &addr, &shutdown))?;

    Ok(rx)
}

fn viewer_loop(tx: &Sender<NetMessage>, addr: &str, shutdown: &ShutdownSignal) {
    while !shutdown.is_triggered() {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                info!("Conectado a {addr}");
                match read_stream(stream, tx, shutdown) {
                    Ok(()) => info!("Servidor {addr} encerrou a conexão"),
                    Err(e) => warn!("Conexão com {addr} perdida: {e}"),
                }
            }
            Err(e) => {
                error!("Falha ao conectar em {addr}: {e}. Tentando novamente em 2s...");
            }
        }
        if shutdown.wait_timeout(RECONNECT_DELAY) {
            break;
        }
    }
    debug!("Thread de rede encerrada");
}

/// Lê linhas até EOF, erro ou shutdown.
fn read_stream(stream: TcpStream, tx: &Sender<NetMessage>, shutdown: &ShutdownSignal) -> io::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    while !shutdown.is_triggered() {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return Ok(()),
            Ok(_) if line.last() != Some(&b'\n') => {
                // EOF no meio de uma linha.
                return Ok(());
            }
            Ok(_) => {
                match decode_line(&String::from_utf8_lossy(&line)) {
                    Ok(snapshot) => {
                        let msg = NetMessage {
                            snapshot,
                            raw_size: line.len(),
                        };
                        // Non-blocking send: se o loop principal está lento, descarta
                        if tx.try_send(msg).is_err() {
                            debug!("Channel cheio, descartando snapshot");
                        }
                    }
                    Err(e) => debug!("Linha inválida: {e}"),
                }
                line.clear();
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock =>
            {
                // Timeout normal; bytes parciais ficam em `line`.
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Envia o comando administrativo que derruba o servidor.
pub fn send_shutdown(addr: &str) -> io::Result<()> {
    let mut stream = TcpStream::connect(addr)?;
    stream.write_all(SHUTDOWN_COMMAND)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    info!("Comando shutdown enviado para {addr}");
    Ok(())
}
