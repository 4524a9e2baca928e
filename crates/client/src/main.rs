//! # Telemetria Client
//!
//! Viewer de linha de comando: conecta ao servidor, decodifica cada
//! snapshot NDJSON e loga um resumo por linha.
//!
//! ## Uso
//! ```bash
//! telemetry_client                        # Servidor da config [client]
//! telemetry_client --server 10.0.0.5:5000 # Endereço explícito
//! telemetry_client --count 10             # Sai após 10 snapshots
//! telemetry_client --shutdown             # Derruba o servidor (admin)
//! ```

mod net_thread;

use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use telemetry_core::config::AppConfig;
use telemetry_core::types::{ERROR_KEY, FieldValue, MISSING_TEXT, WireSnapshot};
use telemetry_core::ShutdownSignal;
use tracing::{error, info, warn};

/// Telemetria Client - viewer headless do stream TCP
#[derive(Parser, Debug)]
#[command(name = "telemetry_client", version)]
struct Args {
    /// Endereço do servidor (padrão: seção [client] da config)
    #[arg(long, value_name = "HOST:PORT")]
    server: Option<String>,

    /// Sai após receber N snapshots
    #[arg(long, value_name = "N")]
    count: Option<u64>,

    /// Envia o comando `shutdown` ao servidor e sai
    #[arg(long)]
    shutdown: bool,

    /// Arquivo de configuração (padrão: config.toml ao lado do executável)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Config ──
    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    let addr = args.server.unwrap_or_else(|| config.client.server_addr());

    if args.shutdown {
        return match net_thread::send_shutdown(&addr) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Falha ao enviar shutdown para {addr}: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let limit = args.count;

    let shutdown = ShutdownSignal::new();
    let on_ctrl_c = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || on_ctrl_c.trigger()) {
        warn!("Não foi possível instalar handler de Ctrl-C: {e}");
    }

    let rx = match net_thread::spawn_viewer_thread(addr.clone(), shutdown.clone()) {
        Ok(rx) => rx,
        Err(e) => {
            error!("Falha ao criar thread de rede: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("Viewer conectando em {addr}");
    let mut received = 0u64;
    while !shutdown.is_triggered() {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(msg) => {
                received += 1;
                info!("{} ({} bytes)", summarize(&msg.snapshot), msg.raw_size);
                if limit.is_some_and(|n| received >= n) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    shutdown.trigger();
    info!("Viewer encerrado após {received} snapshots");
    ExitCode::SUCCESS
}

fn field<'a>(snapshot: &'a WireSnapshot, source: &str, key: &str) -> Option<&'a FieldValue> {
    match snapshot.get(source)? {
        FieldValue::Group(fields) => fields.get(key),
        _ => None,
    }
}

fn show(value: Option<&FieldValue>) -> String {
    value.map(ToString::to_string).unwrap_or_else(|| MISSING_TEXT.into())
}

/// Uma linha: horário, RPM, marcha, posição e fontes com erro.
fn summarize(snapshot: &WireSnapshot) -> String {
    let failing: Vec<&str> = snapshot
        .iter()
        .filter(|(_, v)| matches!(v, FieldValue::Group(g) if g.contains_key(ERROR_KEY)))
        .map(|(k, _)| k.as_str())
        .collect();

    let position = match (
        field(snapshot, "GPS Data", "Latitude").and_then(FieldValue::as_f64),
        field(snapshot, "GPS Data", "Longitude").and_then(FieldValue::as_f64),
    ) {
        (Some(lat), Some(lon)) => format!("{lat:.5},{lon:.5}"),
        _ => MISSING_TEXT.into(),
    };

    let mut line = format!(
        "{} | RPM {} | Gear {} | GPS {}",
        show(snapshot.get("Timestamp")),
        show(field(snapshot, "RS232 Data", "RPM")),
        show(field(snapshot, "RS232 Data", "Gear")),
        position
    );
    if !failing.is_empty() {
        line.push_str(&format!(" | falhas: {}", failing.join(", ")));
    }
    line
}
