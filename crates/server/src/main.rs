//! # Telemetria Server
//!
//! Amostra as fontes do veículo (IMU, GPS, serial legada, RS232 da ECU) e
//! transmite o último snapshot por TCP para qualquer número de clientes.
//!
//! ## Uso
//! ```bash
//! telemetry_server                        # Hardware real
//! telemetry_server --test-mode            # Fontes simuladas
//! telemetry_server --config /etc/tel.toml # Config alternativa
//! ```
//!
//! Ctrl-C ou um cliente mandando `shutdown` encerram o processo.

mod acquisition;
mod broadcast;
mod sources;

use acquisition::AcquisitionLoop;
use broadcast::BroadcastServer;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use telemetry_core::config::AppConfig;
use telemetry_core::recorder::Recorder;
use telemetry_core::AppContext;
use tracing::{error, info, warn};

/// Telemetria Server - amostra as fontes do veículo e transmite por TCP
#[derive(Parser, Debug)]
#[command(name = "telemetry_server", version)]
struct Args {
    /// Usa fontes simuladas em vez do hardware
    #[arg(long)]
    test_mode: bool,

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

    // ── Carregar config ──
    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Config inválida: {e}");
        }
        return ExitCode::FAILURE;
    }

    let test_mode = config.acquisition.test_mode || args.test_mode;

    match run(&config, test_mode) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &AppConfig, test_mode: bool) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = AppContext::new();

    // ── Ctrl-C ──
    let shutdown = ctx.shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl-C recebido, encerrando...");
        shutdown.trigger();
    })?;

    // ── Servidor ──
    // Bind antes de abrir o hardware: porta ocupada aborta sem efeitos.
    let server = BroadcastServer::bind(&config.server, ctx.clone())?;

    // ── Fontes ──
    let sources = sources::build_sources(config, test_mode)?;

    let mut acquisition = AcquisitionLoop::new(
        sources,
        ctx.clone(),
        config.acquisition.interval(),
        config.acquisition.drain_interval(),
    );
    if config.recorder.enabled {
        let path = Path::new(&config.recorder.path);
        match Recorder::create(path) {
            Ok(recorder) => acquisition = acquisition.with_recorder(recorder),
            Err(e) => warn!("Gravador desativado ({}): {e}", path.display()),
        }
    }

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ TELEMETRIA SERVER – ATIVO (Rust)");
    println!("══════════════════════════════════════════════");
    println!("  Escutando: {}", server.local_addr()?);
    println!("  Intervalo: {:.1}s", config.acquisition.interval_secs);
    println!("  Modo:      {}", if test_mode { "teste (simulado)" } else { "hardware" });
    println!("══════════════════════════════════════════════");
    println!();

    let acquisition = match acquisition.spawn() {
        Ok(handle) => handle,
        Err(e) => {
            ctx.shutdown.trigger();
            return Err(e.into());
        }
    };

    let summary = server.run();

    ctx.shutdown.trigger();
    match acquisition.join() {
        Ok(acq) => info!(
            "Encerrado: {} ticks, {} linhas gravadas | clientes: {} atendidos, {} desconectados, {} pedidos de shutdown, {} cancelados",
            acq.ticks,
            acq.recorded_rows,
            summary.accepted,
            summary.disconnected,
            summary.shutdown_requests,
            summary.cancelled
        ),
        Err(_) => error!("Thread de aquisição terminou em pânico"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from(["telemetry_server", "--test-mode", "--config", "/tmp/x.toml"]).unwrap();
        assert!(args.test_mode);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/x.toml")));

        let args = Args::try_parse_from(["telemetry_server"]).unwrap();
        assert!(!args.test_mode);
        assert_eq!(args.config, None);
    }
}
