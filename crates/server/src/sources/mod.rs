//! Adaptadores de fonte: interface uniforme `read() → Reading`.
//!
//! Cada fonte é uma variante de [`SourceAdapter`]. Falhas de hardware viram
//! uma leitura com `ok = false`; nada aqui propaga erro para o loop de
//! aquisição.

pub mod gps;
pub mod imu;
pub mod line_serial;
pub mod rs232;
pub mod serial_port;
pub mod simulated;
pub mod worker;

use gps::{GpsAdapter, Sim7600};
use imu::ImuAdapter;
use line_serial::LineSerialAdapter;
use rs232::Rs232Adapter;
use simulated::{SimulatedEcu, SimulatedGps, SimulatedImu, SimulatedLineSerial};
use std::time::Duration;
use telemetry_core::config::AppConfig;
use telemetry_core::types::{Reading, SourceKind};
use telemetry_core::SourceError;
use tracing::{info, warn};

pub const DISABLED: &str = "source disabled";

/// Período de frames da ECU simulada.
const SIMULATED_ECU_PERIOD: Duration = Duration::from_millis(100);

pub enum SourceAdapter {
    Imu(ImuAdapter),
    Gps(GpsAdapter),
    LegacySerial(LineSerialAdapter),
    Rs232(Rs232Adapter),
    /// Desligada na configuração.
    Disabled(SourceKind),
    /// Não abriu no startup; reporta o motivo a cada tick.
    Unavailable { kind: SourceKind, reason: String },
}

impl SourceAdapter {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceAdapter::Imu(_) => SourceKind::Imu,
            SourceAdapter::Gps(_) => SourceKind::Gps,
            SourceAdapter::LegacySerial(_) => SourceKind::Serial,
            SourceAdapter::Rs232(_) => SourceKind::Rs232,
            SourceAdapter::Disabled(kind) => *kind,
            SourceAdapter::Unavailable { kind, .. } => *kind,
        }
    }

    pub fn read(&mut self) -> Reading {
        match self {
            SourceAdapter::Imu(a) => a.read(),
            SourceAdapter::Gps(a) => a.read(),
            SourceAdapter::LegacySerial(a) => a.read(),
            SourceAdapter::Rs232(a) => a.read(),
            SourceAdapter::Disabled(_) => Reading::failed(DISABLED),
            SourceAdapter::Unavailable { reason, .. } => {
                Reading::failed(SourceError::Unavailable(reason.clone()).to_string())
            }
        }
    }

    /// Esvazia o buffer de entrada da porta sem produzir leitura.
    pub fn drain(&mut self) {
        match self {
            SourceAdapter::LegacySerial(a) => a.drain(),
            SourceAdapter::Rs232(a) => a.drain(),
            _ => {}
        }
    }

    fn unavailable(kind: SourceKind, err: impl std::fmt::Display) -> Self {
        warn!("Fonte {kind} indisponível: {err}");
        SourceAdapter::Unavailable {
            kind,
            reason: err.to_string(),
        }
    }
}

/// Monta as quatro fontes na ordem do fio.
///
/// Só falha quando o RS232 é obrigatório e a porta não abre.
pub fn build_sources(config: &AppConfig, test_mode: bool) -> Result<Vec<SourceAdapter>, SourceError> {
    if test_mode {
        info!("Modo de teste: usando fontes simuladas");
    }

    let imu = if !config.imu.enabled {
        SourceAdapter::Disabled(SourceKind::Imu)
    } else if test_mode {
        match ImuAdapter::spawn(SimulatedImu::new(), config.imu.timeout()) {
            Ok(a) => SourceAdapter::Imu(a),
            Err(e) => SourceAdapter::unavailable(SourceKind::Imu, e),
        }
    } else {
        // O driver de fusão (BNO055) é externo a este processo.
        SourceAdapter::unavailable(SourceKind::Imu, "nenhum driver de IMU configurado")
    };

    let gps = if !config.gps.enabled {
        SourceAdapter::Disabled(SourceKind::Gps)
    } else if test_mode {
        match GpsAdapter::spawn(SimulatedGps::new(), config.gps.timeout()) {
            Ok(a) => SourceAdapter::Gps(a),
            Err(e) => SourceAdapter::unavailable(SourceKind::Gps, e),
        }
    } else {
        open_gps(config).unwrap_or_else(|e| SourceAdapter::unavailable(SourceKind::Gps, e))
    };

    let serial = if !config.serial.enabled {
        SourceAdapter::Disabled(SourceKind::Serial)
    } else if test_mode {
        let port = SimulatedLineSerial::new(config.acquisition.interval());
        SourceAdapter::LegacySerial(LineSerialAdapter::new(Box::new(port), &config.serial.value_key))
    } else {
        match serial_port::open(&config.serial.port, config.serial.baud, config.serial.timeout()) {
            Ok(port) => SourceAdapter::LegacySerial(LineSerialAdapter::new(
                Box::new(port),
                &config.serial.value_key,
            )),
            Err(e) => SourceAdapter::unavailable(SourceKind::Serial, e),
        }
    };

    let rs232 = if !config.rs232.enabled {
        SourceAdapter::Disabled(SourceKind::Rs232)
    } else if test_mode {
        SourceAdapter::Rs232(Rs232Adapter::new(Box::new(SimulatedEcu::new(SIMULATED_ECU_PERIOD))))
    } else {
        match serial_port::open(&config.rs232.port, config.rs232.baud, config.rs232.timeout()) {
            Ok(port) => SourceAdapter::Rs232(Rs232Adapter::new(Box::new(port))),
            Err(e) if config.rs232.mandatory => return Err(e),
            Err(e) => SourceAdapter::unavailable(SourceKind::Rs232, e),
        }
    };

    Ok(vec![imu, gps, serial, rs232])
}

fn open_gps(config: &AppConfig) -> Result<SourceAdapter, SourceError> {
    let port = serial_port::open(&config.gps.port, config.gps.baud, config.gps.timeout())?;
    let session = Sim7600::start(Box::new(port), &config.gps)?;
    let adapter = GpsAdapter::spawn(session, config.gps.timeout())?;
    Ok(SourceAdapter::Gps(adapter))
}
