//! GPS via módulo SIM7600 (comandos AT pela serial).
//!
//! A sessão liga o GNSS com `AT+CGPS=1,1` ao abrir, consulta
//! `AT+CGPSINFO` com tentativas limitadas e desliga com `AT+CGPS=0` quando
//! é descartada. Roda dentro de um [`DeviceWorker`].

use super::serial_port::ByteSource;
use super::worker::{Device, DeviceWorker};
use std::thread;
use std::time::{Duration, Instant};
use telemetry_core::config::GpsConfig;
use telemetry_core::types::{Fields, Reading};
use telemetry_core::SourceError;
use tracing::{debug, info, warn};

pub const NOT_READY: &str = "GPS is not ready";

const INFO_PREFIX: &str = "+CGPSINFO:";
const POLL_STEP: Duration = Duration::from_millis(10);

// ──────────────────────────────────────────────
// Fix
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    /// Graus decimais, negativo ao sul
    pub latitude: f64,
    /// Graus decimais, negativo a oeste
    pub longitude: f64,
}

impl GpsFix {
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("Latitude".into(), self.latitude.into());
        fields.insert("Longitude".into(), self.longitude.into());
        fields
    }
}

/// `ddmm.mmmm` / `dddmm.mmmm` → graus decimais.
fn nmea_to_degrees(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    let degrees = (value / 100.0).trunc();
    let minutes = value - degrees * 100.0;
    Some(degrees + minutes / 60.0)
}

/// Extrai a posição de uma resposta de `AT+CGPSINFO`.
///
/// Formato: `+CGPSINFO: lat,N/S,lon,E/W,data,hora,alt,vel,curso`.
/// Sem fix o módulo responde só vírgulas.
pub fn parse_cgpsinfo(response: &str) -> Option<GpsFix> {
    let start = response.find(INFO_PREFIX)? + INFO_PREFIX.len();
    let line = response[start..].lines().next()?.trim();
    let mut parts = line.split(',');

    let lat = nmea_to_degrees(parts.next()?)?;
    let ns = parts.next()?.trim();
    let lon = nmea_to_degrees(parts.next()?)?;
    let ew = parts.next()?.trim();

    let latitude = match ns {
        "N" => lat,
        "S" => -lat,
        _ => return None,
    };
    let longitude = match ew {
        "E" => lon,
        "W" => -lon,
        _ => return None,
    };
    Some(GpsFix {
        latitude,
        longitude,
    })
}

// ──────────────────────────────────────────────
// Sessão AT
// ──────────────────────────────────────────────

pub struct Sim7600 {
    port: Box<dyn ByteSource>,
    max_attempts: u32,
    retry_delay: Duration,
    response_wait: Duration,
}

impl Sim7600 {
    /// Liga o GNSS. Uma resposta inesperada só gera aviso: o módulo às vezes
    /// já está com a sessão ativa.
    pub fn start(port: Box<dyn ByteSource>, config: &GpsConfig) -> Result<Self, SourceError> {
        let mut session = Self {
            port,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
            response_wait: config.response_wait(),
        };
        let reply = session.send_at("AT+CGPS=1,1")?;
        if reply.contains("OK") {
            info!("GPS: sessão GNSS iniciada");
        } else {
            warn!("GPS: AT+CGPS=1,1 respondeu {:?}", reply.trim());
        }
        Ok(session)
    }

    /// Envia um comando e coleta a resposta até `OK`/`ERROR` ou até
    /// `response_wait`.
    fn send_at(&mut self, command: &str) -> Result<String, SourceError> {
        self.port.write_bytes(format!("{command}\r\n").as_bytes())?;

        let deadline = Instant::now() + self.response_wait;
        let mut reply = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = self.port.read_available(&mut buf)?;
            reply.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&reply);
            if text.contains("OK\r\n") || text.contains("ERROR") {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            if n == 0 {
                thread::sleep(POLL_STEP);
            }
        }
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    pub fn poll_fix(&mut self) -> Result<GpsFix, SourceError> {
        for attempt in 1..=self.max_attempts {
            let reply = self.send_at("AT+CGPSINFO")?;
            if let Some(fix) = parse_cgpsinfo(&reply) {
                return Ok(fix);
            }
            debug!("GPS sem fix (tentativa {attempt}/{})", self.max_attempts);
            if attempt < self.max_attempts {
                thread::sleep(self.retry_delay);
            }
        }
        Err(SourceError::NoData(NOT_READY.into()))
    }
}

impl Device for Sim7600 {
    type Sample = GpsFix;

    fn sample(&mut self) -> Result<GpsFix, SourceError> {
        self.poll_fix()
    }
}

impl Drop for Sim7600 {
    fn drop(&mut self) {
        match self.send_at("AT+CGPS=0") {
            Ok(_) => info!("GPS: sessão GNSS encerrada"),
            Err(e) => warn!("GPS: falha ao encerrar sessão: {e}"),
        }
    }
}

// ──────────────────────────────────────────────
// Adaptador
// ──────────────────────────────────────────────

pub struct GpsAdapter {
    worker: DeviceWorker<GpsFix>,
    timeout: Duration,
}

impl GpsAdapter {
    pub fn spawn<D>(device: D, timeout: Duration) -> std::io::Result<Self>
    where
        D: Device<Sample = GpsFix>,
    {
        Ok(Self {
            worker: DeviceWorker::spawn("gps", device)?,
            timeout,
        })
    }

    pub fn read(&mut self) -> Reading {
        match self.worker.sample(self.timeout) {
            Ok(fix) => Reading::ok(fix.to_fields()),
            Err(SourceError::NoData(msg)) => Reading::failed(msg),
            Err(SourceError::Timeout(_)) => Reading::failed(NOT_READY),
            Err(e) => Reading::failed(format!("Failed to get GPS data: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::serial_port::testing::ScriptedPort;
    use telemetry_core::types::FieldValue;

    fn fast_config() -> GpsConfig {
        GpsConfig {
            max_attempts: 2,
            retry_delay_ms: 5,
            response_wait_ms: 50,
            ..GpsConfig::default()
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn parses_north_west_fix() {
        let reply = "AT+CGPSINFO\r\n+CGPSINFO: 5130.4440,N,00007.6680,W,010524,123045.0,35.2,0.0,0.0\r\n\r\nOK\r\n";
        let fix = parse_cgpsinfo(reply).unwrap();
        assert!(close(fix.latitude, 51.50740));
        assert!(close(fix.longitude, -0.12780));
    }

    #[test]
    fn parses_south_east_fix() {
        let fix = parse_cgpsinfo("+CGPSINFO: 3352.1280,S,15112.5400,E,,,,,").unwrap();
        assert!(close(fix.latitude, -33.868800));
        assert!(close(fix.longitude, 151.209));
    }

    #[test]
    fn empty_fix_is_not_ready() {
        assert_eq!(parse_cgpsinfo("+CGPSINFO: ,,,,,,,,\r\nOK\r\n"), None);
        assert_eq!(parse_cgpsinfo("ERROR\r\n"), None);
        assert_eq!(parse_cgpsinfo("+CGPSINFO: 5130.4440,X,00007.6680,W"), None);
    }

    #[test]
    fn session_starts_polls_and_stops() {
        let port = ScriptedPort::default();
        port.reply_with(b"OK\r\n");
        port.reply_with(b"+CGPSINFO: ,,,,,,,,\r\nOK\r\n");
        port.reply_with(b"+CGPSINFO: 4807.0380,N,01131.0000,E,,,,,\r\nOK\r\n");
        port.reply_with(b"OK\r\n");

        let mut session = Sim7600::start(Box::new(port.clone()), &fast_config()).unwrap();
        let fix = session.sample().unwrap();
        assert!(close(fix.latitude, 48.117300));
        assert!(close(fix.longitude, 11.516667));
        drop(session);

        let written = port.written();
        assert!(written.starts_with("AT+CGPS=1,1\r\n"));
        assert_eq!(written.matches("AT+CGPSINFO\r\n").count(), 2);
        assert!(written.ends_with("AT+CGPS=0\r\n"));
    }

    #[test]
    fn attempts_are_bounded() {
        let port = ScriptedPort::default();
        port.reply_with(b"OK\r\n");
        for _ in 0..5 {
            port.reply_with(b"+CGPSINFO: ,,,,,,,,\r\nOK\r\n");
        }
        let mut session = Sim7600::start(Box::new(port.clone()), &fast_config()).unwrap();
        let err = session.sample().unwrap_err();
        assert_eq!(err.to_string(), NOT_READY);
        assert_eq!(port.written().matches("AT+CGPSINFO").count(), 2);
    }

    #[test]
    fn adapter_reports_not_ready_as_error_reading() {
        let port = ScriptedPort::default();
        let session = Sim7600::start(Box::new(port), &fast_config()).unwrap();
        let mut adapter = GpsAdapter::spawn(session, Duration::from_secs(2)).unwrap();
        let reading = adapter.read();
        assert!(!reading.ok);
        assert_eq!(reading.error.as_deref(), Some(NOT_READY));
    }

    /// Sessão cujo poll demora mais que o timeout do adaptador.
    struct Sluggish(Sim7600);

    impl Device for Sluggish {
        type Sample = GpsFix;

        fn sample(&mut self) -> Result<GpsFix, SourceError> {
            thread::sleep(Duration::from_millis(150));
            self.0.sample()
        }
    }

    #[test]
    fn dropping_adapter_closes_gnss_session() {
        let port = ScriptedPort::default();
        port.reply_with(b"OK\r\n");
        let session = Sim7600::start(Box::new(port.clone()), &fast_config()).unwrap();
        let mut adapter =
            GpsAdapter::spawn(Sluggish(session), Duration::from_millis(20)).unwrap();

        assert_eq!(adapter.read().error.as_deref(), Some(NOT_READY));
        drop(adapter);

        assert!(port.written().ends_with("AT+CGPS=0\r\n"), "{:?}", port.written());
    }

    #[test]
    fn fix_fields_are_numbers() {
        let fields = GpsFix {
            latitude: 51.5,
            longitude: -0.125,
        }
        .to_fields();
        assert_eq!(fields["Latitude"], FieldValue::Float(51.5));
        assert_eq!(fields["Longitude"], FieldValue::Float(-0.125));
    }
}
