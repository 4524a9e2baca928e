//! Protocolo de comunicação TCP.
//!
//! Cada push é um objeto JSON completo terminado em `\n`:
//!
//! ```text
//! {"Timestamp":"2024-05-01 12:30:45","IMU Data":{...},"GPS Data":{...},"Serial Data":{...},"RS232 Data":{...}}\n
//! ```
//!
//! No sentido contrário, o cliente pode mandar o literal `shutdown`, que
//! encerra o servidor inteiro (atalho administrativo, não é por conexão).

use crate::types::{Snapshot, WireSnapshot};

/// Comando de controle aceito do cliente.
pub const SHUTDOWN_COMMAND: &[u8] = b"shutdown";

/// Quantos bytes de controle são retidos entre leituras.
const CONTROL_WINDOW: usize = 64;

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Linha vazia")]
    Empty,

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),
}

/// Codifica um [`Snapshot`] como uma linha JSON (com `\n`).
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>, ProtocolError> {
    let mut line =
        serde_json::to_vec(snapshot).map_err(|e| ProtocolError::Serialize(e.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

/// Decodifica uma linha recebida pelo cliente.
pub fn decode_line(line: &str) -> Result<WireSnapshot, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    serde_json::from_str(line).map_err(|e| ProtocolError::Deserialize(e.to_string()))
}

/// Acumula bytes enviados pelo cliente e detecta `shutdown`, mesmo quando o
/// comando chega partido em várias leituras.
#[derive(Debug, Default)]
pub struct ControlParser {
    window: Vec<u8>,
}

impl ControlParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retorna `true` quando o comando de shutdown foi visto.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        self.window.extend_from_slice(bytes);
        let found = self
            .window
            .windows(SHUTDOWN_COMMAND.len())
            .any(|w| w == SHUTDOWN_COMMAND);
        if found {
            self.window.clear();
        } else if self.window.len() > CONTROL_WINDOW {
            let keep_from = self.window.len() - (SHUTDOWN_COMMAND.len() - 1);
            self.window.drain(..keep_from);
        }
        found
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use chrono::TimeZone;

    fn sample_snapshot() -> Snapshot {
        let mut gps = Fields::new();
        gps.insert("Latitude".into(), FieldValue::Float(51.5));
        gps.insert("Longitude".into(), FieldValue::Float(-0.125));

        let mut rs232 = Fields::new();
        rs232.insert("RPM".into(), FieldValue::Int(1000));
        rs232.insert("Gear".into(), FieldValue::Text("3".into()));

        Snapshot::new(chrono::Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
            .with_reading(SourceKind::Imu, Reading::failed("Failed to read sensor data"))
            .with_reading(SourceKind::Gps, Reading::ok(gps))
            .with_reading(SourceKind::Serial, Reading::failed("No data available"))
            .with_reading(SourceKind::Rs232, Reading::ok(rs232))
    }

    #[test]
    fn encoded_snapshot_is_one_json_line() {
        let line = encode_snapshot(&sample_snapshot()).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
        assert!(std::str::from_utf8(&line).is_ok());
    }

    #[test]
    fn decoded_line_matches_wire_map() {
        let snap = sample_snapshot();
        let line = encode_snapshot(&snap).unwrap();
        let decoded = decode_line(std::str::from_utf8(&line).unwrap()).unwrap();
        assert_eq!(decoded, snap.to_wire());

        let FieldValue::Group(rs232) = &decoded["RS232 Data"] else {
            panic!("RS232 Data deveria ser um mapa");
        };
        assert_eq!(rs232["RPM"], FieldValue::Int(1000));
    }

    #[test]
    fn rejects_empty_and_garbage_lines() {
        assert!(matches!(decode_line("  \n"), Err(ProtocolError::Empty)));
        assert!(matches!(
            decode_line("{not json"),
            Err(ProtocolError::Deserialize(_))
        ));
    }

    #[test]
    fn control_parser_detects_split_command() {
        let mut parser = ControlParser::new();
        assert!(!parser.push(b"shu"));
        assert!(!parser.push(b"tdo"));
        assert!(parser.push(b"wn"));
    }

    #[test]
    fn control_parser_ignores_other_bytes_and_stays_bounded() {
        let mut parser = ControlParser::new();
        for _ in 0..100 {
            assert!(!parser.push(b"hello there "));
        }
        assert!(parser.window.len() <= CONTROL_WINDOW + 12);
        assert!(parser.push(b"shutdown\n"));
    }
}
