//! Tipos de dados da telemetria: leituras por fonte e snapshots agregados.
//!
//! Todo valor que vai para o fio (JSON) ou para o CSV passa por
//! [`FieldValue`]. Os mapas preservam ordem de inserção (`IndexMap`) para que
//! o JSON e o cabeçalho do CSV saiam sempre na mesma ordem.

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Valor textual usado quando um campo não pôde ser lido.
pub const MISSING_TEXT: &str = "N/A";

/// Sentinela numérico usado pelo RS232 quando nenhum frame válido chegou.
pub const MISSING_NUMERIC: i64 = -1;

/// Formato do campo `Timestamp` no fio e no CSV.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Chave do timestamp no topo do snapshot.
pub const TIMESTAMP_KEY: &str = "Timestamp";

/// Chave anexada aos campos de uma leitura com falha.
pub const ERROR_KEY: &str = "Error";

/// Mapa ordenado de campos de uma leitura.
pub type Fields = IndexMap<String, FieldValue>;

// ──────────────────────────────────────────────
// FieldValue
// ──────────────────────────────────────────────

/// Folha (ou sub-mapa) de uma leitura.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
    Group(Fields),
}

impl FieldValue {
    /// `"N/A"`.
    pub fn missing() -> Self {
        FieldValue::Text(MISSING_TEXT.into())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(s) => s.trim().parse().ok(),
            FieldValue::Group(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Group(g) => {
                // Só aparece em logs; o CSV achata grupos antes.
                f.write_str("{")?;
                for (i, (k, v)) in g.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<Fields> for FieldValue {
    fn from(v: Fields) -> Self {
        FieldValue::Group(v)
    }
}

// ──────────────────────────────────────────────
// Fontes
// ──────────────────────────────────────────────

/// Fontes de telemetria conhecidas, na ordem em que aparecem no fio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    Imu,
    Gps,
    Serial,
    Rs232,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Imu,
        SourceKind::Gps,
        SourceKind::Serial,
        SourceKind::Rs232,
    ];

    /// Chave de topo no snapshot (`"IMU Data"`, …).
    pub fn wire_key(self) -> &'static str {
        match self {
            SourceKind::Imu => "IMU Data",
            SourceKind::Gps => "GPS Data",
            SourceKind::Serial => "Serial Data",
            SourceKind::Rs232 => "RS232 Data",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Imu => "imu",
            SourceKind::Gps => "gps",
            SourceKind::Serial => "serial",
            SourceKind::Rs232 => "rs232",
        };
        f.write_str(name)
    }
}

// ──────────────────────────────────────────────
// Reading
// ──────────────────────────────────────────────

/// Amostra normalizada de uma fonte em um tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reading {
    pub ok: bool,
    pub fields: Fields,
    pub error: Option<String>,
}

impl Reading {
    pub fn ok(fields: Fields) -> Self {
        Self {
            ok: true,
            fields,
            error: None,
        }
    }

    /// Leitura com falha e sem campos.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            fields: Fields::new(),
            error: Some(error.into()),
        }
    }

    /// Leitura com falha que ainda carrega campos sentinela.
    pub fn degraded(fields: Fields, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            fields,
            error: Some(error.into()),
        }
    }

    /// Mapa enviado no fio: os campos mais `"Error"` quando houve falha.
    pub fn to_wire(&self) -> Fields {
        let mut out = self.fields.clone();
        if let Some(err) = &self.error {
            out.insert(ERROR_KEY.into(), FieldValue::Text(err.clone()));
        }
        out
    }
}

// ──────────────────────────────────────────────
// Snapshot
// ──────────────────────────────────────────────

/// Agregado imutável de todas as fontes em um tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: DateTime<Local>,
    pub sources: IndexMap<SourceKind, Reading>,
}

impl Snapshot {
    pub fn new(timestamp: DateTime<Local>) -> Self {
        Self {
            timestamp,
            sources: IndexMap::new(),
        }
    }

    pub fn with_reading(mut self, kind: SourceKind, reading: Reading) -> Self {
        self.sources.insert(kind, reading);
        self
    }

    /// Representação de fio: `Timestamp` primeiro, depois as fontes na ordem
    /// de [`SourceKind::ALL`]. Fontes ausentes não aparecem.
    pub fn to_wire(&self) -> Fields {
        let mut out = Fields::new();
        out.insert(
            TIMESTAMP_KEY.into(),
            FieldValue::Text(self.timestamp.format(TIMESTAMP_FORMAT).to_string()),
        );
        for kind in SourceKind::ALL {
            if let Some(reading) = self.sources.get(&kind) {
                out.insert(kind.wire_key().into(), FieldValue::Group(reading.to_wire()));
            }
        }
        out
    }
}

impl Serialize for Snapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

/// Snapshot como recebido por um cliente (sem tipos fortes).
pub type WireSnapshot = Fields;

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap()
    }

    #[test]
    fn failed_reading_carries_error_key_on_wire() {
        let reading = Reading::failed("No data available");
        let wire = reading.to_wire();
        assert!(!reading.ok);
        assert_eq!(
            wire.get(ERROR_KEY),
            Some(&FieldValue::Text("No data available".into()))
        );
    }

    #[test]
    fn snapshot_wire_keys_follow_fixed_order() {
        let snap = Snapshot::new(fixed_time())
            .with_reading(SourceKind::Rs232, Reading::failed("x"))
            .with_reading(SourceKind::Imu, Reading::ok(Fields::new()))
            .with_reading(SourceKind::Serial, Reading::ok(Fields::new()))
            .with_reading(SourceKind::Gps, Reading::ok(Fields::new()));

        let wire = snap.to_wire();
        let keys: Vec<&str> = wire.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            ["Timestamp", "IMU Data", "GPS Data", "Serial Data", "RS232 Data"]
        );
    }

    #[test]
    fn timestamp_uses_wall_clock_format() {
        let snap = Snapshot::new(fixed_time());
        assert_eq!(
            snap.to_wire().get(TIMESTAMP_KEY),
            Some(&FieldValue::Text("2024-05-01 12:30:45".into()))
        );
    }

    #[test]
    fn untagged_values_deserialize_to_narrowest_variant() {
        let parsed: Fields =
            serde_json::from_str(r#"{"a": 3, "b": 1.5, "c": "N/A", "d": {"Sys": 3}}"#).unwrap();
        assert_eq!(parsed["a"], FieldValue::Int(3));
        assert_eq!(parsed["b"], FieldValue::Float(1.5));
        assert_eq!(parsed["c"], FieldValue::missing());
        assert!(matches!(parsed["d"], FieldValue::Group(_)));
    }

    #[test]
    fn as_f64_parses_numeric_text() {
        assert_eq!(FieldValue::from("42.5").as_f64(), Some(42.5));
        assert_eq!(FieldValue::missing().as_f64(), None);
        assert_eq!(FieldValue::Int(-1).as_f64(), Some(-1.0));
    }
}
