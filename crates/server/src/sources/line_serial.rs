//! Serial legada (Arduino): uma linha de texto por medição.
//!
//! A cada tick entrega a linha completa mais recente. Linhas antigas do
//! mesmo intervalo são descartadas.

use super::serial_port::ByteSource;
use telemetry_core::types::{FieldValue, Fields, Reading};
use tracing::warn;

/// Linha maior que isso sem `\n` é lixo e vai fora.
const MAX_LINE: usize = 1024;

const READ_CHUNK: usize = 256;
const MAX_READS_PER_DRAIN: usize = 32;

pub struct LineSerialAdapter {
    port: Box<dyn ByteSource>,
    value_key: String,
    partial: Vec<u8>,
    latest: Option<String>,
    io_error: Option<String>,
}

impl LineSerialAdapter {
    pub fn new(port: Box<dyn ByteSource>, value_key: impl Into<String>) -> Self {
        Self {
            port,
            value_key: value_key.into(),
            partial: Vec::with_capacity(MAX_LINE),
            latest: None,
            io_error: None,
        }
    }

    pub fn drain(&mut self) {
        let mut buf = [0u8; READ_CHUNK];
        for _ in 0..MAX_READS_PER_DRAIN {
            match self.port.read_available(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.push(&buf[..n]),
                Err(e) => {
                    if self.io_error.is_none() {
                        warn!("Serial: erro de leitura: {e}");
                    }
                    self.io_error = Some(e.to_string());
                    break;
                }
            }
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == b'\n' {
                let line = String::from_utf8_lossy(&self.partial);
                let line = line.trim();
                if !line.is_empty() {
                    self.latest = Some(line.to_string());
                }
                self.partial.clear();
            } else if self.partial.len() < MAX_LINE {
                self.partial.push(b);
            } else {
                warn!("Serial: linha excedeu {MAX_LINE} bytes, descartada");
                self.partial.clear();
            }
        }
    }

    pub fn read(&mut self) -> Reading {
        self.drain();

        if let Some(e) = self.io_error.take() {
            return Reading::failed(format!("Failed to read serial data: {e}"));
        }
        match self.latest.take() {
            Some(line) => {
                let mut fields = Fields::new();
                fields.insert(self.value_key.clone(), parse_value(&line));
                Reading::ok(fields)
            }
            None => Reading::failed("No data available"),
        }
    }
}

/// Número quando der, texto caso contrário.
fn parse_value(text: &str) -> FieldValue {
    if let Ok(v) = text.parse::<i64>() {
        FieldValue::Int(v)
    } else if let Ok(v) = text.parse::<f64>() {
        FieldValue::Float(v)
    } else {
        FieldValue::Text(text.to_string())
    }
}
