//! Gravação de snapshots em CSV.
//!
//! Roda dentro do loop de aquisição, então cada linha corresponde exatamente
//! a um snapshot publicado. O cabeçalho é o conjunto de chaves achatadas
//! (`"GPS Data.Latitude"`) do primeiro snapshot e não muda depois; chaves que
//! somem em snapshots seguintes viram `N/A`, chaves novas são ignoradas.

use crate::error::RecorderError;
use crate::types::{FieldValue, Fields, MISSING_TEXT, Snapshot};
use indexmap::IndexMap;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Separador de chaves aninhadas.
pub const KEY_SEPARATOR: char = '.';

/// Achata mapas aninhados em `pai.filho`, preservando a ordem.
pub fn flatten(fields: &Fields) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    flatten_into(&mut out, None, fields);
    out
}

fn flatten_into(out: &mut IndexMap<String, String>, prefix: Option<&str>, fields: &Fields) {
    for (key, value) in fields {
        let full = match prefix {
            Some(p) => format!("{p}{KEY_SEPARATOR}{key}"),
            None => key.clone(),
        };
        match value {
            FieldValue::Group(inner) => flatten_into(out, Some(&full), inner),
            leaf => {
                out.insert(full, leaf.to_string());
            }
        }
    }
}

fn csv_escape(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Gravador CSV com cabeçalho fixo.
pub struct Recorder<W: Write> {
    out: BufWriter<W>,
    header: Option<Vec<String>>,
    rows: u64,
}

impl Recorder<File> {
    /// Cria (ou trunca) o arquivo de saída.
    pub fn create(path: &Path) -> Result<Self, RecorderError> {
        let file = File::create(path)?;
        info!("Gravando snapshots em {}", path.display());
        Ok(Recorder::new(file))
    }
}

impl<W: Write> Recorder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: BufWriter::new(writer),
            header: None,
            rows: 0,
        }
    }

    /// Linhas gravadas até agora.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Grava uma linha. O primeiro snapshot também define o cabeçalho.
    pub fn record(&mut self, snapshot: &Snapshot) -> Result<(), RecorderError> {
        let flat = flatten(&snapshot.to_wire());

        if self.header.is_none() {
            let header: Vec<String> = flat.keys().cloned().collect();
            let line = header
                .iter()
                .map(|k| csv_escape(k))
                .collect::<Vec<_>>()
                .join(",");
            writeln!(self.out, "{line}")?;
            self.header = Some(header);
        }

        let Some(header) = &self.header else {
            return Ok(());
        };
        let line = header
            .iter()
            .map(|k| csv_escape(flat.get(k).map(String::as_str).unwrap_or(MISSING_TEXT)))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Fecha a gravação e devolve o writer interno.
    pub fn finish(self) -> Result<W, RecorderError> {
        let rows = self.rows;
        let inner = self
            .out
            .into_inner()
            .map_err(|e| RecorderError::Io(e.into_error()))?;
        info!("Gravação encerrada ({rows} linhas)");
        Ok(inner)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
