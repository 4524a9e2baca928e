//! RS232 da ECU: drena a porta, alimenta o [`FrameSynchronizer`] e entrega o
//! frame mais recente a cada tick.
//!
//! Sem frame novo desde o último tick, a leitura sai com `ok = false` e os
//! seis campos no sentinela `-1`, para o formato do fio não mudar.

use super::serial_port::ByteSource;
use telemetry_core::frame::{Frame, FrameSynchronizer};
use telemetry_core::types::Reading;
use telemetry_core::SourceError;
use tracing::{debug, warn};

const READ_CHUNK: usize = 512;

/// Limite de leituras por drenagem; a porta nunca segura o loop.
const MAX_READS_PER_DRAIN: usize = 64;

pub struct Rs232Adapter {
    port: Box<dyn ByteSource>,
    sync: FrameSynchronizer,
    latest: Option<Frame>,
    resyncs_reported: u64,
    io_error: Option<String>,
}

impl Rs232Adapter {
    pub fn new(port: Box<dyn ByteSource>) -> Self {
        Self {
            port,
            sync: FrameSynchronizer::new(),
            latest: None,
            resyncs_reported: 0,
            io_error: None,
        }
    }

    pub fn synchronizer(&self) -> &FrameSynchronizer {
        &self.sync
    }

    /// Consome tudo que a porta já tem. Chamado entre ticks.
    pub fn drain(&mut self) {
        let mut buf = [0u8; READ_CHUNK];
        for _ in 0..MAX_READS_PER_DRAIN {
            match self.port.read_available(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if let Some(frame) = self.sync.feed(&buf[..n]).pop() {
                        self.latest = Some(frame);
                    }
                }
                Err(e) => {
                    if self.io_error.is_none() {
                        warn!("RS232: erro de leitura: {e}");
                    }
                    self.io_error = Some(e.to_string());
                    break;
                }
            }
        }
    }

    pub fn read(&mut self) -> Reading {
        self.drain();

        let resyncs = self.sync.stats().resyncs;
        let new_resyncs = resyncs > self.resyncs_reported;
        self.resyncs_reported = resyncs;

        if let Some(frame) = self.latest.take() {
            self.io_error = None;
            return Reading::ok(frame.to_fields());
        }

        let error = if let Some(e) = self.io_error.take() {
            format!("Failed to read RS232 data: {e}")
        } else if new_resyncs {
            SourceError::FrameDesync { resyncs }.to_string()
        } else {
            SourceError::NoData("No data available".into()).to_string()
        };
        debug!("RS232 sem frame neste tick: {error}");
        Reading::degraded(Frame::sentinel_fields(), error)
    }
}
