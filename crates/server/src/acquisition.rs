//! Loop de aquisição: único escritor do slot de último snapshot.
//!
//! A cada período consulta todas as fontes em sequência, monta um
//! [`Snapshot`], grava (se o gravador estiver ligado) e publica. Entre ticks
//! só drena as portas seriais, para o buffer do RS232 não transbordar.

use crate::sources::{DISABLED, SourceAdapter};
use chrono::{DateTime, Local};
use std::fs::File;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use telemetry_core::recorder::Recorder;
use telemetry_core::types::{Reading, Snapshot, SourceKind};
use telemetry_core::AppContext;
use tracing::{debug, error, info, warn};

/// Resumo devolvido quando o loop termina.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcquisitionSummary {
    pub ticks: u64,
    pub recorded_rows: u64,
}

pub struct AcquisitionLoop {
    sources: Vec<SourceAdapter>,
    ctx: AppContext,
    interval: Duration,
    drain_interval: Duration,
    recorder: Option<Recorder<File>>,
    last_timestamp: Option<DateTime<Local>>,
    ticks: u64,
}

impl AcquisitionLoop {
    pub fn new(
        sources: Vec<SourceAdapter>,
        ctx: AppContext,
        interval: Duration,
        drain_interval: Duration,
    ) -> Self {
        Self {
            sources,
            ctx,
            interval,
            drain_interval,
            recorder: None,
            last_timestamp: None,
            ticks: 0,
        }
    }

    pub fn with_recorder(mut self, recorder: Recorder<File>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Timestamp de parede, nunca anterior ao do tick anterior (o relógio
    /// do sistema pode voltar após um ajuste de NTP).
    fn next_timestamp(&mut self) -> DateTime<Local> {
        let now = Local::now();
        let ts = match self.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    /// Lê todas as fontes e monta o snapshot. Fontes sem adaptador aparecem
    /// como desligadas, então as chaves de topo são sempre as mesmas.
    pub fn tick(&mut self) -> Snapshot {
        let mut readings: Vec<(SourceKind, Reading)> = self
            .sources
            .iter_mut()
            .map(|source| (source.kind(), source.read()))
            .collect();

        let mut snapshot = Snapshot::new(self.next_timestamp());
        for kind in SourceKind::ALL {
            let reading = match readings.iter().position(|(k, _)| *k == kind) {
                Some(i) => readings.swap_remove(i).1,
                None => Reading::failed(DISABLED),
            };
            snapshot = snapshot.with_reading(kind, reading);
        }
        snapshot
    }

    /// Um ciclo completo: ler, gravar, publicar.
    pub fn step(&mut self) {
        let snapshot = self.tick();
        self.ticks += 1;

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.record(&snapshot) {
                error!("Falha ao gravar snapshot: {e}. Gravação desativada.");
                self.recorder = None;
            }
        }

        let failed: Vec<String> = snapshot
            .sources
            .iter()
            .filter(|(_, r)| !r.ok)
            .map(|(k, _)| k.to_string())
            .collect();
        debug!(
            "Tick #{} | {} | falhas: {:?}",
            self.ticks,
            snapshot.timestamp.format("%H:%M:%S"),
            failed
        );

        self.ctx.publisher.publish(snapshot);
    }

    fn drain_sources(&mut self) {
        for source in &mut self.sources {
            source.drain();
        }
    }

    /// Roda até o sinal de shutdown. Devolve quantos ticks e linhas foram
    /// produzidos.
    pub fn run(mut self) -> AcquisitionSummary {
        info!(
            "Aquisição iniciada: {} fontes, período {:?}",
            self.sources.len(),
            self.interval
        );

        let mut next_tick = Instant::now();
        'outer: while !self.ctx.shutdown.is_triggered() {
            self.step();
            next_tick += self.interval;

            loop {
                let now = Instant::now();
                if now >= next_tick {
                    // Atrasou mais de um período: não tenta recuperar ticks.
                    if now - next_tick > self.interval {
                        warn!("Tick atrasado {:?}; realinhando", now - next_tick);
                        next_tick = now;
                    }
                    break;
                }
                let wait = (next_tick - now).min(self.drain_interval);
                if self.ctx.shutdown.wait_timeout(wait) {
                    break 'outer;
                }
                self.drain_sources();
            }
        }

        let recorded_rows = match self.recorder.take() {
            Some(recorder) => {
                let rows = recorder.rows();
                if let Err(e) = recorder.finish() {
                    error!("Falha ao fechar gravação: {e}");
                }
                rows
            }
            None => 0,
        };

        for source in &self.sources {
            if let SourceAdapter::Rs232(rs232) = source {
                let stats = rs232.synchronizer().stats();
                info!(
                    "RS232: {} frames, {} ressincronizações, {} bytes descartados",
                    stats.frames, stats.resyncs, stats.discarded_bytes
                );
            }
        }
        info!("Aquisição encerrada após {} ticks", self.ticks);
        AcquisitionSummary {
            ticks: self.ticks,
            recorded_rows,
        }
    }

    /// Move o loop para a thread `acquisition`.
    pub fn spawn(self) -> std::io::Result<JoinHandle<AcquisitionSummary>> {
        thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || self.run())
    }
}
