//! Fontes simuladas para `--test-mode` (bancada sem hardware).
//!
//! Passam pelos mesmos adaptadores do hardware: o IMU e o GPS como
//! [`Device`], a serial e a ECU como [`ByteSource`].

use super::gps::GpsFix;
use super::imu::ImuSample;
use super::serial_port::ByteSource;
use super::worker::Device;
use std::io;
use std::time::{Duration, Instant};
use telemetry_core::frame::{FRAME_SIZE, Frame};
use telemetry_core::SourceError;

const GRAVITY: f64 = 9.81;

/// Centro do círculo percorrido pelo GPS simulado.
pub const GPS_CENTER: (f64, f64) = (51.5074, -0.1278);
const GPS_RADIUS_DEG: f64 = 0.001;

fn seconds_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

// ──────────────────────────────────────────────
// IMU
// ──────────────────────────────────────────────

/// Valores oscilando com o tempo; calibração sempre completa.
pub struct SimulatedImu {
    start: Instant,
}

impl SimulatedImu {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn sample_at(t: f64) -> ImuSample {
        let g = (t.sin() + 1.0) * 0.5;
        ImuSample {
            linear_acceleration: Some([0.0, 0.0, g * GRAVITY]),
            gyro: Some([t.sin(), t.cos(), (t / 2.0).sin()]),
            heading: Some((t.sin() + 1.0) * 180.0),
            calibration: [3, 3, 3, 3],
        }
    }
}

impl Device for SimulatedImu {
    type Sample = ImuSample;

    fn sample(&mut self) -> Result<ImuSample, SourceError> {
        Ok(Self::sample_at(seconds_since(self.start)))
    }
}

// ──────────────────────────────────────────────
// GPS
// ──────────────────────────────────────────────

pub struct SimulatedGps {
    start: Instant,
}

impl SimulatedGps {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn fix_at(t: f64) -> GpsFix {
        GpsFix {
            latitude: GPS_CENTER.0 + GPS_RADIUS_DEG * (t / 10.0).sin(),
            longitude: GPS_CENTER.1 + GPS_RADIUS_DEG * (t / 10.0).cos(),
        }
    }
}

impl Device for SimulatedGps {
    type Sample = GpsFix;

    fn sample(&mut self) -> Result<GpsFix, SourceError> {
        Ok(Self::fix_at(seconds_since(self.start)))
    }
}

// ──────────────────────────────────────────────
// Serial legada
// ──────────────────────────────────────────────

/// Emite uma linha `"<valor>\n"` por período, valor entre 0 e 10000.
pub struct SimulatedLineSerial {
    start: Instant,
    period: Duration,
    emitted: u64,
}

impl SimulatedLineSerial {
    pub fn new(period: Duration) -> Self {
        Self {
            start: Instant::now(),
            period,
            emitted: 0,
        }
    }

    pub fn value_at(t: f64) -> i64 {
        ((t.sin() + 1.0) * 5000.0) as i64
    }
}

impl ByteSource for SimulatedLineSerial {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let due = due_count(self.start, self.period);
        if due <= self.emitted {
            return Ok(0);
        }
        let line = format!("{}\n", Self::value_at(seconds_since(self.start)));
        if line.len() > buf.len() {
            return Ok(0);
        }
        buf[..line.len()].copy_from_slice(line.as_bytes());
        // Linhas atrasadas não se acumulam: só a mais recente interessa.
        self.emitted = due;
        Ok(line.len())
    }

    fn write_bytes(&mut self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

// ──────────────────────────────────────────────
// ECU (RS232)
// ──────────────────────────────────────────────

/// Frames válidos a cada período, entregues em pedaços do tamanho que o
/// leitor pedir (testa o sincronizador de verdade).
pub struct SimulatedEcu {
    start: Instant,
    period: Duration,
    emitted: u64,
    pending: Vec<u8>,
}

/// Teto de frames gerados de uma vez após um atraso longo.
const MAX_BACKLOG_FRAMES: u64 = 8;

impl SimulatedEcu {
    pub fn new(period: Duration) -> Self {
        Self {
            start: Instant::now(),
            period,
            emitted: 0,
            pending: Vec::with_capacity(FRAME_SIZE * MAX_BACKLOG_FRAMES as usize),
        }
    }

    pub fn frame_at(t: f64, seq: u64) -> Frame {
        let wave = (t.sin() + 1.0) * 0.5;
        Frame {
            rpm: (800.0 + wave * 5200.0) as u16,
            throttle: (wave * 1000.0).round() / 10.0,
            engine_temp: 85.0 + (t / 30.0).sin() * 5.0,
            drive_speed: (wave * 600.0).round() / 10.0,
            ground_speed: (wave * 590.0).round() / 10.0,
            gear: (seq % 6 + 1) as u16,
        }
    }
}

impl ByteSource for SimulatedEcu {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let due = due_count(self.start, self.period);
        if due > self.emitted {
            let first = self.emitted.max(due.saturating_sub(MAX_BACKLOG_FRAMES));
            let t = seconds_since(self.start);
            for seq in first..due {
                self.pending.extend_from_slice(&Self::frame_at(t, seq).encode());
            }
            self.emitted = due;
        }

        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn write_bytes(&mut self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

fn due_count(start: Instant, period: Duration) -> u64 {
    let period = period.as_nanos().max(1);
    (start.elapsed().as_nanos() / period) as u64 + 1
}
