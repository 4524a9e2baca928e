//! Decoder de frames RS232 da ECU.
//!
//! O fluxo serial não tem delimitador inicial. Cada frame tem 144 bytes e a
//! única marca de fronteira fica perto do fim:
//!
//! ```text
//! ┌──────────────────────┬──────────────────┬─────────────┐
//! │ Payload (0..140)     │ FC FB FA (140..) │ Checksum(1) │
//! └──────────────────────┴──────────────────┴─────────────┘
//! ```
//!
//! - Checksum = soma dos bytes 0..=142, módulo 256
//! - Campos são `u16` big-endian em offsets fixos (ver [`Frame::decode`])
//!
//! [`FrameSynchronizer`] acumula bytes, procura o marcador, valida o checksum
//! e ressincroniza um byte por vez quando o alinhamento se perde. O buffer
//! retido nunca passa de [`MAX_BUFFERED`] bytes entre chamadas de `feed`.

use crate::types::{FieldValue, Fields, MISSING_NUMERIC};
use tracing::debug;

/// Tamanho de um frame completo.
pub const FRAME_SIZE: usize = 144;

/// Marcador de cauda.
pub const MARKER: [u8; 3] = [0xFC, 0xFB, 0xFA];

/// Offset do marcador dentro do frame.
pub const MARKER_OFFSET: usize = 140;

/// Offset do byte de checksum.
pub const CHECKSUM_OFFSET: usize = 143;

/// Limite do buffer sem candidato válido; acima disso só os últimos
/// `FRAME_SIZE - 1` bytes são mantidos.
pub const MAX_BUFFERED: usize = 2 * FRAME_SIZE;

const OFFSET_RPM: usize = 0;
const OFFSET_THROTTLE: usize = 2;
const OFFSET_ENGINE_TEMP: usize = 8;
const OFFSET_DRIVE_SPEED: usize = 56;
const OFFSET_GROUND_SPEED: usize = 58;
const OFFSET_GEAR: usize = 104;

/// Nomes dos campos do RS232 no snapshot.
pub const FIELD_RPM: &str = "RPM";
pub const FIELD_THROTTLE: &str = "Throttle Position";
pub const FIELD_ENGINE_TEMP: &str = "Engine Temperature";
pub const FIELD_DRIVE_SPEED: &str = "Drive Speed";
pub const FIELD_GROUND_SPEED: &str = "Ground Speed";
pub const FIELD_GEAR: &str = "Gear";

/// Soma módulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Tamanho, marcador e checksum conferem.
pub fn is_valid_frame(bytes: &[u8]) -> bool {
    bytes.len() == FRAME_SIZE
        && bytes[MARKER_OFFSET..CHECKSUM_OFFSET] == MARKER
        && checksum(&bytes[..CHECKSUM_OFFSET]) == bytes[CHECKSUM_OFFSET]
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn tenths(raw: u16) -> f64 {
    raw as f64 / 10.0
}

fn to_tenths(value: f64) -> u16 {
    (value * 10.0).round().clamp(0.0, u16::MAX as f64) as u16
}

// ──────────────────────────────────────────────
// Frame
// ──────────────────────────────────────────────

/// Registro decodificado da ECU.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Frame {
    pub rpm: u16,
    /// Posição do acelerador (%)
    pub throttle: f64,
    /// Temperatura do motor (°C)
    pub engine_temp: f64,
    /// Velocidade da roda motriz (km/h)
    pub drive_speed: f64,
    /// Velocidade da roda livre (km/h)
    pub ground_speed: f64,
    pub gear: u16,
}

impl Frame {
    /// Decodifica um frame já delimitado. `None` se tamanho, marcador ou
    /// checksum não conferirem.
    ///
    /// | Campo              | Offset | Escala |
    /// |--------------------|--------|--------|
    /// | RPM                | 0      | ×1     |
    /// | Throttle Position  | 2      | ×0.1   |
    /// | Engine Temperature | 8      | ×0.1   |
    /// | Drive Speed        | 56     | ×0.1   |
    /// | Ground Speed       | 58     | ×0.1   |
    /// | Gear               | 104    | ÷10    |
    pub fn decode(bytes: &[u8]) -> Option<Frame> {
        if !is_valid_frame(bytes) {
            return None;
        }
        Some(Frame {
            rpm: read_u16(bytes, OFFSET_RPM),
            throttle: tenths(read_u16(bytes, OFFSET_THROTTLE)),
            engine_temp: tenths(read_u16(bytes, OFFSET_ENGINE_TEMP)),
            drive_speed: tenths(read_u16(bytes, OFFSET_DRIVE_SPEED)),
            ground_speed: tenths(read_u16(bytes, OFFSET_GROUND_SPEED)),
            gear: read_u16(bytes, OFFSET_GEAR) / 10,
        })
    }

    /// Codifica no layout da ECU (bytes não mapeados ficam zerados).
    /// Usado pelo simulador e pelos testes.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut bytes = [0u8; FRAME_SIZE];
        write_u16(&mut bytes, OFFSET_RPM, self.rpm);
        write_u16(&mut bytes, OFFSET_THROTTLE, to_tenths(self.throttle));
        write_u16(&mut bytes, OFFSET_ENGINE_TEMP, to_tenths(self.engine_temp));
        write_u16(&mut bytes, OFFSET_DRIVE_SPEED, to_tenths(self.drive_speed));
        write_u16(&mut bytes, OFFSET_GROUND_SPEED, to_tenths(self.ground_speed));
        write_u16(&mut bytes, OFFSET_GEAR, self.gear.saturating_mul(10));
        bytes[MARKER_OFFSET..CHECKSUM_OFFSET].copy_from_slice(&MARKER);
        bytes[CHECKSUM_OFFSET] = checksum(&bytes[..CHECKSUM_OFFSET]);
        bytes
    }

    /// Campos do snapshot. A marcha vai como texto.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(FIELD_RPM.into(), FieldValue::from(self.rpm));
        fields.insert(FIELD_THROTTLE.into(), FieldValue::from(self.throttle));
        fields.insert(FIELD_ENGINE_TEMP.into(), FieldValue::from(self.engine_temp));
        fields.insert(FIELD_DRIVE_SPEED.into(), FieldValue::from(self.drive_speed));
        fields.insert(FIELD_GROUND_SPEED.into(), FieldValue::from(self.ground_speed));
        fields.insert(FIELD_GEAR.into(), FieldValue::Text(self.gear.to_string()));
        fields
    }

    /// Mesmas chaves de [`Frame::to_fields`], todas com o sentinela `-1`.
    pub fn sentinel_fields() -> Fields {
        [
            FIELD_RPM,
            FIELD_THROTTLE,
            FIELD_ENGINE_TEMP,
            FIELD_DRIVE_SPEED,
            FIELD_GROUND_SPEED,
            FIELD_GEAR,
        ]
        .into_iter()
        .map(|k| (k.to_string(), FieldValue::Int(MISSING_NUMERIC)))
        .collect()
    }
}

// ──────────────────────────────────────────────
// Synchronizer
// ──────────────────────────────────────────────

/// Crença do decoder sobre o alinhamento do buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Unsynchronized,
    Synchronized,
}

/// Contadores para observabilidade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub frames: u64,
    pub resyncs: u64,
    pub discarded_bytes: u64,
}

/// Decoder incremental. A divisão da entrada em pedaços não altera quais
/// frames saem nem a ordem.
#[derive(Debug, Default)]
pub struct FrameSynchronizer {
    buf: Vec<u8>,
    state: SyncState,
    stats: SyncStats,
}

impl FrameSynchronizer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MAX_BUFFERED + FRAME_SIZE),
            ..Default::default()
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Bytes retidos aguardando mais dados.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Acrescenta bytes e retorna os frames completos encontrados.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            match self.state {
                SyncState::Unsynchronized => {
                    if !self.lock_on() {
                        break;
                    }
                }
                SyncState::Synchronized => {
                    if self.buf.len() < FRAME_SIZE {
                        break;
                    }
                    match Frame::decode(&self.buf[..FRAME_SIZE]) {
                        Some(frame) => {
                            self.buf.drain(..FRAME_SIZE);
                            self.stats.frames += 1;
                            frames.push(frame);
                        }
                        None => {
                            self.discard(1);
                            self.state = SyncState::Unsynchronized;
                            self.stats.resyncs += 1;
                            debug!(
                                "RS232: frame inválido, ressincronizando (#{})",
                                self.stats.resyncs
                            );
                        }
                    }
                }
            }
        }

        frames
    }

    /// Procura o primeiro candidato válido. Em caso de sucesso descarta o que
    /// vem antes dele e passa para `Synchronized`.
    fn lock_on(&mut self) -> bool {
        let mut i = MARKER_OFFSET;
        while i + MARKER.len() <= self.buf.len() {
            if self.buf[i..i + MARKER.len()] == MARKER {
                let start = i - MARKER_OFFSET;
                let end = start + FRAME_SIZE;
                if end > self.buf.len() {
                    // Falta o checksum; espera o próximo feed.
                    break;
                }
                if is_valid_frame(&self.buf[start..end]) {
                    self.discard(start);
                    self.state = SyncState::Synchronized;
                    return true;
                }
            }
            i += 1;
        }

        // Todo candidato que começa antes de len - (FRAME_SIZE - 1) já foi
        // avaliado e rejeitado.
        if self.buf.len() > MAX_BUFFERED {
            let excess = self.buf.len() - (FRAME_SIZE - 1);
            self.discard(excess);
        }
        false
    }

    fn discard(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
        self.stats.discarded_bytes += n as u64;
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(rpm: u16) -> Frame {
        Frame {
            rpm,
            throttle: 25.3,
            engine_temp: 87.5,
            drive_speed: 42.1,
            ground_speed: 41.8,
            gear: 3,
        }
    }

    /// Ruído pseudo-aleatório sem nenhum byte do marcador.
    fn noise(len: usize, seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                ((state >> 16) % 0xF0) as u8
            })
            .collect()
    }

    fn feed_in_chunks(bytes: &[u8], chunk: usize) -> Vec<Frame> {
        let mut sync = FrameSynchronizer::new();
        bytes.chunks(chunk).flat_map(|c| sync.feed(c)).collect()
    }

    #[test]
    fn decodes_rpm_and_scaled_fields() {
        let mut raw = [0u8; FRAME_SIZE];
        raw[0] = 0x03;
        raw[1] = 0xE8;
        raw[2..4].copy_from_slice(&253u16.to_be_bytes());
        raw[8..10].copy_from_slice(&875u16.to_be_bytes());
        raw[56..58].copy_from_slice(&421u16.to_be_bytes());
        raw[58..60].copy_from_slice(&418u16.to_be_bytes());
        raw[104..106].copy_from_slice(&34u16.to_be_bytes());
        raw[140..143].copy_from_slice(&MARKER);
        raw[143] = checksum(&raw[..143]);

        let frame = Frame::decode(&raw).expect("frame válido");
        assert_eq!(frame.rpm, 1000);
        assert_eq!(frame.throttle, 25.3);
        assert_eq!(frame.engine_temp, 87.5);
        assert_eq!(frame.drive_speed, 42.1);
        assert_eq!(frame.ground_speed, 41.8);
        assert_eq!(frame.gear, 3);
    }

    #[test]
    fn rejects_wrong_length_marker_or_checksum() {
        let good = sample_frame(1000).encode();
        assert!(Frame::decode(&good).is_some());
        assert!(Frame::decode(&good[..143]).is_none());

        let mut bad_marker = good;
        bad_marker[141] = 0x00;
        assert!(Frame::decode(&bad_marker).is_none());

        let mut bad_sum = good;
        bad_sum[143] = bad_sum[143].wrapping_add(1);
        assert!(Frame::decode(&bad_sum).is_none());
    }

    #[test]
    fn encode_decode_preserves_values() {
        let original = sample_frame(12_345);
        assert_eq!(Frame::decode(&original.encode()), Some(original));
    }

    #[test]
    fn gear_is_text_and_sentinels_share_keys() {
        let fields = sample_frame(1000).to_fields();
        assert_eq!(fields[FIELD_GEAR], FieldValue::Text("3".into()));

        let sentinel = Frame::sentinel_fields();
        assert!(fields.keys().eq(sentinel.keys()));
        assert!(sentinel.values().all(|v| *v == FieldValue::Int(-1)));
    }

    #[test]
    fn emits_consecutive_frames_in_order() {
        let mut stream = Vec::new();
        for rpm in [1000, 2000, 3000] {
            stream.extend_from_slice(&sample_frame(rpm).encode());
        }
        let mut sync = FrameSynchronizer::new();
        let rpms: Vec<u16> = sync.feed(&stream).iter().map(|f| f.rpm).collect();
        assert_eq!(rpms, [1000, 2000, 3000]);
        assert_eq!(sync.state(), SyncState::Synchronized);
        assert_eq!(sync.buffered(), 0);
        assert_eq!(sync.stats().frames, 3);
    }

    #[test]
    fn chunking_does_not_change_output() {
        let mut corrupted = sample_frame(4000).encode();
        corrupted[10] ^= 0x01;
        let mut bad_checksum = sample_frame(9).encode();
        bad_checksum[143] ^= 0x55;

        let mut stream = noise(57, 1);
        stream.extend_from_slice(&sample_frame(1000).encode());
        stream.extend_from_slice(&sample_frame(2000).encode());
        stream.extend_from_slice(&noise(13, 2));
        stream.extend_from_slice(&bad_checksum);
        stream.extend_from_slice(&sample_frame(3000).encode());
        stream.extend_from_slice(&corrupted);
        stream.extend_from_slice(&noise(400, 3));
        stream.extend_from_slice(&sample_frame(5000).encode());
        stream.extend_from_slice(&sample_frame(6000).encode());

        let whole = feed_in_chunks(&stream, stream.len());
        let rpms: Vec<u16> = whole.iter().map(|f| f.rpm).collect();
        assert_eq!(rpms, [1000, 2000, 3000, 5000, 6000]);

        for chunk in [1, 2, 7, 143, 144, 145, 500] {
            assert_eq!(feed_in_chunks(&stream, chunk), whole, "chunk = {chunk}");
        }
    }

    #[test]
    fn single_byte_corruption_advances_exactly_one_byte() {
        let good = sample_frame(1000).encode();
        for pos in (0..MARKER_OFFSET).step_by(7) {
            let mut bad = sample_frame(2000).encode();
            bad[pos] ^= 0x01;

            let mut sync = FrameSynchronizer::new();
            let first = sync.feed(&good);
            assert_eq!(first.len(), 1);
            let before = sync.stats();

            let frames = sync.feed(&bad);
            assert!(frames.is_empty(), "pos {pos}: candidato corrompido aceito");
            assert_eq!(sync.stats().resyncs, before.resyncs + 1);
            assert_eq!(sync.stats().discarded_bytes, before.discarded_bytes + 1);
            assert_eq!(sync.buffered(), FRAME_SIZE - 1);
            assert_eq!(sync.state(), SyncState::Unsynchronized);
        }
    }

    #[test]
    fn corrupted_candidate_is_skipped_while_scanning() {
        let mut bad = sample_frame(1111).encode();
        bad[50] ^= 0x01;
        let mut stream = bad.to_vec();
        stream.extend_from_slice(&sample_frame(2222).encode());

        let frames = feed_in_chunks(&stream, 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].rpm, 2222);
    }

    #[test]
    fn one_frame_in_noise_yields_one_frame() {
        for len in [0, 1, 3, 139, 140, 141, 143, 144, 145, 287, 288, 289, 1000] {
            let mut stream = noise(len, len as u32);
            stream.extend_from_slice(&sample_frame(1000).encode());
            stream.extend_from_slice(&noise(len, len as u32 + 7));

            let whole = feed_in_chunks(&stream, stream.len());
            assert_eq!(whole.len(), 1, "ruído de {len} bytes");
            assert_eq!(whole[0].rpm, 1000);
            assert_eq!(feed_in_chunks(&stream, 1), whole);
        }
    }

    #[test]
    fn marker_before_offset_140_is_not_a_candidate() {
        let mut stream = vec![0u8; 20];
        stream[5..8].copy_from_slice(&MARKER);
        let mut sync = FrameSynchronizer::new();
        assert!(sync.feed(&stream).is_empty());
        assert_eq!(sync.state(), SyncState::Unsynchronized);
        assert_eq!(sync.buffered(), 20);
    }

    #[test]
    fn noise_never_grows_buffer_past_bound() {
        let garbage = noise(10_000, 42);
        let mut sync = FrameSynchronizer::new();
        for chunk in garbage.chunks(37) {
            assert!(sync.feed(chunk).is_empty());
            assert!(sync.buffered() <= MAX_BUFFERED);
        }

        let mut sync = FrameSynchronizer::new();
        sync.feed(&garbage);
        assert!(sync.buffered() < FRAME_SIZE);
    }

    #[test]
    fn markers_with_bad_checksums_stay_bounded() {
        let mut bad = sample_frame(1).encode();
        bad[143] ^= 0xFF;
        let mut sync = FrameSynchronizer::new();
        for _ in 0..100 {
            assert!(sync.feed(&bad).is_empty());
            assert!(sync.buffered() <= MAX_BUFFERED);
        }
    }

    #[test]
    fn trimming_keeps_marker_spanning_the_boundary() {
        let frame = sample_frame(7777).encode();
        let mut sync = FrameSynchronizer::new();
        sync.feed(&noise(300, 9));
        // O frame chega partido no meio do marcador.
        sync.feed(&noise(200, 10));
        sync.feed(&frame[..141]);
        let frames = sync.feed(&frame[141..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].rpm, 7777);
    }
}
