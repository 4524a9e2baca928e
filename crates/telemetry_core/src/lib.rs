//! # Telemetry Core
//!
//! Crate compartilhada entre o servidor de aquisição e o cliente: tipos de
//! leitura/snapshot, decoder de frames RS232, protocolo JSON por linha,
//! publicador de último snapshot, sinal de shutdown, gravador CSV e
//! configuração TOML.
//!
//! ## Módulos
//! - [`types`] – `Reading`, `Snapshot`, `FieldValue`
//! - [`frame`] – `FrameSynchronizer` e layout do frame de 144 bytes
//! - [`protocol`] – Encode/decode NDJSON e comando `shutdown`
//! - [`publisher`] – Slot único de último snapshot
//! - [`shutdown`] – Cancelamento cooperativo
//! - [`context`] – Contexto injetado em cada componente
//! - [`recorder`] – Gravação CSV com cabeçalho fixo
//! - [`config`] – Configuração unificada via TOML
//! - [`error`] – Erros de fonte, servidor e gravador

pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod publisher;
pub mod recorder;
pub mod shutdown;
pub mod types;

// Re-exports convenientes
pub use config::AppConfig;
pub use context::AppContext;
pub use error::{RecorderError, ServerError, SourceError};
pub use frame::{Frame, FrameSynchronizer, SyncState};
pub use protocol::{decode_line, encode_snapshot};
pub use publisher::SnapshotPublisher;
pub use recorder::Recorder;
pub use shutdown::ShutdownSignal;
pub use types::{FieldValue, Fields, Reading, Snapshot, SourceKind};
