//! Erros do sistema.
//!
//! Falhas de fonte nunca sobem até o processo: cada adaptador converte um
//! [`SourceError`] em uma [`Reading`](crate::types::Reading) com `ok = false`.
//! Só [`ServerError::Bind`] e um dispositivo obrigatório ausente encerram o
//! processo.

use std::time::Duration;

/// Falhas de leitura de uma fonte.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Dispositivo não pôde ser aberto ou sumiu. Fatal só para a fonte.
    #[error("Fonte indisponível: {0}")]
    Unavailable(String),

    /// Leitura não terminou dentro do prazo. Transitório.
    #[error("Timeout de leitura após {0:?}")]
    Timeout(Duration),

    /// Checksum/marcador inválido no RS232; o decoder está ressincronizando.
    #[error("Frame dessincronizado ({resyncs} ressincronizações)")]
    FrameDesync { resyncs: u64 },

    /// Nada novo chegou desde o último tick.
    #[error("{0}")]
    NoData(String),

    #[error("Erro de I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Falhas do servidor TCP.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Falha ao fazer bind em {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Erro de I/O no servidor: {0}")]
    Io(#[from] std::io::Error),
}

/// Falhas do gravador CSV.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Erro de I/O no gravador: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_readable() {
        let e = SourceError::FrameDesync { resyncs: 3 };
        assert_eq!(e.to_string(), "Frame dessincronizado (3 ressincronizações)");
        assert_eq!(SourceError::NoData("GPS is not ready".into()).to_string(), "GPS is not ready");
    }
}
