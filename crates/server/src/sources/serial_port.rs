//! Acesso às portas seriais (RS232 da ECU, GPS, Arduino).
//!
//! Os adaptadores falam com um [`ByteSource`], não com o `serialport`
//! diretamente: assim os simuladores e os testes injetam bytes roteirizados
//! no mesmo caminho do hardware.

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;
use telemetry_core::SourceError;
use tracing::info;

/// Fluxo de bytes sem bloqueio longo.
pub trait ByteSource: Send {
    /// Lê o que já estiver disponível. `Ok(0)` = nada pendente.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Envia um comando (usado pela sessão AT do GPS).
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Abre uma porta 8N1 sem controle de fluxo.
pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<Box<dyn SerialPort>, SourceError> {
    let port = serialport::new(path, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(|e| SourceError::Unavailable(format!("{path}: {e}")))?;

    info!("Porta serial aberta: {path} @ {baud} baud");
    Ok(port)
}

impl ByteSource for Box<dyn SerialPort> {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pending = self.bytes_to_read().map_err(io::Error::from)? as usize;
        if pending == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = pending.min(buf.len());
        match self.read(&mut buf[..want]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data)?;
        self.flush()
    }
}
