//! Thread dedicada para drivers bloqueantes (IMU, GPS).
//!
//! O driver vive na sua própria thread; o adaptador pede uma amostra e espera
//! no máximo `timeout` com `recv_timeout`. Se o driver travar, só aquela
//! fonte fica sem dado no tick, e o loop de aquisição segue no prazo.
//!
//! Uma resposta atrasada não é perdida: o próximo `sample` a consome em vez
//! de enfileirar um segundo pedido (no máximo um pedido em voo por driver).
//!
//! Descartar o worker fecha o canal de pedidos e espera a thread terminar
//! (limitado por [`JOIN_TIMEOUT`]), para o `Drop` do driver rodar antes do
//! processo sair.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use telemetry_core::SourceError;
use tracing::{debug, info, warn};

/// Espera máxima pela thread do driver ao descartar o worker.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(3);
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Driver de hardware com leitura bloqueante.
pub trait Device: Send + 'static {
    type Sample: Send + 'static;

    fn sample(&mut self) -> Result<Self::Sample, SourceError>;
}

pub struct DeviceWorker<S> {
    name: String,
    requests: Option<Sender<()>>,
    responses: Receiver<Result<S, SourceError>>,
    in_flight: bool,
    handle: Option<JoinHandle<()>>,
}

impl<S: Send + 'static> DeviceWorker<S> {
    /// Move o driver para uma thread nomeada `device-<name>`.
    pub fn spawn<D>(name: &str, mut device: D) -> std::io::Result<Self>
    where
        D: Device<Sample = S>,
    {
        let (req_tx, req_rx) = bounded::<()>(1);
        let (resp_tx, resp_rx) = bounded::<Result<S, SourceError>>(1);
        let thread_name = format!("device-{name}");

        let handle = thread::Builder::new().name(thread_name.clone()).spawn(move || {
            // Termina quando o adaptador (Sender) é descartado.
            for () in req_rx.iter() {
                // Resposta atrasada pode ficar sem leitor; o laço segue até
                // o canal de pedidos fechar.
                let _ = resp_tx.try_send(device.sample());
            }
            drop(device);
            debug!("{thread_name} encerrada");
        })?;

        info!("Driver {name} rodando em thread dedicada");
        Ok(Self {
            name: name.to_string(),
            requests: Some(req_tx),
            responses: resp_rx,
            in_flight: false,
            handle: Some(handle),
        })
    }

    fn stopped(&self) -> SourceError {
        SourceError::Unavailable(format!("driver {} parou", self.name))
    }

    /// Pede uma amostra e espera no máximo `timeout`.
    pub fn sample(&mut self, timeout: Duration) -> Result<S, SourceError> {
        if !self.in_flight {
            let requests = self.requests.as_ref().ok_or_else(|| self.stopped())?;
            requests.send(()).map_err(|_| self.stopped())?;
            self.in_flight = true;
        }

        match self.responses.recv_timeout(timeout) {
            Ok(result) => {
                self.in_flight = false;
                result
            }
            Err(RecvTimeoutError::Timeout) => Err(SourceError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                self.in_flight = false;
                Err(self.stopped())
            }
        }
    }
}

impl<S> Drop for DeviceWorker<S> {
    fn drop(&mut self) {
        // Fecha o canal: a thread sai após a amostra em voo, se houver.
        self.requests.take();
        let Some(handle) = self.handle.take() else {
            return;
        };

        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Driver {} não encerrou em {:?}; thread abandonada", self.name, JOIN_TIMEOUT);
                return;
            }
            thread::sleep(JOIN_POLL);
        }
        if handle.join().is_err() {
            warn!("Thread do driver {} terminou em pânico", self.name);
        }
    }
}
