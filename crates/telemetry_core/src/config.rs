//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável cobre servidor, aquisição,
//! fontes, gravador e cliente. Toda seção usa `#[serde(default)]`, então um
//! arquivo parcial completa o resto com os padrões.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Baud rates aceitos pela ECU no RS232.
pub const RS232_BAUD_RATES: [u32; 2] = [9600, 19200];

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s.max(0.0))
}

/// Servidor TCP de broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP local para bind
    pub bind_ip: String,
    /// Porta TCP
    pub port: u16,
    /// Intervalo entre pushes para cada cliente (segundos)
    pub broadcast_interval_secs: f64,
    /// Intervalo máximo entre checagens do sinal de shutdown no accept (ms)
    pub accept_poll_ms: u64,
    /// Timeout de escrita por cliente (segundos)
    pub write_timeout_secs: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".into(),
            port: 5000,
            broadcast_interval_secs: 1.0,
            accept_poll_ms: 250,
            write_timeout_secs: 2.0,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.port)
    }

    pub fn broadcast_interval(&self) -> Duration {
        secs(self.broadcast_interval_secs)
    }

    pub fn accept_poll(&self) -> Duration {
        millis(self.accept_poll_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        secs(self.write_timeout_secs)
    }
}

/// Loop de aquisição.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Período de publicação (segundos)
    pub interval_secs: f64,
    /// Período de drenagem das portas seriais entre ticks (ms)
    pub drain_interval_ms: u64,
    /// Usa fontes simuladas em vez do hardware
    pub test_mode: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1.0,
            drain_interval_ms: 50,
            test_mode: false,
        }
    }
}

impl AcquisitionConfig {
    pub fn interval(&self) -> Duration {
        secs(self.interval_secs)
    }

    pub fn drain_interval(&self) -> Duration {
        millis(self.drain_interval_ms)
    }
}

/// IMU (orientação).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 200,
        }
    }
}

impl ImuConfig {
    pub fn timeout(&self) -> Duration {
        millis(self.timeout_ms)
    }
}

/// GPS do modem SIM7600 (comandos AT).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    pub enabled: bool,
    pub port: String,
    pub baud: u32,
    /// Prazo total de uma leitura (ms)
    pub timeout_ms: u64,
    /// Tentativas de `AT+CGPSINFO` por leitura
    pub max_attempts: u32,
    /// Espera entre tentativas (ms)
    pub retry_delay_ms: u64,
    /// Espera pela resposta de cada comando AT (ms)
    pub response_wait_ms: u64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyS0".into(),
            baud: 115_200,
            timeout_ms: 600,
            max_attempts: 2,
            retry_delay_ms: 100,
            response_wait_ms: 200,
        }
    }
}

impl GpsConfig {
    pub fn timeout(&self) -> Duration {
        millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        millis(self.retry_delay_ms)
    }

    pub fn response_wait(&self) -> Duration {
        millis(self.response_wait_ms)
    }
}

/// Serial de linhas (Arduino).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub enabled: bool,
    pub port: String,
    pub baud: u32,
    pub timeout_ms: u64,
    /// Nome do campo publicado com a última linha recebida
    pub value_key: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyAMA2".into(),
            baud: 9600,
            timeout_ms: 100,
            value_key: "Sensor Value".into(),
        }
    }
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        millis(self.timeout_ms)
    }
}

/// RS232 da ECU (frames binários de 144 bytes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Rs232Config {
    pub enabled: bool,
    pub port: String,
    pub baud: u32,
    pub timeout_ms: u64,
    /// Aborta o processo se a porta não abrir na inicialização
    pub mandatory: bool,
}

impl Default for Rs232Config {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyUSB0".into(),
            baud: 9600,
            timeout_ms: 100,
            mandatory: false,
        }
    }
}

impl Rs232Config {
    pub fn timeout(&self) -> Duration {
        millis(self.timeout_ms)
    }
}

/// Gravação CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "recorded_data.csv".into(),
        }
    }
}

/// Cliente visualizador.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
        }
    }
}

impl ClientConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub acquisition: AcquisitionConfig,
    pub imu: ImuConfig,
    pub gps: GpsConfig,
    pub serial: SerialConfig,
    pub rs232: Rs232Config,
    pub recorder: RecorderConfig,
    pub client: ClientConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Porta do servidor não pode ser 0".into());
        }
        if self.client.port == 0 {
            errors.push("Porta do cliente não pode ser 0".into());
        }
        for (name, value) in [
            ("Intervalo de broadcast", self.server.broadcast_interval_secs),
            ("Intervalo de aquisição", self.acquisition.interval_secs),
        ] {
            if !(0.1..=60.0).contains(&value) {
                errors.push(format!("{name} inválido: {value} (0.1–60.0)"));
            }
        }
        if self.server.accept_poll_ms == 0 {
            errors.push("accept_poll_ms não pode ser 0".into());
        }
        if self.acquisition.drain_interval_ms == 0 {
            errors.push("drain_interval_ms não pode ser 0".into());
        }
        for (name, ms) in [
            ("imu", self.imu.timeout_ms),
            ("gps", self.gps.timeout_ms),
            ("serial", self.serial.timeout_ms),
            ("rs232", self.rs232.timeout_ms),
        ] {
            if ms == 0 {
                errors.push(format!("Timeout de {name} não pode ser 0"));
            }
        }
        if !RS232_BAUD_RATES.contains(&self.rs232.baud) {
            errors.push(format!(
                "Baud rate do RS232 inválido: {} (aceitos: {:?})",
                self.rs232.baud, RS232_BAUD_RATES
            ));
        }
        if self.gps.max_attempts == 0 {
            errors.push("gps.max_attempts precisa ser >= 1".into());
        }
        if self.recorder.enabled && self.recorder.path.trim().is_empty() {
            errors.push("Caminho do gravador vazio".into());
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.server.port, parsed.server.port);
        assert_eq!(config.rs232.port, parsed.rs232.port);
        assert_eq!(config.serial.value_key, parsed.serial.value_key);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[server]
port = 9999

[rs232]
baud = 19200
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.rs232.baud, 19200);
        // Outros campos devem ter valor padrão
        assert_eq!(config.server.broadcast_interval_secs, 1.0);
        assert_eq!(config.acquisition.interval(), Duration::from_secs(1));
        assert_eq!(config.gps.port, "/dev/ttyS0");
    }

    #[test]
    fn rejects_unsupported_baud_and_zero_timeouts() {
        let mut config = AppConfig::default();
        config.rs232.baud = 115_200;
        config.gps.timeout_ms = 0;
        let errors = config.validate();
        assert_eq!(errors.len(), 2, "Erros: {:?}", errors);
    }

    #[test]
    fn rejects_out_of_range_intervals() {
        let mut config = AppConfig::default();
        config.acquisition.interval_secs = 0.01;
        config.server.broadcast_interval_secs = 120.0;
        assert_eq!(config.validate().len(), 2);
    }
}
