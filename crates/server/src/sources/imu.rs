//! IMU – normaliza amostras de orientação em uma [`Reading`].
//!
//! A fusão de sensores fica no driver; aqui só formatamos:
//! aceleração linear em G, giroscópio, bússola e status de calibração.

use super::worker::{Device, DeviceWorker};
use std::time::Duration;
use telemetry_core::types::{FieldValue, Fields, Reading};

/// Gravidade padrão usada para converter m/s² em G.
const STANDARD_GRAVITY: f64 = 9.81;

/// Amostra bruta do driver. `None` = eixo/vetor não disponível.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImuSample {
    /// Aceleração linear (m/s²)
    pub linear_acceleration: Option<[f64; 3]>,
    /// Velocidade angular (rad/s)
    pub gyro: Option<[f64; 3]>,
    /// Heading do ângulo de Euler (graus)
    pub heading: Option<f64>,
    /// Calibração: sys, gyro, accel, mag (0–3)
    pub calibration: [u8; 4],
}

impl ImuSample {
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();

        let accel = match self.linear_acceleration {
            Some([x, y, z]) => {
                let g = (x * x + y * y + z * z).sqrt() / STANDARD_GRAVITY;
                FieldValue::Text(format!("{g:.2} Gs"))
            }
            None => FieldValue::missing(),
        };
        fields.insert("Linear Acceleration".into(), accel);

        for (axis, i) in [("Gyro X", 0), ("Gyro Y", 1), ("Gyro Z", 2)] {
            let value = self
                .gyro
                .map(|g| FieldValue::Text(format!("{:.2}", g[i])))
                .unwrap_or_else(FieldValue::missing);
            fields.insert(axis.into(), value);
        }

        let compass = self
            .heading
            .map(|h| FieldValue::Text(format!("{h:.2}°")))
            .unwrap_or_else(FieldValue::missing);
        fields.insert("Compass Angle".into(), compass);

        let [sys, gyro, accel, mag] = self.calibration;
        let mut calib = Fields::new();
        calib.insert("Sys".into(), sys.into());
        calib.insert("Gyro".into(), gyro.into());
        calib.insert("Accel".into(), accel.into());
        calib.insert("Mag".into(), mag.into());
        fields.insert("Calibration Status".into(), FieldValue::Group(calib));

        fields
    }
}

pub struct ImuAdapter {
    worker: DeviceWorker<ImuSample>,
    timeout: Duration,
}

impl ImuAdapter {
    pub fn spawn<D>(device: D, timeout: Duration) -> std::io::Result<Self>
    where
        D: Device<Sample = ImuSample>,
    {
        Ok(Self {
            worker: DeviceWorker::spawn("imu", device)?,
            timeout,
        })
    }

    pub fn read(&mut self) -> Reading {
        match self.worker.sample(self.timeout) {
            Ok(sample) => Reading::ok(sample.to_fields()),
            Err(e) => Reading::failed(format!("Failed to read sensor data: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_core::SourceError;

    #[test]
    fn formats_magnitude_gyro_and_compass() {
        let sample = ImuSample {
            linear_acceleration: Some([0.0, 9.81, 0.0]),
            gyro: Some([0.1, -0.25, 1.0]),
            heading: Some(182.456),
            calibration: [3, 3, 2, 1],
        };
        let fields = sample.to_fields();
        assert_eq!(fields["Linear Acceleration"], FieldValue::Text("1.00 Gs".into()));
        assert_eq!(fields["Gyro X"], FieldValue::Text("0.10".into()));
        assert_eq!(fields["Gyro Y"], FieldValue::Text("-0.25".into()));
        assert_eq!(fields["Compass Angle"], FieldValue::Text("182.46°".into()));

        let FieldValue::Group(calib) = &fields["Calibration Status"] else {
            panic!("calibração deveria ser um mapa");
        };
        assert_eq!(calib["Accel"], FieldValue::Int(2));
        assert_eq!(calib["Mag"], FieldValue::Int(1));
    }

    #[test]
    fn missing_vectors_become_na() {
        let fields = ImuSample::default().to_fields();
        for key in ["Linear Acceleration", "Gyro X", "Gyro Y", "Gyro Z", "Compass Angle"] {
            assert_eq!(fields[key], FieldValue::missing(), "{key}");
        }
    }

    struct Unplugged;

    impl Device for Unplugged {
        type Sample = ImuSample;

        fn sample(&mut self) -> Result<ImuSample, SourceError> {
            Err(SourceError::Unavailable("BNO055 não respondeu".into()))
        }
    }

    #[test]
    fn driver_failure_becomes_error_reading() {
        let mut adapter = ImuAdapter::spawn(Unplugged, Duration::from_secs(2)).unwrap();
        let reading = adapter.read();
        assert!(!reading.ok);
        assert!(reading.error.unwrap().starts_with("Failed to read sensor data"));
    }
}
