//! A mock potentiostat that generates synthetic voltammograms.
//!
//! The sweep follows the submitted method (linear for DPV/SWV, triangular and
//! repeated for CV). Each point produces a `"Potential (V)"` sample followed
//! by a `"Current (A)"` sample. The current is a Gaussian redox peak around
//! [`FORMAL_POTENTIAL`] plus a small capacitive offset and random noise.
use crate::core::{DeviceId, Potentiostat, Sample};
use crate::error::{AppResult, EchemError};
use crate::technique::MeasurementMethod;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

/// Label of simulated potential samples.
pub const POTENTIAL_LABEL: &str = "Potential (V)";
/// Label of simulated current samples.
pub const CURRENT_LABEL: &str = "Current (A)";
/// Centre of the simulated redox peak, V.
pub const FORMAL_POTENTIAL: f64 = 0.1;
const PEAK_WIDTH: f64 = 0.08;
const CAPACITIVE_CURRENT: f64 = 5.0e-8;
/// Largest sweep the mock will generate.
pub const MAX_SWEEP_POINTS: usize = 1_000_000;

pub struct MockPotentiostat {
    devices: Vec<DeviceId>,
    connected: Option<DeviceId>,
    time_scale: f64,
    noise_amplitude: f64,
    seed: Option<u64>,
    stop_tx: Option<watch::Sender<bool>>,
}

impl Default for MockPotentiostat {
    fn default() -> Self {
        Self::new(vec![DeviceId::from("MockSens-0001")])
    }
}

impl MockPotentiostat {
    pub fn new(devices: Vec<DeviceId>) -> Self {
        Self {
            devices,
            connected: None,
            time_scale: 1.0,
            noise_amplitude: 2.0e-8,
            seed: None,
            stop_tx: None,
        }
    }

    /// Builds a mock from the instrument section of the configuration.
    pub fn from_config(config: &crate::config::InstrumentConfig) -> Self {
        Self::new(config.devices.iter().map(|d| DeviceId(d.clone())).collect())
            .with_time_scale(config.time_scale)
            .with_noise(config.noise_amplitude)
    }

    /// Scales the delay between points; 0 streams as fast as the channel allows.
    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale.max(0.0);
        self
    }

    pub fn with_noise(mut self, noise_amplitude: f64) -> Self {
        self.noise_amplitude = noise_amplitude.abs();
        self
    }

    /// Makes the noise reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Potentials visited by a method, in order.
pub fn sweep_potentials(method: &MeasurementMethod) -> AppResult<Vec<f64>> {
    match method {
        MeasurementMethod::Dpv(m) => linear(m.e_begin, m.e_end, m.e_step, true),
        MeasurementMethod::Swv(m) => linear(m.e_begin, m.e_end, m.e_step, true),
        MeasurementMethod::Cv(m) => {
            let mut points = Vec::new();
            for scan in 0..m.n_scans {
                points.extend(linear(m.e_begin, m.e_vertex1, m.e_step, scan == 0)?);
                points.extend(linear(m.e_vertex1, m.e_vertex2, m.e_step, false)?);
                points.extend(linear(m.e_vertex2, m.e_begin, m.e_step, false)?);
                if points.len() > MAX_SWEEP_POINTS {
                    let per_scan = points.len() as f64 / f64::from(scan + 1);
                    return Err(too_many_points(per_scan * f64::from(m.n_scans)));
                }
            }
            Ok(points)
        }
    }
}

fn linear(from: f64, to: f64, step: f64, include_start: bool) -> AppResult<Vec<f64>> {
    if !(step.is_finite() && step > 0.0) {
        return Err(EchemError::Device(format!("invalid step potential {}", step)));
    }
    let span = to - from;
    let steps = (span.abs() / step).round();
    if !steps.is_finite() || steps >= MAX_SWEEP_POINTS as f64 {
        return Err(too_many_points(steps));
    }
    let n = steps as usize;
    let dir = span.signum();
    let first = if include_start { 0 } else { 1 };
    Ok((first..=n)
        .map(|k| if k == n { to } else { from + dir * step * k as f64 })
        .collect())
}

fn too_many_points(requested: f64) -> EchemError {
    EchemError::Device(format!(
        "sweep of {:.3e} points exceeds the limit of {}",
        requested, MAX_SWEEP_POINTS
    ))
}

/// Delay between points, scaled by `time_scale`.
fn point_interval(method: &MeasurementMethod, time_scale: f64) -> AppResult<Duration> {
    let secs = match method {
        MeasurementMethod::Dpv(m) => m.e_step / m.scan_rate,
        MeasurementMethod::Cv(m) => m.e_step / m.scan_rate,
        MeasurementMethod::Swv(m) => 1.0 / m.frequency,
    };
    if !(secs.is_finite() && secs > 0.0) || time_scale == 0.0 {
        return Ok(Duration::ZERO);
    }
    Duration::try_from_secs_f64(secs * time_scale)
        .map_err(|e| EchemError::Device(format!("invalid point interval: {}", e)))
}

/// Noise-free simulated current at `potential`, given the sweep direction.
fn faradaic_current(method: &MeasurementMethod, potential: f64, forward: bool) -> f64 {
    let gaussian = |centre: f64| (-((potential - centre) / PEAK_WIDTH).powi(2)).exp();
    match method {
        MeasurementMethod::Dpv(m) => 2.0e-5 * m.pulse_height * gaussian(FORMAL_POTENTIAL),
        MeasurementMethod::Swv(m) => {
            4.0e-5 * m.e_amplitude * (m.frequency / 25.0).sqrt() * gaussian(FORMAL_POTENTIAL)
        }
        MeasurementMethod::Cv(m) => {
            let ip = 2.5e-6 * m.scan_rate.sqrt();
            if forward {
                ip * gaussian(FORMAL_POTENTIAL + 0.03) + CAPACITIVE_CURRENT
            } else {
                -ip * gaussian(FORMAL_POTENTIAL - 0.03) - CAPACITIVE_CURRENT
            }
        }
    }
}

#[async_trait]
impl Potentiostat for MockPotentiostat {
    fn name(&self) -> String {
        "Mock Potentiostat".to_string()
    }

    async fn discover(&mut self) -> AppResult<Vec<DeviceId>> {
        debug!(count = self.devices.len(), "Mock discovery");
        Ok(self.devices.clone())
    }

    async fn connect(&mut self, device: &DeviceId) -> AppResult<()> {
        if !self.devices.contains(device) {
            return Err(EchemError::Device(format!("device '{}' not found", device)));
        }
        info!(%device, "Connecting to Mock Potentiostat");
        self.connected = Some(device.clone());
        Ok(())
    }

    async fn disconnect(&mut self) -> AppResult<()> {
        info!("Disconnecting from Mock Potentiostat");
        self.stop_tx = None;
        self.connected = None;
        Ok(())
    }

    async fn measure(
        &mut self,
        method: &MeasurementMethod,
        samples: mpsc::Sender<Sample>,
    ) -> AppResult<JoinHandle<()>> {
        if self.connected.is_none() {
            return Err(EchemError::Device("mock potentiostat not connected".into()));
        }

        let points = sweep_potentials(method)?;
        let interval = point_interval(method, self.time_scale)?;
        let noise = self.noise_amplitude;
        let method = method.clone();
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let (stop_tx, mut stop_rx) = watch::channel(false);
        self.stop_tx = Some(stop_tx);

        info!(
            technique = %method.technique(),
            points = points.len(),
            "Mock acquisition started"
        );

        let task = tokio::spawn(async move {
            let mut delivered = 0usize;
            let mut previous: Option<f64> = None;
            for potential in points {
                if *stop_rx.borrow() {
                    break;
                }
                if !interval.is_zero() {
                    tokio::select! {
                        _ = sleep(interval) => {}
                        _ = stop_rx.changed() => break,
                    }
                } else {
                    tokio::task::yield_now().await;
                }

                let forward = previous.map_or(true, |p| potential >= p);
                previous = Some(potential);
                let current = faradaic_current(&method, potential, forward)
                    + noise * (rng.gen::<f64>() - 0.5);

                // Stop if the receiver has been dropped
                if samples.send(Sample::new(POTENTIAL_LABEL, potential)).await.is_err()
                    || samples.send(Sample::new(CURRENT_LABEL, current)).await.is_err()
                {
                    break;
                }
                delivered += 1;
            }
            info!(delivered, "Mock acquisition finished");
        });

        Ok(task)
    }

    async fn stop(&mut self) -> AppResult<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // Err only means the acquisition task already ended.
            let _ = stop_tx.send(true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::technique::{self, Technique};

    fn method(technique: Technique) -> MeasurementMethod {
        technique::build(technique, &technique::preset(technique).defaults()).unwrap()
    }

    #[test]
    fn test_dpv_sweep_is_linear_and_inclusive() {
        let points = sweep_potentials(&method(Technique::Dpv)).unwrap();
        // -0.5 to 0.5 in 5 mV steps
        assert_eq!(points.len(), 201);
        assert_eq!(points[0], -0.5);
        assert_eq!(*points.last().unwrap(), 0.5);
    }

    #[test]
    fn test_cv_sweep_returns_to_start_each_scan() {
        let mut values = technique::preset(Technique::Cv).defaults();
        values.insert(technique::NUMBER_OF_SCANS.to_string(), 2.0);
        values.insert(technique::SECOND_VERTEX.to_string(), -0.7);
        let cv = technique::build(Technique::Cv, &values).unwrap();
        let points = sweep_potentials(&cv).unwrap();

        // Per scan: -0.5 -> 0.5 (100 steps), 0.5 -> -0.7 (120), -0.7 -> -0.5 (20)
        assert_eq!(points.len(), 1 + 2 * (100 + 120 + 20));
        assert_eq!(*points.last().unwrap(), -0.5);
        let max = points.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = points.iter().cloned().fold(f64::INFINITY, f64::min);
        assert_eq!(max, 0.5);
        assert_eq!(min, -0.7);
    }

    #[test]
    fn test_invalid_step_is_device_error() {
        let mut values = technique::preset(Technique::Swv).defaults();
        values.insert(technique::STEP_POTENTIAL.to_string(), 0.0);
        let swv = technique::build(Technique::Swv, &values).unwrap();
        assert!(matches!(sweep_potentials(&swv), Err(EchemError::Device(_))));
    }

    #[test]
    fn test_oversized_sweep_is_device_error() {
        let mut values = technique::preset(Technique::Dpv).defaults();
        values.insert(technique::STEP_POTENTIAL.to_string(), 1e-300);
        let dpv = technique::build(Technique::Dpv, &values).unwrap();
        assert!(matches!(sweep_potentials(&dpv), Err(EchemError::Device(_))));

        let mut values = technique::preset(Technique::Cv).defaults();
        values.insert(technique::STEP_POTENTIAL.to_string(), 1e-5);
        values.insert(technique::NUMBER_OF_SCANS.to_string(), 1e6);
        let cv = technique::build(Technique::Cv, &values).unwrap();
        assert!(matches!(sweep_potentials(&cv), Err(EchemError::Device(_))));
    }

    #[tokio::test]
    async fn test_unrepresentable_interval_is_device_error() {
        let mut mock = MockPotentiostat::default().with_time_scale(f64::INFINITY);
        mock.connect(&DeviceId::from("MockSens-0001")).await.unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let err = mock.measure(&method(Technique::Dpv), tx).await.unwrap_err();
        assert!(matches!(err, EchemError::Device(_)));

        let mut values = technique::preset(Technique::Swv).defaults();
        values.insert(technique::FREQUENCY.to_string(), 1e-300);
        let swv = technique::build(Technique::Swv, &values).unwrap();
        assert!(point_interval(&swv, 1.0).is_err());
        assert_eq!(point_interval(&swv, 0.0).unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_device() {
        let mut mock = MockPotentiostat::default();
        let err = mock.connect(&DeviceId::from("nope")).await.unwrap_err();
        assert!(matches!(err, EchemError::Device(_)));
    }

    #[tokio::test]
    async fn test_measure_streams_paired_samples() {
        let mut mock = MockPotentiostat::default().with_time_scale(0.0).with_seed(7);
        mock.connect(&DeviceId::from("MockSens-0001")).await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let task = mock.measure(&method(Technique::Swv), tx).await.unwrap();

        let mut received = Vec::new();
        while let Some(sample) = rx.recv().await {
            received.push(sample);
        }
        task.await.unwrap();

        assert_eq!(received.len(), 2 * 251);
        assert_eq!(received[0].label, POTENTIAL_LABEL);
        assert_eq!(received[1].label, CURRENT_LABEL);
        assert_eq!(received[0].value, -0.5);
    }

    #[tokio::test]
    async fn test_stop_halts_acquisition() {
        let mut mock = MockPotentiostat::default().with_time_scale(1.0);
        mock.connect(&DeviceId::from("MockSens-0001")).await.unwrap();

        let (tx, mut rx) = mpsc::channel(1024);
        // DPV defaults pace points 100 ms apart
        let task = mock.measure(&method(Technique::Dpv), tx).await.unwrap();
        mock.stop().await.unwrap();
        task.await.unwrap();

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert!(count < 2 * 201);
    }

    #[test]
    fn test_simulated_peak_sits_at_formal_potential() {
        let dpv = method(Technique::Dpv);
        let at_peak = faradaic_current(&dpv, FORMAL_POTENTIAL, true);
        let off_peak = faradaic_current(&dpv, FORMAL_POTENTIAL + 0.3, true);
        assert!(at_peak > 10.0 * off_peak);
    }
}
