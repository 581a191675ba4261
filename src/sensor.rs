//! Temperature sources: the Linux thermal zone and an opt-in simulated sensor

use crate::errors::SensorError;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

/// Default thermal zone exposing the SoC temperature in millidegrees Celsius
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Plausible range for a SoC temperature; anything outside is a broken sensor
const PLAUSIBLE_CELSIUS: std::ops::RangeInclusive<f64> = -50.0..=200.0;

/// One temperature sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalReading {
    pub celsius: f64,
    pub taken_at: Instant,
}

impl ThermalReading {
    pub fn new(celsius: f64) -> Self {
        Self {
            celsius,
            taken_at: Instant::now(),
        }
    }
}

/// A source of temperature readings.
///
/// Implementations must fail rather than invent a value when the
/// underlying sensor cannot be read.
pub trait TemperatureSource: Send {
    fn read(&mut self) -> Result<ThermalReading, SensorError>;

    /// Human-readable description used in status reports
    fn describe(&self) -> String;

    fn is_simulated(&self) -> bool {
        false
    }
}

/// Long-lived helper thread that performs the blocking file reads
struct Reader {
    requests: mpsc::Sender<()>,
    responses: mpsc::Receiver<io::Result<String>>,
    /// A request whose answer has not been collected yet
    in_flight: bool,
}

impl Reader {
    fn spawn(path: PathBuf) -> io::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<()>();
        let (response_tx, response_rx) = mpsc::channel();

        thread::Builder::new()
            .name("thermal-read".to_string())
            .spawn(move || {
                // Ends once the zone is dropped
                for () in request_rx {
                    if response_tx.send(fs::read_to_string(&path)).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            requests: request_tx,
            responses: response_rx,
            in_flight: false,
        })
    }
}

/// Sysfs thermal zone reader.
///
/// Reads go through one helper thread so a wedged sysfs node cannot hang the
/// caller. While a timed-out read is still stuck, further reads fail at once
/// instead of queueing behind it.
pub struct ThermalZone {
    path: PathBuf,
    timeout: Duration,
    reader: Option<Reader>,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            reader: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse a millidegree value as written by the kernel
    fn parse(&self, raw: &str) -> Result<f64, SensorError> {
        let trimmed = raw.trim();
        let millidegrees: f64 = trimmed.parse().map_err(|_| SensorError::Unparsable {
            path: self.path.clone(),
            raw: trimmed.to_string(),
        })?;

        let celsius = millidegrees / 1000.0;
        if !PLAUSIBLE_CELSIUS.contains(&celsius) {
            return Err(SensorError::OutOfRange {
                path: self.path.clone(),
                celsius,
            });
        }
        Ok(celsius)
    }

    fn unavailable(&self, reason: &str) -> SensorError {
        SensorError::Unavailable {
            path: self.path.clone(),
            source: io::Error::new(io::ErrorKind::Other, reason.to_string()),
        }
    }

    fn read_raw(&mut self) -> Result<String, SensorError> {
        if self.reader.is_none() {
            let reader = Reader::spawn(self.path.clone()).map_err(|source| SensorError::Unavailable {
                path: self.path.clone(),
                source,
            })?;
            self.reader = Some(reader);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(self.unavailable("reader thread missing"));
        };

        if reader.in_flight {
            match reader.responses.try_recv() {
                // The late answer is stale; drop it and ask again
                Ok(_) => reader.in_flight = false,
                Err(TryRecvError::Empty) => {
                    debug!("Previous read of {} still pending", self.path.display());
                    return Err(SensorError::Timeout {
                        path: self.path.clone(),
                        after: self.timeout,
                    });
                }
                Err(TryRecvError::Disconnected) => {
                    self.reader = None;
                    return Err(self.unavailable("reader thread exited"));
                }
            }
        }

        if reader.requests.send(()).is_err() {
            self.reader = None;
            return Err(self.unavailable("reader thread exited"));
        }
        reader.in_flight = true;

        match reader.responses.recv_timeout(self.timeout) {
            Ok(result) => {
                reader.in_flight = false;
                result.map_err(|source| SensorError::Unavailable {
                    path: self.path.clone(),
                    source,
                })
            }
            Err(RecvTimeoutError::Timeout) => Err(SensorError::Timeout {
                path: self.path.clone(),
                after: self.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                self.reader = None;
                Err(self.unavailable("reader thread exited"))
            }
        }
    }
}

impl TemperatureSource for ThermalZone {
    fn read(&mut self) -> Result<ThermalReading, SensorError> {
        let raw = self.read_raw()?;
        let celsius = self.parse(&raw)?;
        Ok(ThermalReading::new(celsius))
    }

    fn describe(&self) -> String {
        format!("thermal zone {}", self.path.display())
    }
}

/// Random-walk temperature generator for running without a sensor.
///
/// Only constructed when explicitly requested; every reading it returns is fabricated.
pub struct SimulatedSensor {
    rng: StdRng,
    celsius: f64,
}

impl SimulatedSensor {
    const FLOOR: f64 = 35.0;
    const CEILING: f64 = 80.0;
    const MAX_STEP: f64 = 0.8;

    pub fn new(start_celsius: f64) -> Self {
        warn!("Using SIMULATED temperature readings; the real sensor is not consulted");
        Self {
            rng: StdRng::from_entropy(),
            celsius: start_celsius.clamp(Self::FLOOR, Self::CEILING),
        }
    }

    pub fn with_seed(start_celsius: f64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            celsius: start_celsius.clamp(Self::FLOOR, Self::CEILING),
        }
    }
}

impl TemperatureSource for SimulatedSensor {
    fn read(&mut self) -> Result<ThermalReading, SensorError> {
        let step = self.rng.gen_range(-Self::MAX_STEP..=Self::MAX_STEP);
        self.celsius = (self.celsius + step).clamp(Self::FLOOR, Self::CEILING);
        debug!("Simulated temperature: {:.1}°C", self.celsius);
        Ok(ThermalReading::new(self.celsius))
    }

    fn describe(&self) -> String {
        "simulated sensor".to_string()
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// Board the process runs on, as far as /proc/cpuinfo tells
#[derive(Debug, Clone, PartialEq)]
pub enum Board {
    RaspberryPi { model: String },
    Other,
}

/// Identify the board from cpuinfo text
pub fn board_from_cpuinfo(cpuinfo: &str) -> Board {
    let model = cpuinfo
        .lines()
        .filter(|line| line.starts_with("Model"))
        .filter_map(|line| line.split(':').nth(1))
        .map(str::trim)
        .find(|model| model.contains("Raspberry Pi"));

    match model {
        Some(model) => Board::RaspberryPi {
            model: model.to_string(),
        },
        None if cpuinfo.contains("Raspberry Pi") => Board::RaspberryPi {
            model: "Raspberry Pi".to_string(),
        },
        None => Board::Other,
    }
}

/// Detect the board by reading /proc/cpuinfo
pub fn detect_board() -> io::Result<Board> {
    let cpuinfo = fs::read_to_string("/proc/cpuinfo")?;
    let board = board_from_cpuinfo(&cpuinfo);
    if let Board::RaspberryPi { model } = &board {
        info!("Detected board: {}", model);
    }
    Ok(board)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn zone_with(contents: &str) -> (NamedTempFile, ThermalZone) {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        let zone = ThermalZone::new(file.path(), Duration::from_millis(500));
        (file, zone)
    }

    #[test]
    fn test_reads_millidegrees() {
        let (_file, mut zone) = zone_with("57500\n");
        let reading = zone.read().unwrap();
        assert!((reading.celsius - 57.5).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_reads_follow_the_file() {
        let (file, mut zone) = zone_with("41000");
        assert!((zone.read().unwrap().celsius - 41.0).abs() < 1e-9);

        fs::write(file.path(), "62500\n").unwrap();
        assert!((zone.read().unwrap().celsius - 62.5).abs() < 1e-9);
    }

    /// A FIFO with no writer blocks `open` like a wedged sysfs node
    #[cfg(unix)]
    #[test]
    fn test_stuck_read_is_not_repeated() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("temp");
        let status = std::process::Command::new("mkfifo").arg(&fifo).status().unwrap();
        assert!(status.success());

        let timeout = Duration::from_millis(300);
        let mut zone = ThermalZone::new(&fifo, timeout);
        assert!(matches!(zone.read(), Err(SensorError::Timeout { .. })));

        // The reader is still stuck, so this fails at once rather than waiting again
        let started = Instant::now();
        assert!(matches!(zone.read(), Err(SensorError::Timeout { .. })));
        assert!(started.elapsed() < timeout / 2);

        // Unblock the reader thread so it can exit with the zone
        let mut writer = fs::OpenOptions::new().write(true).open(&fifo).unwrap();
        write!(writer, "45000").unwrap();
        drop(writer);
        drop(zone);
    }

    #[test]
    fn test_unparsable_value_fails() {
        let (_file, mut zone) = zone_with("hot\n");
        match zone.read() {
            Err(SensorError::Unparsable { raw, .. }) => assert_eq!(raw, "hot"),
            other => panic!("expected Unparsable, got {:?}", other),
        }
    }

    #[test]
    fn test_implausible_value_fails() {
        let (_file, mut zone) = zone_with("999000");
        assert!(matches!(zone.read(), Err(SensorError::OutOfRange { .. })));
    }

    #[test]
    fn test_missing_zone_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut zone = ThermalZone::new(dir.path().join("temp"), Duration::from_millis(500));
        assert!(matches!(zone.read(), Err(SensorError::Unavailable { .. })));
    }

    #[test]
    fn test_simulated_stays_in_band() {
        let mut sensor = SimulatedSensor::with_seed(55.0, 7);
        assert!(sensor.is_simulated());
        for _ in 0..500 {
            let reading = sensor.read().unwrap();
            assert!((35.0..=80.0).contains(&reading.celsius));
        }
    }

    #[test]
    fn test_board_detection() {
        let pi = "processor\t: 0\nBogoMIPS\t: 108.00\nModel\t\t: Raspberry Pi 5 Model B Rev 1.0\n";
        assert_eq!(
            board_from_cpuinfo(pi),
            Board::RaspberryPi {
                model: "Raspberry Pi 5 Model B Rev 1.0".to_string()
            }
        );

        let desktop = "vendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Core(TM)\n";
        assert_eq!(board_from_cpuinfo(desktop), Board::Other);
    }
}
