//! Raster scan driver.
//!
//! Walks the stage (and optionally the wave-plate rotator) over a grid,
//! takes one measurement per point and hands it to a sink. This layer sits on
//! top of the drivers and only uses their public motion primitives.
//!
//! Points are visited in serpentine order to keep travel short: rows of Y
//! outermost, X reversing direction on every other row, and the wave-plate
//! sweep reversing on every other X index. An optional source-frequency
//! sweep runs innermost, in the given order, at every position and angle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};
use xystage_driver_axis::AxisController;
use xystage_driver_rotator::IndexedRotator;

use crate::recovery::RetryPolicy;

// =============================================================================
// Plan
// =============================================================================

/// Grid of stage positions, optional wave-plate angles and optional source
/// frequencies.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    /// X targets in steps.
    pub x_steps: Vec<i64>,
    /// Y targets in steps.
    pub y_steps: Vec<i64>,
    /// Wave-plate targets in steps from home. Empty for a stage-only scan.
    pub hwp_steps: Vec<i64>,
    /// Source frequencies in GHz. Empty when the source is not swept.
    pub frequencies: Vec<f64>,
}

/// One visit of the scan, with grid indices and target values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanPoint {
    /// Position in `x_steps`.
    pub x_index: usize,
    /// Position in `y_steps`.
    pub y_index: usize,
    /// Position in `hwp_steps`.
    pub hwp_index: Option<usize>,
    /// Position in `frequencies`.
    pub frequency_index: Option<usize>,
    /// X target in steps.
    pub x: i64,
    /// Y target in steps.
    pub y: i64,
    /// Wave-plate target in steps from home.
    pub hwp: Option<i64>,
    /// Source frequency in GHz.
    pub frequency: Option<f64>,
}

impl ScanPlan {
    /// Stage-only plan.
    pub fn new(x_steps: Vec<i64>, y_steps: Vec<i64>) -> Self {
        Self {
            x_steps,
            y_steps,
            hwp_steps: Vec::new(),
            frequencies: Vec::new(),
        }
    }

    /// Evenly spaced axis values from `start` to `stop` inclusive.
    pub fn range(start: i64, stop: i64, step: i64) -> Vec<i64> {
        if step <= 0 || stop < start {
            return vec![start];
        }
        (start..=stop).step_by(step as usize).collect()
    }

    /// Sweep the wave plate over `hwp_steps` at every position.
    pub fn with_hwp_steps(mut self, hwp_steps: Vec<i64>) -> Self {
        self.hwp_steps = hwp_steps;
        self
    }

    /// Sweep the source over `frequencies` (GHz) at every position and angle.
    pub fn with_frequencies(mut self, frequencies: Vec<f64>) -> Self {
        self.frequencies = frequencies;
        self
    }

    /// Reject plans that would violate the stage bounds mid-scan.
    pub fn validate(&self) -> Result<()> {
        use xystage_core::Axis;

        anyhow::ensure!(!self.x_steps.is_empty(), "scan has no X positions");
        anyhow::ensure!(!self.y_steps.is_empty(), "scan has no Y positions");
        for &x in &self.x_steps {
            Axis::X.check_target(x)?;
        }
        for &y in &self.y_steps {
            Axis::Y.check_target(y)?;
        }
        for &frequency in &self.frequencies {
            anyhow::ensure!(
                frequency.is_finite() && frequency > 0.0,
                "source frequency must be positive, got {}",
                frequency
            );
        }
        Ok(())
    }

    /// Number of measurements the plan produces.
    pub fn len(&self) -> usize {
        self.x_steps.len()
            * self.y_steps.len()
            * self.hwp_steps.len().max(1)
            * self.frequencies.len().max(1)
    }

    /// True when the plan produces no measurements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every point in serpentine visiting order.
    pub fn points(&self) -> Vec<ScanPoint> {
        let mut points = Vec::with_capacity(self.len());
        for (y_index, &y) in self.y_steps.iter().enumerate() {
            for x_index in serpentine(self.x_steps.len(), y_index) {
                let x = self.x_steps[x_index];
                let hwps: Vec<Option<usize>> = if self.hwp_steps.is_empty() {
                    vec![None]
                } else {
                    serpentine(self.hwp_steps.len(), x_index).map(Some).collect()
                };
                for hwp_index in hwps {
                    let hwp = hwp_index.map(|i| self.hwp_steps[i]);
                    if self.frequencies.is_empty() {
                        points.push(ScanPoint {
                            x_index,
                            y_index,
                            hwp_index,
                            frequency_index: None,
                            x,
                            y,
                            hwp,
                            frequency: None,
                        });
                        continue;
                    }
                    for (frequency_index, &frequency) in self.frequencies.iter().enumerate() {
                        points.push(ScanPoint {
                            x_index,
                            y_index,
                            hwp_index,
                            frequency_index: Some(frequency_index),
                            x,
                            y,
                            hwp,
                            frequency: Some(frequency),
                        });
                    }
                }
            }
        }
        points
    }
}

/// Indices `0..len`, reversed when `parity` is odd.
fn serpentine(len: usize, parity: usize) -> Box<dyn Iterator<Item = usize>> {
    if parity % 2 == 0 {
        Box::new(0..len)
    } else {
        Box::new((0..len).rev())
    }
}

// =============================================================================
// Measurement and output
// =============================================================================

/// What a detector reports for one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Primary reading (lock-in magnitude, power, ...).
    pub value: f64,
    /// Secondary reading taken with it, such as the lock-in sensitivity range
    /// the value was auto-ranged into.
    pub sensitivity: Option<f64>,
}

impl Measurement {
    /// A lone reading.
    pub fn new(value: f64) -> Self {
        Self {
            value,
            sensitivity: None,
        }
    }

    /// Attach the secondary reading.
    pub fn with_sensitivity(mut self, sensitivity: f64) -> Self {
        self.sensitivity = Some(sensitivity);
        self
    }

    fn failed() -> Self {
        Self::new(f64::NAN)
    }
}

impl From<f64> for Measurement {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

/// One stored measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanRecord {
    /// Position in `x_steps`.
    pub x_index: usize,
    /// Position in `y_steps`.
    pub y_index: usize,
    /// Position in `hwp_steps`.
    pub hwp_index: Option<usize>,
    /// Position in `frequencies`.
    pub frequency_index: Option<usize>,
    /// X target in steps.
    pub x: i64,
    /// Y target in steps.
    pub y: i64,
    /// Wave-plate target in steps from home.
    pub hwp: Option<i64>,
    /// Source frequency in GHz.
    pub frequency: Option<f64>,
    /// Primary reading, NaN when the detector failed.
    pub value: f64,
    /// Secondary reading, if the detector gave one.
    pub sensitivity: Option<f64>,
}

impl ScanRecord {
    fn new(point: &ScanPoint, measurement: Measurement) -> Self {
        Self {
            x_index: point.x_index,
            y_index: point.y_index,
            hwp_index: point.hwp_index,
            frequency_index: point.frequency_index,
            x: point.x,
            y: point.y,
            hwp: point.hwp,
            frequency: point.frequency,
            value: measurement.value,
            sensitivity: measurement.sensitivity,
        }
    }
}

/// Source of one reading per scan point (lock-in amplifier, power meter, ...).
#[async_trait]
pub trait Detector: Send {
    /// Take the reading for `point`. Hardware is already in place.
    async fn measure(&mut self, point: &ScanPoint) -> Result<Measurement>;
}

/// Tunable illumination source swept by plans with frequencies.
#[async_trait]
pub trait Source: Send {
    /// Tune to `frequency` in GHz.
    async fn set_frequency(&mut self, frequency: f64) -> Result<()>;
}

/// Destination for scan records.
pub trait ScanSink {
    /// Store one record.
    fn record(&mut self, record: &ScanRecord) -> Result<()>;

    /// Flush buffered output. Called once after the last point.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Records in the order they were measured.
    pub records: Vec<ScanRecord>,
}

impl ScanSink for MemorySink {
    fn record(&mut self, record: &ScanRecord) -> Result<()> {
        self.records.push(*record);
        Ok(())
    }
}

/// Writes one CSV row per record.
#[cfg(feature = "storage_csv")]
pub struct CsvSink<W: std::io::Write> {
    writer: csv::Writer<W>,
}

#[cfg(feature = "storage_csv")]
impl CsvSink<std::fs::File> {
    /// Create (or truncate) `path`, creating parent directories.
    pub fn create(path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self { writer })
    }
}

#[cfg(feature = "storage_csv")]
impl<W: std::io::Write> CsvSink<W> {
    /// Write rows to any writer.
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
        }
    }

    /// Flush and hand back the writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV output: {}", e.error()))
    }
}

#[cfg(feature = "storage_csv")]
impl<W: std::io::Write> ScanSink for CsvSink<W> {
    fn record(&mut self, record: &ScanRecord) -> Result<()> {
        self.writer.serialize(record).context("Failed to write CSV row")
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush CSV output")
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Summary of a finished scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanSummary {
    /// Points visited.
    pub points: usize,
    /// Points stored as NaN because the detector failed.
    pub failed_measurements: usize,
    /// Wall time from the first move to the last record.
    pub elapsed: Duration,
}

/// Drives the hardware through a [`ScanPlan`].
pub struct ScanRunner<'a> {
    stage: &'a mut AxisController,
    rotator: Option<&'a mut IndexedRotator>,
    source: Option<&'a mut dyn Source>,
    settle_time: Duration,
    retry: RetryPolicy,
}

impl<'a> ScanRunner<'a> {
    /// Runner with a 300 ms settle time and the default retry policy.
    pub fn new(stage: &'a mut AxisController) -> Self {
        Self {
            stage,
            rotator: None,
            source: None,
            settle_time: Duration::from_millis(300),
            retry: RetryPolicy::default(),
        }
    }

    /// Wave-plate rotator for plans with `hwp_steps`.
    pub fn with_rotator(mut self, rotator: &'a mut IndexedRotator) -> Self {
        self.rotator = Some(rotator);
        self
    }

    /// Source for plans with `frequencies`.
    pub fn with_source(mut self, source: &'a mut dyn Source) -> Self {
        self.source = Some(source);
        self
    }

    /// Pause between the last move and the measurement.
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// Retry policy for stage moves.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run the whole plan.
    ///
    /// Homes the stage first (two full homing runs) unless it already is.
    /// The stage is hard-stopped at the end whether or not the scan
    /// succeeded. A failed measurement is stored as NaN and the scan goes
    /// on; a failed move or source tuning aborts it.
    pub async fn run(
        &mut self,
        plan: &ScanPlan,
        detector: &mut dyn Detector,
        sink: &mut dyn ScanSink,
    ) -> Result<ScanSummary> {
        plan.validate()?;
        if !plan.hwp_steps.is_empty() && self.rotator.is_none() {
            anyhow::bail!("scan has wave-plate steps but no rotator is attached");
        }
        if !plan.frequencies.is_empty() && self.source.is_none() {
            anyhow::bail!("scan has source frequencies but no source is attached");
        }

        let outcome = self.visit_all(plan, detector, sink).await;

        if let Err(e) = self.stage.hard_stop().await {
            tracing::warn!(error = %e, "Hard stop after scan failed");
        }
        outcome
    }

    async fn visit_all(
        &mut self,
        plan: &ScanPlan,
        detector: &mut dyn Detector,
        sink: &mut dyn ScanSink,
    ) -> Result<ScanSummary> {
        if !self.stage.is_homed() {
            tracing::info!("Homing stage before scan");
            self.stage.find_home().await.context("Homing failed")?;
            self.stage.find_home().await.context("Homing failed")?;
        }

        let points = plan.points();
        let total = points.len();
        let started = Instant::now();
        let mut failed_measurements = 0usize;
        let mut last_xy = None;

        tracing::info!(total, "Scan started");

        for (done, point) in points.iter().enumerate() {
            if last_xy != Some((point.x, point.y)) {
                let (x, y) = (point.x, point.y);
                self.retry
                    .run(&mut *self.stage, |stage| Box::pin(stage.go_to_position(x, y, true)))
                    .await
                    .with_context(|| format!("Move to ({}, {}) failed", x, y))?;
                last_xy = Some((x, y));
            }

            if let (Some(hwp), Some(rotator)) = (point.hwp, self.rotator.as_deref_mut()) {
                rotator
                    .move_to(hwp)
                    .await
                    .with_context(|| format!("Wave-plate move to {} failed", hwp))?;
            }

            if let (Some(frequency), Some(source)) = (point.frequency, self.source.as_deref_mut()) {
                source
                    .set_frequency(frequency)
                    .await
                    .with_context(|| format!("Tuning source to {} GHz failed", frequency))?;
            }

            tokio::time::sleep(self.settle_time).await;

            let measurement = match detector.measure(point).await {
                Ok(measurement) => measurement,
                Err(e) => {
                    tracing::warn!(error = %e, ?point, "Measurement failed, storing NaN");
                    failed_measurements += 1;
                    Measurement::failed()
                }
            };
            sink.record(&ScanRecord::new(point, measurement))?;

            let measured = done + 1;
            let per_point = started.elapsed() / measured as u32;
            let remaining = per_point * (total - measured) as u32;
            tracing::info!(
                measured,
                total,
                x = point.x,
                y = point.y,
                hwp = ?point.hwp,
                frequency = ?point.frequency,
                value = measurement.value,
                remaining_min = remaining.as_secs_f64() / 60.0,
                "Scan progress"
            );
        }

        sink.finish()?;
        let elapsed = started.elapsed();
        tracing::info!(points = total, failed_measurements, ?elapsed, "Scan finished");
        Ok(ScanSummary {
            points: total,
            failed_measurements,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serpentine_order() {
        let plan = ScanPlan::new(vec![0, 10, 20], vec![0, 5]);
        let visited: Vec<(i64, i64)> = plan.points().iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(
            visited,
            vec![(0, 0), (10, 0), (20, 0), (20, 5), (10, 5), (0, 5)]
        );
    }

    #[test]
    fn test_hwp_direction_alternates_per_x_index() {
        let plan = ScanPlan::new(vec![0, 10], vec![0]).with_hwp_steps(vec![0, 4, 8]);
        let hwps: Vec<i64> = plan.points().iter().filter_map(|p| p.hwp).collect();
        assert_eq!(hwps, vec![0, 4, 8, 8, 4, 0]);
        assert_eq!(plan.len(), 6);
    }

    #[test]
    fn test_frequencies_run_innermost_in_order() {
        let plan = ScanPlan::new(vec![0, 10], vec![0])
            .with_hwp_steps(vec![0, 4])
            .with_frequencies(vec![90.0, 100.0]);
        let visited: Vec<(i64, Option<i64>, Option<f64>)> =
            plan.points().iter().map(|p| (p.x, p.hwp, p.frequency)).collect();
        assert_eq!(
            visited,
            vec![
                (0, Some(0), Some(90.0)),
                (0, Some(0), Some(100.0)),
                (0, Some(4), Some(90.0)),
                (0, Some(4), Some(100.0)),
                (10, Some(4), Some(90.0)),
                (10, Some(4), Some(100.0)),
                (10, Some(0), Some(90.0)),
                (10, Some(0), Some(100.0)),
            ]
        );
        assert_eq!(plan.len(), 8);
        assert!(ScanPlan::new(vec![0], vec![0]).with_frequencies(vec![-1.0]).validate().is_err());
    }

    #[test]
    fn test_range_and_validate() {
        assert_eq!(ScanPlan::range(0, 1000, 250), vec![0, 250, 500, 750, 1000]);
        assert!(ScanPlan::new(ScanPlan::range(0, 7000, 1000), vec![0]).validate().is_ok());
        assert!(ScanPlan::new(vec![7200], vec![0]).validate().is_err());
        assert!(ScanPlan::new(vec![0], vec![]).validate().is_err());
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_csv_sink_writes_header_and_rows() {
        let mut sink = CsvSink::from_writer(Vec::new());
        let point = ScanPoint {
            x_index: 1,
            y_index: 0,
            hwp_index: None,
            frequency_index: Some(0),
            x: 100,
            y: 0,
            hwp: None,
            frequency: Some(95.5),
        };
        sink.record(&ScanRecord::new(&point, Measurement::new(0.5).with_sensitivity(2.0)))
            .unwrap();
        sink.record(&ScanRecord::new(&point, Measurement::new(0.25))).unwrap();
        sink.finish().unwrap();

        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(
            text,
            "x_index,y_index,hwp_index,frequency_index,x,y,hwp,frequency,value,sensitivity\n\
             1,0,,0,100,0,,95.5,0.5,2.0\n\
             1,0,,0,100,0,,95.5,0.25,\n"
        );
    }
}
