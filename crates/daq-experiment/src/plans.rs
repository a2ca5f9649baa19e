//! Step-scan plans.
//!
//! A plan describes *where* each point of a scan is and how long every
//! detector integrates there. The [`crate::run_engine::RunEngine`] turns a
//! plan into strategy lifecycle calls and axis moves.
//!
//! # Example
//!
//! ```rust,ignore
//! let plan = StepScan::new(Duration::from_millis(500))
//!     .with_axis(ScanAxis::new(sample_y, 0.0, 2.0, 3))
//!     .with_axis(ScanAxis::new(sample_x, 0.0, 10.0, 11));
//!
//! assert_eq!(plan.shape().dims(), &[3, 11]);
//! ```
//!
//! Axes are ordered slowest first; the last axis is the line axis.

use daq_collection::ScanShape;
use daq_core::capabilities::Movable;
use std::sync::Arc;
use std::time::Duration;

/// One scanned axis: `points` evenly spaced positions from `start` to `stop`.
#[derive(Clone)]
pub struct ScanAxis {
    mover: Arc<dyn Movable>,
    start: f64,
    stop: f64,
    points: usize,
}

impl ScanAxis {
    pub fn new(mover: Arc<dyn Movable>, start: f64, stop: f64, points: usize) -> Self {
        Self {
            mover,
            start,
            stop,
            points,
        }
    }

    pub fn mover(&self) -> &Arc<dyn Movable> {
        &self.mover
    }

    pub fn points(&self) -> usize {
        self.points
    }

    /// Position of point `index` on this axis.
    pub fn position_at(&self, index: usize) -> f64 {
        if self.points <= 1 {
            self.start
        } else {
            let step = (self.stop - self.start) / (self.points - 1) as f64;
            self.start + step * index as f64
        }
    }
}

impl std::fmt::Debug for ScanAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanAxis")
            .field("mover", &self.mover.name())
            .field("start", &self.start)
            .field("stop", &self.stop)
            .field("points", &self.points)
            .finish()
    }
}

/// Grid step scan with a fixed collection time per point.
///
/// Without axes the plan is a count: `repeats` points at the current position.
#[derive(Debug, Clone)]
pub struct StepScan {
    collection_time: Duration,
    axes: Vec<ScanAxis>,
    repeats: usize,
}

impl StepScan {
    pub fn new(collection_time: Duration) -> Self {
        Self {
            collection_time,
            axes: Vec::new(),
            repeats: 1,
        }
    }

    /// Count `repeats` points without moving anything.
    pub fn count(collection_time: Duration, repeats: usize) -> Self {
        Self {
            collection_time,
            axes: Vec::new(),
            repeats,
        }
    }

    /// Append an axis; later axes move faster.
    pub fn with_axis(mut self, axis: ScanAxis) -> Self {
        self.axes.push(axis);
        self
    }

    pub fn collection_time(&self) -> Duration {
        self.collection_time
    }

    pub fn axes(&self) -> &[ScanAxis] {
        &self.axes
    }

    /// Scan shape handed to every strategy.
    pub fn shape(&self) -> ScanShape {
        if self.axes.is_empty() {
            ScanShape::new(vec![self.repeats])
        } else {
            ScanShape::new(self.axes.iter().map(ScanAxis::points).collect::<Vec<_>>())
        }
    }

    pub fn num_points(&self) -> u64 {
        self.shape().points()
    }

    /// Grid index of the point at flat position `flat`, slowest axis first.
    pub fn indices_of(&self, flat: u64) -> Vec<usize> {
        let mut remaining = flat;
        let mut indices = vec![0; self.axes.len()];
        for (slot, axis) in indices.iter_mut().zip(&self.axes).rev() {
            let n = axis.points().max(1) as u64;
            *slot = (remaining % n) as usize;
            remaining /= n;
        }
        indices
    }
}
