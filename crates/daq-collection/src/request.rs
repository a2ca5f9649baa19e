//! Collection requests and scan shapes.

use crate::error::{CollectionError, Result};
use std::time::Duration;

/// Ordered dimensions of the scan a collection belongs to, slowest axis first.
///
/// An empty shape describes a single-point collection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanShape(Vec<usize>);

impl ScanShape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    /// A single-point collection.
    pub fn single() -> Self {
        Self(Vec::new())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Total number of points in the scan.
    pub fn points(&self) -> u64 {
        self.0.iter().map(|&d| d as u64).product()
    }

    /// Number of points on the innermost (fastest) axis.
    pub fn line_length(&self) -> u64 {
        self.0.last().map(|&d| d as u64).unwrap_or(1)
    }

    fn validate(&self) -> Result<()> {
        if let Some(pos) = self.0.iter().position(|&d| d == 0) {
            return Err(CollectionError::Configuration(format!(
                "scan dimension {pos} has zero points"
            )));
        }
        Ok(())
    }
}

impl From<Vec<usize>> for ScanShape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

/// Parameters of one prepared collection.
///
/// Built per `prepare_for_collection` call and never modified while that
/// collection is prepared.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRequest {
    pub collection_time: Duration,
    pub num_images: u32,
    pub scan_shape: ScanShape,
    /// Product of the image multipliers applied by decorators on the way down.
    pub(crate) image_scale: u32,
    /// Extra detector exposure added by decorators, hidden from readers.
    pub(crate) exposure_extension: Duration,
}

impl CollectionRequest {
    pub fn new(collection_time: Duration, num_images: u32, scan_shape: ScanShape) -> Self {
        Self {
            collection_time,
            num_images,
            scan_shape,
            image_scale: 1,
            exposure_extension: Duration::ZERO,
        }
    }

    /// Copy of this request as seen by a decoratee one multiplier further down.
    pub(crate) fn scaled_by(&self, factor: u32) -> Self {
        Self {
            image_scale: self.image_scale.saturating_mul(factor),
            ..self.clone()
        }
    }

    /// Copy of this request as seen below an exposure extension.
    pub(crate) fn extended_by(&self, extension: Duration) -> Self {
        Self {
            exposure_extension: self.exposure_extension + extension,
            ..self.clone()
        }
    }

    /// Reject requests no strategy could honour.
    pub fn validate(&self) -> Result<()> {
        if self.collection_time.is_zero() {
            return Err(CollectionError::Configuration(
                "collection time must be positive".into(),
            ));
        }
        if self.num_images == 0 {
            return Err(CollectionError::Configuration(
                "at least one image per collection is required".into(),
            ));
        }
        self.scan_shape.validate()
    }

    /// Check that `num_images` echoes the strategy's own image count.
    pub(crate) fn check_image_echo(&self, natural: u32) -> Result<()> {
        let expected = natural.saturating_mul(self.image_scale);
        if self.num_images != expected {
            return Err(CollectionError::ImageCountMismatch {
                expected,
                requested: self.num_images,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_points_and_lines() {
        let shape = ScanShape::new(vec![3, 4, 5]);
        assert_eq!(shape.points(), 60);
        assert_eq!(shape.line_length(), 5);

        let single = ScanShape::single();
        assert_eq!(single.points(), 1);
        assert_eq!(single.line_length(), 1);
    }

    #[test]
    fn rejects_degenerate_requests() {
        let zero_time = CollectionRequest::new(Duration::ZERO, 1, ScanShape::single());
        assert!(zero_time.validate().is_err());

        let zero_images = CollectionRequest::new(Duration::from_secs(1), 0, ScanShape::single());
        assert!(zero_images.validate().is_err());

        let empty_axis =
            CollectionRequest::new(Duration::from_secs(1), 1, ScanShape::new(vec![10, 0]));
        assert!(empty_axis.validate().is_err());
    }

    #[test]
    fn image_echo_respects_scale() {
        let request = CollectionRequest::new(Duration::from_secs(1), 6, ScanShape::single());
        assert!(request.check_image_echo(6).is_ok());
        assert!(request.check_image_echo(2).is_err());
        assert!(request.scaled_by(3).check_image_echo(2).is_ok());
    }
}
