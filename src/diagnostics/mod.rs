//! Diagnostics and statistics
//!
//! Per-generation summary values for the surrounding training loop's
//! fixed-width progress log.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

/// Column header appended by [`OptimizerMetrics::write_headers`]
pub const METRICS_HEADER: &str = "| avgC ";

/// Statistics for the most recent generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizerMetrics {
    /// Generation number
    pub generation: u64,
    /// Learning rate used for the next samples
    pub learning_rate: f64,
    /// Mean squared standard deviation over the owned slice
    pub avg_covariance: f64,
    /// Lowest reduced loss of the last applied generation
    pub best_loss: Option<f64>,
    /// Euclidean norm of the mean
    pub mean_norm: f64,
}

impl OptimizerMetrics {
    /// Append the `avgC` column value
    pub fn write_metrics(&self, buf: &mut String) {
        // writing into a String cannot fail
        let _ = write!(buf, " {:6.4}", self.avg_covariance);
    }

    /// Append the `avgC` column header
    pub fn write_headers(buf: &mut String) {
        buf.push_str(METRICS_HEADER);
    }
}

/// Mean of squares of `values`, 0 for an empty slice
pub fn mean_square(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64
}

/// Prelude for diagnostics module
pub mod prelude {
    pub use super::{OptimizerMetrics, METRICS_HEADER};
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_square() {
        assert_relative_eq!(mean_square(&[1.0, 2.0, 2.0]), 3.0);
        assert_eq!(mean_square(&[]), 0.0);
    }

    #[test]
    fn test_metrics_columns() {
        let metrics = OptimizerMetrics {
            generation: 2,
            learning_rate: 0.01,
            avg_covariance: 1.0,
            best_loss: Some(0.5),
            mean_norm: 3.0,
        };

        let mut header = String::from("gen ");
        OptimizerMetrics::write_headers(&mut header);
        assert_eq!(header, "gen | avgC ");

        let mut line = String::from("2");
        metrics.write_metrics(&mut line);
        assert_eq!(line, "2 1.0000");
    }
}
