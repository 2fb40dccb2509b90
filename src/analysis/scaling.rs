// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/envwatch

//! Per-feature standardization

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Columns with a spread below this are left unscaled
const MIN_SCALE: f64 = 1e-12;

/// Zero-mean, unit-variance transform fitted per column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    /// Fit means and population standard deviations column by column
    pub fn fit(data: &DMatrix<f64>) -> Self {
        let mut means = Vec::with_capacity(data.ncols());
        let mut scales = Vec::with_capacity(data.ncols());

        for column in data.column_iter() {
            let mean = column.iter().mean();
            let std = column.iter().population_std_dev();
            means.push(mean);
            scales.push(if std.is_finite() && std > MIN_SCALE { std } else { 1.0 });
        }

        Self { means, scales }
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    /// Apply the fitted transform; never refits
    pub fn transform(&self, data: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(data.nrows(), data.ncols(), |r, c| {
            (data[(r, c)] - self.means[c]) / self.scales[c]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_transform_standardizes() {
        let data = DMatrix::from_row_slice(4, 2, &[1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0]);
        let scaler = StandardScaler::fit(&data);
        let scaled = scaler.transform(&data);

        for c in 0..2 {
            let column: Vec<f64> = scaled.column(c).iter().copied().collect();
            assert!(column.iter().mean().abs() < 1e-12);
            assert!((column.iter().population_std_dev() - 1.0).abs() < 1e-12);
        }
        assert!((scaler.means()[1] - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_column_keeps_unit_scale() {
        let data = DMatrix::from_row_slice(3, 1, &[5.0, 5.0, 5.0]);
        let scaler = StandardScaler::fit(&data);
        assert_eq!(scaler.scales(), &[1.0]);
        assert_eq!(scaler.transform(&data)[(0, 0)], 0.0);
    }

    #[test]
    fn test_transform_uses_training_parameters() {
        let train = DMatrix::from_row_slice(2, 1, &[0.0, 2.0]);
        let scaler = StandardScaler::fit(&train);
        let query = DMatrix::from_row_slice(1, 1, &[100.0]);
        assert!((scaler.transform(&query)[(0, 0)] - 99.0).abs() < 1e-12);
    }
}
