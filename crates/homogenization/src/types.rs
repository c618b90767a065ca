//! Core grid types.
//!
//! Every 3-D array in this crate is a flat `Vec<f64>` in time-major order
//! (`[time][lat][lon]`), matching the CF dimension order of the source
//! products. Missing values are NaN.

use serde::{Deserialize, Serialize};

use crate::error::{HomogenizationError, Result};
use crate::time::TimeAxis;

/// Dimensions of a `[time][lat][lon]` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    pub times: usize,
    pub lats: usize,
    pub lons: usize,
}

impl GridShape {
    pub fn new(times: usize, lats: usize, lons: usize) -> Self {
        Self { times, lats, lons }
    }

    /// Number of spatial cells.
    pub fn cells(&self) -> usize {
        self.lats * self.lons
    }

    /// Total number of values.
    pub fn len(&self) -> usize {
        self.times * self.cells()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.times, self.lats, self.lons]
    }

    /// Flat index of `(t, lat, lon)`.
    #[inline]
    pub fn index(&self, t: usize, lat: usize, lon: usize) -> usize {
        (t * self.lats + lat) * self.lons + lon
    }
}

impl std::fmt::Display for GridShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.times, self.lats, self.lons)
    }
}

/// Position of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellIndex {
    pub lat: usize,
    pub lon: usize,
}

impl CellIndex {
    pub fn new(lat: usize, lon: usize) -> Self {
        Self { lat, lon }
    }

    /// Cell for a row-major (lat, lon) linear position.
    #[inline]
    pub fn from_linear(linear: usize, lons: usize) -> Self {
        Self {
            lat: linear / lons,
            lon: linear % lons,
        }
    }

    #[inline]
    pub fn linear(&self, lons: usize) -> usize {
        self.lat * lons + self.lon
    }
}

/// One gridded variable: coordinates plus a dense `[time][lat][lon]` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSeries {
    pub longitudes: Vec<f64>,
    pub latitudes: Vec<f64>,
    pub time: TimeAxis,
    pub data: Vec<f64>,
}

impl GridSeries {
    /// Create a grid, checking the array length and the time axis ordering.
    pub fn new(
        longitudes: Vec<f64>,
        latitudes: Vec<f64>,
        time: TimeAxis,
        data: Vec<f64>,
    ) -> Result<Self> {
        let grid = Self {
            longitudes,
            latitudes,
            time,
            data,
        };
        grid.validate()?;
        Ok(grid)
    }

    /// Check `data.len() == time × lat × lon` and a strictly increasing time axis.
    pub fn validate(&self) -> Result<()> {
        let shape = self.shape();
        if self.data.len() != shape.len() {
            return Err(HomogenizationError::shape_mismatch(
                &[shape.len()],
                &[self.data.len()],
            ));
        }
        if self.time.values.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(HomogenizationError::invalid_time_axis(
                "time values must be strictly increasing",
            ));
        }
        Ok(())
    }

    pub fn shape(&self) -> GridShape {
        GridShape::new(self.time.len(), self.latitudes.len(), self.longitudes.len())
    }

    /// Copy out the time series of one cell.
    pub fn cell_series(&self, cell: CellIndex) -> Vec<f64> {
        let shape = self.shape();
        (0..shape.times)
            .map(|t| self.data[shape.index(t, cell.lat, cell.lon)])
            .collect()
    }

    /// The array reordered to `[lat][lon][time]`, so each cell's series is contiguous.
    pub fn to_cell_major(&self) -> Vec<f64> {
        let shape = self.shape();
        transpose(&self.data, shape.times, shape.cells())
    }

    /// Keep only the given time positions, in the given order.
    pub fn select_times(&self, positions: &[usize]) -> Self {
        let shape = self.shape();
        let cells = shape.cells();
        let mut data = Vec::with_capacity(positions.len() * cells);
        for &t in positions {
            data.extend_from_slice(&self.data[t * cells..(t + 1) * cells]);
        }
        Self {
            longitudes: self.longitudes.clone(),
            latitudes: self.latitudes.clone(),
            time: TimeAxis::new(
                self.time.units,
                positions.iter().map(|&t| self.time.values[t]).collect(),
            ),
            data,
        }
    }

    /// True when latitudes run north to south.
    pub fn latitudes_descending(&self) -> bool {
        self.latitudes.len() > 1 && self.latitudes[0] > self.latitudes[self.latitudes.len() - 1]
    }

    /// Reverse the latitude axis (coordinates and data).
    pub fn flip_latitudes(&self) -> Self {
        let shape = self.shape();
        let mut data = Vec::with_capacity(self.data.len());
        for t in 0..shape.times {
            for lat in (0..shape.lats).rev() {
                let start = shape.index(t, lat, 0);
                data.extend_from_slice(&self.data[start..start + shape.lons]);
            }
        }
        Self {
            longitudes: self.longitudes.clone(),
            latitudes: self.latitudes.iter().rev().copied().collect(),
            time: self.time.clone(),
            data,
        }
    }

    /// Apply `f` to every value (e.g. unit conversion of a reference product).
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            data: self.data.iter().map(|&v| f(v)).collect(),
            ..self.clone()
        }
    }

    /// Wind speed `sqrt(u² + v²)` from eastward/northward component grids.
    pub fn magnitude(u: &GridSeries, v: &GridSeries) -> Result<Self> {
        if u.shape() != v.shape() {
            return Err(HomogenizationError::shape_mismatch(
                &u.shape().dims(),
                &v.shape().dims(),
            ));
        }
        Ok(Self {
            data: u
                .data
                .iter()
                .zip(&v.data)
                .map(|(a, b)| (a * a + b * b).sqrt())
                .collect(),
            ..u.clone()
        })
    }

    /// Replace non-finite values with the value of `other` at the same position.
    pub fn fill_missing_from(&self, other: &GridSeries) -> Result<Self> {
        if self.shape() != other.shape() {
            return Err(HomogenizationError::shape_mismatch(
                &self.shape().dims(),
                &other.shape().dims(),
            ));
        }
        Ok(Self {
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| if a.is_finite() { a } else { b })
                .collect(),
            ..self.clone()
        })
    }
}

/// Coordinates carried from the inputs to every product of a run.
///
/// Times are Unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCoords {
    pub longitudes: Vec<f64>,
    pub latitudes: Vec<f64>,
    pub times: Vec<i64>,
}

impl GridCoords {
    pub fn shape(&self) -> GridShape {
        GridShape::new(self.times.len(), self.latitudes.len(), self.longitudes.len())
    }
}

/// Transpose a row-major `rows × cols` matrix.
///
/// Converts `[time][cell]` to `[cell][time]` and back.
pub fn transpose(data: &[f64], rows: usize, cols: usize) -> Vec<f64> {
    debug_assert_eq!(data.len(), rows * cols);
    let mut out = vec![f64::NAN; data.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = data[r * cols + c];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeUnits;

    fn grid(times: usize, lats: usize, lons: usize) -> GridSeries {
        let data = (0..times * lats * lons).map(|i| i as f64).collect();
        GridSeries::new(
            (0..lons).map(|i| i as f64).collect(),
            (0..lats).map(|i| 40.0 + i as f64).collect(),
            TimeAxis::new(
                TimeUnits::parse("days since 2011-01-01").unwrap(),
                (0..times).map(|t| t as f64 * 30.0).collect(),
            ),
            data,
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_bad_length() {
        let result = GridSeries::new(
            vec![0.0, 1.0],
            vec![0.0],
            TimeAxis::from_epoch_seconds(&[0, 1]),
            vec![1.0; 3],
        );
        assert!(matches!(
            result,
            Err(HomogenizationError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_new_rejects_unsorted_time() {
        let result = GridSeries::new(
            vec![0.0],
            vec![0.0],
            TimeAxis::from_epoch_seconds(&[5, 1]),
            vec![1.0, 2.0],
        );
        assert!(matches!(result, Err(HomogenizationError::InvalidTimeAxis(_))));
    }

    #[test]
    fn test_cell_series_and_cell_major() {
        let g = grid(3, 2, 2);
        let cell = CellIndex::new(1, 0);
        assert_eq!(g.cell_series(cell), vec![2.0, 6.0, 10.0]);

        let cm = g.to_cell_major();
        let linear = cell.linear(2);
        assert_eq!(&cm[linear * 3..linear * 3 + 3], &[2.0, 6.0, 10.0]);
        assert_eq!(transpose(&cm, 4, 3), g.data);
    }

    #[test]
    fn test_select_times() {
        let g = grid(3, 1, 2);
        let sub = g.select_times(&[0, 2]);
        assert_eq!(sub.data, vec![0.0, 1.0, 4.0, 5.0]);
        assert_eq!(sub.time.values, vec![0.0, 60.0]);
    }

    #[test]
    fn test_flip_latitudes() {
        let g = grid(1, 3, 1);
        let flipped = g.flip_latitudes();
        assert_eq!(flipped.latitudes, vec![42.0, 41.0, 40.0]);
        assert_eq!(flipped.data, vec![2.0, 1.0, 0.0]);
        assert!(flipped.latitudes_descending());
        assert!(!g.latitudes_descending());
    }

    #[test]
    fn test_magnitude_and_fill() {
        let u = grid(1, 1, 2).map_values(|_| 3.0);
        let v = grid(1, 1, 2).map_values(|_| 4.0);
        let speed = GridSeries::magnitude(&u, &v).unwrap();
        assert_eq!(speed.data, vec![5.0, 5.0]);

        let mut gappy = grid(1, 1, 2);
        gappy.data[1] = f64::NAN;
        let filled = gappy.fill_missing_from(&speed).unwrap();
        assert_eq!(filled.data, vec![0.0, 5.0]);
    }
}
