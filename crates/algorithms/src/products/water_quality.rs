//! Total suspended matter over clear water observations

use crate::composite::SeriesSummary;
use crate::indices::tsm_value;
use chronocube_core::raster::{MultiBandRaster, QualityMaskArray, RasterCube};
use chronocube_core::Result;
use ndarray::Array3;

/// Output bands of the TSM summary
pub const TSM_BANDS: [&str; 3] = ["mean_tsm", "min_tsm", "max_tsm"];

/// Temporal mean, minimum and maximum TSM per pixel.
///
/// Only observations that are both clear and classified as water count; a
/// pixel without any is nodata.
pub fn tsm_summary(
    cube: &RasterCube,
    clear: &QualityMaskArray,
    water: &QualityMaskArray,
) -> Result<MultiBandRaster> {
    cube.check_mask(clear)?;
    cube.check_mask(water)?;
    let green = cube.band("green")?;
    let red = cube.band("red")?;
    let (times, _, rows, cols) = cube.dim();

    let mut out = Array3::from_elem((TSM_BANDS.len(), rows, cols), f64::NAN);
    for row in 0..rows {
        for col in 0..cols {
            let series = (0..times)
                .filter(|&t| clear.is_valid(t, row, col) && water.is_valid(t, row, col))
                .map(|t| {
                    let (g, r) = (green[[t, row, col]], red[[t, row, col]]);
                    if cube.is_nodata(g) || cube.is_nodata(r) {
                        f64::NAN
                    } else {
                        tsm_value(g, r)
                    }
                });
            if let Some(s) = SeriesSummary::of(series) {
                out[[0, row, col]] = s.mean;
                out[[1, row, col]] = s.min;
                out[[2, row, col]] = s.max;
            }
        }
    }

    let mut summary = MultiBandRaster::new(out, TSM_BANDS.iter().map(|b| b.to_string()).collect())?;
    summary.set_transform(*cube.transform());
    summary.set_crs(cube.crs().cloned());
    Ok(summary)
}
