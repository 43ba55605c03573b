//! Packaging of rasters for the writer

use chronocube_core::io::{OutputBand, OutputBundle};
use chronocube_core::raster::{MultiBandRaster, Raster};
use chronocube_core::{Result, CRS};

/// Coordinate axis naming of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisNames {
    /// `x` / `y`
    #[default]
    Projected,
    /// `longitude` / `latitude`
    Geographic,
}

impl AxisNames {
    pub fn x(&self) -> &'static str {
        match self {
            AxisNames::Projected => "x",
            AxisNames::Geographic => "longitude",
        }
    }

    pub fn y(&self) -> &'static str {
        match self {
            AxisNames::Projected => "y",
            AxisNames::Geographic => "latitude",
        }
    }
}

/// Builds [`OutputBundle`]s in one output CRS.
///
/// Without an explicit CRS each bundle takes the CRS of its raster.
#[derive(Debug, Clone, Default)]
pub struct OutputAssembler {
    crs: Option<CRS>,
    axes: AxisNames,
}

impl OutputAssembler {
    pub fn new(crs: Option<CRS>) -> Self {
        Self {
            crs,
            axes: AxisNames::default(),
        }
    }

    pub fn with_axes(mut self, axes: AxisNames) -> Self {
        self.axes = axes;
        self
    }

    fn bundle(
        &self,
        destination: &str,
        raster_crs: Option<&CRS>,
        bands: Vec<OutputBand>,
    ) -> OutputBundle {
        OutputBundle {
            destination: destination.to_string(),
            bands,
            crs: self.crs.clone().or_else(|| raster_crs.cloned()),
            x_coord: self.axes.x().to_string(),
            y_coord: self.axes.y().to_string(),
        }
    }

    /// One named band
    pub fn single(&self, destination: &str, band: &str, raster: Raster<f64>) -> OutputBundle {
        let crs = raster.crs().cloned();
        self.bundle(
            destination,
            crs.as_ref(),
            vec![OutputBand {
                name: band.to_string(),
                raster,
            }],
        )
    }

    /// Every band of a multi-band raster, under its own name
    pub fn multi(&self, destination: &str, raster: &MultiBandRaster) -> Result<OutputBundle> {
        let bands = raster
            .band_names()
            .iter()
            .map(|name| {
                Ok(OutputBand {
                    name: name.clone(),
                    raster: raster.band_raster(name)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.bundle(destination, raster.crs(), bands))
    }

    /// Class codes as floats, with the no-data class written as NaN
    pub fn classes(&self, destination: &str, band: &str, classes: &Raster<u16>) -> OutputBundle {
        let data = classes.data().mapv(|c| {
            if classes.is_nodata(c) {
                f64::NAN
            } else {
                c as f64
            }
        });
        let raster = classes.with_same_meta(data, Some(f64::NAN));
        self.single(destination, band, raster)
    }
}
