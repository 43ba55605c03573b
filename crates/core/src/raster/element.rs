//! Cell value trait for rasters and cubes

use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// Types that can be stored in a raster cell.
///
/// Floating point cells use NaN as the canonical nodata marker; integer
/// cells (class rasters, QA codes) rely on an explicit sentinel.
pub trait RasterElement:
    Copy + Debug + PartialOrd + NumCast + Zero + Send + Sync + 'static
{
    /// Sentinel used when a raster is created without an explicit nodata value
    fn default_nodata() -> Self;

    /// Whether `self` marks missing data under the given sentinel
    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    /// Lossy conversion to f64, `None` if the value cannot be represented
    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }
}

macro_rules! impl_integer_cell {
    ($($t:ty),*) => {$(
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                0
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                nodata == Some(*self)
            }
        }
    )*};
}

macro_rules! impl_float_cell {
    ($($t:ty),*) => {$(
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                <$t>::NAN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                self.is_nan() || nodata.is_some_and(|nd| *self == nd)
            }
        }
    )*};
}

impl_integer_cell!(u8, u16, i16, i32);
impl_float_cell!(f32, f64);
