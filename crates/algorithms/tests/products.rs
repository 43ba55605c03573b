//! End-to-end product runs over in-memory cubes

use approx::assert_relative_eq;
use chronocube_algorithms::indices::{COVER_BANDS, UNMIXING_BANDS};
use chronocube_algorithms::prelude::*;
use chronocube_core::io::{read_geotiff, GeoTiffWriter, MemorySource};
use ndarray::{Array3, Array4};
use std::path::Path;
use std::sync::Arc;

const BANDS: [&str; 7] = ["blue", "green", "red", "nir", "swir1", "swir2", "pixel_qa"];
const CLEAR: f64 = 322.0;
const CLOUD: f64 = 352.0;
const BACKGROUND: f64 = 800.0;

/// Landsat 8 cube where every pixel of step `t` has red `red[t]`, nir
/// `nir[t]` and QA code `qa[t]`; the other bands are constant.
///
/// Pixel (r, c) is offset by `r * cols + c` (three times that for nir).
fn landsat_cube(
    rows: usize,
    cols: usize,
    red: &[f64],
    nir: &[f64],
    qa: &[f64],
    times: &[&str],
) -> RasterCube {
    let data = Array4::from_shape_fn((times.len(), BANDS.len(), rows, cols), |(t, b, r, c)| {
        let ripple = (r * cols + c) as f64;
        match BANDS[b] {
            "red" => red[t] + ripple,
            "nir" => nir[t] + 3.0 * ripple,
            "pixel_qa" => qa[t],
            _ => BACKGROUND + ripple,
        }
    });
    RasterCube::new(data, BANDS.iter().map(|b| b.to_string()).collect())
        .unwrap()
        .with_times(times.iter().map(|t| t.to_string()).collect())
        .unwrap()
}

/// Water classification cube; `value(t, r, c)` gives each observation
fn water_cube<F>(rows: usize, cols: usize, times: &[&str], value: F) -> RasterCube
where
    F: Fn(usize, usize, usize) -> f64,
{
    let data = Array4::from_shape_fn((times.len(), 1, rows, cols), |(t, _, r, c)| value(t, r, c));
    RasterCube::new(data, vec!["water_classification".into()])
        .unwrap()
        .with_times(times.iter().map(|t| t.to_string()).collect())
        .unwrap()
}

fn period(label: &str, start: &str, end: &str) -> PeriodRequest {
    PeriodRequest {
        label: label.into(),
        time: TimeRange::new(start, end),
        platform: Platform::Landsat8,
    }
}

fn plan(spec: ProductSpec, analysis: bool, rows: usize, cols: usize) -> TaskPlan {
    TaskPlan {
        spec,
        baseline: period("baseline", "2019-01-01", "2019-12-31"),
        analysis: analysis.then(|| period("analysis", "2020-01-01", "2020-12-31")),
        area: QueryArea::default(),
        pipeline: ChunkedPipeline::new(rows, cols),
        manifest: None,
        output_dir: "output".into(),
        output_crs: None,
    }
}

fn run(plan: &TaskPlan, source: &MemorySource, dir: &Path) -> TaskReport {
    run_task(plan, source, &GeoTiffWriter::new(dir)).unwrap()
}

fn read(dir: &Path, file: &str) -> Raster<f64> {
    read_geotiff(dir.join(file)).unwrap()
}

fn ndvi(red: f64, nir: f64) -> f64 {
    (nir - red) / (nir + red)
}

/// Fractional cover of one pixel whose spectrum is background except red and nir
fn cover_of(red: f64, nir: f64) -> Vec<f64> {
    let spectrum = [BACKGROUND, BACKGROUND, red, nir, BACKGROUND, BACKGROUND];
    let data = Array3::from_shape_fn((UNMIXING_BANDS.len(), 1, 1), |(b, _, _)| spectrum[b]);
    let names = UNMIXING_BANDS.iter().map(|b| b.to_string()).collect();
    let composite = MultiBandRaster::new(data, names).unwrap();
    IndexCalculator::new(IndexKind::FractionalCover, IndexParams::default())
        .unwrap()
        .compute(&composite)
        .unwrap()
        .pixel(0, 0)
}

#[test]
fn median_ndvi_skips_masked_step() {
    let times = ["2019-02-01", "2019-03-01", "2019-04-01"];
    let cube = landsat_cube(
        1,
        1,
        &[1000.0, 5000.0, 1000.0],
        &[3000.0, 5000.0, 5000.0],
        &[CLEAR, CLOUD, CLEAR],
        &times,
    );
    let source = MemorySource::new().with_product("ls8_usgs_sr_scene", cube);

    let mut spec = ProductSpec::new(ProductKind::AggregateIndices);
    spec.index = IndexKind::Ndvi;
    let dir = tempfile::tempdir().unwrap();
    let report = run(&plan(spec, false, 1000, 1000), &source, dir.path());

    assert_eq!(report.written.len(), 1);
    let out = read(dir.path(), "indices_composite.tiff");
    // median red 1000, median nir 4000
    assert_relative_eq!(out.get(0, 0).unwrap(), 0.6, epsilon = 1e-6);
}

#[test]
fn vegetation_change_writes_anomaly_and_classes() {
    let times = ["2019-05-01", "2019-06-01", "2020-05-01", "2020-06-01"];
    // Baseline NDVI 0.5, analysis NDVI about 0.05
    let cube = landsat_cube(
        3,
        4,
        &[1000.0, 1000.0, 2000.0, 2000.0],
        &[3000.0, 3000.0, 2200.0, 2200.0],
        &[CLEAR; 4],
        &times,
    );
    // (1, 2) is permanent water
    let water = water_cube(3, 4, &times, |_, r, c| if (r, c) == (1, 2) { 1.0 } else { 0.0 });
    let source = MemorySource::new()
        .with_product("ls8_usgs_sr_scene", cube)
        .with_product("ls8_water_classification", water);

    let mut spec = ProductSpec::new(ProductKind::VegetationChange);
    spec.thresholds = Some(ThresholdClassifier::new(-0.2, 0.2).unwrap());
    let dir = tempfile::tempdir().unwrap();
    let report = run(&plan(spec, true, 2, 3), &source, dir.path());

    assert_eq!(report.product, ProductKind::VegetationChange);
    assert_eq!(report.written.len(), 2);
    let anomaly = read(dir.path(), "veg_change.tiff");
    let classes = read(dir.path(), "param_thres.tiff");
    assert_eq!(anomaly.shape(), (3, 4));
    assert_relative_eq!(
        anomaly.get(0, 0).unwrap(),
        ndvi(2000.0, 2200.0) - 0.5,
        epsilon = 1e-6
    );
    assert_eq!(classes.get(2, 3).unwrap(), ChangeClass::Decrease.code() as f64);
    assert!(anomaly.get(1, 2).unwrap().is_nan());
    assert!(classes.get(1, 2).unwrap().is_nan());
}

#[test]
fn ndvi_anomaly_keeps_only_never_wet_pixels() {
    let times = ["2019-05-01", "2019-06-01", "2020-05-01", "2020-06-01"];
    let cube = landsat_cube(
        1,
        4,
        &[1000.0, 1000.0, 2000.0, 2000.0],
        &[3000.0, 3000.0, 2200.0, 2200.0],
        &[CLEAR; 4],
        &times,
    );
    // Column 1 is wet half the baseline; column 2 has analysis occurrence 0.1
    let water = water_cube(1, 4, &times, |t, _, c| match (t, c) {
        (0, 1) => 1.0,
        (2, 2) => 0.2,
        _ => 0.0,
    });
    let source = MemorySource::new()
        .with_product("ls8_usgs_sr_scene", cube)
        .with_product("ls8_water_classification", water);

    let dir = tempfile::tempdir().unwrap();
    let report = run(
        &plan(ProductSpec::new(ProductKind::NdviAnomaly), true, 1, 3),
        &source,
        dir.path(),
    );

    assert_eq!(report.written.len(), 1);
    let anomaly = read(dir.path(), "ndvi_anomaly.tiff");
    for c in [0, 3] {
        let ripple = c as f64;
        let expected = ndvi(2000.0 + ripple, 2200.0 + 3.0 * ripple)
            - ndvi(1000.0 + ripple, 3000.0 + 3.0 * ripple);
        assert_relative_eq!(anomaly.get(0, c).unwrap(), expected, epsilon = 1e-6);
    }
    assert!(anomaly.get(0, 1).unwrap().is_nan());
    assert!(anomaly.get(0, 2).unwrap().is_nan());
}

#[test]
fn land_change_writes_cover_differences() {
    let times = ["2019-05-01", "2020-05-01"];
    let cube = landsat_cube(1, 2, &[1000.0, 2000.0], &[3000.0, 2200.0], &[CLEAR; 2], &times);
    // Column 1 is above the 0.4 exclusion in the baseline
    let water = water_cube(1, 2, &times, |t, _, c| if (t, c) == (0, 1) { 0.6 } else { 0.0 });
    let source = MemorySource::new()
        .with_product("ls8_usgs_sr_scene", cube)
        .with_product("ls8_water_classification", water);

    let dir = tempfile::tempdir().unwrap();
    let report = run(&plan(ProductSpec::new(ProductKind::LandChange), true, 1, 1), &source, dir.path());
    assert_eq!(report.written.len(), COVER_BANDS.len() + 3);

    let before = cover_of(1000.0, 3000.0);
    let after = cover_of(2000.0, 2200.0);
    for (b, band) in COVER_BANDS.iter().enumerate() {
        let layer = read(dir.path(), &format!("land_change_{}.tiff", band));
        assert_relative_eq!(layer.get(0, 0).unwrap(), after[b] - before[b], epsilon = 1e-6);
        assert!(layer.get(0, 1).unwrap().is_nan());
    }
    for band in &COVER_BANDS[..3] {
        let single = read(dir.path(), &format!("{}_change.tiff", band));
        let multi = read(dir.path(), &format!("land_change_{}.tiff", band));
        assert_eq!(single.get(0, 0).unwrap(), multi.get(0, 0).unwrap());
        assert!(single.get(0, 1).unwrap().is_nan());
    }
    assert!(!dir.path().join("ue_change.tiff").exists());
}

#[test]
fn fractional_cover_masks_wet_pixels() {
    let times = ["2019-05-01"];
    let cube = landsat_cube(1, 3, &[1000.0], &[3000.0], &[CLEAR], &times);
    // Occurrence at the limit, above it, and unknown
    let water = water_cube(1, 3, &times, |_, _, c| [0.4, 0.5, f64::NAN][c]);
    let source = MemorySource::new()
        .with_product("ls8_usgs_sr_scene", cube)
        .with_product("ls8_water_classification", water);

    let spec = ProductSpec::new(ProductKind::FractionalCover);
    assert_eq!(spec.exclusion(), WaterExclusion::MaxOccurrence(0.4));
    let dir = tempfile::tempdir().unwrap();
    let report = run(&plan(spec, false, 1, 2), &source, dir.path());
    assert_eq!(report.written.len(), COVER_BANDS.len());

    let expected = cover_of(1000.0, 3000.0);
    for (b, band) in COVER_BANDS.iter().enumerate() {
        let layer = read(dir.path(), &format!("fractional_cover_{}.tiff", band));
        assert_eq!(layer.get(0, 0).unwrap(), expected[b]);
        assert!(layer.get(0, 1).unwrap().is_nan());
        assert!(layer.get(0, 2).unwrap().is_nan());
    }
}

#[test]
fn water_change_binarises_and_differences() {
    let times = ["2019-03-01", "2019-09-01", "2020-03-01", "2020-09-01"];
    // One row per time step, one column per pixel
    let steps = [
        [0.0, 1.0, -1.0, 0.2],
        [0.0, 1.0, -1.0, 0.2],
        [1.0, 0.0, 0.2, 0.0],
        [0.0, f64::NAN, 0.2, 0.2],
    ];
    let water = water_cube(1, 4, &times, |t, _, c| steps[t][c]);
    let source = MemorySource::new().with_product("ls8_water_classification", water);

    let dir = tempfile::tempdir().unwrap();
    let report = run(
        &plan(ProductSpec::new(ProductKind::WaterChange), true, 1, 3),
        &source,
        dir.path(),
    );
    assert_eq!(report.written.len(), 2);

    let binary = read(dir.path(), "difference.tiff");
    let range = read(dir.path(), "difference_range.tiff");
    assert_eq!(binary.get(0, 0).unwrap(), 1.0);
    assert_eq!(binary.get(0, 1).unwrap(), -1.0);
    assert!(binary.get(0, 2).unwrap().is_nan());
    assert_eq!(binary.get(0, 3).unwrap(), 0.0);

    assert_relative_eq!(range.get(0, 0).unwrap(), 0.5, epsilon = 1e-6);
    assert_relative_eq!(range.get(0, 1).unwrap(), -1.0, epsilon = 1e-6);
    assert!(range.get(0, 2).unwrap().is_nan());
    assert_relative_eq!(range.get(0, 3).unwrap(), -0.1, epsilon = 1e-6);
}

#[test]
fn water_permanency_is_mean_occurrence() {
    let times = ["2019-01-01", "2019-04-01", "2019-07-01", "2019-10-01"];
    let steps = [
        [1.0, -1.0, f64::NAN],
        [0.0, f64::NAN, 1.0],
        [1.0, -5.0, 0.0],
        [1.0, -1.0, 0.5],
    ];
    let water = water_cube(1, 3, &times, |t, _, c| steps[t][c]);
    let source = MemorySource::new().with_product("ls8_water_classification", water);

    let dir = tempfile::tempdir().unwrap();
    let report = run(
        &plan(ProductSpec::new(ProductKind::WaterPermanency), false, 1, 1),
        &source,
        dir.path(),
    );
    assert_eq!(report.written.len(), 1);

    let occurrence = read(dir.path(), "water.tiff");
    assert_relative_eq!(occurrence.get(0, 0).unwrap(), 0.75, epsilon = 1e-6);
    assert!(occurrence.get(0, 1).unwrap().is_nan());
    assert_relative_eq!(occurrence.get(0, 2).unwrap(), 0.5, epsilon = 1e-6);
}

#[test]
fn empty_baseline_fails_before_compute() {
    let times = ["2020-05-01"];
    let cube = landsat_cube(1, 1, &[1000.0], &[3000.0], &[CLEAR], &times);
    let source = MemorySource::new().with_product("ls8_usgs_sr_scene", cube);
    let dir = tempfile::tempdir().unwrap();

    let err = run_task(
        &plan(ProductSpec::new(ProductKind::NdviAnomaly), true, 10, 10),
        &source,
        &GeoTiffWriter::new(dir.path()),
    )
    .unwrap_err();
    assert!(matches!(err, Error::EmptyResult(_)));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn water_quality_writes_three_layers() {
    let times = ["2019-02-01", "2019-03-01"];
    let cube = landsat_cube(2, 2, &[1000.0, 1200.0], &[500.0, 500.0], &[CLEAR, CLEAR], &times);
    let water = water_cube(2, 2, &times, |_, _, _| 128.0);
    let source = MemorySource::new()
        .with_product("ls8_usgs_sr_scene", cube)
        .with_product("ls8_water_classification", water);

    let dir = tempfile::tempdir().unwrap();
    let report = run(
        &plan(ProductSpec::new(ProductKind::WaterQuality), false, 1, 1),
        &source,
        dir.path(),
    );

    assert_eq!(report.written.len(), 3);
    let mean = read(dir.path(), "mean_tsm.tiff");
    let min = read(dir.path(), "min_tsm.tiff");
    let max = read(dir.path(), "max_tsm.tiff");
    let (lo, hi) = (min.get(0, 0).unwrap(), max.get(0, 0).unwrap());
    assert!(lo < hi);
    assert!(mean.get(0, 0).unwrap() > lo && mean.get(0, 0).unwrap() < hi);
}

#[test]
fn chunked_matches_single_chunk() {
    let times = ["2019-01-01", "2019-02-01", "2019-03-01", "2019-04-01"];
    let cube = landsat_cube(
        5,
        7,
        &[900.0, 1400.0, 1100.0, 1700.0],
        &[2600.0, 3100.0, 2900.0, 4100.0],
        &[CLEAR, CLOUD, CLEAR, CLEAR],
        &times,
    );
    let input = PeriodInput {
        label: "period".into(),
        platform: Platform::Landsat8,
        cube: Some(Arc::new(cube)),
        water: None,
    };

    for reducer in [ReducerKind::Median, ReducerKind::MaxIndex, ReducerKind::Geomedian] {
        let mut spec = ProductSpec::new(ProductKind::AggregateIndices);
        spec.reducer = reducer;
        let whole = ChunkedPipeline::new(100, 100).run(&spec, &input, None).unwrap();
        let tiled = ChunkedPipeline::new(2, 3).run(&spec, &input, None).unwrap();

        let (a, b) = (whole[0].value.bands().unwrap(), tiled[0].value.bands().unwrap());
        assert_eq!(a.shape(), (5, 7));
        for (x, y) in a.data().iter().zip(b.data().iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-9);
        }
    }
}
