//! Native GeoTIFF codec on top of the `tiff` crate
//!
//! Only the tags chronocube needs are handled: pixel scale, tiepoint,
//! a minimal GeoKey directory and GDAL's nodata tag.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

/// GeoKey ids carrying the EPSG code of the model
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

/// Read the first image of a GeoTIFF into a raster
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(BufReader::new(file))
}

fn decode_geotiff<T, R>(reader: R) -> Result<Raster<T>>
where
    T: RasterElement,
    R: Read + Seek,
{
    let mut decoder =
        Decoder::new(reader).map_err(|e| Error::Other(format!("TIFF decode error: {}", e)))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Other(format!("Cannot read dimensions: {}", e)))?;
    let (rows, cols) = (height as usize, width as usize);

    let image = decoder
        .read_image()
        .map_err(|e| Error::Other(format!("Cannot read image data: {}", e)))?;

    fn cast_all<S: Copy + num_traits::NumCast, T: RasterElement>(buf: Vec<S>) -> Vec<T> {
        buf.into_iter()
            .map(|v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
            .collect()
    }

    let data: Vec<T> = match image {
        DecodingResult::F32(buf) => cast_all(buf),
        DecodingResult::F64(buf) => cast_all(buf),
        DecodingResult::U8(buf) => cast_all(buf),
        DecodingResult::U16(buf) => cast_all(buf),
        DecodingResult::U32(buf) => cast_all(buf),
        DecodingResult::I16(buf) => cast_all(buf),
        DecodingResult::I32(buf) => cast_all(buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "unsupported TIFF sample format".to_string(),
            ))
        }
    };

    let mut raster = Raster::from_vec(data, rows, cols)?;
    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    if let Some(code) = read_epsg(&mut decoder) {
        raster.set_crs(Some(CRS::from_epsg(code)));
    }
    if let Ok(text) = decoder.get_tag_ascii_string(Tag::GdalNodata) {
        let nodata = text
            .trim_matches(char::from(0))
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(num_traits::cast);
        raster.set_nodata(nodata);
    }
    Ok(raster)
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    // tiepoint: [I, J, K, X, Y, Z]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

fn read_epsg<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let keys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).ok()?;
    epsg_from_geokeys(&keys)
}

/// EPSG code stored inline in a GeoKey directory, projected before geographic
fn epsg_from_geokeys(keys: &[u16]) -> Option<u32> {
    let n = usize::from(*keys.get(3)?);
    let entries: Vec<&[u16]> = keys.get(4..)?.chunks_exact(4).take(n).collect();
    [PROJECTED_CS_TYPE_KEY, GEOGRAPHIC_TYPE_KEY].iter().find_map(|&id| {
        entries
            .iter()
            .find(|e| e[0] == id && e[1] == 0)
            .map(|e| u32::from(e[3]))
    })
}

/// Write a raster as a single-band Float32 GeoTIFF
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    encode_geotiff(raster, &mut writer)?;
    writer.flush()?;
    Ok(())
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder =
        TiffEncoder::new(writer).map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;

    let (rows, cols) = raster.shape();
    let nodata = raster.nodata();
    let data: Vec<f32> = raster
        .data()
        .iter()
        .map(|&v| num_traits::cast(v).unwrap_or(f32::NAN))
        .collect();

    let mut image = encoder
        .new_image::<Gray32Float>(cols as u32, rows as u32)
        .map_err(|e| Error::Other(format!("Cannot create TIFF image: {}", e)))?;

    let gt = raster.transform();
    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    let geokeys = geokey_directory(raster.crs());

    let tag_err = |e: tiff::TiffError| Error::Other(format!("Cannot write GeoTIFF tag: {}", e));
    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, &scale[..])
        .map_err(tag_err)?;
    image
        .encoder()
        .write_tag(Tag::ModelTiepointTag, &tiepoint[..])
        .map_err(tag_err)?;
    image
        .encoder()
        .write_tag(Tag::GeoKeyDirectoryTag, geokeys.as_slice())
        .map_err(tag_err)?;
    if let Some(nd) = nodata.and_then(|v| v.to_f64()).filter(|v| !v.is_nan()) {
        image
            .encoder()
            .write_tag(Tag::GdalNodata, format!("{}", nd).as_str())
            .map_err(tag_err)?;
    }

    image
        .write_data(&data)
        .map_err(|e| Error::Other(format!("Cannot write image data: {}", e)))?;
    Ok(())
}

/// GeoKey directory: model type, raster-is-area, and the EPSG code when it fits a SHORT
fn geokey_directory(crs: Option<&CRS>) -> Vec<u16> {
    let epsg = crs.and_then(|c| c.epsg()).and_then(|c| u16::try_from(c).ok());
    match epsg {
        Some(4326) => vec![1, 1, 0, 3, 1024, 0, 1, 2, 1025, 0, 1, 1, 2048, 0, 1, 4326],
        Some(code) => vec![1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, code],
        None => vec![1, 1, 0, 2, 1024, 0, 1, 1, 1025, 0, 1, 1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_keeps_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ndvi.tif");

        let mut raster = Raster::from_vec(vec![0.1, f64::NAN, 0.5, -0.25], 2, 2).unwrap();
        raster.set_transform(GeoTransform::new(500_000.0, 8_000_000.0, 30.0, -30.0));
        raster.set_crs(Some(CRS::from_epsg(3460)));
        raster.set_nodata(Some(f64::NAN));
        write_geotiff(&raster, &path).unwrap();

        let back: Raster<f64> = read_geotiff(&path).unwrap();
        assert_eq!(back.shape(), (2, 2));
        assert!((back.get(1, 0).unwrap() - 0.5).abs() < 1e-6);
        assert!(back.get(0, 1).unwrap().is_nan());
        assert_eq!(back.transform().origin_x, 500_000.0);
        assert_eq!(back.transform().origin_y, 8_000_000.0);
        assert_eq!(back.transform().pixel_width, 30.0);
        assert_eq!(back.transform().pixel_height, -30.0);
        assert_eq!(back.crs().and_then(|c| c.epsg()), Some(3460));
    }

    #[test]
    fn test_nodata_sentinel_survives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qa.tif");

        let mut raster = Raster::filled(2, 3, 322.0);
        raster.set_transform(GeoTransform::new(-70.5, -33.0, 0.25, -0.25));
        raster.set_crs(Some(CRS::from_epsg(4326)));
        raster.set_nodata(Some(-9999.0));
        write_geotiff(&raster, &path).unwrap();

        let back: Raster<f64> = read_geotiff(&path).unwrap();
        assert_eq!(back.nodata(), Some(-9999.0));
        assert_eq!(back.transform().origin_x, -70.5);
        assert_eq!(back.transform().pixel_height, -0.25);
        assert_eq!(back.crs().and_then(|c| c.epsg()), Some(4326));
    }

    #[test]
    fn test_geokeys_carry_epsg() {
        let keys = geokey_directory(Some(&CRS::from_epsg(3460)));
        assert_eq!(&keys[keys.len() - 4..], &[3072, 0, 1, 3460]);
        assert_eq!(geokey_directory(None)[3], 2);
        assert_eq!(epsg_from_geokeys(&keys), Some(3460));
        assert_eq!(epsg_from_geokeys(&geokey_directory(Some(&CRS::from_epsg(4326)))), Some(4326));
        assert_eq!(epsg_from_geokeys(&geokey_directory(None)), None);
    }
}
