//! GeoTIFF read/write over the `tiff` codec.
//!
//! Georeferencing is carried in the standard GeoTIFF tags (pixel scale, one
//! tie point, GeoKey directory). Band descriptions, free-form metadata and the
//! nodata value use the GDAL private tags so GDAL-based tools pick them up.
//!
//! Output is always uncompressed `f32`, one strip per band. Multi-band files
//! are band-sequential (`PlanarConfiguration = 2`), which the decoder cannot
//! expand itself, so those strips are read back directly.

use super::{BandRaster, Crs};
use crate::error::RasterError;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_METADATA: u16 = 42112;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const SAMPLE_FORMAT_FLOAT: u16 = 3;

fn geo_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Read a single-band GeoTIFF as `name`
///
/// For multi-band files the first band is returned.
pub fn read_band(path: &Path, name: &str) -> Result<BandRaster, RasterError> {
    let mut band = read_bands(path)?
        .into_iter()
        .next()
        .ok_or_else(|| RasterError::Unsupported {
            path: path.to_path_buf(),
            reason: "file has no bands".to_string(),
        })?;
    band.name = name.to_string();
    Ok(band)
}

/// Read every band of a GeoTIFF
///
/// Band names come from the GDAL band descriptions when present, otherwise
/// `band_1`, `band_2`, ...
pub fn read_bands(path: &Path) -> Result<Vec<BandRaster>, RasterError> {
    let file = File::open(path).map_err(|source| RasterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let tiff_err = |source| RasterError::Tiff {
        path: path.to_path_buf(),
        source,
    };

    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(tiff_err)?
        .with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions().map_err(tiff_err)?;
    let geo = read_georeference(&mut decoder, path)?;

    let samples = decoder
        .find_tag(Tag::SamplesPerPixel)
        .map_err(tiff_err)?
        .map(|v| v.into_u16())
        .transpose()
        .map_err(tiff_err)?
        .unwrap_or(1) as usize;

    let nodata = decoder
        .find_tag(geo_tag(GDAL_NODATA))
        .map_err(tiff_err)?
        .map(|v| v.into_string())
        .transpose()
        .map_err(tiff_err)?
        .and_then(|s| s.trim().trim_end_matches('\0').parse::<f64>().ok());

    let descriptions = decoder
        .find_tag(geo_tag(GDAL_METADATA))
        .map_err(tiff_err)?
        .map(|v| v.into_string())
        .transpose()
        .map_err(tiff_err)?
        .map(|xml| parse_descriptions(&xml, samples))
        .unwrap_or_else(|| vec![None; samples]);

    let planes = if samples == 1 {
        let image = decoder.read_image().map_err(tiff_err)?;
        vec![to_f32(image, path)?]
    } else {
        read_planar(&mut decoder, path, samples, width as usize * height as usize)?
    };

    Ok(planes
        .into_iter()
        .zip(descriptions)
        .enumerate()
        .map(|(i, (pixels, description))| BandRaster {
            name: description.unwrap_or_else(|| format!("band_{}", i + 1)),
            pixel_size: geo.pixel_size,
            crs: geo.crs,
            origin: geo.origin,
            width,
            height,
            pixels,
            nodata,
        })
        .collect())
}

/// Free-form dataset metadata (GDAL items without a band index)
pub fn read_metadata(path: &Path) -> Result<BTreeMap<String, String>, RasterError> {
    let file = File::open(path).map_err(|source| RasterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let tiff_err = |source| RasterError::Tiff {
        path: path.to_path_buf(),
        source,
    };
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(tiff_err)?;
    let xml = decoder
        .find_tag(geo_tag(GDAL_METADATA))
        .map_err(tiff_err)?
        .map(|v| v.into_string())
        .transpose()
        .map_err(tiff_err)?;
    Ok(xml.map(|x| parse_dataset_items(&x)).unwrap_or_default())
}

/// Write bands as one GeoTIFF, band `i` described as `descriptions[i]`
///
/// All bands must share dimensions; georeferencing and nodata are taken from
/// the first band. `metadata` is stored as dataset-level GDAL items.
pub fn write_bands(
    path: &Path,
    bands: &[BandRaster],
    descriptions: &[String],
    metadata: &BTreeMap<String, String>,
) -> Result<(), RasterError> {
    let unsupported = |reason: String| RasterError::Unsupported {
        path: path.to_path_buf(),
        reason,
    };
    let first = bands
        .first()
        .ok_or_else(|| unsupported("no bands to write".to_string()))?;
    if descriptions.len() != bands.len() {
        return Err(unsupported(format!(
            "{} descriptions for {} bands",
            descriptions.len(),
            bands.len()
        )));
    }
    for band in bands {
        if band.width != first.width
            || band.height != first.height
            || band.pixels.len() != first.expected_len()
        {
            return Err(unsupported(format!(
                "band '{}' does not match the {}x{} grid",
                band.name, first.width, first.height
            )));
        }
    }
    let samples = u16::try_from(bands.len())
        .map_err(|_| unsupported(format!("too many bands ({})", bands.len())))?;
    let strip_bytes = u32::try_from(first.expected_len() * 4)
        .map_err(|_| unsupported("band exceeds 4 GiB".to_string()))?;

    let io_err = |source| RasterError::Io {
        path: path.to_path_buf(),
        source,
    };
    let tiff_err = |source| RasterError::Tiff {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    {
        let mut encoder = TiffEncoder::new(&mut writer).map_err(tiff_err)?;
        let mut dir = encoder.new_directory().map_err(tiff_err)?;

        let mut offsets = Vec::with_capacity(bands.len());
        for band in bands {
            let offset = dir.write_data(band.pixels.as_slice()).map_err(tiff_err)?;
            offsets.push(
                u32::try_from(offset).map_err(|_| unsupported("file exceeds 4 GiB".to_string()))?,
            );
        }
        let counts = vec![strip_bytes; bands.len()];
        let bits = vec![32u16; bands.len()];
        let formats = vec![SAMPLE_FORMAT_FLOAT; bands.len()];
        let planar: u16 = if samples > 1 { 2 } else { 1 };

        dir.write_tag(Tag::ImageWidth, first.width).map_err(tiff_err)?;
        dir.write_tag(Tag::ImageLength, first.height).map_err(tiff_err)?;
        dir.write_tag(Tag::BitsPerSample, bits.as_slice()).map_err(tiff_err)?;
        dir.write_tag(Tag::Compression, 1u16).map_err(tiff_err)?;
        dir.write_tag(Tag::PhotometricInterpretation, 1u16).map_err(tiff_err)?;
        dir.write_tag(Tag::StripOffsets, offsets.as_slice()).map_err(tiff_err)?;
        dir.write_tag(Tag::SamplesPerPixel, samples).map_err(tiff_err)?;
        dir.write_tag(Tag::RowsPerStrip, first.height).map_err(tiff_err)?;
        dir.write_tag(Tag::StripByteCounts, counts.as_slice()).map_err(tiff_err)?;
        dir.write_tag(Tag::PlanarConfiguration, planar).map_err(tiff_err)?;
        dir.write_tag(Tag::SampleFormat, formats.as_slice()).map_err(tiff_err)?;
        if samples > 1 {
            // Unspecified extra samples beyond the first gray channel
            let extra = vec![0u16; bands.len() - 1];
            dir.write_tag(Tag::ExtraSamples, extra.as_slice()).map_err(tiff_err)?;
        }

        let scale = [first.pixel_size, first.pixel_size, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, first.origin.0, first.origin.1, 0.0];
        let keys = geo_keys(first.crs);
        dir.write_tag(geo_tag(MODEL_PIXEL_SCALE), &scale[..]).map_err(tiff_err)?;
        dir.write_tag(geo_tag(MODEL_TIEPOINT), &tiepoint[..]).map_err(tiff_err)?;
        dir.write_tag(geo_tag(GEO_KEY_DIRECTORY), keys.as_slice()).map_err(tiff_err)?;

        let xml = gdal_metadata_xml(descriptions, metadata);
        dir.write_tag(geo_tag(GDAL_METADATA), xml.as_str()).map_err(tiff_err)?;
        if let Some(nd) = first.nodata {
            let text = nd.to_string();
            dir.write_tag(geo_tag(GDAL_NODATA), text.as_str()).map_err(tiff_err)?;
        }

        dir.finish().map_err(tiff_err)?;
    }

    writer.flush().map_err(io_err)?;
    let file = writer.into_inner().map_err(|e| io_err(e.into_error()))?;
    file.sync_all().map_err(io_err)?;
    Ok(())
}

struct GeoReference {
    pixel_size: f64,
    origin: (f64, f64),
    crs: Crs,
}

fn read_georeference<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<GeoReference, RasterError> {
    let tiff_err = |source| RasterError::Tiff {
        path: path.to_path_buf(),
        source,
    };
    let missing = |tag| RasterError::MissingGeoTag {
        path: path.to_path_buf(),
        tag,
    };

    let scale = decoder
        .find_tag(geo_tag(MODEL_PIXEL_SCALE))
        .map_err(tiff_err)?
        .ok_or_else(|| missing("ModelPixelScale"))?
        .into_f64_vec()
        .map_err(tiff_err)?;
    let tiepoint = decoder
        .find_tag(geo_tag(MODEL_TIEPOINT))
        .map_err(tiff_err)?
        .ok_or_else(|| missing("ModelTiepoint"))?
        .into_f64_vec()
        .map_err(tiff_err)?;
    let keys = decoder
        .find_tag(geo_tag(GEO_KEY_DIRECTORY))
        .map_err(tiff_err)?
        .ok_or_else(|| missing("GeoKeyDirectory"))?
        .into_u16_vec()
        .map_err(tiff_err)?;

    let (&sx, &sy) = match scale.as_slice() {
        [sx, sy, ..] => (sx, sy),
        _ => return Err(missing("ModelPixelScale")),
    };
    if (sx - sy).abs() > sx.abs() * 1e-6 {
        return Err(RasterError::Unsupported {
            path: path.to_path_buf(),
            reason: format!("non-square pixels ({sx} x {sy})"),
        });
    }
    let origin = match tiepoint.as_slice() {
        [i, j, _, x, y, ..] => (x - i * sx, y + j * sy),
        _ => return Err(missing("ModelTiepoint")),
    };
    let epsg = geo_key(&keys, PROJECTED_CS_TYPE)
        .or_else(|| geo_key(&keys, GEOGRAPHIC_TYPE))
        .ok_or_else(|| missing("ProjectedCSTypeGeoKey"))?;

    Ok(GeoReference {
        pixel_size: sx,
        origin,
        crs: Crs(epsg),
    })
}

/// Inline value of `key` in a GeoKey directory
fn geo_key(directory: &[u16], key: u16) -> Option<u16> {
    let count = *directory.get(3)? as usize;
    directory
        .get(4..)?
        .chunks_exact(4)
        .take(count)
        .find(|entry| entry[0] == key && entry[1] == 0)
        .map(|entry| entry[3])
}

fn geo_keys(crs: Crs) -> Vec<u16> {
    let (model, cs_key) = if crs.is_geographic() {
        (2, GEOGRAPHIC_TYPE)
    } else {
        (1, PROJECTED_CS_TYPE)
    };
    vec![
        1, 1, 0, 3, //
        GT_MODEL_TYPE, 0, 1, model, //
        GT_RASTER_TYPE, 0, 1, 1, // pixel is area
        cs_key, 0, 1, crs.epsg(),
    ]
}

fn to_f32(image: DecodingResult, path: &Path) -> Result<Vec<f32>, RasterError> {
    Ok(match image {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(RasterError::Unsupported {
                path: path.to_path_buf(),
                reason: "sample type".to_string(),
            });
        }
    })
}

/// Read band-sequential uncompressed f32 strips
fn read_planar<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
    samples: usize,
    pixels_per_band: usize,
) -> Result<Vec<Vec<f32>>, RasterError> {
    let tiff_err = |source| RasterError::Tiff {
        path: path.to_path_buf(),
        source,
    };
    let unsupported = |reason: &str| RasterError::Unsupported {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let mut tag_u16s = |tag: Tag| -> Result<Vec<u16>, RasterError> {
        decoder
            .find_tag(tag)
            .map_err(tiff_err)?
            .map(|v| v.into_u16_vec())
            .transpose()
            .map_err(tiff_err)
            .map(Option::unwrap_or_default)
    };

    if tag_u16s(Tag::PlanarConfiguration)?.first().copied() != Some(2) {
        return Err(unsupported("interleaved multi-band layout"));
    }
    if tag_u16s(Tag::Compression)?.first().copied().unwrap_or(1) != 1 {
        return Err(unsupported("compressed multi-band layout"));
    }
    if tag_u16s(Tag::SampleFormat)?.iter().any(|&f| f != SAMPLE_FORMAT_FLOAT)
        || tag_u16s(Tag::BitsPerSample)?.iter().any(|&b| b != 32)
    {
        return Err(unsupported("multi-band samples other than f32"));
    }

    let mut tag_u64s = |tag: Tag| -> Result<Vec<u64>, RasterError> {
        decoder
            .find_tag(tag)
            .map_err(tiff_err)?
            .ok_or_else(|| unsupported("missing strip tags"))?
            .into_u64_vec()
            .map_err(tiff_err)
    };
    let offsets = tag_u64s(Tag::StripOffsets)?;
    let counts = tag_u64s(Tag::StripByteCounts)?;
    if offsets.len() != counts.len() || offsets.is_empty() || offsets.len() % samples != 0 {
        return Err(unsupported("strip table does not cover every band"));
    }
    let strips_per_band = offsets.len() / samples;

    let io_err = |source| RasterError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut order = [0u8; 2];
    file.read_exact(&mut order).map_err(io_err)?;
    let little_endian = match &order {
        b"II" => true,
        b"MM" => false,
        _ => return Err(unsupported("unknown byte order")),
    };

    let mut planes = Vec::with_capacity(samples);
    for band in 0..samples {
        let mut bytes = Vec::with_capacity(pixels_per_band * 4);
        let strips = band * strips_per_band..(band + 1) * strips_per_band;
        for (&offset, &count) in offsets[strips.clone()].iter().zip(&counts[strips]) {
            let start = bytes.len();
            bytes.resize(start + count as usize, 0);
            file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
            file.read_exact(&mut bytes[start..]).map_err(io_err)?;
        }
        if bytes.len() != pixels_per_band * 4 {
            return Err(unsupported("strip sizes do not match the image size"));
        }
        planes.push(
            bytes
                .chunks_exact(4)
                .map(|b| {
                    let raw = [b[0], b[1], b[2], b[3]];
                    if little_endian {
                        f32::from_le_bytes(raw)
                    } else {
                        f32::from_be_bytes(raw)
                    }
                })
                .collect(),
        );
    }
    Ok(planes)
}

fn gdal_metadata_xml(descriptions: &[String], metadata: &BTreeMap<String, String>) -> String {
    let mut xml = String::from("<GDALMetadata>");
    for (name, value) in metadata {
        xml.push_str(&format!(
            "<Item name=\"{}\">{}</Item>",
            escape(name),
            escape(value)
        ));
    }
    for (i, description) in descriptions.iter().enumerate() {
        xml.push_str(&format!(
            "<Item name=\"DESCRIPTION\" sample=\"{i}\" role=\"description\">{}</Item>",
            escape(description)
        ));
    }
    xml.push_str("</GDALMetadata>");
    xml
}

struct MetadataItem<'a> {
    name: &'a str,
    sample: Option<usize>,
    role: Option<&'a str>,
    text: String,
}

fn metadata_items(xml: &str) -> impl Iterator<Item = MetadataItem<'_>> {
    xml.split("<Item ").skip(1).filter_map(|chunk| {
        let (attrs, rest) = chunk.split_once('>')?;
        let (text, _) = rest.split_once("</Item>")?;
        Some(MetadataItem {
            name: attribute(attrs, "name")?,
            sample: attribute(attrs, "sample").and_then(|s| s.parse().ok()),
            role: attribute(attrs, "role"),
            text: unescape(text),
        })
    })
}

fn parse_descriptions(xml: &str, samples: usize) -> Vec<Option<String>> {
    let mut out = vec![None; samples];
    for item in metadata_items(xml) {
        if item.role != Some("description") {
            continue;
        }
        if let Some(slot) = item.sample.and_then(|i| out.get_mut(i)) {
            *slot = Some(item.text);
        }
    }
    out
}

fn parse_dataset_items(xml: &str) -> BTreeMap<String, String> {
    metadata_items(xml)
        .filter(|item| item.sample.is_none())
        .map(|item| (item.name.to_string(), item.text))
        .collect()
}

fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let key = format!("{name}=\"");
    let start = attrs.find(&key)? + key.len();
    let len = attrs[start..].find('"')?;
    Some(&attrs[start..start + len])
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
