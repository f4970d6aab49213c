use crate::export::{aoi_mask, stack_bands, write_csv};
use crate::grid::{ElevationGrid, GeoTransform};
use crate::types::*;
use gdal::raster::{Buffer, ResampleAlg};
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::{s, Array2, Array3};
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

/// Single-band elevation raster plus its spatial reference.
#[derive(Debug, Clone)]
pub struct ElevationRaster {
    pub grid: ElevationGrid,
    pub projection: String,
}

pub struct RasterIO;

impl RasterIO {
    /// Reads band 1; the band's no-data value becomes NaN.
    pub fn read_elevation(path: &Path) -> Result<ElevationRaster, ShadowError> {
        let dataset = Dataset::open(path)?;
        let transform = dataset.geo_transform()?;
        let projection = dataset.projection();

        let band = dataset.rasterband(1)?;
        let no_data_value = band.no_data_value();
        let (width, height) = band.size();

        let mut data = vec![0f32; width * height];
        band.read_into_slice(
            (0, 0),
            (width, height),
            (width, height),
            &mut data,
            Some(ResampleAlg::NearestNeighbour),
        )?;

        let array = Array2::from_shape_vec((height, width), data)
            .map_err(|e| ShadowError::Config(format!("Failed to create array: {}", e)))?;
        info!("Read {}x{} raster from {}", height, width, path.display());

        Ok(ElevationRaster {
            grid: ElevationGrid::new(
                array,
                GeoTransform::from_gdal(transform),
                no_data_value.map(|v| v as f32),
            ),
            projection,
        })
    }

    pub fn write_geotiff_with_descriptions(
        path: &Path,
        data: &Array3<f32>,
        transform: &GeoTransform,
        projection: &str,
        band_descriptions: &[String],
    ) -> Result<(), ShadowError> {
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (n_bands, height, width) = data.dim();

        let mut dataset = driver.create_with_band_type::<f32, _>(
            path,
            width as isize,
            height as isize,
            n_bands as isize,
        )?;

        dataset.set_geo_transform(&transform.to_gdal())?;
        if !projection.is_empty() {
            dataset.set_projection(projection)?;
        }

        for band_idx in 0..n_bands {
            let mut band = dataset.rasterband((band_idx + 1) as isize)?;
            if let Some(description) = band_descriptions.get(band_idx) {
                band.set_description(description)?;
            }

            let band_data: Vec<f32> = data.slice(s![band_idx, .., ..]).iter().copied().collect();
            let buffer = Buffer::new((width, height), band_data);
            band.write((0, 0), (width, height), &buffer)?;
        }

        Ok(())
    }

    /// Summary and per-timestamp bands as one multi-band GeoTIFF.
    pub fn write_result_geotiff(
        path: &Path,
        result: &ShadowResult,
        projection: &str,
    ) -> Result<(), ShadowError> {
        let (stack, descriptions) = stack_bands(result);
        Self::write_geotiff_with_descriptions(
            path,
            &stack,
            &result.metadata.geo_transform(),
            projection,
            &descriptions,
        )?;
        info!("Wrote {} bands to {}", descriptions.len(), path.display());
        Ok(())
    }

    /// Long-format CSV limited to cells inside the AOI.
    pub fn write_result_csv(path: &Path, result: &ShadowResult) -> Result<usize, ShadowError> {
        let mask = aoi_mask(result);
        let mut writer = BufWriter::new(std::fs::File::create(path)?);
        let lines = write_csv(&mut writer, result, Some(&mask))?;
        info!("Wrote {} CSV rows to {}", lines, path.display());
        Ok(lines)
    }
}
