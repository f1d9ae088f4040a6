//! Geography dataset
//!
//! The host samples round locations from a static collection of land
//! points. Two bundled formats are understood: a GeoJSON feature collection
//! of `Point` features, and a flat city list with string coordinates.

use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A location on the globe, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct Coordinate {
    /// Latitude in degrees, positive north
    #[garde(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    /// Longitude in degrees, positive east
    #[garde(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Source of random land locations
pub trait Geography {
    /// Samples up to `n` random coordinates
    fn sample_random_points(&self, n: usize) -> Vec<Coordinate>;
}

/// Errors that can occur while loading a dataset
#[derive(Error, Debug)]
pub enum Error {
    /// The dataset is not valid JSON in any understood format
    #[error("malformed dataset: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The dataset parsed but contained no usable point
    #[error("dataset contains no usable point")]
    Empty,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum GeoJson {
    FeatureCollection { features: Vec<Feature> },
}

#[derive(Deserialize)]
struct Feature {
    geometry: Option<Geometry>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Point { coordinates: Vec<f64> },
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize)]
struct City {
    lat: String,
    lng: String,
}

/// An in-memory set of land points
#[derive(Debug, Clone, Default)]
pub struct PointDataset {
    points: Vec<Coordinate>,
}

impl PointDataset {
    /// Creates a dataset from explicit points, dropping out-of-range ones
    pub fn new(points: Vec<Coordinate>) -> Self {
        Self {
            points: points
                .into_iter()
                .filter(|point| point.validate().is_ok())
                .collect_vec(),
        }
    }

    /// Parses a GeoJSON `FeatureCollection`, keeping its `Point` features
    ///
    /// GeoJSON positions are `[longitude, latitude, ...]`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Malformed` if the document cannot be parsed and
    /// `Error::Empty` if it holds no valid point.
    pub fn from_geojson(json: &str) -> Result<Self, Error> {
        let GeoJson::FeatureCollection { features } = serde_json::from_str(json)?;

        let points = features
            .into_iter()
            .filter_map(|feature| match feature.geometry? {
                Geometry::Point { coordinates } => match coordinates.as_slice() {
                    [longitude, latitude, ..] => Some(Coordinate::new(*latitude, *longitude)),
                    _ => None,
                },
                Geometry::Unsupported => None,
            })
            .collect_vec();

        Self::new(points).non_empty()
    }

    /// Parses a city list of `{ "name", "lat", "lng" }` objects
    ///
    /// Entries whose coordinates do not parse are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Malformed` if the document cannot be parsed and
    /// `Error::Empty` if it holds no valid point.
    pub fn from_city_list(json: &str) -> Result<Self, Error> {
        let cities: Vec<City> = serde_json::from_str(json)?;

        let points = cities
            .into_iter()
            .filter_map(|city| {
                Some(Coordinate::new(
                    city.lat.trim().parse().ok()?,
                    city.lng.trim().parse().ok()?,
                ))
            })
            .collect_vec();

        Self::new(points).non_empty()
    }

    fn non_empty(self) -> Result<Self, Error> {
        if self.points.is_empty() {
            Err(Error::Empty)
        } else {
            Ok(self)
        }
    }

    /// Number of points in the dataset
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Checks whether the dataset holds no point
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl Geography for PointDataset {
    /// Samples without replacement while the dataset is large enough
    fn sample_random_points(&self, n: usize) -> Vec<Coordinate> {
        if self.points.is_empty() {
            return Vec::new();
        }

        if n <= self.points.len() {
            let mut sample = fastrand::choose_multiple(self.points.iter().copied(), n);
            fastrand::shuffle(&mut sample);
            sample
        } else {
            (0..n)
                .map(|_| self.points[fastrand::usize(..self.points.len())])
                .collect_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            { "type": "Feature", "geometry": { "type": "Point", "coordinates": [13.4, 52.5] } },
            { "type": "Feature", "geometry": { "type": "Point", "coordinates": [-74.0, 40.7, 10.0] } },
            { "type": "Feature", "geometry": { "type": "LineString", "coordinates": [[0, 0], [1, 1]] } },
            { "type": "Feature", "geometry": { "type": "Point", "coordinates": [500.0, 10.0] } },
            { "type": "Feature", "geometry": null }
        ]
    }"#;

    #[test]
    fn test_from_geojson_keeps_valid_points() {
        let dataset = PointDataset::from_geojson(GEOJSON).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.points[0], Coordinate::new(52.5, 13.4));
        assert_eq!(dataset.points[1], Coordinate::new(40.7, -74.0));
    }

    #[test]
    fn test_from_geojson_without_points() {
        let result = PointDataset::from_geojson(r#"{"type": "FeatureCollection", "features": []}"#);
        assert!(matches!(result, Err(Error::Empty)));
    }

    #[test]
    fn test_from_geojson_malformed() {
        assert!(matches!(
            PointDataset::from_geojson("[1, 2"),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn test_from_city_list() {
        let dataset = PointDataset::from_city_list(
            r#"[
                { "name": "Tallinn", "lat": "59.437", "lng": "24.7536" },
                { "name": "Nowhere", "lat": "north", "lng": "1" },
                { "name": "Lima", "lat": " -12.0464 ", "lng": "-77.0428" }
            ]"#,
        )
        .unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.points[1], Coordinate::new(-12.0464, -77.0428));
    }

    #[test]
    fn test_sample_without_replacement() {
        let points = (0..20)
            .map(|i| Coordinate::new(f64::from(i), f64::from(i)))
            .collect_vec();
        let dataset = PointDataset::new(points);

        let sample = dataset.sample_random_points(10);

        assert_eq!(sample.len(), 10);
        let distinct = sample
            .iter()
            .map(|point| point.latitude.to_bits())
            .unique()
            .count();
        assert_eq!(distinct, 10);
    }

    #[test]
    fn test_sample_more_than_available() {
        let dataset = PointDataset::new(vec![Coordinate::new(1.0, 2.0)]);
        let sample = dataset.sample_random_points(3);
        assert_eq!(sample, vec![Coordinate::new(1.0, 2.0); 3]);
    }

    #[test]
    fn test_sample_from_empty_dataset() {
        assert!(PointDataset::default().sample_random_points(5).is_empty());
    }
}
