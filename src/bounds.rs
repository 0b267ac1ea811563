//! Rectangular regions of interest and their aggregation.

use serde::{Deserialize, Serialize};

/// Bounding box for geographic queries.
///
/// Assumes `south <= north` and `west <= east`; regions crossing the
/// antimeridian are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeographicBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeographicBounds {
    /// Global bounding box covering the entire world.
    pub const GLOBAL: Self = Self {
        south: -90.0,
        west: -180.0,
        north: 90.0,
        east: 180.0,
    };

    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    /// Whether a point lies inside the box (edges inclusive).
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.south
            && latitude <= self.north
            && longitude >= self.west
            && longitude <= self.east
    }

    /// Whether `other` lies entirely inside this box.
    pub fn contains_bounds(&self, other: &GeographicBounds) -> bool {
        other.south >= self.south
            && other.north <= self.north
            && other.west >= self.west
            && other.east <= self.east
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &GeographicBounds) -> Self {
        Self {
            south: self.south.min(other.south),
            west: self.west.min(other.west),
            north: self.north.max(other.north),
            east: self.east.max(other.east),
        }
    }

    /// Upstream query parameters (`lamin`, `lomin`, `lamax`, `lomax`).
    pub fn query_params(&self) -> [(&'static str, String); 4] {
        [
            ("lamin", self.south.to_string()),
            ("lomin", self.west.to_string()),
            ("lamax", self.north.to_string()),
            ("lomax", self.east.to_string()),
        ]
    }
}

/// Combine per-subscriber regions into the single region to fetch.
///
/// Returns `None` when nobody declared a region, meaning the fetch should be
/// unfiltered.
pub fn aggregate(bounds: &[GeographicBounds]) -> Option<GeographicBounds> {
    let (first, rest) = bounds.split_first()?;
    Some(rest.iter().fold(*first, |acc, b| acc.union(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(aggregate(&[]), None);
    }

    #[test]
    fn test_aggregate_single_unchanged() {
        let b = GeographicBounds::new(45.0, 5.0, 47.0, 10.0);
        assert_eq!(aggregate(&[b]), Some(b));
    }

    #[test]
    fn test_aggregate_envelope() {
        let a = GeographicBounds::new(45.0, 5.0, 47.0, 10.0);
        let b = GeographicBounds::new(40.0, 0.0, 50.0, 15.0);
        assert_eq!(
            aggregate(&[a, b]),
            Some(GeographicBounds::new(40.0, 0.0, 50.0, 15.0))
        );
    }

    #[test]
    fn test_aggregate_contains_every_input() {
        let inputs = [
            GeographicBounds::new(10.0, -20.0, 12.0, -18.0),
            GeographicBounds::new(-5.0, 30.0, 0.0, 31.5),
            GeographicBounds::new(60.0, 1.0, 61.0, 2.0),
            GeographicBounds::new(11.0, -19.0, 11.5, -18.5),
        ];

        let envelope = aggregate(&inputs).unwrap();
        assert_eq!(envelope, GeographicBounds::new(-5.0, -20.0, 61.0, 31.5));
        for b in &inputs {
            assert!(envelope.contains_bounds(b), "{:?} not covered", b);
        }
    }

    #[test]
    fn test_contains_edges_inclusive() {
        let b = GeographicBounds::new(40.0, 0.0, 50.0, 15.0);
        assert!(b.contains(40.0, 0.0));
        assert!(b.contains(50.0, 15.0));
        assert!(!b.contains(50.1, 10.0));
        assert!(!b.contains(45.0, -0.1));
    }

    #[test]
    fn test_query_params() {
        let b = GeographicBounds::new(45.5, 5.0, 47.0, 10.25);
        let params = b.query_params();
        assert_eq!(params[0], ("lamin", "45.5".to_string()));
        assert_eq!(params[1], ("lomin", "5".to_string()));
        assert_eq!(params[2], ("lamax", "47".to_string()));
        assert_eq!(params[3], ("lomax", "10.25".to_string()));
    }
}
