//! Geospatial types for alert geometry.
//!
//! Alert geometry is a list of closed rings of `[latitude, longitude]` pairs,
//! the orientation used by the map layer downstream. GeoJSON input is
//! `[longitude, latitude]` and is swapped on the way in.

use serde::{Deserialize, Serialize};

/// A geographic point as a `[latitude, longitude]` pair.
///
/// Serializes as a two-element array, matching the wire form of the polygon
/// payload.
///
/// # Example
///
/// ```
/// use nwswire::geo::Point;
///
/// let point = Point::new(41.05, -81.45).unwrap();
/// assert_eq!(point.latitude(), 41.05);
/// assert_eq!(serde_json::to_string(&point).unwrap(), "[41.05,-81.45]");
///
/// assert!(Point::new(95.0, 0.0).is_err());
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point(f64, f64);

impl Point {
    /// Instantiate a point, validating WGS 84 bounds.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidGeometryError> {
        if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) {
            Ok(Self(latitude, longitude))
        } else {
            Err(InvalidGeometryError::CoordinatesOutOfRange {
                latitude,
                longitude,
            })
        }
    }

    /// The latitude of the point.
    pub fn latitude(&self) -> f64 {
        self.0
    }

    /// The longitude of the point.
    pub fn longitude(&self) -> f64 {
        self.1
    }

    /// Whether the point falls in continental / near-US bounds.
    ///
    /// Text-product coordinates are unsigned hundredths of a degree; a decode
    /// mistake produces values far outside this window, so it doubles as a
    /// sanity check.
    pub fn in_us_bounds(&self) -> bool {
        (20.0..=60.0).contains(&self.0) && (-130.0..=-60.0).contains(&self.1)
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{},{}", self.0, self.1)
    }
}

/// A closed polyline: the first point equals the last point.
///
/// NWS text products routinely omit the closing vertex of a `LAT...LON`
/// block, so construction closes the ring instead of rejecting it. A ring
/// needs at least three distinct vertices.
///
/// # Example
///
/// ```
/// use nwswire::geo::{Point, Ring};
///
/// let ring = Ring::closing(vec![
///     Point::new(41.05, -83.10).unwrap(),
///     Point::new(41.15, -82.95).unwrap(),
///     Point::new(41.10, -82.80).unwrap(),
/// ])
/// .unwrap();
///
/// assert_eq!(ring.points().len(), 4);
/// assert_eq!(ring.points().first(), ring.points().last());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ring(Vec<Point>);

impl Ring {
    /// Build a ring from a list of vertices, appending the closing vertex if
    /// the input is not already closed.
    pub fn closing(mut points: Vec<Point>) -> Result<Self, InvalidGeometryError> {
        if points.len() >= 2 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 {
            return Err(InvalidGeometryError::TooFewPoints(points.len()));
        }
        let first = points[0];
        points.push(first);
        Ok(Self(points))
    }

    /// The vertices of the ring, closed.
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Whether the ring is closed. Always true for rings built through
    /// [`Ring::closing`]; checked on deserialized input.
    pub fn is_closed(&self) -> bool {
        self.0.len() >= 4 && self.0.first() == self.0.last()
    }
}

/// Alert geometry: zero or more rings.
///
/// Warnings carry a single storm-based ring from the product text; zone-based
/// alerts accumulate one or more rings from the geometry resolver.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon(Vec<Ring>);

impl Polygon {
    /// An empty polygon.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a polygon from rings.
    pub fn from_rings(rings: Vec<Ring>) -> Self {
        Self(rings)
    }

    /// Whether the polygon has no rings.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The rings of the polygon.
    pub fn rings(&self) -> &[Ring] {
        &self.0
    }

    /// Append rings from another polygon.
    pub fn extend(&mut self, other: Polygon) {
        self.0.extend(other.0);
    }

    /// Arithmetic-mean centroid over all vertices, or `None` when empty.
    pub fn centroid(&self) -> Option<Point> {
        let mut lat = 0.0;
        let mut lon = 0.0;
        let mut n = 0usize;
        for ring in &self.0 {
            for point in ring.points() {
                lat += point.latitude();
                lon += point.longitude();
                n += 1;
            }
        }
        if n == 0 {
            return None;
        }
        Point::new(lat / n as f64, lon / n as f64).ok()
    }
}

impl From<Ring> for Polygon {
    fn from(ring: Ring) -> Self {
        Self(vec![ring])
    }
}

/// The error returned when geometry would be invalid.
#[derive(thiserror::Error, Debug)]
pub enum InvalidGeometryError {
    /// The coordinates are outside WGS 84 bounds
    #[error("coordinates out of range: {latitude} latitude, {longitude} longitude")]
    CoordinatesOutOfRange {
        /// The specified latitude
        latitude: f64,
        /// The specified longitude
        longitude: f64,
    },

    /// The ring has too few distinct vertices
    #[error("ring contains too few points: got {0} vs 3 minimum")]
    TooFewPoints(usize),
}

/// Decode the integer pairs of a `LAT...LON` block into a ring.
///
/// Each integer is hundredths of a degree; longitudes are western and
/// negated. `4105 8145` decodes to `[41.05, -81.45]`. Pairs outside
/// continental / near-US bounds are discarded with a warning; a block that
/// yields fewer than three usable vertices produces no ring.
pub fn ring_from_text_pairs(values: &[u32]) -> Option<Ring> {
    let mut points = Vec::with_capacity(values.len() / 2);
    for pair in values.chunks_exact(2) {
        let lat = pair[0] as f64 / 100.0;
        let lon = -(pair[1] as f64 / 100.0);
        match Point::new(lat, lon) {
            Ok(point) if point.in_us_bounds() => points.push(point),
            _ => {
                tracing::warn!(lat, lon, "discarding coordinate outside US bounds");
            }
        }
    }
    Ring::closing(points).ok()
}

/// Extract the outer ring(s) of a GeoJSON geometry as `[lat, lon]` rings.
///
/// `Polygon` yields its outer ring; `MultiPolygon` yields each member's outer
/// ring. Other geometry types yield an empty polygon.
pub fn polygon_from_geojson(geometry: &serde_json::Value) -> Polygon {
    let kind = geometry.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let coordinates = match geometry.get("coordinates") {
        Some(c) => c,
        None => return Polygon::empty(),
    };

    let rings = match kind {
        "Polygon" => outer_ring(coordinates).into_iter().collect(),
        "MultiPolygon" => coordinates
            .as_array()
            .map(|polygons| polygons.iter().filter_map(outer_ring).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    Polygon::from_rings(rings)
}

/// The first (outer) ring of one GeoJSON polygon coordinate array, swapped to
/// `[lat, lon]`.
fn outer_ring(polygon_coords: &serde_json::Value) -> Option<Ring> {
    let outer = polygon_coords.as_array()?.first()?.as_array()?;
    let mut points = Vec::with_capacity(outer.len());
    for pair in outer {
        let pair = pair.as_array()?;
        let lon = pair.first()?.as_f64()?;
        let lat = pair.get(1)?.as_f64()?;
        points.push(Point::new(lat, lon).ok()?);
    }
    Ring::closing(points).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_pair_decoding() {
        let ring = ring_from_text_pairs(&[4105, 8310, 4115, 8295, 4110, 8280]).unwrap();
        assert_eq!(ring.points()[0], Point::new(41.05, -83.10).unwrap());
        assert!(ring.is_closed());
    }

    #[test]
    fn out_of_bounds_pairs_discarded() {
        // 75.00 N is outside the 20-60 window; only two valid vertices remain.
        assert!(ring_from_text_pairs(&[7500, 8310, 4115, 8295, 4110, 8280]).is_none());
    }

    #[test]
    fn ring_closes_open_input() {
        let ring = Ring::closing(vec![
            Point::new(41.05, -83.10).unwrap(),
            Point::new(41.15, -82.95).unwrap(),
            Point::new(41.10, -82.80).unwrap(),
            Point::new(39.95, -83.00).unwrap(),
        ])
        .unwrap();
        assert_eq!(ring.points().len(), 5);
        assert_eq!(ring.points().first(), ring.points().last());
    }

    #[test]
    fn ring_accepts_already_closed_input() {
        let a = Point::new(41.0, -83.0).unwrap();
        let b = Point::new(41.1, -82.9).unwrap();
        let c = Point::new(41.2, -82.8).unwrap();
        let ring = Ring::closing(vec![a, b, c, a]).unwrap();
        assert_eq!(ring.points().len(), 4);
    }

    #[test]
    fn geojson_polygon_outer_ring() {
        let geometry = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[
                [-83.0, 40.0],
                [-83.0, 40.1],
                [-82.9, 40.1],
                [-82.9, 40.0],
                [-83.0, 40.0]
            ]]
        });
        let polygon = polygon_from_geojson(&geometry);
        assert_eq!(polygon.rings().len(), 1);
        assert_eq!(
            polygon.rings()[0].points()[0],
            Point::new(40.0, -83.0).unwrap()
        );
    }

    #[test]
    fn geojson_multipolygon_takes_each_outer_ring() {
        let geometry = serde_json::json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[-83.0, 40.0], [-83.0, 40.1], [-82.9, 40.1], [-83.0, 40.0]]],
                [[[-84.0, 41.0], [-84.0, 41.1], [-83.9, 41.1], [-84.0, 41.0]]]
            ]
        });
        let polygon = polygon_from_geojson(&geometry);
        assert_eq!(polygon.rings().len(), 2);
    }

    #[test]
    fn centroid_averages_vertices() {
        let ring = Ring::closing(vec![
            Point::new(40.0, -83.0).unwrap(),
            Point::new(41.0, -83.0).unwrap(),
            Point::new(40.5, -82.0).unwrap(),
        ])
        .unwrap();
        let centroid = Polygon::from(ring).centroid().unwrap();
        assert!((centroid.latitude() - 40.375).abs() < 1e-9);
    }

    #[test]
    fn wire_form_is_nested_arrays() {
        let ring = Ring::closing(vec![
            Point::new(40.0, -83.0).unwrap(),
            Point::new(41.0, -83.0).unwrap(),
            Point::new(40.5, -82.0).unwrap(),
        ])
        .unwrap();
        let json = serde_json::to_value(Polygon::from(ring)).unwrap();
        assert_eq!(json[0][0][0], 40.0);
        assert_eq!(json[0][0][1], -83.0);
    }
}
