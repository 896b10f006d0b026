//! Area-of-interest containment.
//!
//! Pure functions. Regions are closed: a point on an edge or vertex is inside.
//! Every ring is unwrapped into one continuous longitude range before testing
//! (consecutive vertices never jump more than 180°), so polygons that cross the
//! antimeridian behave like any other polygon. Locations that cannot be
//! resolved against the configured AOI kind are never contained.

use std::collections::BTreeSet;

use crate::config::AoiConfig;
use crate::error::GeometryError;
use crate::types::{Coord, Location, Polygon};

const EPSILON: f64 = 1e-9;

/// A validated, normalized area of interest.
#[derive(Debug, Clone, PartialEq)]
pub enum Aoi {
    /// One or more polygons (with holes), rings already unwrapped.
    Polygons(Vec<Polygon>),
    /// Inclusive box. `min_lon > max_lon` means the box crosses the antimeridian.
    BoundingBox {
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    },
    /// Upper-cased forecast/county zone ids.
    Zones(BTreeSet<String>),
}

impl Aoi {
    /// Validate a declarative AOI and normalize it for testing.
    pub fn from_config(config: &AoiConfig) -> Result<Self, GeometryError> {
        match config {
            AoiConfig::Polygon { coordinates } => {
                Ok(Self::Polygons(vec![polygon_from_rings(0, coordinates)?]))
            }
            AoiConfig::MultiPolygon { coordinates } => {
                if coordinates.is_empty() {
                    return Err(GeometryError::EmptyPolygonSet);
                }
                let polygons = coordinates
                    .iter()
                    .enumerate()
                    .map(|(i, rings)| polygon_from_rings(i, rings))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Polygons(polygons))
            }
            AoiConfig::BoundingBox {
                min_lat,
                max_lat,
                min_lon,
                max_lon,
            } => {
                check_coord(*min_lon, *min_lat)?;
                check_coord(*max_lon, *max_lat)?;
                if min_lat > max_lat {
                    return Err(GeometryError::InvertedLatitude {
                        min_lat: *min_lat,
                        max_lat: *max_lat,
                    });
                }
                Ok(Self::BoundingBox {
                    min_lat: *min_lat,
                    max_lat: *max_lat,
                    min_lon: *min_lon,
                    max_lon: *max_lon,
                })
            }
            AoiConfig::Zones { zones } => {
                let set: BTreeSet<String> = zones
                    .iter()
                    .map(|z| normalize_zone(z))
                    .filter(|z| !z.is_empty())
                    .collect();
                if set.is_empty() {
                    return Err(GeometryError::EmptyZoneList);
                }
                Ok(Self::Zones(set))
            }
        }
    }

    /// Build a polygon AOI directly from `[lon, lat]` rings (tests, tooling).
    pub fn polygon(exterior: &[[f64; 2]]) -> Result<Self, GeometryError> {
        Self::from_config(&AoiConfig::Polygon {
            coordinates: vec![exterior.to_vec()],
        })
    }
}

/// Does `location` lie within (or intersect) `aoi`?
pub fn contains(aoi: &Aoi, location: &Location) -> bool {
    match (aoi, location) {
        (_, Location::Unresolved) => false,

        (Aoi::Zones(set), Location::Area { zones, .. }) => zones
            .iter()
            .any(|z| set.contains(&normalize_zone(z))),
        // A bare coordinate carries no zone id.
        (Aoi::Zones(_), Location::Point { .. }) => false,

        (Aoi::Polygons(polygons), Location::Point { lat, lon, .. }) => {
            let pt = Coord::new(*lon, *lat);
            polygons.iter().any(|p| polygon_contains_point(p, pt))
        }
        (Aoi::Polygons(polygons), Location::Area { polygons: area, .. }) => {
            area.iter().any(|shape| {
                let shape = unwrap_polygon(shape);
                polygons.iter().any(|p| polygons_intersect(p, &shape))
            })
        }

        (
            Aoi::BoundingBox {
                min_lat,
                max_lat,
                min_lon,
                max_lon,
            },
            Location::Point { lat, lon, .. },
        ) => {
            if *lat < min_lat - EPSILON || *lat > max_lat + EPSILON {
                return false;
            }
            let lon = wrap_lon(*lon);
            if min_lon <= max_lon {
                lon >= min_lon - EPSILON && lon <= max_lon + EPSILON
            } else {
                lon >= min_lon - EPSILON || lon <= max_lon + EPSILON
            }
        }
        (
            Aoi::BoundingBox {
                min_lat,
                max_lat,
                min_lon,
                max_lon,
            },
            Location::Area { polygons: area, .. },
        ) => {
            let east = if min_lon <= max_lon {
                *max_lon
            } else {
                max_lon + 360.0
            };
            let bbox = Polygon::new(vec![
                Coord::new(*min_lon, *min_lat),
                Coord::new(east, *min_lat),
                Coord::new(east, *max_lat),
                Coord::new(*min_lon, *max_lat),
                Coord::new(*min_lon, *min_lat),
            ]);
            area.iter()
                .any(|shape| polygons_intersect(&bbox, &unwrap_polygon(shape)))
        }
    }
}

pub fn normalize_zone(zone: &str) -> String {
    zone.trim().to_ascii_uppercase()
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn polygon_from_rings(index: usize, rings: &[Vec<[f64; 2]>]) -> Result<Polygon, GeometryError> {
    let mut converted = Vec::with_capacity(rings.len());
    for (r, ring) in rings.iter().enumerate() {
        let coords: Vec<Coord> = ring.iter().map(|[lon, lat]| Coord::new(*lon, *lat)).collect();
        for c in &coords {
            check_coord(c.lon, c.lat)?;
        }
        let distinct = distinct_vertices(&coords);
        if distinct < 3 {
            return Err(GeometryError::TooFewVertices {
                polygon: index,
                ring: r,
                distinct,
            });
        }
        converted.push(coords);
    }
    if converted.is_empty() {
        return Err(GeometryError::TooFewVertices {
            polygon: index,
            ring: 0,
            distinct: 0,
        });
    }
    let exterior = converted.remove(0);
    Ok(unwrap_polygon(&Polygon::with_holes(exterior, converted)))
}

fn check_coord(lon: f64, lat: f64) -> Result<(), GeometryError> {
    let ok = lon.is_finite()
        && lat.is_finite()
        && (-180.0..=180.0).contains(&lon)
        && (-90.0..=90.0).contains(&lat);
    if ok {
        Ok(())
    } else {
        Err(GeometryError::OutOfRange { lon, lat })
    }
}

fn distinct_vertices(ring: &[Coord]) -> usize {
    let mut seen: Vec<Coord> = Vec::with_capacity(ring.len());
    for c in ring {
        if !seen
            .iter()
            .any(|s| (s.lon - c.lon).abs() < EPSILON && (s.lat - c.lat).abs() < EPSILON)
        {
            seen.push(*c);
        }
    }
    seen.len()
}

/// Wrap any longitude into [-180, 180].
fn wrap_lon(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

/// Make a ring continuous in longitude, starting near `anchor` when given.
fn unwrap_ring(ring: &[Coord], anchor: Option<f64>) -> Vec<Coord> {
    let mut out = Vec::with_capacity(ring.len());
    let mut prev: Option<f64> = anchor;
    for c in ring {
        let mut lon = c.lon;
        if let Some(p) = prev {
            while lon - p > 180.0 {
                lon -= 360.0;
            }
            while p - lon > 180.0 {
                lon += 360.0;
            }
        }
        out.push(Coord::new(lon, c.lat));
        prev = Some(lon);
    }
    out
}

/// Unwrap exterior and holes onto the same continuous longitude range.
fn unwrap_polygon(polygon: &Polygon) -> Polygon {
    let exterior = unwrap_ring(&polygon.exterior, None);
    let anchor = exterior.first().map(|c| c.lon);
    let holes = polygon
        .holes
        .iter()
        .map(|h| unwrap_ring(h, anchor))
        .collect();
    Polygon::with_holes(exterior, holes)
}

fn shift_polygon(polygon: &Polygon, dx: f64) -> Polygon {
    let shift = |ring: &Vec<Coord>| -> Vec<Coord> {
        ring.iter().map(|c| Coord::new(c.lon + dx, c.lat)).collect()
    };
    Polygon::with_holes(
        shift(&polygon.exterior),
        polygon.holes.iter().map(shift).collect(),
    )
}

// ---------------------------------------------------------------------------
// Point tests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RingPosition {
    Inside,
    Boundary,
    Outside,
}

fn on_segment(p: Coord, a: Coord, b: Coord) -> bool {
    let cross = (b.lon - a.lon) * (p.lat - a.lat) - (b.lat - a.lat) * (p.lon - a.lon);
    let scale = ((b.lon - a.lon).abs() + (b.lat - a.lat).abs()).max(1.0);
    if cross.abs() > EPSILON * scale {
        return false;
    }
    p.lon >= a.lon.min(b.lon) - EPSILON
        && p.lon <= a.lon.max(b.lon) + EPSILON
        && p.lat >= a.lat.min(b.lat) - EPSILON
        && p.lat <= a.lat.max(b.lat) + EPSILON
}

/// Ray casting with an explicit boundary check. Works for open or closed rings.
fn ring_position(p: Coord, ring: &[Coord]) -> RingPosition {
    let n = ring.len();
    if n == 0 {
        return RingPosition::Outside;
    }
    let mut inside = false;
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        if on_segment(p, a, b) {
            return RingPosition::Boundary;
        }
        if (a.lat > p.lat) != (b.lat > p.lat) {
            let x = a.lon + (p.lat - a.lat) * (b.lon - a.lon) / (b.lat - a.lat);
            if p.lon < x {
                inside = !inside;
            }
        }
    }
    if inside {
        RingPosition::Inside
    } else {
        RingPosition::Outside
    }
}

/// Closed-region test for one unwrapped polygon, longitude taken as-is.
fn polygon_contains_unwrapped(polygon: &Polygon, p: Coord) -> bool {
    match ring_position(p, &polygon.exterior) {
        RingPosition::Outside => false,
        RingPosition::Boundary => true,
        RingPosition::Inside => polygon
            .holes
            .iter()
            .all(|hole| ring_position(p, hole) != RingPosition::Inside),
    }
}

/// Test the point at every longitude alias an unwrapped polygon may cover.
fn polygon_contains_point(polygon: &Polygon, p: Coord) -> bool {
    [0.0, 360.0, -360.0]
        .iter()
        .any(|dx| polygon_contains_unwrapped(polygon, Coord::new(p.lon + dx, p.lat)))
}

// ---------------------------------------------------------------------------
// Shape intersection
// ---------------------------------------------------------------------------

fn orientation(a: Coord, b: Coord, c: Coord) -> f64 {
    (b.lon - a.lon) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lon - a.lon)
}

fn segments_cross(p1: Coord, p2: Coord, q1: Coord, q2: Coord) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    on_segment(p1, q1, q2) || on_segment(p2, q1, q2) || on_segment(q1, p1, p2) || on_segment(q2, p1, p2)
}

fn edges(ring: &[Coord]) -> impl Iterator<Item = (Coord, Coord)> + '_ {
    let n = ring.len();
    (0..n).map(move |i| (ring[i], ring[(i + 1) % n]))
}

fn intersects_unwrapped(a: &Polygon, b: &Polygon) -> bool {
    if b.exterior.iter().any(|v| polygon_contains_unwrapped(a, *v)) {
        return true;
    }
    if a.exterior.iter().any(|v| polygon_contains_unwrapped(b, *v)) {
        return true;
    }
    edges(&a.exterior).any(|(p1, p2)| edges(&b.exterior).any(|(q1, q2)| segments_cross(p1, p2, q1, q2)))
}

/// Both polygons must already be unwrapped; `b` is tried at each longitude alias.
fn polygons_intersect(a: &Polygon, b: &Polygon) -> bool {
    [0.0, 360.0, -360.0]
        .iter()
        .any(|dx| intersects_unwrapped(a, &shift_polygon(b, *dx)))
}
