// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of PlexGIS.
//
// PlexGIS is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// PlexGIS is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with PlexGIS. If not, see <https://www.gnu.org/licenses/>.

//! Spatial operation wrappers
//!
//! ## Purpose
//! Thin adapters over `geo` for the operations the in-process tier supports:
//! boolean overlays, convex hull, centroid, Douglas-Peucker simplification,
//! and buffering. Buffering is composed as a capsule union (segment quads plus
//! vertex circles) over `geo`'s boolean ops; everything else delegates
//! directly.
//!
//! Overlay operations are polygonal: non-areal inputs yield a typed
//! `UnsupportedGeometry` error, mirroring what the database tier would reject
//! in SQL.

use geo::{
    Area, BooleanOps, Centroid, ConvexHull, Coord, CoordsIter, Geometry, LineString, MultiPoint,
    MultiPolygon, Point, Polygon, Simplify,
};

use crate::error::{GeometryError, GeometryResult};

/// Buffer a geometry by `distance`, approximating circular arcs with
/// `quadrant_segments` points per quarter circle (8 unless the request
/// says otherwise).
///
/// ## Errors
/// `InvalidParameter` for negative distances; zero distance returns the input
/// unchanged.
pub fn buffer(
    geometry: &Geometry<f64>,
    distance: f64,
    quadrant_segments: usize,
) -> GeometryResult<Geometry<f64>> {
    if !distance.is_finite() || distance < 0.0 {
        return Err(GeometryError::InvalidParameter(format!(
            "buffer distance must be non-negative and finite, got {}",
            distance
        )));
    }
    if distance == 0.0 {
        return Ok(geometry.clone());
    }
    let segments = quadrant_segments.clamp(1, 64);

    let mut pieces: Vec<Polygon<f64>> = Vec::new();
    collect_buffer_pieces(geometry, distance, segments, &mut pieces);
    Ok(normalize_multi(union_all(pieces)))
}

/// Intersection of two areal geometries.
pub fn intersection(a: &Geometry<f64>, b: &Geometry<f64>) -> GeometryResult<Geometry<f64>> {
    let (ma, mb) = (
        to_multi_polygon(a, "INTERSECTION")?,
        to_multi_polygon(b, "INTERSECTION")?,
    );
    Ok(normalize_multi(ma.intersection(&mb)))
}

/// Union of two areal geometries.
pub fn union(a: &Geometry<f64>, b: &Geometry<f64>) -> GeometryResult<Geometry<f64>> {
    let (ma, mb) = (to_multi_polygon(a, "UNION")?, to_multi_polygon(b, "UNION")?);
    Ok(normalize_multi(ma.union(&mb)))
}

/// Difference `a - b` of two areal geometries.
pub fn difference(a: &Geometry<f64>, b: &Geometry<f64>) -> GeometryResult<Geometry<f64>> {
    let (ma, mb) = (
        to_multi_polygon(a, "DIFFERENCE")?,
        to_multi_polygon(b, "DIFFERENCE")?,
    );
    Ok(normalize_multi(ma.difference(&mb)))
}

/// Convex hull over all coordinates of the input.
pub fn convex_hull(geometry: &Geometry<f64>) -> GeometryResult<Geometry<f64>> {
    let points: Vec<Point<f64>> = geometry.coords_iter().map(Point::from).collect();
    if points.is_empty() {
        return Err(GeometryError::UnsupportedGeometry {
            operation: "CONVEX_HULL".to_string(),
            geometry: "empty geometry".to_string(),
        });
    }
    Ok(Geometry::Polygon(MultiPoint::new(points).convex_hull()))
}

/// Centroid of the input.
pub fn centroid(geometry: &Geometry<f64>) -> GeometryResult<Geometry<f64>> {
    geometry
        .centroid()
        .map(Geometry::Point)
        .ok_or_else(|| GeometryError::UnsupportedGeometry {
            operation: "CENTROID".to_string(),
            geometry: "empty geometry".to_string(),
        })
}

/// Douglas-Peucker simplification. Point-like geometries pass through
/// unchanged.
pub fn simplify(geometry: &Geometry<f64>, tolerance: f64) -> GeometryResult<Geometry<f64>> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(GeometryError::InvalidParameter(format!(
            "simplify tolerance must be non-negative and finite, got {}",
            tolerance
        )));
    }
    let simplified = match geometry {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify(&tolerance)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(mls.simplify(&tolerance)),
        Geometry::Polygon(p) => Geometry::Polygon(p.simplify(&tolerance)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify(&tolerance)),
        other => other.clone(),
    };
    Ok(simplified)
}

/// Unsigned planar area of the input.
pub fn unsigned_area(geometry: &Geometry<f64>) -> f64 {
    geometry.unsigned_area()
}

fn collect_buffer_pieces(
    geometry: &Geometry<f64>,
    distance: f64,
    segments: usize,
    out: &mut Vec<Polygon<f64>>,
) {
    match geometry {
        Geometry::Point(p) => out.push(circle_polygon(
            Coord { x: p.x(), y: p.y() },
            distance,
            segments,
        )),
        Geometry::MultiPoint(mp) => {
            for p in &mp.0 {
                out.push(circle_polygon(
                    Coord { x: p.x(), y: p.y() },
                    distance,
                    segments,
                ));
            }
        }
        Geometry::Line(line) => {
            push_path_pieces(&[line.start, line.end], distance, segments, out);
        }
        Geometry::LineString(ls) => push_path_pieces(&ls.0, distance, segments, out),
        Geometry::MultiLineString(mls) => {
            for ls in &mls.0 {
                push_path_pieces(&ls.0, distance, segments, out);
            }
        }
        Geometry::Polygon(poly) => push_polygon_pieces(poly, distance, segments, out),
        Geometry::MultiPolygon(mp) => {
            for poly in &mp.0 {
                push_polygon_pieces(poly, distance, segments, out);
            }
        }
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                collect_buffer_pieces(g, distance, segments, out);
            }
        }
        Geometry::Rect(r) => push_polygon_pieces(&r.to_polygon(), distance, segments, out),
        Geometry::Triangle(t) => push_polygon_pieces(&t.to_polygon(), distance, segments, out),
    }
}

fn push_polygon_pieces(
    poly: &Polygon<f64>,
    distance: f64,
    segments: usize,
    out: &mut Vec<Polygon<f64>>,
) {
    out.push(poly.clone());
    push_path_pieces(&poly.exterior().0, distance, segments, out);
    for ring in poly.interiors() {
        push_path_pieces(&ring.0, distance, segments, out);
    }
}

fn push_path_pieces(
    coords: &[Coord<f64>],
    distance: f64,
    segments: usize,
    out: &mut Vec<Polygon<f64>>,
) {
    for c in coords {
        out.push(circle_polygon(*c, distance, segments));
    }
    for pair in coords.windows(2) {
        if let Some(quad) = segment_quad(pair[0], pair[1], distance) {
            out.push(quad);
        }
    }
}

/// Regular polygon approximating a circle, `4 * quadrant_segments` vertices,
/// counterclockwise, closed.
fn circle_polygon(center: Coord<f64>, radius: f64, quadrant_segments: usize) -> Polygon<f64> {
    let n = quadrant_segments.max(1) * 4;
    let mut coords = Vec::with_capacity(n + 1);
    for i in 0..n {
        let theta = 2.0 * std::f64::consts::PI * (i as f64) / (n as f64);
        coords.push(Coord {
            x: center.x + radius * theta.cos(),
            y: center.y + radius * theta.sin(),
        });
    }
    coords.push(coords[0]);
    Polygon::new(LineString::new(coords), vec![])
}

/// Rectangle of width `2 * distance` along one segment. Degenerate segments
/// yield None; their vertex circles already cover them.
fn segment_quad(a: Coord<f64>, b: Coord<f64>, distance: f64) -> Option<Polygon<f64>> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return None;
    }
    let nx = -dy / len * distance;
    let ny = dx / len * distance;
    Some(Polygon::new(
        LineString::new(vec![
            Coord {
                x: a.x + nx,
                y: a.y + ny,
            },
            Coord {
                x: b.x + nx,
                y: b.y + ny,
            },
            Coord {
                x: b.x - nx,
                y: b.y - ny,
            },
            Coord {
                x: a.x - nx,
                y: a.y - ny,
            },
            Coord {
                x: a.x + nx,
                y: a.y + ny,
            },
        ]),
        vec![],
    ))
}

fn union_all(pieces: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    let mut iter = pieces.into_iter();
    let first = match iter.next() {
        Some(p) => MultiPolygon::new(vec![p]),
        None => return MultiPolygon::new(vec![]),
    };
    iter.fold(first, |acc, p| acc.union(&MultiPolygon::new(vec![p])))
}

fn to_multi_polygon(geometry: &Geometry<f64>, operation: &str) -> GeometryResult<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Ok(mp.clone()),
        Geometry::Rect(r) => Ok(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Ok(MultiPolygon::new(vec![t.to_polygon()])),
        other => Err(GeometryError::UnsupportedGeometry {
            operation: operation.to_string(),
            geometry: geometry_type_name(other).to_string(),
        }),
    }
}

fn normalize_multi(mut mp: MultiPolygon<f64>) -> Geometry<f64> {
    if mp.0.len() == 1 {
        Geometry::Polygon(mp.0.remove(0))
    } else {
        Geometry::MultiPolygon(mp)
    }
}

fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_geometry_str;
    use std::f64::consts::PI;

    fn ngon_area(radius: f64, quadrant_segments: usize) -> f64 {
        let n = (quadrant_segments * 4) as f64;
        0.5 * n * radius * radius * (2.0 * PI / n).sin()
    }

    #[test]
    fn test_buffer_point_area() {
        let g = parse_geometry_str("POINT(5 5)").unwrap();
        let buffered = buffer(&g, 2.0, 8).unwrap();
        let area = unsigned_area(&buffered);
        let expected = ngon_area(2.0, 8);
        assert!(
            (area - expected).abs() < 1e-9,
            "area {} vs expected {}",
            area,
            expected
        );
    }

    #[test]
    fn test_buffer_linestring_capsule_area() {
        // Collinear 3-point line of total length 20, buffered by 10: two
        // segment rectangles plus end caps, interior vertex circle absorbed.
        let g = parse_geometry_str("LINESTRING(0 0, 10 0, 20 0)").unwrap();
        let buffered = buffer(&g, 10.0, 8).unwrap();
        let area = unsigned_area(&buffered);
        let expected = 2.0 * 10.0 * 20.0 + ngon_area(10.0, 8);
        assert!(
            (area - expected).abs() / expected < 1e-6,
            "area {} vs expected {}",
            area,
            expected
        );
    }

    #[test]
    fn test_buffer_zero_distance_is_identity() {
        let g = parse_geometry_str("LINESTRING(0 0, 1 1)").unwrap();
        let buffered = buffer(&g, 0.0, 8).unwrap();
        assert_eq!(g, buffered);
    }

    #[test]
    fn test_buffer_negative_distance_rejected() {
        let g = parse_geometry_str("POINT(0 0)").unwrap();
        assert!(matches!(
            buffer(&g, -1.0, 8),
            Err(GeometryError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_buffer_polygon_grows() {
        let g = parse_geometry_str("POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))").unwrap();
        let buffered = buffer(&g, 1.0, 8).unwrap();
        let area = unsigned_area(&buffered);
        // 100 + perimeter strip 40 + four corner quarter-circles.
        let expected = 100.0 + 40.0 + ngon_area(1.0, 8);
        assert!(
            (area - expected).abs() / expected < 1e-6,
            "area {} vs expected {}",
            area,
            expected
        );
    }

    #[test]
    fn test_intersection_of_offset_squares() {
        let a = parse_geometry_str("POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))").unwrap();
        let b = parse_geometry_str("POLYGON((0.5 0.5, 1.5 0.5, 1.5 1.5, 0.5 1.5, 0.5 0.5))")
            .unwrap();
        let g = intersection(&a, &b).unwrap();
        assert!((unsigned_area(&g) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_union_of_offset_squares() {
        let a = parse_geometry_str("POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))").unwrap();
        let b = parse_geometry_str("POLYGON((0.5 0.5, 1.5 0.5, 1.5 1.5, 0.5 1.5, 0.5 0.5))")
            .unwrap();
        let g = union(&a, &b).unwrap();
        assert!((unsigned_area(&g) - 1.75).abs() < 1e-9);
    }

    #[test]
    fn test_difference_of_offset_squares() {
        let a = parse_geometry_str("POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))").unwrap();
        let b = parse_geometry_str("POLYGON((0.5 0.5, 1.5 0.5, 1.5 1.5, 0.5 1.5, 0.5 0.5))")
            .unwrap();
        let g = difference(&a, &b).unwrap();
        assert!((unsigned_area(&g) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_overlay_rejects_non_areal_input() {
        let a = parse_geometry_str("POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))").unwrap();
        let b = parse_geometry_str("LINESTRING(0 0, 1 1)").unwrap();
        let err = intersection(&a, &b).unwrap_err();
        match err {
            GeometryError::UnsupportedGeometry {
                operation,
                geometry,
            } => {
                assert_eq!(operation, "INTERSECTION");
                assert_eq!(geometry, "LineString");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_convex_hull_ignores_interior_points() {
        let g = parse_geometry_str("MULTIPOINT(0 0, 1 0, 1 1, 0 1, 0.5 0.5)").unwrap();
        let hull = convex_hull(&g).unwrap();
        assert!((unsigned_area(&hull) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_centroid_of_square() {
        let g = parse_geometry_str("POLYGON((0 0, 2 0, 2 2, 0 2, 0 0))").unwrap();
        match centroid(&g).unwrap() {
            Geometry::Point(p) => {
                assert!((p.x() - 1.0).abs() < 1e-9);
                assert!((p.y() - 1.0).abs() < 1e-9);
            }
            other => panic!("expected point, got {:?}", other),
        }
    }

    #[test]
    fn test_simplify_removes_small_deviation() {
        let g = parse_geometry_str("LINESTRING(0 0, 5 0.1, 10 0)").unwrap();
        match simplify(&g, 1.0).unwrap() {
            Geometry::LineString(ls) => assert_eq!(ls.0.len(), 2),
            other => panic!("expected linestring, got {:?}", other),
        }
    }

    #[test]
    fn test_simplify_keeps_significant_vertices() {
        let g = parse_geometry_str("LINESTRING(0 0, 5 4, 10 0)").unwrap();
        match simplify(&g, 1.0).unwrap() {
            Geometry::LineString(ls) => assert_eq!(ls.0.len(), 3),
            other => panic!("expected linestring, got {:?}", other),
        }
    }

    #[test]
    fn test_simplify_negative_tolerance_rejected() {
        let g = parse_geometry_str("LINESTRING(0 0, 1 1)").unwrap();
        assert!(matches!(
            simplify(&g, -0.5),
            Err(GeometryError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_simplify_point_passthrough() {
        let g = parse_geometry_str("POINT(1 2)").unwrap();
        assert_eq!(simplify(&g, 5.0).unwrap(), g);
    }
}
