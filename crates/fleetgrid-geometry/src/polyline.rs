//! Polyline measurement, projection and sampling.
//!
//! Arc lengths are measured from the first point of the polyline. Zero-length
//! segments are skipped when measuring and never divided by.

use fleet_core::Point;

/// Segments shorter than this are treated as degenerate.
pub const DEGENERATE_LENGTH: f64 = 1e-9;

/// Default waypoint spacing.
pub const DEFAULT_SAMPLE_STEP: f64 = 0.5;

/// Closest point on a polyline to a query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Running arc length of `point` along the polyline.
    pub arc_length: f64,
    /// Euclidean distance from the query point to `point`.
    pub distance: f64,
    /// The closest point itself.
    pub point: Point,
    /// Which side of the centerline the query point lies on.
    pub side: Side,
}

/// Side of a directed polyline a point lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    On,
}

/// Total length of a polyline.
pub fn polyline_length(polyline: &[Point]) -> f64 {
    polyline.windows(2).map(|w| w[0].distance(w[1])).sum()
}

/// Cumulative arc length at every vertex (`[0, |p0p1|, ...]`).
pub fn cumulative_lengths(polyline: &[Point]) -> Vec<f64> {
    let mut out = Vec::with_capacity(polyline.len());
    let mut acc = 0.0;
    for (i, p) in polyline.iter().enumerate() {
        if i > 0 {
            acc += polyline[i - 1].distance(*p);
        }
        out.push(acc);
    }
    out
}

/// Distance from `p` to the segment `a`-`b`.
pub fn point_to_segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let (_, closest) = closest_on_segment(p, a, b);
    p.distance(closest)
}

/// Distance from `p` to the nearest point of a polyline.
pub fn point_to_polyline_distance(polyline: &[Point], p: Point) -> Option<f64> {
    project_onto_polyline(polyline, p).map(|proj| proj.distance)
}

/// Project `p` onto the polyline and report its running arc length.
///
/// Returns `None` for an empty polyline. On ties the earliest segment wins.
pub fn project_onto_polyline(polyline: &[Point], p: Point) -> Option<Projection> {
    match polyline {
        [] => None,
        [only] => Some(Projection {
            arc_length: 0.0,
            distance: p.distance(*only),
            point: *only,
            side: Side::On,
        }),
        _ => {
            let mut best: Option<Projection> = None;
            let mut walked = 0.0;
            for w in polyline.windows(2) {
                let (a, b) = (w[0], w[1]);
                let seg_len = a.distance(b);
                let (t, closest) = closest_on_segment(p, a, b);
                let distance = p.distance(closest);
                if best.is_none_or(|current| distance < current.distance) {
                    best = Some(Projection {
                        arc_length: walked + t * seg_len,
                        distance,
                        point: closest,
                        side: side_of(p, a, b),
                    });
                }
                walked += seg_len;
            }
            best
        }
    }
}

/// Point at arc length `s`, clamped to the polyline's extent.
pub fn point_at_arc_length(polyline: &[Point], s: f64) -> Option<Point> {
    let cumulative = cumulative_lengths(polyline);
    point_at(polyline, &cumulative, s)
}

/// Emit points every `step` along the polyline from arc length `start` to
/// `end`, walking backwards when `end < start`.
///
/// The exact end point is always the last element, even when it does not
/// land on a step boundary. Arc lengths are clamped to the polyline.
pub fn sample_polyline(polyline: &[Point], start: f64, end: f64, step: f64) -> Vec<Point> {
    if polyline.is_empty() {
        return Vec::new();
    }
    let cumulative = cumulative_lengths(polyline);
    let total = cumulative[cumulative.len() - 1];
    let start = clamp_arc(start, total);
    let end = clamp_arc(end, total);

    let span = (end - start).abs();
    let direction = if end >= start { 1.0 } else { -1.0 };

    let mut out = Vec::new();
    if step > 0.0 && step.is_finite() {
        // Interior samples strictly before the end point.
        let count = (span / step).ceil() as usize;
        for k in 0..count {
            let offset = k as f64 * step;
            if offset >= span - DEGENERATE_LENGTH {
                break;
            }
            if let Some(p) = point_at(polyline, &cumulative, start + direction * offset) {
                out.push(p);
            }
        }
    } else if span > DEGENERATE_LENGTH {
        out.extend(point_at(polyline, &cumulative, start));
    }
    out.extend(point_at(polyline, &cumulative, end));
    out
}

fn clamp_arc(s: f64, total: f64) -> f64 {
    if s.is_nan() { 0.0 } else { s.clamp(0.0, total) }
}

fn point_at(polyline: &[Point], cumulative: &[f64], s: f64) -> Option<Point> {
    let first = *polyline.first()?;
    if polyline.len() == 1 {
        return Some(first);
    }
    let total = cumulative[cumulative.len() - 1];
    let s = clamp_arc(s, total);
    // First vertex whose cumulative length reaches `s`.
    let idx = cumulative.partition_point(|&c| c < s);
    if idx == 0 {
        return Some(first);
    }
    if idx >= polyline.len() {
        return polyline.last().copied();
    }
    let (a, b) = (polyline[idx - 1], polyline[idx]);
    let seg_len = cumulative[idx] - cumulative[idx - 1];
    if seg_len < DEGENERATE_LENGTH {
        return Some(b);
    }
    Some(a.lerp(b, (s - cumulative[idx - 1]) / seg_len))
}

/// Parameter `t` in `[0, 1]` and the closest point on segment `a`-`b`.
fn closest_on_segment(p: Point, a: Point, b: Point) -> (f64, Point) {
    let dir = b - a;
    let len_sq = dir.dot(dir);
    if len_sq < DEGENERATE_LENGTH * DEGENERATE_LENGTH {
        return (0.0, a);
    }
    let t = ((p - a).dot(dir) / len_sq).clamp(0.0, 1.0);
    (t, a.lerp(b, t))
}

fn side_of(p: Point, a: Point, b: Point) -> Side {
    let dir = b - a;
    let to_p = p - a;
    let cross = dir.x * to_p.y - dir.y * to_p.x;
    if cross.abs() <= DEGENERATE_LENGTH {
        Side::On
    } else if cross > 0.0 {
        Side::Left
    } else {
        Side::Right
    }
}
