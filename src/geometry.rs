//! Planar geometry helpers shared by the normalizer, projector and segmenter.

use geo::{Coord, Distance, Euclidean, LineLocatePoint, LineString, Point};

/// Local tangent plane centred on `(lon0, lat0)`.
///
/// Equirectangular approximation: `x = R * cos(lat0) * dlon`, `y = R * dlat`.
/// Distances are metric and accurate at city scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTangentPlane {
    origin_lon_rad: f64,
    origin_lat_rad: f64,
    cos_lat0: f64,
}

impl LocalTangentPlane {
    pub const EARTH_RADIUS: f64 = 6_371_007.2;

    pub fn new(lon0: f64, lat0: f64) -> Self {
        let origin_lat_rad = lat0.to_radians();
        Self {
            origin_lon_rad: lon0.to_radians(),
            origin_lat_rad,
            cos_lat0: origin_lat_rad.cos(),
        }
    }

    /// Plane centred on the middle of the bounding box of `coords`.
    pub fn centred_on<'a>(coords: impl IntoIterator<Item = &'a Coord>) -> Option<Self> {
        let mut iter = coords.into_iter();
        let first = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for c in iter {
            min_x = min_x.min(c.x);
            min_y = min_y.min(c.y);
            max_x = max_x.max(c.x);
            max_y = max_y.max(c.y);
        }
        Some(Self::new((min_x + max_x) / 2.0, (min_y + max_y) / 2.0))
    }

    pub fn project(&self, lon: f64, lat: f64) -> Coord {
        let dlon = lon.to_radians() - self.origin_lon_rad;
        let dlat = lat.to_radians() - self.origin_lat_rad;
        Coord {
            x: Self::EARTH_RADIUS * self.cos_lat0 * dlon,
            y: Self::EARTH_RADIUS * dlat,
        }
    }

    pub fn unproject(&self, c: Coord) -> (f64, f64) {
        let dlon = c.x / (Self::EARTH_RADIUS * self.cos_lat0);
        let dlat = c.y / Self::EARTH_RADIUS;
        (
            (self.origin_lon_rad + dlon).to_degrees(),
            (self.origin_lat_rad + dlat).to_degrees(),
        )
    }
}

pub fn coord_distance(a: Coord, b: Coord) -> f64 {
    Euclidean.distance(Point::from(a), Point::from(b))
}

/// Euclidean length of a polyline in plane units.
pub fn polyline_length(ls: &LineString) -> f64 {
    ls.0.windows(2).map(|w| coord_distance(w[0], w[1])).sum()
}

/// Offset along `ls` of the perpendicular projection of `p`.
///
/// Measured from the first vertex of `ls`, so callers must have oriented
/// the geometry before trusting the result.
pub fn offset_along(ls: &LineString, p: Coord) -> Option<f64> {
    let total = polyline_length(ls);
    if total <= 0.0 {
        return Some(0.0);
    }
    let fraction = ls.line_locate_point(&Point::from(p))?;
    Some(fraction * total)
}

/// Walks a polyline forward by offset, never revisiting a segment.
struct Cursor<'a> {
    coords: &'a [Coord],
    seg: usize,
    seg_start: f64,
}

impl<'a> Cursor<'a> {
    fn new(coords: &'a [Coord]) -> Self {
        Self {
            coords,
            seg: 0,
            seg_start: 0.0,
        }
    }

    fn seg_len(&self, i: usize) -> f64 {
        coord_distance(self.coords[i], self.coords[i + 1])
    }

    /// Point at `offset`, clamped to the ends. Offsets must not decrease
    /// between calls.
    fn point_at(&mut self, offset: f64) -> Coord {
        let n = self.coords.len();
        if n < 2 || offset <= 0.0 {
            return self.coords[0];
        }
        while self.seg + 2 < n && self.seg_start + self.seg_len(self.seg) < offset {
            self.seg_start += self.seg_len(self.seg);
            self.seg += 1;
        }
        let (a, b) = (self.coords[self.seg], self.coords[self.seg + 1]);
        let len = self.seg_len(self.seg);
        if len <= 0.0 {
            return b;
        }
        let t = ((offset - self.seg_start) / len).min(1.0);
        Coord {
            x: a.x + (b.x - a.x) * t,
            y: a.y + (b.y - a.y) * t,
        }
    }

    /// Vertices strictly between offsets `start` and `end`, from the
    /// current segment on.
    fn interior(&self, start: f64, end: f64, out: &mut Vec<Coord>) {
        let (mut i, mut walked) = (self.seg, self.seg_start);
        while i + 1 < self.coords.len() {
            walked += self.seg_len(i);
            if walked >= end {
                break;
            }
            if walked > start {
                out.push(self.coords[i + 1]);
            }
            i += 1;
        }
    }
}

/// Consecutive pieces of `ls` between ascending `breaks`
/// (`breaks.len() - 1` pieces), keeping interior vertices. One pass over
/// the vertices whatever the number of pieces.
pub fn split_at_offsets(ls: &LineString, breaks: &[f64]) -> Vec<LineString> {
    if ls.0.is_empty() || breaks.len() < 2 {
        return Vec::new();
    }
    let mut cursor = Cursor::new(&ls.0);
    let mut pieces = Vec::with_capacity(breaks.len() - 1);
    for w in breaks.windows(2) {
        let (start, end) = (w[0], w[1]);
        let mut out = vec![cursor.point_at(start)];
        cursor.interior(start, end, &mut out);
        out.push(cursor.point_at(end));
        out.dedup();
        if out.len() == 1 {
            out.push(out[0]);
        }
        pieces.push(LineString::new(out));
    }
    pieces
}
