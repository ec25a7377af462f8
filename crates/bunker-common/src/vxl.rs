// vxl.rs — the authoritative voxel map
//
// A map is a dense grid of (solid, color) cells. Height is fixed at 64
// with z growing downward; z = 63 is the indestructible water floor.
// Solidity is one u64 bitmask per column; colors are stored sparsely and
// fall back to a default for interior cells that were never painted.

use std::collections::HashMap;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use rand::Rng;
use thiserror::Error;

pub const MAP_Z: usize = 64;

/// Cells a single block-line may cover; longer requests are rejected.
pub const MAX_LINE_LENGTH: usize = 50;

/// Flood-fill budget when checking for detached groups after a destroy.
/// Larger structures are assumed grounded.
const FLOAT_CHECK_LIMIT: usize = 4096;

const DEFAULT_COLOR: u32 = 0xFF674028;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("truncated map data at offset {0}")]
    Truncated(usize),
    #[error("bad span in column ({0}, {1})")]
    BadSpan(u16, u16),
}

pub struct VxlMap {
    width: usize,
    length: usize,
    solid: Vec<u64>,
    colors: HashMap<u32, u32>,
}

impl VxlMap {
    /// An all-air map with a two-layer floor at the bottom. Handy for
    /// tests and as a fallback playground.
    pub fn flat(width: usize, length: usize) -> Self {
        let floor: u64 = 0b11 << 62; // z = 62, 63
        Self {
            width,
            length,
            solid: vec![floor; width * length],
            colors: HashMap::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    fn column(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.length {
            None
        } else {
            Some(y as usize * self.width + x as usize)
        }
    }

    #[inline]
    fn key(x: i32, y: i32, z: i32) -> u32 {
        (x as u32) | (y as u32) << 10 | (z as u32) << 20
    }

    pub fn in_bounds(&self, x: i32, y: i32, z: i32) -> bool {
        self.column(x, y).is_some() && (0..MAP_Z as i32).contains(&z)
    }

    pub fn is_solid(&self, x: i32, y: i32, z: i32) -> bool {
        if !(0..MAP_Z as i32).contains(&z) {
            return false;
        }
        match self.column(x, y) {
            Some(c) => self.solid[c] & (1u64 << z) != 0,
            None => false,
        }
    }

    pub fn get_color(&self, x: i32, y: i32, z: i32) -> u32 {
        *self.colors.get(&Self::key(x, y, z)).unwrap_or(&DEFAULT_COLOR)
    }

    /// Raw cell write. Refuses the water floor and out-of-bounds cells.
    pub fn set_point(&mut self, x: i32, y: i32, z: i32, solid: bool, color: u32) -> bool {
        if z >= MAP_Z as i32 - 1 || z < 0 {
            return false;
        }
        let Some(c) = self.column(x, y) else { return false };
        if solid {
            self.solid[c] |= 1u64 << z;
            self.colors.insert(Self::key(x, y, z), color);
        } else {
            self.solid[c] &= !(1u64 << z);
            self.colors.remove(&Self::key(x, y, z));
        }
        true
    }

    /// Building needs an empty in-bounds cell with at least one solid
    /// neighbor to attach to.
    pub fn can_build(&self, x: i32, y: i32, z: i32) -> bool {
        if !self.in_bounds(x, y, z) || z >= MAP_Z as i32 - 1 || self.is_solid(x, y, z) {
            return false;
        }
        self.neighbors(x, y, z).iter().any(|&(nx, ny, nz)| self.is_solid(nx, ny, nz))
    }

    pub fn can_destroy(&self, x: i32, y: i32, z: i32) -> bool {
        self.in_bounds(x, y, z) && z < MAP_Z as i32 - 1 && self.is_solid(x, y, z)
    }

    fn neighbors(&self, x: i32, y: i32, z: i32) -> [(i32, i32, i32); 6] {
        [
            (x - 1, y, z),
            (x + 1, y, z),
            (x, y - 1, z),
            (x, y + 1, z),
            (x, y, z - 1),
            (x, y, z + 1),
        ]
    }

    /// Clear a cell, then sweep the exposed neighbors for groups left
    /// hanging in the air. Returns every cell that went away (the
    /// requested one first) so the caller can replicate the cascade.
    pub fn destroy_point(&mut self, x: i32, y: i32, z: i32) -> Vec<(i32, i32, i32)> {
        if !self.can_destroy(x, y, z) {
            return Vec::new();
        }
        self.set_point(x, y, z, false, 0);
        let mut removed = vec![(x, y, z)];
        for (nx, ny, nz) in self.neighbors(x, y, z) {
            if self.is_solid(nx, ny, nz) {
                removed.extend(self.sweep_detached(nx, ny, nz));
            }
        }
        removed
    }

    /// Bounded flood fill from a solid seed. If the connected group does
    /// not reach the water floor within the budget it is removed whole.
    fn sweep_detached(&mut self, x: i32, y: i32, z: i32) -> Vec<(i32, i32, i32)> {
        let mut seen: HashMap<u32, (i32, i32, i32)> = HashMap::new();
        let mut stack = vec![(x, y, z)];
        seen.insert(Self::key(x, y, z), (x, y, z));

        while let Some((cx, cy, cz)) = stack.pop() {
            if cz == MAP_Z as i32 - 1 {
                return Vec::new(); // grounded
            }
            if seen.len() > FLOAT_CHECK_LIMIT {
                return Vec::new(); // too big to care, assume grounded
            }
            for (nx, ny, nz) in self.neighbors(cx, cy, cz) {
                if self.is_solid(nx, ny, nz) {
                    let k = Self::key(nx, ny, nz);
                    if let std::collections::hash_map::Entry::Vacant(e) = seen.entry(k) {
                        e.insert((nx, ny, nz));
                        stack.push((nx, ny, nz));
                    }
                }
            }
        }

        let cells: Vec<_> = seen.into_values().collect();
        for &(cx, cy, cz) in &cells {
            self.set_point(cx, cy, cz, false, 0);
        }
        cells
    }

    /// First solid z at or below `floor` (remember: down is +z). The
    /// water layer guarantees a hit.
    pub fn get_z(&self, x: i32, y: i32, floor: i32) -> i32 {
        let mut z = floor.max(0);
        while z < MAP_Z as i32 && !self.is_solid(x, y, z) {
            z += 1;
        }
        z
    }

    /// Random dry surface cell inside the rectangle, as (x, y, ground z).
    pub fn random_point<R: Rng>(
        &self,
        rng: &mut R,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
    ) -> (i32, i32, i32) {
        let x1 = x1.clamp(0, self.width as i32 - 1);
        let x2 = x2.clamp(x1 + 1, self.width as i32);
        let y1 = y1.clamp(0, self.length as i32 - 1);
        let y2 = y2.clamp(y1 + 1, self.length as i32);

        let mut best = (x1, y1, self.get_z(x1, y1, 0));
        for _ in 0..16 {
            let x = rng.gen_range(x1..x2);
            let y = rng.gen_range(y1..y2);
            let z = self.get_z(x, y, 0);
            best = (x, y, z);
            if z < MAP_Z as i32 - 1 {
                break;
            }
        }
        best
    }

    /// Map grid reference ("A1".."H8" on a standard map).
    pub fn to_grid(&self, x: f32, y: f32) -> String {
        let letter = (b'A' + (x as i32 / 64).clamp(0, 25) as u8) as char;
        format!("{}{}", letter, y as i32 / 64 + 1)
    }

    // ============================================================
    // Block line
    // ============================================================

    /// Ordered cells on the discrete line between two blocks, endpoints
    /// included. Empty when the line would exceed the 50-cell cap or
    /// immediately leaves the map.
    pub fn block_line(
        &self,
        (x1, y1, z1): (i32, i32, i32),
        (x2, y2, z2): (i32, i32, i32),
    ) -> Vec<(i32, i32, i32)> {
        let (mut x, mut y, mut z) = (x1, y1, z1);
        let (dx, dy, dz) = ((x2 - x1) as i64, (y2 - y1) as i64, (z2 - z1) as i64);
        let (ixi, iyi, izi) = (sign(dx), sign(dy), sign(dz));
        let (ax, ay, az) = (dx.abs(), dy.abs(), dz.abs());

        // fixed-point per-axis error terms, dominant axis steps 1024
        let (dxi, dyi, dzi);
        if ax >= ay && ax >= az {
            dxi = 1024;
            dyi = if dy == 0 { i64::MAX / 2 } else { ax * 1024 / ay.max(1) };
            dzi = if dz == 0 { i64::MAX / 2 } else { ax * 1024 / az.max(1) };
        } else if ay >= az {
            dyi = 1024;
            dxi = if dx == 0 { i64::MAX / 2 } else { ay * 1024 / ax.max(1) };
            dzi = if dz == 0 { i64::MAX / 2 } else { ay * 1024 / az.max(1) };
        } else {
            dzi = 1024;
            dxi = if dx == 0 { i64::MAX / 2 } else { az * 1024 / ax.max(1) };
            dyi = if dy == 0 { i64::MAX / 2 } else { az * 1024 / ay.max(1) };
        }
        let mut ex = if ixi >= 0 { dxi - 512 } else { 512 };
        let mut ey = if iyi >= 0 { dyi - 512 } else { 512 };
        let mut ez = if izi >= 0 { dzi - 512 } else { 512 };

        let mut cells = Vec::new();
        loop {
            cells.push((x, y, z));
            if cells.len() > MAX_LINE_LENGTH {
                return Vec::new();
            }
            if (x, y, z) == (x2, y2, z2) {
                return cells;
            }
            if ez <= ex && ez <= ey {
                z += izi as i32;
                if !(0..MAP_Z as i32).contains(&z) {
                    return cells;
                }
                ez += dzi;
            } else if ex < ey {
                x += ixi as i32;
                if x < 0 || x >= self.width as i32 {
                    return cells;
                }
                ex += dxi;
            } else {
                y += iyi as i32;
                if y < 0 || y >= self.length as i32 {
                    return cells;
                }
                ey += dyi;
            }
        }
    }

    // ============================================================
    // Serialization — the classic span RLE
    // ============================================================

    /// Solid cell visible from some open neighbor (map edges do not
    /// count as exposure; the top of the world always does).
    fn is_surface(&self, x: i32, y: i32, z: i32) -> bool {
        if !self.is_solid(x, y, z) {
            return false;
        }
        if z == 0 {
            return true;
        }
        (x > 0 && !self.is_solid(x - 1, y, z))
            || (x + 1 < self.width as i32 && !self.is_solid(x + 1, y, z))
            || (y > 0 && !self.is_solid(x, y - 1, z))
            || (y + 1 < self.length as i32 && !self.is_solid(x, y + 1, z))
            || (z > 0 && !self.is_solid(x, y, z - 1))
            || (z + 1 < MAP_Z as i32 && !self.is_solid(x, y, z + 1))
    }

    /// Parse the span format: per column, a list of spans of the shape
    /// `[n, top_start, top_end, air_start] + colors`, where `n` is the
    /// span length in 4-byte chunks (0 for the last span of the column)
    /// and colors are BGRA. Cells below the last span stay solid with
    /// the default color.
    pub fn from_vxl(data: &[u8], width: usize, length: usize) -> Result<Self, MapError> {
        let mut map = Self {
            width,
            length,
            solid: vec![u64::MAX; width * length],
            colors: HashMap::new(),
        };

        let mut i = 0usize;
        for y in 0..length as i32 {
            for x in 0..width as i32 {
                let mut air_from = 0i32;
                loop {
                    if i + 4 > data.len() {
                        return Err(MapError::Truncated(i));
                    }
                    let n = data[i] as i32;
                    let top_start = data[i + 1] as i32;
                    let top_end = data[i + 2] as i32; // inclusive
                    if top_start > MAP_Z as i32 || top_end >= MAP_Z as i32 || top_end < top_start - 1
                    {
                        return Err(MapError::BadSpan(x as u16, y as u16));
                    }

                    let col = map.column(x, y).unwrap();
                    for z in air_from..top_start {
                        map.solid[col] &= !(1u64 << z);
                    }

                    let len_top = top_end - top_start + 1;
                    let mut color_at = i + 4;
                    for z in top_start..=top_end {
                        if color_at + 4 > data.len() {
                            return Err(MapError::Truncated(color_at));
                        }
                        map.colors.insert(Self::key(x, y, z), bgra(&data[color_at..]));
                        color_at += 4;
                    }

                    if n == 0 {
                        i += 4 * (len_top + 1) as usize;
                        break;
                    }

                    let len_bottom = (n - 1) - len_top;
                    if len_bottom < 0 {
                        return Err(MapError::BadSpan(x as u16, y as u16));
                    }
                    i += n as usize * 4;
                    if i + 4 > data.len() {
                        return Err(MapError::Truncated(i));
                    }

                    // the next span's air-start byte doubles as the end
                    // of this span's bottom color run
                    let bottom_end = data[i + 3] as i32;
                    let bottom_start = bottom_end - len_bottom;
                    if bottom_start < 0 || bottom_end > MAP_Z as i32 {
                        return Err(MapError::BadSpan(x as u16, y as u16));
                    }
                    for (k, z) in (bottom_start..bottom_end).enumerate() {
                        map.colors
                            .insert(Self::key(x, y, z), bgra(&data[color_at + k * 4..]));
                    }
                    air_from = bottom_end;
                }
            }
        }
        Ok(map)
    }

    /// Serialize back into the span format.
    pub fn to_vxl(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width * self.length * 8);
        for y in 0..self.length as i32 {
            for x in 0..self.width as i32 {
                let mut z = 0i32;
                while z < MAP_Z as i32 {
                    let air_start = z;
                    while z < MAP_Z as i32 && !self.is_solid(x, y, z) {
                        z += 1;
                    }
                    let top_start = z;
                    while z < MAP_Z as i32 && self.is_surface(x, y, z) {
                        z += 1;
                    }
                    let top_end = z; // exclusive

                    // skip the hidden interior
                    while z < MAP_Z as i32 && self.is_solid(x, y, z) && !self.is_surface(x, y, z) {
                        z += 1;
                    }

                    // a surface run here belongs to this span only when
                    // air follows it; otherwise it opens the next span
                    let bottom_start = z;
                    let mut probe = z;
                    while probe < MAP_Z as i32 && self.is_surface(x, y, probe) {
                        probe += 1;
                    }
                    let bottom_end = if probe < MAP_Z as i32 && !self.is_solid(x, y, probe) {
                        z = probe;
                        probe
                    } else {
                        bottom_start
                    };

                    let len_top = top_end - top_start;
                    let len_bottom = bottom_end - bottom_start;
                    // a solid run ending in air always ends in a surface
                    // cell, so reaching the bottom here means the column
                    // is exhausted
                    let last = z == MAP_Z as i32;
                    let n = if last { 0 } else { 1 + len_top + len_bottom };

                    out.push(n as u8);
                    out.push(top_start as u8);
                    out.push((top_end - 1) as u8);
                    out.push(air_start as u8);
                    for zz in top_start..top_end {
                        push_bgra(&mut out, self.get_color(x, y, zz));
                    }
                    for zz in bottom_start..bottom_end {
                        push_bgra(&mut out, self.get_color(x, y, zz));
                    }
                    if last {
                        break;
                    }
                }
            }
        }
        out
    }

    /// Deflate the full dump for streaming to a loading client.
    pub fn compressed(&self) -> MapStream {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::best());
        enc.write_all(&self.to_vxl()).expect("vec write");
        MapStream { data: enc.finish().expect("vec finish"), pos: 0 }
    }
}

/// Compressed map bytes, handed out in wire-sized chunks.
pub struct MapStream {
    data: Vec<u8>,
    pos: usize,
}

impl MapStream {
    pub fn total_size(&self) -> usize {
        self.data.len()
    }

    pub fn next_chunk(&mut self, size: usize) -> Option<&[u8]> {
        if self.pos >= self.data.len() {
            return None;
        }
        let end = (self.pos + size).min(self.data.len());
        let chunk = &self.data[self.pos..end];
        self.pos = end;
        Some(chunk)
    }
}

fn sign(v: i64) -> i64 {
    if v < 0 {
        -1
    } else {
        1
    }
}

fn bgra(b: &[u8]) -> u32 {
    (b[3] as u32) << 24 | (b[2] as u32) << 16 | (b[1] as u32) << 8 | b[0] as u32
}

fn push_bgra(out: &mut Vec<u8>, argb: u32) {
    out.push(argb as u8);
    out.push((argb >> 8) as u8);
    out.push((argb >> 16) as u8);
    out.push((argb >> 24) as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_flat_map_floor() {
        let map = VxlMap::flat(64, 64);
        assert!(map.is_solid(10, 10, 63));
        assert!(map.is_solid(10, 10, 62));
        assert!(!map.is_solid(10, 10, 61));
        assert_eq!(map.get_z(10, 10, 0), 62);
    }

    #[test]
    fn test_build_rules() {
        let mut map = VxlMap::flat(64, 64);
        // floating cell with no neighbor support
        assert!(!map.can_build(5, 5, 30));
        // on top of the ground
        assert!(map.can_build(5, 5, 61));
        assert!(map.set_point(5, 5, 61, true, 0xFF112233));
        assert!(!map.can_build(5, 5, 61)); // occupied now
        // sideways attachment to the new block
        assert!(map.can_build(6, 5, 61));
        // water floor is immutable
        assert!(!map.set_point(5, 5, 63, true, 0));
        assert!(!map.can_destroy(5, 5, 63));
    }

    #[test]
    fn test_destroy_cascade() {
        let mut map = VxlMap::flat(64, 64);
        // a one-block pillar holding up a two-block arm
        map.set_point(10, 10, 61, true, 1);
        map.set_point(10, 10, 60, true, 1);
        map.set_point(10, 11, 60, true, 1);
        let removed = map.destroy_point(10, 10, 61);
        // pillar base gone, the rest was detached and swept
        assert_eq!(removed.len(), 3);
        assert!(!map.is_solid(10, 10, 60));
        assert!(!map.is_solid(10, 11, 60));
    }

    #[test]
    fn test_destroy_no_cascade_when_grounded() {
        let mut map = VxlMap::flat(64, 64);
        map.set_point(10, 10, 61, true, 1);
        map.set_point(10, 10, 60, true, 1);
        let removed = map.destroy_point(10, 10, 60);
        assert_eq!(removed, vec![(10, 10, 60)]);
        assert!(map.is_solid(10, 10, 61));
    }

    #[test]
    fn test_get_z_tracks_builds() {
        let mut map = VxlMap::flat(64, 64);
        map.set_point(7, 7, 50, true, 1);
        assert_eq!(map.get_z(7, 7, 0), 50);
        assert_eq!(map.get_z(7, 7, 51), 62);
    }

    #[test]
    fn test_block_line_straight_and_cap() {
        let map = VxlMap::flat(256, 256);
        let line = map.block_line((0, 10, 40), (9, 10, 40));
        assert_eq!(line.len(), 10);
        assert_eq!(line[0], (0, 10, 40));
        assert_eq!(line[9], (9, 10, 40));

        // 51 cells is one over the cap
        assert!(map.block_line((0, 0, 40), (50, 0, 40)).is_empty());
        assert_eq!(map.block_line((0, 0, 40), (49, 0, 40)).len(), 50);
    }

    #[test]
    fn test_block_line_diagonal_connected() {
        let map = VxlMap::flat(256, 256);
        let line = map.block_line((0, 0, 40), (10, 4, 42));
        assert_eq!(*line.first().unwrap(), (0, 0, 40));
        assert_eq!(*line.last().unwrap(), (10, 4, 42));
        for w in line.windows(2) {
            let (a, b) = (w[0], w[1]);
            let d = (a.0 - b.0).abs() + (a.1 - b.1).abs() + (a.2 - b.2).abs();
            assert_eq!(d, 1, "line must move one cell at a time");
        }
    }

    #[test]
    fn test_random_point_in_rect() {
        let map = VxlMap::flat(64, 64);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..32 {
            let (x, y, z) = map.random_point(&mut rng, 8, 8, 24, 24);
            assert!((8..24).contains(&x));
            assert!((8..24).contains(&y));
            assert_eq!(z, 62);
        }
    }

    #[test]
    fn test_vxl_roundtrip() {
        let mut map = VxlMap::flat(16, 16);
        map.set_point(3, 4, 61, true, 0xFF102030);
        map.set_point(3, 4, 60, true, 0xFF405060);
        map.set_point(8, 8, 30, true, 0xFF0A0B0C);
        map.set_point(8, 8, 31, true, 0xFF0D0E0F);

        let dump = map.to_vxl();
        let reloaded = VxlMap::from_vxl(&dump, 16, 16).unwrap();
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..MAP_Z as i32 {
                    assert_eq!(
                        map.is_solid(x, y, z),
                        reloaded.is_solid(x, y, z),
                        "solidity mismatch at ({x},{y},{z})"
                    );
                }
            }
        }
        assert_eq!(reloaded.get_color(3, 4, 61), 0xFF102030);
        assert_eq!(reloaded.get_color(8, 8, 30), 0xFF0A0B0C);

        // second generation must be byte-identical
        assert_eq!(reloaded.to_vxl(), dump);
    }

    #[test]
    fn test_compressed_stream_chunks() {
        let map = VxlMap::flat(32, 32);
        let mut stream = map.compressed();
        let total = stream.total_size();
        assert!(total > 0);
        let mut got = 0;
        while let Some(chunk) = stream.next_chunk(1024) {
            assert!(chunk.len() <= 1024);
            got += chunk.len();
        }
        assert_eq!(got, total);
    }
}
