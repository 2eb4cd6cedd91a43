// SPDX-License-Identifier: CEPL-1.0
//! Involute-style gear meshes emitted as one long triangle strip.
//!
//! Separate strips are stitched together with two degenerate vertices: the
//! last vertex of the previous strip and the first vertex of the next one.
//! The resulting strip can be drawn with `TRIANGLE_STRIP` and no primitive
//! restart.

use bytemuck::{Pod, Zeroable};
use std::f64::consts::PI;

/// Position followed by normal; 24 bytes per vertex.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GearVertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
}

pub const GEAR_VERTEX_STRIDE: usize = std::mem::size_of::<GearVertex>();

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GearParams {
    pub inner_radius: f32,
    pub outer_radius: f32,
    pub width: f32,
    pub teeth: u32,
    pub tooth_depth: f32,
}

impl GearParams {
    pub const TOOTH_DEPTH: f32 = 0.7;

    pub const fn new(inner_radius: f32, outer_radius: f32, width: f32, teeth: u32) -> Self {
        Self {
            inner_radius,
            outer_radius,
            width,
            teeth,
            tooth_depth: Self::TOOTH_DEPTH,
        }
    }

    /// Vertices emitted for this gear, degenerate joins included.
    pub const fn vertex_count(&self) -> u32 {
        46 * self.teeth + 10
    }
}

/// The three gears of the scene, in draw order.
pub const STANDARD_GEARS: [GearParams; 3] = [
    GearParams::new(1.0, 4.0, 1.0, 20),
    GearParams::new(0.5, 2.0, 2.0, 10),
    GearParams::new(1.3, 2.0, 0.5, 10),
];

#[derive(Clone, Debug, PartialEq)]
pub struct GearMesh {
    pub vertices: Vec<GearVertex>,
}

impl GearMesh {
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        self.vertex_count().saturating_sub(2)
    }
}

/// Slice of the shared vertex buffer belonging to one gear.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshRange {
    pub first_vertex: u32,
    pub vertex_count: u32,
}

/// All gears concatenated into one vertex array, plus where each one lives.
#[derive(Clone, Debug, PartialEq)]
pub struct GearSet {
    pub vertices: Vec<GearVertex>,
    pub ranges: [MeshRange; 3],
}

impl GearSet {
    pub fn standard() -> Self {
        Self::from_params(&STANDARD_GEARS)
    }

    pub fn from_params(params: &[GearParams; 3]) -> Self {
        let mut vertices = Vec::new();
        let mut ranges = [MeshRange {
            first_vertex: 0,
            vertex_count: 0,
        }; 3];
        for (range, p) in ranges.iter_mut().zip(params) {
            let mesh = create_gear(p);
            *range = MeshRange {
                first_vertex: vertices.len() as u32,
                vertex_count: mesh.vertex_count(),
            };
            vertices.extend_from_slice(&mesh.vertices);
        }
        Self { vertices, ranges }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

struct StripWriter {
    verts: Vec<GearVertex>,
    normal: [f32; 3],
    strip_start: usize,
}

impl StripWriter {
    fn with_capacity(n: usize) -> Self {
        Self {
            verts: Vec::with_capacity(n),
            normal: [0.0; 3],
            strip_start: 0,
        }
    }

    fn normal(&mut self, x: f64, y: f64, z: f64) {
        self.normal = [x as f32, y as f32, z as f32];
    }

    fn emit(&mut self, x: f64, y: f64, z: f64) {
        self.verts.push(GearVertex {
            pos: [x as f32, y as f32, z as f32],
            normal: self.normal,
        });
    }

    /// Reserves the two join vertices unless this is the very first strip.
    fn begin(&mut self) {
        self.strip_start = self.verts.len();
        if self.strip_start != 0 {
            self.verts.push(GearVertex::default());
            self.verts.push(GearVertex::default());
        }
    }

    fn end(&mut self) {
        let s = self.strip_start;
        if s != 0 {
            self.verts[s] = self.verts[s - 1];
            self.verts[s + 1] = self.verts[s + 2];
        }
    }
}

pub fn create_gear(p: &GearParams) -> GearMesh {
    let teeth = p.teeth as usize;
    let mut w = StripWriter::with_capacity(p.vertex_count() as usize);

    let r0 = p.inner_radius as f64;
    let r1 = p.outer_radius as f64 - p.tooth_depth as f64 / 2.0;
    let r2 = p.outer_radius as f64 + p.tooth_depth as f64 / 2.0;
    let hw = p.width as f64 * 0.5;
    let da = 2.0 * PI / p.teeth as f64 / 4.0;
    let angle_of = |i: usize| i as f64 * 2.0 * PI / p.teeth as f64;
    let at = |r: f64, a: f64| (r * a.cos(), r * a.sin());

    // front face
    w.normal(0.0, 0.0, 1.0);
    w.begin();
    for i in 0..=teeth {
        let a = angle_of(i);
        let (x0, y0) = at(r0, a);
        let (x1, y1) = at(r1, a);
        w.emit(x0, y0, hw);
        w.emit(x1, y1, hw);
        if i < teeth {
            let (x3, y3) = at(r1, a + 3.0 * da);
            w.emit(x0, y0, hw);
            w.emit(x3, y3, hw);
        }
    }
    w.end();

    // front sides of teeth
    for i in 0..teeth {
        let a = angle_of(i);
        w.begin();
        for (r, k) in [(r1, 0.0), (r2, 1.0), (r1, 3.0), (r2, 2.0)] {
            let (x, y) = at(r, a + k * da);
            w.emit(x, y, hw);
        }
        w.end();
    }

    // back face
    w.normal(0.0, 0.0, -1.0);
    w.begin();
    for i in 0..=teeth {
        let a = angle_of(i);
        let (x0, y0) = at(r0, a);
        let (x1, y1) = at(r1, a);
        w.emit(x1, y1, -hw);
        w.emit(x0, y0, -hw);
        if i < teeth {
            let (x3, y3) = at(r1, a + 3.0 * da);
            w.emit(x3, y3, -hw);
            w.emit(x0, y0, -hw);
        }
    }
    w.end();

    // back sides of teeth
    for i in 0..teeth {
        let a = angle_of(i);
        w.begin();
        for (r, k) in [(r1, 3.0), (r2, 2.0), (r1, 0.0), (r2, 1.0)] {
            let (x, y) = at(r, a + k * da);
            w.emit(x, y, -hw);
        }
        w.end();
    }

    // outward faces of teeth: rising flank, tip, falling flank, root land
    for i in 0..teeth {
        let a = angle_of(i);
        let flanks = [
            (r1, 0.0, r2, 1.0),
            (r2, 1.0, r2, 2.0),
            (r2, 2.0, r1, 3.0),
            (r1, 3.0, r1, 4.0),
        ];
        for (n, &(ra, ka, rb, kb)) in flanks.iter().enumerate() {
            let (xa, ya) = at(ra, a + ka * da);
            let (xb, yb) = at(rb, a + kb * da);
            if n % 2 == 0 {
                let (u, v) = (xb - xa, yb - ya);
                // the falling flank keeps its direction unnormalised
                let len = if n == 0 { (u * u + v * v).sqrt() } else { 1.0 };
                w.normal(v / len, -u / len, 0.0);
            } else {
                w.normal(a.cos(), a.sin(), 0.0);
            }
            w.begin();
            w.emit(xa, ya, hw);
            w.emit(xa, ya, -hw);
            w.emit(xb, yb, hw);
            w.emit(xb, yb, -hw);
            w.end();
        }
    }

    // inside radius cylinder
    w.begin();
    for i in 0..=teeth {
        let a = angle_of(i);
        let (x, y) = at(r0, a);
        w.normal(-a.cos(), -a.sin(), 0.0);
        w.emit(x, y, -hw);
        w.emit(x, y, hw);
    }
    w.end();

    GearMesh { vertices: w.verts }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_is_24_bytes() {
        assert_eq!(GEAR_VERTEX_STRIDE, 24);
    }

    #[test]
    fn counts_are_a_function_of_teeth() {
        for teeth in [3u32, 10, 20, 37] {
            let a = create_gear(&GearParams::new(1.0, 4.0, 1.0, teeth));
            let b = create_gear(&GearParams::new(0.2, 9.0, 3.0, teeth));
            assert_eq!(a.vertex_count(), 46 * teeth + 10);
            assert_eq!(a.vertex_count(), b.vertex_count());
            assert_eq!(a.triangle_count(), a.vertex_count() - 2);
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let p = GearParams::new(1.0, 4.0, 1.0, 20);
        let a = create_gear(&p);
        let b = create_gear(&p);
        assert_eq!(
            bytemuck::cast_slice::<_, u8>(&a.vertices),
            bytemuck::cast_slice::<_, u8>(&b.vertices)
        );
    }

    #[test]
    fn strip_joins_are_degenerate() {
        let mesh = create_gear(&GearParams::new(1.0, 4.0, 1.0, 20));
        let v = &mesh.vertices;
        // front face strip is 4*20+2 long, the first tooth strip follows
        let s = 4 * 20 + 2;
        assert_eq!(v[s], v[s - 1]);
        assert_eq!(v[s + 1], v[s + 2]);
    }

    #[test]
    fn faces_carry_axial_normals() {
        let mesh = create_gear(&GearParams::new(1.0, 4.0, 1.0, 20));
        assert_eq!(mesh.vertices[0].normal, [0.0, 0.0, 1.0]);
        assert_eq!(mesh.vertices[0].pos[2], 0.5);
        let back = mesh
            .vertices
            .iter()
            .find(|v| v.normal == [0.0, 0.0, -1.0])
            .copied();
        assert!(matches!(back, Some(v) if v.pos[2] == -0.5));
    }

    #[test]
    fn vertices_stay_inside_the_tooth_tip_radius() {
        let p = GearParams::new(1.0, 4.0, 1.0, 20);
        let tip = p.outer_radius + p.tooth_depth / 2.0 + 1e-4;
        for v in create_gear(&p).vertices {
            let r = (v.pos[0] * v.pos[0] + v.pos[1] * v.pos[1]).sqrt();
            assert!(r >= p.inner_radius - 1e-4 && r <= tip, "radius {r}");
        }
    }

    #[test]
    fn standard_set_is_contiguous() {
        let set = GearSet::standard();
        assert_eq!(set.ranges[0], MeshRange { first_vertex: 0, vertex_count: 930 });
        assert_eq!(set.ranges[1], MeshRange { first_vertex: 930, vertex_count: 470 });
        assert_eq!(set.ranges[2], MeshRange { first_vertex: 1400, vertex_count: 470 });
        assert_eq!(set.vertices.len(), 1870);
        assert_eq!(set.as_bytes().len(), 1870 * 24);
    }
}
