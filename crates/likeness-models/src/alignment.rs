//! Five-point face alignment to the ArcFace 112x112 template.

use image::{Rgb, RgbImage};
use likeness_core::Landmarks;

/// ArcFace reference landmarks for a 112x112 crop.
pub const REFERENCE_LANDMARKS_112: Landmarks = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [a -b; b a] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Similarity {
    /// Least-squares fit of scale, rotation and translation mapping `src`
    /// onto `dst`. `None` when the source points are all coincident.
    pub fn estimate(src: &Landmarks, dst: &Landmarks) -> Option<Self> {
        let n = src.len() as f64;
        let centroid = |pts: &Landmarks| {
            let (sx, sy) = pts
                .iter()
                .fold((0.0f64, 0.0f64), |(ax, ay), &(x, y)| (ax + f64::from(x), ay + f64::from(y)));
            (sx / n, sy / n)
        };
        let (scx, scy) = centroid(src);
        let (dcx, dcy) = centroid(dst);

        let mut spread = 0.0;
        let mut dot = 0.0;
        let mut cross = 0.0;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (px, py) = (f64::from(sx) - scx, f64::from(sy) - scy);
            let (qx, qy) = (f64::from(dx) - dcx, f64::from(dy) - dcy);
            spread += px * px + py * py;
            dot += px * qx + py * qy;
            cross += px * qy - py * qx;
        }
        if spread < 1e-12 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Self {
            a,
            b,
            tx: dcx - (a * scx - b * scy),
            ty: dcy - (b * scx + a * scy),
        })
    }

    pub fn apply(&self, (x, y): (f64, f64)) -> (f64, f64) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (ia, ib) = (self.a / det, -self.b / det);
        Some(Self {
            a: ia,
            b: ib,
            tx: -(ia * self.tx - ib * self.ty),
            ty: -(ib * self.tx + ia * self.ty),
        })
    }
}

/// Warp the face described by `landmarks` into a 112x112 aligned crop.
///
/// Samples outside the source image are black. Returns `None` for
/// degenerate landmarks.
pub fn align_face(image: &RgbImage, landmarks: &Landmarks) -> Option<RgbImage> {
    let forward = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112)?;
    let inverse = forward.inverse()?;
    Some(warp(image, &inverse, ALIGNED_SIZE))
}

fn warp(image: &RgbImage, to_source: &Similarity, size: u32) -> RgbImage {
    let (w, h) = (i64::from(image.width()), i64::from(image.height()));
    let sample = |x: i64, y: i64, c: usize| -> f64 {
        if (0..w).contains(&x) && (0..h).contains(&y) {
            f64::from(image.get_pixel(x as u32, y as u32)[c])
        } else {
            0.0
        }
    };

    RgbImage::from_fn(size, size, |ox, oy| {
        let (sx, sy) = to_source.apply((f64::from(ox), f64::from(oy)));
        let (x0, y0) = (sx.floor(), sy.floor());
        let (fx, fy) = (sx - x0, sy - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);

        let mut px = [0u8; 3];
        for (c, out) in px.iter_mut().enumerate() {
            let v = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, c) * fx * fy;
            *out = v.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let m = Similarity::estimate(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112).unwrap();
        assert!((m.a - 1.0).abs() < 1e-9);
        assert!(m.b.abs() < 1e-9);
        assert!(m.tx.abs() < 1e-6);
        assert!(m.ty.abs() < 1e-6);
    }

    #[test]
    fn test_scaled_transform() {
        let src: Landmarks = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0 + 10.0, y * 2.0 - 4.0));
        let m = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112).unwrap();
        assert!((m.a - 0.5).abs() < 1e-6, "a = {}", m.a);
        assert!(m.b.abs() < 1e-6);
        let (x, y) = m.apply((f64::from(src[2].0), f64::from(src[2].1)));
        assert!((x - f64::from(REFERENCE_LANDMARKS_112[2].0)).abs() < 1e-3);
        assert!((y - f64::from(REFERENCE_LANDMARKS_112[2].1)).abs() < 1e-3);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let m = Similarity { a: 0.8, b: 0.3, tx: 5.0, ty: -2.0 };
        let inv = m.inverse().unwrap();
        let (x, y) = inv.apply(m.apply((17.0, 42.0)));
        assert!((x - 17.0).abs() < 1e-9);
        assert!((y - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_landmarks() {
        let collapsed: Landmarks = [(10.0, 10.0); 5];
        assert!(Similarity::estimate(&collapsed, &REFERENCE_LANDMARKS_112).is_none());
        let image = RgbImage::new(64, 64);
        assert!(align_face(&image, &collapsed).is_none());
    }

    #[test]
    fn test_bright_patch_lands_on_reference_eye() {
        let src: Landmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        let mut image = RgbImage::new(200, 200);
        for y in 58..=62 {
            for x in 78..=82 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        let aligned = align_face(&image, &src).unwrap();
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));

        let (ex, ey) = REFERENCE_LANDMARKS_112[0];
        let (ex, ey) = (ex.round() as u32, ey.round() as u32);
        let brightest = (ey - 1..=ey + 1)
            .flat_map(|y| (ex - 1..=ex + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[0])
            .max()
            .unwrap_or(0);
        assert!(brightest > 100, "max = {brightest}");
    }
}
