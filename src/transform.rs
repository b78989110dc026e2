use cv_core::{
    nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector2, Vector3},
    sample_consensus::{Estimator, Model},
};
use derive_more::{AsRef, Deref, From, Into};
use float_ord::FloatOrd;

/// A keypoint in one frame and the location of the same feature in another frame.
///
/// A [`Transform`] estimated from these matches maps `.0` onto `.1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMatch(pub Point2<f64>, pub Point2<f64>);

/// A projective transform of the image plane in homogeneous pixel coordinates.
///
/// Similarity transforms are stored the same way with an affine last row.
#[derive(Debug, Clone, Copy, PartialEq, AsRef, Deref, From, Into)]
pub struct Transform(pub Matrix3<f64>);

impl Transform {
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    /// The transform that applies `inner` first and then `self`.
    pub fn compose(&self, inner: &Transform) -> Transform {
        Transform(self.0 * inner.0)
    }

    pub fn inverse(&self) -> Option<Transform> {
        self.0.try_inverse().map(Transform)
    }

    /// Map a point, returning `None` if it lands on the line at infinity.
    pub fn apply(&self, point: &Point2<f64>) -> Option<Point2<f64>> {
        let p = self.0 * Vector3::new(point.x, point.y, 1.0);
        if p.z.abs() < 1e-12 {
            None
        } else {
            Some(Point2::new(p.x / p.z, p.y / p.z))
        }
    }

    /// The factor by which the transform scales areas near the origin.
    pub fn area_scale(&self) -> f64 {
        let m = &self.0;
        (m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]) / (m[(2, 2)] * m[(2, 2)])
    }

    /// Maximum absolute element-wise difference to the identity.
    pub fn distance_to_identity(&self) -> f64 {
        let normalized = self.0 / self.0[(2, 2)];
        (normalized - Matrix3::identity()).amax()
    }

    /// The row-major single precision matrix used by `imageproc` projections.
    pub fn to_row_major(&self) -> [f32; 9] {
        let m = &self.0;
        let mut out = [0.0f32; 9];
        for row in 0..3 {
            for col in 0..3 {
                out[row * 3 + col] = m[(row, col)] as f32;
            }
        }
        out
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Model<PointMatch> for Transform {
    /// Reprojection error in pixels.
    fn residual(&self, data: &PointMatch) -> f64 {
        let &PointMatch(a, b) = data;
        self.apply(&a)
            .map(|projected| (projected - b).norm())
            .unwrap_or(f64::INFINITY)
    }
}

/// Least squares similarity (rotation, uniform scale, translation) estimation.
///
/// Points are treated as complex numbers so that the model `b = m * a + c` has the
/// closed form solution `m = Σ (b - b̄) conj(a - ā) / Σ |a - ā|²`. Two matches
/// determine the model exactly; more matches give the least squares fit.
#[derive(Copy, Clone, Debug)]
pub struct Similarity {
    pub epsilon: f64,
}

impl Similarity {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_matches<I>(&self, data: I) -> Option<Transform>
    where
        I: Iterator<Item = PointMatch> + Clone,
    {
        let n = data.clone().count();
        if n < 2 {
            return None;
        }
        let (sum_a, sum_b) = data.clone().fold(
            (Vector2::zeros(), Vector2::zeros()),
            |(sa, sb): (Vector2<f64>, Vector2<f64>), PointMatch(a, b)| (sa + a.coords, sb + b.coords),
        );
        let mean_a = sum_a / n as f64;
        let mean_b = sum_b / n as f64;

        let (mut re, mut im, mut den) = (0.0, 0.0, 0.0);
        for PointMatch(a, b) in data {
            let a = a.coords - mean_a;
            let b = b.coords - mean_b;
            re += b.x * a.x + b.y * a.y;
            im += b.y * a.x - b.x * a.y;
            den += a.norm_squared();
        }
        if den < self.epsilon {
            return None;
        }
        let (mr, mi) = (re / den, im / den);
        let cx = mean_b.x - (mr * mean_a.x - mi * mean_a.y);
        let cy = mean_b.y - (mi * mean_a.x + mr * mean_a.y);
        Some(Transform(Matrix3::new(
            mr, -mi, cx, //
            mi, mr, cy, //
            0.0, 0.0, 1.0,
        )))
    }
}

impl Default for Similarity {
    fn default() -> Self {
        Self { epsilon: 1e-9 }
    }
}

impl Estimator<PointMatch> for Similarity {
    type Model = Transform;
    type ModelIter = Option<Transform>;
    const MIN_SAMPLES: usize = 2;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = PointMatch> + Clone,
    {
        self.from_matches(data)
    }
}

/// Normalized direct linear transform estimation of a homography.
///
/// Both point sets are conditioned (centroid at the origin, mean distance `√2`)
/// before the null vector of the stacked constraint matrix is found.
#[derive(Copy, Clone, Debug)]
pub struct Homography {
    pub epsilon: f64,
    pub iterations: usize,
}

impl Homography {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_matches<I>(&self, data: I) -> Option<Transform>
    where
        I: Iterator<Item = PointMatch> + Clone,
    {
        let ta = conditioning(data.clone().map(|PointMatch(a, _)| a))?;
        let tb = conditioning(data.clone().map(|PointMatch(_, b)| b))?;

        let mut design = SMatrix::<f64, 9, 9>::zeros();
        let mut n = 0;
        for PointMatch(a, b) in data {
            let a = ta * Vector3::new(a.x, a.y, 1.0);
            let b = tb * Vector3::new(b.x, b.y, 1.0);
            let (x, y, u, v) = (a.x, a.y, b.x, b.y);
            let rows = [
                SVector::<f64, 9>::from_column_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]),
                SVector::<f64, 9>::from_column_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]),
            ];
            for row in rows.iter() {
                design += row * row.transpose();
            }
            n += 1;
        }
        if n < 4 {
            return None;
        }

        let eigens = design.try_symmetric_eigen(self.epsilon, self.iterations)?;
        let h = eigens
            .eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &value)| FloatOrd(value))
            .map(|(ix, _)| eigens.eigenvectors.column(ix).into_owned())?;
        let normalized = Matrix3::from_row_slice(h.as_slice());
        let h = tb.try_inverse()? * normalized * ta;
        if h[(2, 2)].abs() < self.epsilon || h.determinant().abs() < self.epsilon {
            return None;
        }
        Some(Transform(h / h[(2, 2)]))
    }
}

impl Default for Homography {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }
}

impl Estimator<PointMatch> for Homography {
    type Model = Transform;
    type ModelIter = Option<Transform>;
    const MIN_SAMPLES: usize = 4;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = PointMatch> + Clone,
    {
        self.from_matches(data)
    }
}

/// The similarity that moves the centroid of `points` to the origin with a mean distance of `√2`.
fn conditioning(points: impl Iterator<Item = Point2<f64>> + Clone) -> Option<Matrix3<f64>> {
    let n = points.clone().count();
    if n == 0 {
        return None;
    }
    let centroid = points
        .clone()
        .fold(Vector2::zeros(), |acc: Vector2<f64>, p| acc + p.coords)
        / n as f64;
    let mean_distance = points.map(|p| (p.coords - centroid).norm()).sum::<f64>() / n as f64;
    if mean_distance < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_distance;
    Some(Matrix3::new(
        s, 0.0, -s * centroid.x, //
        0.0, s, -s * centroid.y, //
        0.0, 0.0, 1.0,
    ))
}
