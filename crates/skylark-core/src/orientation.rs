//! Gradient-descent (Madgwick) orientation filter.
//!
//! The quaternion rotates body (FRD) vectors into the local NED frame. The
//! filter integrates `½ q ⊗ ω` and subtracts a normalised gradient step of the
//! gravity objective, plus the magnetic-field objective in the MARG variant.

use crate::Scalar;
use nalgebra::{Quaternion, SMatrix, SVector, UnitQuaternion, Vector3};

#[cfg(not(feature = "std"))]
use nalgebra::ComplexField as _;

/// Norm below which an input vector is treated as missing.
pub const MIN_VECTOR_NORM: Scalar = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationStatus {
    Updated,
    SkippedDegenerate,
}

#[derive(Clone, Copy, Debug)]
pub struct OrientationFilter {
    q: UnitQuaternion<Scalar>,
    beta: Scalar,
}

impl OrientationFilter {
    pub fn new(beta: Scalar) -> Self {
        Self {
            q: UnitQuaternion::identity(),
            beta,
        }
    }

    pub fn quaternion(&self) -> &UnitQuaternion<Scalar> {
        &self.q
    }

    pub fn beta(&self) -> Scalar {
        self.beta
    }

    pub fn set_beta(&mut self, beta: Scalar) {
        self.beta = beta;
    }

    pub fn reset(&mut self) {
        self.q = UnitQuaternion::identity();
    }

    /// `(roll, pitch, yaw)` of the current quaternion.
    pub fn euler_angles(&self) -> Vector3<Scalar> {
        let (roll, pitch, yaw) = self.q.euler_angles();
        Vector3::new(roll, pitch, yaw)
    }

    /// Accelerometer + gyroscope + magnetometer update.
    pub fn update_marg(
        &mut self,
        specific_force: Vector3<Scalar>,
        gyro: Vector3<Scalar>,
        mag: Vector3<Scalar>,
        dt: Scalar,
    ) -> OrientationStatus {
        let Some(down) = gravity_direction(specific_force) else {
            return OrientationStatus::SkippedDegenerate;
        };
        let mag_norm = mag.norm();
        if mag_norm < MIN_VECTOR_NORM || !(dt > 0.0) {
            return OrientationStatus::SkippedDegenerate;
        }
        let m = mag / mag_norm;

        let [q1, q2, q3, q4] = components(&self.q);

        // Earth-frame field, flattened onto the x-z plane
        let h = self.q.transform_vector(&m);
        let bx = (h.x * h.x + h.y * h.y).sqrt();
        let bz = h.z;

        let mut f = SVector::<Scalar, 6>::zeros();
        f.fixed_rows_mut::<3>(0)
            .copy_from(&(gravity_objective(q1, q2, q3, q4) - down));
        f.fixed_rows_mut::<3>(3).copy_from(&(
            Vector3::new(
                2.0 * bx * (0.5 - q3 * q3 - q4 * q4) + 2.0 * bz * (q2 * q4 - q1 * q3),
                2.0 * bx * (q2 * q3 - q1 * q4) + 2.0 * bz * (q1 * q2 + q3 * q4),
                2.0 * bx * (q1 * q3 + q2 * q4) + 2.0 * bz * (0.5 - q2 * q2 - q3 * q3),
            ) - m
        ));

        let mut j = SMatrix::<Scalar, 6, 4>::zeros();
        j.fixed_view_mut::<3, 4>(0, 0)
            .copy_from(&gravity_jacobian(q1, q2, q3, q4));
        #[rustfmt::skip]
        let j_b = SMatrix::<Scalar, 3, 4>::new(
            -2.0 * bz * q3,                 2.0 * bz * q4,                  -4.0 * bx * q3 - 2.0 * bz * q1, -4.0 * bx * q4 + 2.0 * bz * q2,
            -2.0 * bx * q4 + 2.0 * bz * q2, 2.0 * bx * q3 + 2.0 * bz * q1,  2.0 * bx * q2 + 2.0 * bz * q4,  -2.0 * bx * q1 + 2.0 * bz * q3,
            2.0 * bx * q3,                  2.0 * bx * q4 - 4.0 * bz * q2,  2.0 * bx * q1 - 4.0 * bz * q3,  2.0 * bx * q2,
        );
        j.fixed_view_mut::<3, 4>(3, 0).copy_from(&j_b);

        self.integrate(j.transpose() * f, gyro, dt);
        OrientationStatus::Updated
    }

    /// Accelerometer + gyroscope update, no magnetic correction.
    pub fn update_imu(
        &mut self,
        specific_force: Vector3<Scalar>,
        gyro: Vector3<Scalar>,
        dt: Scalar,
    ) -> OrientationStatus {
        let Some(down) = gravity_direction(specific_force) else {
            return OrientationStatus::SkippedDegenerate;
        };
        if !(dt > 0.0) {
            return OrientationStatus::SkippedDegenerate;
        }
        let [q1, q2, q3, q4] = components(&self.q);
        let f = gravity_objective(q1, q2, q3, q4) - down;
        let step = gravity_jacobian(q1, q2, q3, q4).transpose() * f;

        self.integrate(step, gyro, dt);
        OrientationStatus::Updated
    }

    fn integrate(&mut self, gradient: SVector<Scalar, 4>, gyro: Vector3<Scalar>, dt: Scalar) {
        let q = self.q.into_inner();
        let mut q_dot = (q * Quaternion::from_imag(gyro)) * 0.5;

        // Zero gradient: measured and predicted directions already agree
        let grad_norm = gradient.norm();
        if grad_norm > Scalar::EPSILON {
            let s = gradient / grad_norm;
            q_dot -= Quaternion::new(s[0], s[1], s[2], s[3]) * self.beta;
        }

        self.q = UnitQuaternion::new_normalize(q + q_dot * dt);
    }
}

impl Default for OrientationFilter {
    fn default() -> Self {
        Self::new(crate::config::EstimatorTuning::extended().beta)
    }
}

/// Unit vector along gravity in the body frame, from an FRD specific-force reading.
fn gravity_direction(specific_force: Vector3<Scalar>) -> Option<Vector3<Scalar>> {
    let norm = specific_force.norm();
    if norm < MIN_VECTOR_NORM {
        None
    } else {
        // A level accelerometer reads -g along +z (down)
        Some(-specific_force / norm)
    }
}

/// `[w, x, y, z]`
fn components(q: &UnitQuaternion<Scalar>) -> [Scalar; 4] {
    [q.w, q.i, q.j, q.k]
}

/// Earth z axis expressed in the body frame.
fn gravity_objective(q1: Scalar, q2: Scalar, q3: Scalar, q4: Scalar) -> Vector3<Scalar> {
    Vector3::new(
        2.0 * (q2 * q4 - q1 * q3),
        2.0 * (q1 * q2 + q3 * q4),
        2.0 * (0.5 - q2 * q2 - q3 * q3),
    )
}

fn gravity_jacobian(q1: Scalar, q2: Scalar, q3: Scalar, q4: Scalar) -> SMatrix<Scalar, 3, 4> {
    #[rustfmt::skip]
    let j = SMatrix::<Scalar, 3, 4>::new(
        -2.0 * q3, 2.0 * q4,  -2.0 * q1, 2.0 * q2,
        2.0 * q2,  2.0 * q1,  2.0 * q4,  2.0 * q3,
        0.0,       -4.0 * q2, -4.0 * q3, 0.0,
    );
    j
}
