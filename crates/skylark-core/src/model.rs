//! Small-angle rigid-body dynamics shared by both estimators.

use crate::config::VehicleParams;
use crate::estimator::{Covariance, StateVector, ALTITUDE, ATTITUDE, POSITION, RATES, VELOCITY};
use crate::wrench::BodyWrench;
use crate::Scalar;
use nalgebra::{SMatrix, Vector4};

pub type InputMatrix = SMatrix<Scalar, 12, 4>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RigidBodyModel {
    params: VehicleParams,
}

impl RigidBodyModel {
    pub fn new(params: VehicleParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &VehicleParams {
        &self.params
    }

    pub fn set_params(&mut self, params: VehicleParams) {
        self.params = params;
    }

    /// Gyroscopic coupling coefficients `[(Iy−Iz)/Ix, (Iz−Ix)/Iy, (Ix−Iy)/Iz]`.
    fn coupling(&self) -> [Scalar; 3] {
        let i = &self.params.inertia;
        [(i.y - i.z) / i.x, (i.z - i.x) / i.y, (i.x - i.y) / i.z]
    }

    /// `f(x, w)`
    pub fn derivative(&self, x: &StateVector, wrench: &BodyWrench) -> StateVector {
        let [phi, theta, psi, p, q, r, u, v, w, ..] = components(x);
        let [a1, a2, a3] = self.coupling();
        let i = &self.params.inertia;
        let g = self.params.gravity;
        let tau = &wrench.torque;

        let mut dx = StateVector::zeros();
        dx[ATTITUDE] = p + r * theta + q * phi * theta;
        dx[ATTITUDE + 1] = q - r * phi;
        dx[ATTITUDE + 2] = r + q * phi;

        dx[RATES] = a1 * q * r + tau.x / i.x;
        dx[RATES + 1] = a2 * p * r + tau.y / i.y;
        dx[RATES + 2] = a3 * p * q + tau.z / i.z;

        dx[VELOCITY] = r * v - q * w - g * theta;
        dx[VELOCITY + 1] = p * w - r * u + g * phi;
        dx[VELOCITY + 2] = q * u - p * v + g - wrench.thrust / self.params.mass;

        dx[POSITION] = w * (phi * psi + theta) - v * (psi - phi * theta) + u;
        dx[POSITION + 1] = v * (1.0 + phi * psi * theta) - w * (phi - psi * theta) + u * psi;
        dx[ALTITUDE] = w - u * theta + v * phi;
        dx
    }

    /// `∂f/∂x` at `x`. The wrench enters affinely and drops out.
    pub fn jacobian(&self, x: &StateVector) -> Covariance {
        let [phi, theta, psi, p, q, r, u, v, w, ..] = components(x);
        let [a1, a2, a3] = self.coupling();
        let g = self.params.gravity;

        let mut f = Covariance::zeros();

        // Attitude kinematics
        f[(0, 0)] = q * theta;
        f[(0, 1)] = r + q * phi;
        f[(0, 3)] = 1.0;
        f[(0, 4)] = phi * theta;
        f[(0, 5)] = theta;

        f[(1, 0)] = -r;
        f[(1, 4)] = 1.0;
        f[(1, 5)] = -phi;

        f[(2, 0)] = q;
        f[(2, 4)] = phi;
        f[(2, 5)] = 1.0;

        // Euler equations
        f[(3, 4)] = a1 * r;
        f[(3, 5)] = a1 * q;
        f[(4, 3)] = a2 * r;
        f[(4, 5)] = a2 * p;
        f[(5, 3)] = a3 * q;
        f[(5, 4)] = a3 * p;

        // Translational dynamics
        f[(6, 1)] = -g;
        f[(6, 4)] = -w;
        f[(6, 5)] = v;
        f[(6, 7)] = r;
        f[(6, 8)] = -q;

        f[(7, 0)] = g;
        f[(7, 3)] = w;
        f[(7, 5)] = -u;
        f[(7, 6)] = -r;
        f[(7, 8)] = p;

        f[(8, 3)] = -v;
        f[(8, 4)] = u;
        f[(8, 6)] = q;
        f[(8, 7)] = -p;

        // Navigation
        f[(9, 0)] = w * psi + v * theta;
        f[(9, 1)] = w + v * phi;
        f[(9, 2)] = w * phi - v;
        f[(9, 6)] = 1.0;
        f[(9, 7)] = -psi + phi * theta;
        f[(9, 8)] = phi * psi + theta;

        f[(10, 0)] = v * psi * theta - w;
        f[(10, 1)] = v * phi * psi + w * psi;
        f[(10, 2)] = v * phi * theta + w * theta + u;
        f[(10, 6)] = psi;
        f[(10, 7)] = 1.0 + phi * psi * theta;
        f[(10, 8)] = -phi + psi * theta;

        f[(11, 0)] = v;
        f[(11, 1)] = -u;
        f[(11, 6)] = -theta;
        f[(11, 7)] = phi;
        f[(11, 8)] = 1.0;

        f
    }

    /// Jacobian at the trim point (hover, every state zero).
    pub fn hover_dynamics(&self) -> Covariance {
        let g = self.params.gravity;
        let mut f = Covariance::zeros();
        f.fixed_view_mut::<3, 3>(ATTITUDE, RATES).fill_diagonal(1.0);
        f.fixed_view_mut::<3, 3>(POSITION, VELOCITY).fill_diagonal(1.0);
        f[(VELOCITY, ATTITUDE + 1)] = -g;
        f[(VELOCITY + 1, ATTITUDE)] = g;
        f
    }

    /// Maps `[T − m·g, τx, τy, τz]` onto state accelerations.
    pub fn input_matrix(&self) -> InputMatrix {
        let i = &self.params.inertia;
        let mut b = InputMatrix::zeros();
        b[(VELOCITY + 2, 0)] = -1.0 / self.params.mass;
        b[(RATES, 1)] = 1.0 / i.x;
        b[(RATES + 1, 2)] = 1.0 / i.y;
        b[(RATES + 2, 3)] = 1.0 / i.z;
        b
    }

    /// Wrench as a deviation from the hover trim, ordered like [`Self::input_matrix`].
    pub fn trim_input(&self, wrench: &BodyWrench) -> Vector4<Scalar> {
        Vector4::new(
            wrench.thrust - self.params.mass * self.params.gravity,
            wrench.torque.x,
            wrench.torque.y,
            wrench.torque.z,
        )
    }

    /// Wrench holding the vehicle at hover.
    pub fn hover_wrench(&self) -> BodyWrench {
        BodyWrench {
            thrust: self.params.mass * self.params.gravity,
            ..BodyWrench::default()
        }
    }
}

impl Default for RigidBodyModel {
    fn default() -> Self {
        Self::new(VehicleParams::default())
    }
}

fn components(x: &StateVector) -> [Scalar; 12] {
    let mut c = [0.0; 12];
    c.copy_from_slice(x.as_slice());
    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn sample_state() -> StateVector {
        StateVector::from_column_slice(&[
            0.12, -0.08, 0.3, 0.4, -0.25, 0.15, 1.2, -0.7, 0.5, 3.0, -2.0, -5.0,
        ])
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let model = RigidBodyModel::default();
        let x = sample_state();
        let wrench = BodyWrench {
            torque: Vector3::new(0.01, -0.02, 0.005),
            thrust: 14.0,
        };
        let analytic = model.jacobian(&x);

        let h = 1e-6;
        for j in 0..12 {
            let mut xp = x;
            let mut xm = x;
            xp[j] += h;
            xm[j] -= h;
            let col = (model.derivative(&xp, &wrench) - model.derivative(&xm, &wrench)) / (2.0 * h);
            for i in 0..12 {
                let err = (col[i] - analytic[(i, j)]).abs();
                assert!(err < 1e-6, "F[{i},{j}]: numeric {} analytic {}", col[i], analytic[(i, j)]);
            }
        }
    }

    #[test]
    fn test_hover_jacobian_matches_trim_model() {
        let model = RigidBodyModel::default();
        assert_eq!(model.jacobian(&StateVector::zeros()), model.hover_dynamics());
    }

    #[test]
    fn test_hover_is_equilibrium() {
        let model = RigidBodyModel::default();
        let dx = model.derivative(&StateVector::zeros(), &model.hover_wrench());
        assert!(dx.norm() < 1e-12, "hover drifts: {dx:?}");
        assert_eq!(model.trim_input(&model.hover_wrench()), Vector4::zeros());
    }

    #[test]
    fn test_linear_model_matches_nonlinear_near_trim() {
        let model = RigidBodyModel::default();
        let x = sample_state() * 1e-4;
        let wrench = BodyWrench {
            torque: Vector3::new(1e-4, -2e-4, 5e-5),
            thrust: model.hover_wrench().thrust + 0.01,
        };
        let nonlinear = model.derivative(&x, &wrench);
        let linear = model.hover_dynamics() * x + model.input_matrix() * model.trim_input(&wrench);
        assert!((nonlinear - linear).norm() < 1e-6);
    }

    #[test]
    fn test_thrust_accelerates_up() {
        let model = RigidBodyModel::default();
        let mut wrench = model.hover_wrench();
        wrench.thrust *= 1.5;
        let dx = model.derivative(&StateVector::zeros(), &wrench);
        assert!(dx[VELOCITY + 2] < 0.0, "z is down, climbing means negative ẇ");
    }
}
