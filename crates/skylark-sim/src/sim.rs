use nalgebra::{Matrix3, Matrix4, UnitQuaternion, Vector3, Vector4};
use skylark_core::config::{SmootherTuning, VehicleParams, WrenchCoefficients};
use skylark_core::wrench::{BodyWrench, WrenchEstimator};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------
pub const DT: f64 = 0.001; // 1kHz physics

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A waypoint held from `time` onwards (NED, m).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub time: f64,
    pub position: Vector3<f64>,
}

#[derive(Debug, Clone)]
pub struct QuadParams {
    pub vehicle: VehicleParams,
    /// Motor map the actuator outputs are generated with.
    pub wrench: WrenchCoefficients,
    /// Motors stay off until this time (s).
    pub arm_time: f64,
    pub duration: f64,
    pub waypoints: Vec<Waypoint>,
    /// Constant wind acceleration (m/s², NED).
    pub disturbance: Vector3<f64>,
}

impl Default for QuadParams {
    fn default() -> Self {
        Self {
            vehicle: VehicleParams::default(),
            wrench: WrenchCoefficients::extended(),
            arm_time: 2.0,
            duration: 30.0,
            waypoints: vec![
                Waypoint {
                    time: 2.0,
                    position: Vector3::new(0.0, 0.0, -10.0),
                },
                Waypoint {
                    time: 10.0,
                    position: Vector3::new(20.0, 10.0, -15.0),
                },
                Waypoint {
                    time: 20.0,
                    position: Vector3::new(0.0, 20.0, -10.0),
                },
            ],
            disturbance: Vector3::zeros(),
        }
    }
}

impl QuadParams {
    fn setpoint(&self, t: f64) -> Vector3<f64> {
        self.waypoints
            .iter()
            .rev()
            .find(|w| t >= w.time)
            .map(|w| w.position)
            .unwrap_or_else(Vector3::zeros)
    }
}

// ---------------------------------------------------------------------------
// Rigid-body State
// ---------------------------------------------------------------------------
#[derive(Clone, Debug)]
pub struct State {
    pub t: f64,
    pub pos_w: Vector3<f64>,      // Position (World NED)
    pub vel_w: Vector3<f64>,      // Velocity (World NED)
    pub att: UnitQuaternion<f64>, // Attitude (Body FRD -> World NED)
    pub ang_vel_b: Vector3<f64>,  // Angular Velocity (Body Frame)
}

impl State {
    fn new() -> Self {
        Self {
            t: 0.0,
            pos_w: Vector3::zeros(),
            vel_w: Vector3::zeros(),
            att: UnitQuaternion::identity(),
            ang_vel_b: Vector3::zeros(),
        }
    }

    fn on_ground(&self) -> bool {
        self.pos_w.z >= 0.0
    }
}

// ---------------------------------------------------------------------------
// Simulation Result
// ---------------------------------------------------------------------------
#[derive(Clone, Default)]
pub struct SimResult {
    pub time: Vec<f64>,
    pub pos: Vec<Vector3<f64>>,
    pub vel: Vec<Vector3<f64>>,
    pub specific_force: Vec<Vector3<f64>>, // What the accelerometer sees (FRD)
    pub ang_vel: Vec<Vector3<f64>>,
    pub orientation: Vec<UnitQuaternion<f64>>,
    /// Motor outputs, `None` while disarmed.
    pub outputs: Vec<Option<[f64; 4]>>,
}

impl SimResult {
    /// Truth sample closest to `t`.
    pub fn index_at(&self, t: f64) -> Option<usize> {
        if self.time.is_empty() || t < 0.0 {
            return None;
        }
        let i = (t / DT).round() as usize;
        Some(i.min(self.time.len() - 1))
    }
}

// ---------------------------------------------------------------------------
// Controller & Mixer
// ---------------------------------------------------------------------------
const POS_KP: f64 = 1.2;
const POS_KD: f64 = 1.8;
const MAX_TILT: f64 = 0.35;
const ATT_KP: f64 = 40.0;
const ATT_KD: f64 = 10.0;

/// Cascaded PD: position error to tilt and thrust, tilt error to torque.
fn control(s: &State, p: &QuadParams) -> BodyWrench {
    let v = &p.vehicle;
    let a_des = (p.setpoint(s.t) - s.pos_w) * POS_KP - s.vel_w * POS_KD;

    let (roll, pitch, yaw) = s.att.euler_angles();
    let (sy, cy) = yaw.sin_cos();
    let ax_body = a_des.x * cy + a_des.y * sy;
    let ay_body = -a_des.x * sy + a_des.y * cy;
    let pitch_sp = (-ax_body / v.gravity).clamp(-MAX_TILT, MAX_TILT);
    let roll_sp = (ay_body / v.gravity).clamp(-MAX_TILT, MAX_TILT);

    let tilt = (roll.cos() * pitch.cos()).max(0.5);
    let thrust = (v.mass * (v.gravity - a_des.z) / tilt).max(0.0);

    let err = Vector3::new(roll_sp - roll, pitch_sp - pitch, -yaw);
    let torque = v
        .inertia
        .component_mul(&(err * ATT_KP - s.ang_vel_b * ATT_KD));

    BodyWrench { torque, thrust }
}

/// Per-motor `u²` for a wrench, inverting the motor map used by the estimator.
fn mixer(coeffs: &WrenchCoefficients) -> Option<Matrix4<f64>> {
    let WrenchCoefficients {
        thrust_coeff: b,
        arm_length: l,
        drag_coeff: d,
        channel_gain: g,
    } = *coeffs;
    #[rustfmt::skip]
    let m = Matrix4::new(
        0.0,          0.0,          -g[0] * b * l, g[0] * b * l,
        -g[1] * b * l, g[1] * b * l, 0.0,          0.0,
        g[2] * d,     g[2] * d,     -g[2] * d,    -g[2] * d,
        g[3] * b,     g[3] * b,     g[3] * b,     g[3] * b,
    );
    m.try_inverse()
}

pub fn motor_outputs(wrench: &BodyWrench, inverse_mixer: &Matrix4<f64>) -> [f64; 4] {
    let w = Vector4::new(wrench.torque.x, wrench.torque.y, wrench.torque.z, wrench.thrust);
    let u2 = inverse_mixer * w;
    [0, 1, 2, 3].map(|i| u2[i].max(0.0).sqrt())
}

// ---------------------------------------------------------------------------
// Physics Engine
// ---------------------------------------------------------------------------
struct Derivative {
    d_pos: Vector3<f64>,
    d_vel: Vector3<f64>,
    d_att: Vector3<f64>, // Angular velocity vector for quaternion integration
    d_ang_vel: Vector3<f64>,
    // Aux
    specific_force_b: Vector3<f64>,
}

fn calculate_derivative(s: &State, p: &QuadParams, wrench: &BodyWrench) -> Derivative {
    let v = &p.vehicle;
    let g_w = Vector3::new(0.0, 0.0, v.gravity); // Down

    // Thrust along body -z
    let thrust_w = s.att.transform_vector(&Vector3::new(0.0, 0.0, -wrench.thrust));
    let mut accel_w = thrust_w / v.mass + g_w + p.disturbance;

    let i_mat = Matrix3::from_diagonal(&v.inertia);
    let gyroscopic = s.ang_vel_b.cross(&(i_mat * s.ang_vel_b));
    let mut ang_accel_b = (wrench.torque - gyroscopic).component_div(&v.inertia);

    // Ground contact: held until thrust lifts off
    if s.on_ground() && accel_w.z >= 0.0 {
        accel_w = Vector3::zeros();
        ang_accel_b = Vector3::zeros();
    }

    Derivative {
        d_pos: s.vel_w,
        d_vel: accel_w,
        d_att: s.ang_vel_b,
        d_ang_vel: ang_accel_b,
        specific_force_b: s.att.inverse_transform_vector(&(accel_w - g_w)),
    }
}

// ---------------------------------------------------------------------------
// Main Loop
// ---------------------------------------------------------------------------
pub fn simulate_quad(p: &QuadParams) -> SimResult {
    let mut s = State::new();
    let max_steps = (p.duration / DT).round() as usize;
    let inverse_mixer = mixer(&p.wrench);
    // Same motor map the estimator applies to the published outputs
    let motor_map = WrenchEstimator::new(p.wrench, SmootherTuning::default());
    if inverse_mixer.is_none() {
        tracing::warn!("motor map not invertible, motors stay off");
    }

    let mut res = SimResult {
        time: Vec::with_capacity(max_steps),
        pos: Vec::with_capacity(max_steps),
        vel: Vec::with_capacity(max_steps),
        specific_force: Vec::with_capacity(max_steps),
        ang_vel: Vec::with_capacity(max_steps),
        orientation: Vec::with_capacity(max_steps),
        outputs: Vec::with_capacity(max_steps),
    };

    for k in 0..max_steps {
        // Zero-order hold on the motors over the step
        let outputs = match &inverse_mixer {
            Some(inv) if s.t >= p.arm_time => Some(motor_outputs(&control(&s, p), inv)),
            _ => None,
        };
        let wrench = outputs
            .map(|u| motor_map.gained_wrench(&u))
            .unwrap_or_default();

        res.time.push(s.t);
        res.pos.push(s.pos_w);
        res.vel.push(s.vel_w);
        res.ang_vel.push(s.ang_vel_b);
        res.orientation.push(s.att);
        res.outputs.push(outputs);

        // RK4 Step
        let k1 = calculate_derivative(&s, p, &wrench);
        res.specific_force.push(k1.specific_force_b);

        let s2 = step_state(&s, &k1, DT * 0.5);
        let k2 = calculate_derivative(&s2, p, &wrench);

        let s3 = step_state(&s, &k2, DT * 0.5);
        let k3 = calculate_derivative(&s3, p, &wrench);

        let s4 = step_state(&s, &k3, DT);
        let k4 = calculate_derivative(&s4, p, &wrench);

        s.pos_w += (k1.d_pos + k2.d_pos * 2.0 + k3.d_pos * 2.0 + k4.d_pos) * (DT / 6.0);
        s.vel_w += (k1.d_vel + k2.d_vel * 2.0 + k3.d_vel * 2.0 + k4.d_vel) * (DT / 6.0);
        s.ang_vel_b +=
            (k1.d_ang_vel + k2.d_ang_vel * 2.0 + k3.d_ang_vel * 2.0 + k4.d_ang_vel) * (DT / 6.0);

        // dq/dt = 0.5 * q * omega, mean rate over the step
        let w_mean = (k1.d_att + k2.d_att * 2.0 + k3.d_att * 2.0 + k4.d_att) / 6.0;
        s.att *= UnitQuaternion::from_scaled_axis(w_mean * DT);

        // Ground
        if s.pos_w.z > 0.0 {
            s.pos_w.z = 0.0;
            s.vel_w = Vector3::zeros();
            s.ang_vel_b = Vector3::zeros();
        }

        s.t = (k + 1) as f64 * DT;
    }

    res
}

fn step_state(s: &State, d: &Derivative, dt: f64) -> State {
    let mut ns = s.clone();
    ns.t += dt;
    ns.pos_w += d.d_pos * dt;
    ns.vel_w += d.d_vel * dt;
    ns.ang_vel_b += d.d_ang_vel * dt;
    ns.att *= UnitQuaternion::from_scaled_axis(d.d_att * dt);
    ns
}
