//! Euler angle kinematics with explicit forward integration.

use std::f64::consts::FRAC_PI_2;

/// Largest pitch magnitude the integrator works with (about 89.94 deg).
///
/// `tan(theta)` and `1 / cos(theta)` blow up at +/-90 deg. Pitch is clamped to
/// this limit on the way in and on the way out, so a vehicle driven into the
/// singularity parks just short of it with finite rates.
pub const PITCH_LIMIT: f64 = FRAC_PI_2 - 1.0e-3;

/// Result of one attitude integration step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttitudeStep {
    pub phi: f64,
    pub theta: f64,
    /// Yaw change over the step, to be added to psi.
    pub psi_increment: f64,
    /// Pitch hit [`PITCH_LIMIT`] on input or output.
    pub clamped: bool,
}

/// Advance roll and pitch by one step of `dt` and return the yaw increment.
///
/// ```text
/// phidot   = p + q sin(phi) tan(theta) + r cos(phi) tan(theta)
/// thetadot = q cos(phi) - r sin(phi)
/// psidot   = (q sin(phi) + r cos(phi)) / cos(theta)
/// ```
pub fn integrate(phi: f64, theta: f64, p: f64, q: f64, r: f64, dt: f64) -> AttitudeStep {
    let theta_in = theta.clamp(-PITCH_LIMIT, PITCH_LIMIT);

    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_theta = theta_in.tan();
    let cos_theta = theta_in.cos();

    let phidot = p + q * sin_phi * tan_theta + r * cos_phi * tan_theta;
    let thetadot = q * cos_phi - r * sin_phi;
    let psidot = q * sin_phi / cos_theta + r * cos_phi / cos_theta;

    let theta_raw = theta_in + thetadot * dt;
    let theta_next = theta_raw.clamp(-PITCH_LIMIT, PITCH_LIMIT);

    AttitudeStep {
        phi: phi + phidot * dt,
        theta: theta_next,
        psi_increment: psidot * dt,
        clamped: theta_in != theta || theta_next != theta_raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.01;

    #[test]
    fn test_zero_rates_hold_attitude() {
        let (mut phi, mut theta, mut psi) = (0.3, -0.2, 1.1);
        for _ in 0..1000 {
            let step = integrate(phi, theta, 0.0, 0.0, 0.0, DT);
            phi = step.phi;
            theta = step.theta;
            psi += step.psi_increment;
            assert!(!step.clamped);
        }
        assert_eq!((phi, theta, psi), (0.3, -0.2, 1.1));
    }

    #[test]
    fn test_level_attitude_maps_rates_directly() {
        let step = integrate(0.0, 0.0, 0.5, 0.2, -0.1, DT);
        assert!((step.phi - 0.005).abs() < 1e-15);
        assert!((step.theta - 0.002).abs() < 1e-15);
        assert!((step.psi_increment + 0.001).abs() < 1e-15);
    }

    #[test]
    fn test_rolled_attitude_couples_pitch_and_yaw() {
        // At 90 deg roll, a body pitch rate turns into yaw
        let step = integrate(FRAC_PI_2, 0.0, 0.0, 1.0, 0.0, DT);
        assert!(step.theta.abs() < 1e-12);
        assert!((step.psi_increment - DT).abs() < 1e-12);
    }

    #[test]
    fn test_pitch_singularity_is_clamped() {
        let step = integrate(0.2, FRAC_PI_2, 0.1, 0.3, 0.4, DT);
        assert!(step.clamped);
        assert!(step.phi.is_finite());
        assert!(step.theta.is_finite() && step.theta.abs() <= PITCH_LIMIT);
        assert!(step.psi_increment.is_finite());
    }

    #[test]
    fn test_pitch_cannot_integrate_past_limit() {
        let mut theta = 0.0;
        let mut clamped = false;
        for _ in 0..1000 {
            let step = integrate(0.0, theta, 0.0, 1.0, 0.0, DT);
            theta = step.theta;
            clamped |= step.clamped;
        }
        assert!(clamped);
        assert_eq!(theta, PITCH_LIMIT);
    }
}
