// dq cross-coupling compensation

/// Feed-forward voltages cancelling the dq cross-coupling and back-EMF
///
/// # Arguments
/// * `id`, `iq` - Measured dq currents [A]
/// * `omega_e` - Electrical angular speed [rad/s]
/// * `inductance` - Winding inductance [H]
/// * `back_emf` - Back-EMF constant Ke [V·s/rad]
///
/// # Returns
/// Tuple of (vd_comp, vq_comp) added to the current regulator outputs
pub fn decoupling(id: f32, iq: f32, omega_e: f32, inductance: f32, back_emf: f32) -> (f32, f32) {
    let vd_comp = -omega_e * inductance * iq;
    let vq_comp = omega_e * (inductance * id + back_emf);
    (vd_comp, vq_comp)
}
