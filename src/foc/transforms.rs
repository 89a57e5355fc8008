// Coordinate transformations for FOC (Field Oriented Control)
// Clarke (uvw ↔ αβ) and table-driven Park (αβ ↔ dq)

use libm::sqrtf;

use crate::config::SIN_TABLE_LEN;

/// √(2/3)
const C11: f32 = 0.816_496_6;
/// 1/√6
const C12: f32 = 0.408_248_3;
/// 1/√2
const C22: f32 = core::f32::consts::FRAC_1_SQRT_2;

/// Quarter period of the sine table (π/2)
pub const QUARTER_PERIOD: u16 = SIN_TABLE_LEN / 4;

/// Precomputed sine table over one electrical period
///
/// Index `i` represents the angle `2π·i / SIN_TABLE_LEN`.
#[derive(Debug, Clone)]
pub struct SinTable {
    table: [f32; SIN_TABLE_LEN as usize],
}

impl SinTable {
    /// Build the table
    ///
    /// # Implementation
    /// Entries come from idsp::cossin() and are renormalised so that
    /// sin² + cos² = 1 at every index.
    pub fn new() -> Self {
        const SHIFT: u32 = 32 - SIN_TABLE_LEN.trailing_zeros();
        const I32_TO_F32: f32 = 1.0 / 2147483648.0; // 1 / 2^31

        let mut table = [0.0f32; SIN_TABLE_LEN as usize];
        for (i, entry) in table.iter_mut().enumerate() {
            // [0, 2π) → i32 phase (full scale wraps to -π)
            let phase = ((i as u32) << SHIFT) as i32;
            let (cos_i32, sin_i32) = idsp::cossin(phase);
            let cos = cos_i32 as f32 * I32_TO_F32;
            let sin = sin_i32 as f32 * I32_TO_F32;
            let norm = sqrtf(cos * cos + sin * sin);
            *entry = if norm > 0.0 { sin / norm } else { sin };
        }
        Self { table }
    }

    /// sin at `index` (wraps at the table length)
    #[inline]
    pub fn sin(&self, index: u16) -> f32 {
        self.table[(index % SIN_TABLE_LEN) as usize]
    }

    /// cos at `index`, read a quarter period ahead
    #[inline]
    pub fn cos(&self, index: u16) -> f32 {
        let shifted = (index as u32 % SIN_TABLE_LEN as u32 + QUARTER_PERIOD as u32)
            % SIN_TABLE_LEN as u32;
        self.table[shifted as usize]
    }

    /// (sin, cos) pair at `index`
    #[inline]
    pub fn sin_cos(&self, index: u16) -> (f32, f32) {
        (self.sin(index), self.cos(index))
    }
}

impl Default for SinTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Clarke transformation (uvw → αβ), amplitude invariant
///
/// # Arguments
/// * `u`, `v`, `w` - Phase quantities
///
/// # Returns
/// Tuple of (alpha, beta)
pub fn clarke(u: f32, v: f32, w: f32) -> (f32, f32) {
    let alpha = C11 * u - C12 * v - C12 * w;
    let beta = C22 * v - C22 * w;
    (alpha, beta)
}

/// Inverse Clarke transformation (αβ → uvw)
///
/// # Arguments
/// * `alpha` - Alpha-axis quantity
/// * `beta` - Beta-axis quantity
///
/// # Returns
/// Tuple of (u, v, w) three-phase quantities
pub fn inverse_clarke(alpha: f32, beta: f32) -> (f32, f32, f32) {
    let u = C11 * alpha;
    let v = -C12 * alpha + C22 * beta;
    let w = -C12 * alpha - C22 * beta;
    (u, v, w)
}

/// Park transformation (αβ → dq)
///
/// # Arguments
/// * `alpha`, `beta` - Stationary-frame quantities
/// * `index` - Electrical angle as a sine table index
/// * `table` - Sine table
///
/// # Returns
/// Tuple of (d, q)
pub fn park(alpha: f32, beta: f32, index: u16, table: &SinTable) -> (f32, f32) {
    let (sin, cos) = table.sin_cos(index);
    let d = cos * alpha + sin * beta;
    let q = -sin * alpha + cos * beta;
    (d, q)
}

/// Inverse Park transformation (dq → αβ)
///
/// # Arguments
/// * `d` - d-axis quantity (aligned with rotor flux)
/// * `q` - q-axis quantity (torque producing)
/// * `index` - Electrical angle as a sine table index
/// * `table` - Sine table
///
/// # Returns
/// Tuple of (alpha, beta)
pub fn inverse_park(d: f32, q: f32, index: u16, table: &SinTable) -> (f32, f32) {
    let (sin, cos) = table.sin_cos(index);
    let alpha = cos * d - sin * q;
    let beta = sin * d + cos * q;
    (alpha, beta)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 0.0001;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn index_to_radians(index: u16) -> f32 {
        (index % SIN_TABLE_LEN) as f32 * core::f32::consts::TAU / SIN_TABLE_LEN as f32
    }

    #[test]
    fn test_table_quadrants() {
        let table = SinTable::new();
        assert!(approx_eq(table.sin(0), 0.0));
        assert!(approx_eq(table.cos(0), 1.0));
        assert!(approx_eq(table.sin(QUARTER_PERIOD), 1.0));
        assert!(approx_eq(table.cos(QUARTER_PERIOD), 0.0));
        assert!(approx_eq(table.sin(SIN_TABLE_LEN / 2), 0.0));
        assert!(approx_eq(table.cos(SIN_TABLE_LEN / 2), -1.0));
        // cos of the last index wraps to the start of the table
        assert!(approx_eq(table.cos(SIN_TABLE_LEN - 1), table.sin(QUARTER_PERIOD - 1)));
    }

    #[test]
    fn test_index_wraps() {
        let table = SinTable::new();
        assert_eq!(table.sin(SIN_TABLE_LEN + 5), table.sin(5));
        assert_eq!(table.cos(SIN_TABLE_LEN + 5), table.cos(5));
    }

    #[test]
    fn test_clarke_round_trip() {
        for &(u, v) in &[(1.0f32, -0.5f32), (0.3, 0.2), (-2.0, 1.5), (0.0, 0.0)] {
            let w = -u - v;
            let (alpha, beta) = clarke(u, v, w);
            let (u2, v2, w2) = inverse_clarke(alpha, beta);
            assert!(approx_eq(u, u2));
            assert!(approx_eq(v, v2));
            assert!(approx_eq(w, w2));
        }
    }

    #[test]
    fn test_inverse_clarke() {
        let (u, v, w) = inverse_clarke(1.0, 0.0);
        assert!(approx_eq(u, 0.816_496_6));
        assert!(approx_eq(v, -0.408_248_3));
        assert!(approx_eq(w, -0.408_248_3));
        // Sum should be zero for balanced three-phase
        assert!(approx_eq(u + v + w, 0.0));
    }

    #[test]
    fn test_park_zero_angle() {
        let table = SinTable::new();
        let (d, q) = park(1.0, 0.5, 0, &table);
        assert!(approx_eq(d, 1.0));
        assert!(approx_eq(q, 0.5));
    }

    #[test]
    fn test_park_quarter_turn() {
        let table = SinTable::new();
        let (d, q) = park(0.0, 1.0, QUARTER_PERIOD, &table);
        assert!(approx_eq(d, 1.0));
        assert!(approx_eq(q, 0.0));
    }

    #[test]
    fn test_park_round_trip_all_indices() {
        let table = SinTable::new();
        for index in (0..SIN_TABLE_LEN).step_by(7) {
            let (d, q) = park(0.7, -0.4, index, &table);
            let (alpha, beta) = inverse_park(d, q, index, &table);
            assert!(approx_eq(alpha, 0.7));
            assert!(approx_eq(beta, -0.4));
        }
    }

    #[test]
    fn test_table_matches_libm() {
        let table = SinTable::new();
        for index in (0..SIN_TABLE_LEN).step_by(13) {
            let angle = index_to_radians(index);
            assert!(approx_eq(table.sin(index), libm::sinf(angle)));
            assert!(approx_eq(table.cos(index), libm::cosf(angle)));
        }
    }
}
