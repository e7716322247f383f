//! Euler-Bernoulli beam mode shapes and their superposition.
//!
//! Mode shapes are written with the clamped end at `x = -L/2` and the
//! coordinate measured from mid-span. The hyperbolic terms are evaluated
//! with the dominant exponential `e^(beta L)` factored out so that large
//! `beta L` neither overflows nor loses the bounded trigonometric part to
//! cancellation.

use crate::error::{PlatemeshError, Result};

/// Number of samples used to bound `max |phi_j|` over the span
const ENVELOPE_SAMPLES: usize = 2049;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mode {
    pub coeff: f64,
    pub beta: f64,
}

/// Parameters of a superposition of mode shapes on a beam of given length
#[derive(Debug, Clone, PartialEq)]
pub struct DeformationModel {
    pub length: f64,
    pub modes: Vec<Mode>,
    pub offset: f64,
}

/// Shared pieces of the stable form for one `(beta, L)` pair
struct ModeTerms {
    /// `sin a - cos a - e^-a`, with `a = beta L`
    k: f64,
    /// `1 - e^-2a + 2 e^-a sin a`
    d: f64,
    /// `1 - C`
    one_minus_c: f64,
    a: f64,
}

impl ModeTerms {
    fn new(length: f64, beta: f64) -> ModeTerms {
        let a = beta * length;
        let ea = (-a).exp();
        let k = a.sin() - a.cos() - ea;
        let d = 1.0 - ea * ea + 2.0 * ea * a.sin();
        let one_minus_c = 2.0 * ea * k / d;

        ModeTerms {
            k,
            d,
            one_minus_c,
            a,
        }
    }
}

/// Computes `C_j = (cosh a + cos a) / (sinh a + sin a)` for `a = beta L`
pub fn mode_constant(length: f64, beta: f64) -> f64 {
    1.0 - ModeTerms::new(length, beta).one_minus_c
}

/// Evaluates a single mode shape `phi_j` at `x`, measured from mid-span
///
/// # Arguments
/// * `length` - Beam length L
/// * `beta` - Wavenumber of the mode, a root of the characteristic equation
/// * `x` - Coordinate in `[-L/2, L/2]`
pub fn mode_shape(length: f64, beta: f64, x: f64) -> f64 {
    let terms = ModeTerms::new(length, beta);
    let u = beta * (x + 0.5 * length);

    // cosh u - C sinh u = (1-C) e^u / 2 + (1+C) e^-u / 2
    let hyperbolic = terms.k * (u - terms.a).exp() / terms.d
        + (-u).exp() * (1.0 - 0.5 * terms.one_minus_c);

    hyperbolic - u.cos() + (1.0 - terms.one_minus_c) * u.sin()
}

impl DeformationModel {
    /// Builds a model from the first `n` coefficient/wavenumber pairs
    ///
    /// # Arguments
    /// * `length` - Beam length L
    /// * `coeffs` - Mode coefficients
    /// * `betas` - Mode wavenumbers
    /// * `n` - Number of modes to use
    /// * `offset` - Constant deflection added to the superposition
    pub fn new(
        length: f64,
        coeffs: &[f64],
        betas: &[f64],
        n: usize,
        offset: f64,
    ) -> Result<DeformationModel> {
        if !(length.is_finite() && length > 0.0) {
            return Err(PlatemeshError::Parameter(format!(
                "beam length must be positive, got {length}"
            )));
        }
        if n > coeffs.len() || n > betas.len() {
            return Err(PlatemeshError::Parameter(format!(
                "mode count n={n} exceeds supplied coefficients ({}) or wavenumbers ({})",
                coeffs.len(),
                betas.len()
            )));
        }
        if !offset.is_finite() {
            return Err(PlatemeshError::Parameter(format!(
                "deflection offset must be finite, got {offset}"
            )));
        }

        let mut modes = Vec::with_capacity(n);
        for (j, (&coeff, &beta)) in coeffs.iter().zip(betas).take(n).enumerate() {
            if !coeff.is_finite() {
                return Err(PlatemeshError::Parameter(format!(
                    "coeff({}) must be finite, got {coeff}",
                    j + 1
                )));
            }
            if !(beta.is_finite() && beta > 0.0) {
                return Err(PlatemeshError::Parameter(format!(
                    "beta({}) must be positive, got {beta}",
                    j + 1
                )));
            }
            modes.push(Mode { coeff, beta });
        }

        Ok(DeformationModel {
            length,
            modes,
            offset,
        })
    }

    /// Total deflection `w(x) = offset + sum_j coeff_j phi_j(x)`
    pub fn deflection(&self, x: f64) -> f64 {
        self.modes.iter().fold(self.offset, |w, mode| {
            w + mode.coeff * mode_shape(self.length, mode.beta, x)
        })
    }

    /// Upper bound on `|w(x)|` over the span: `|offset| + sum_j |coeff_j| max|phi_j|`
    pub fn envelope(&self) -> f64 {
        let half = 0.5 * self.length;
        let step = self.length / (ENVELOPE_SAMPLES - 1) as f64;

        self.modes.iter().fold(self.offset.abs(), |bound, mode| {
            let peak = (0..ENVELOPE_SAMPLES)
                .map(|i| mode_shape(self.length, mode.beta, -half + i as f64 * step).abs())
                .fold(0.0, f64::max);
            bound + mode.coeff.abs() * peak
        })
    }

    pub fn is_flat(&self) -> bool {
        self.offset == 0.0 && self.modes.iter().all(|m| m.coeff == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    const L: f64 = 100.0;
    const BETAS: [f64; 4] = [0.018751, 0.046941, 0.078548, 0.109955];

    fn textbook(length: f64, beta: f64, x: f64) -> f64 {
        let a = beta * length;
        let u = beta * (x + 0.5 * length);
        let c = (a.cosh() + a.cos()) / (a.sinh() + a.sin());
        u.cosh() - u.cos() - c * (u.sinh() - u.sin())
    }

    #[test]
    fn matches_textbook_form_for_moderate_arguments() {
        for &beta in &BETAS {
            for &x in &[-50.0, -20.0, 0.0, 13.3, 50.0] {
                assert_abs_diff_eq!(mode_shape(L, beta, x), textbook(L, beta, x), epsilon = 1e-9);
            }
            let a = beta * L;
            assert_relative_eq!(
                mode_constant(L, beta),
                (a.cosh() + a.cos()) / (a.sinh() + a.sin()),
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn clamped_end_is_fixed_and_free_end_reaches_two() {
        for &beta in &BETAS {
            assert_abs_diff_eq!(mode_shape(L, beta, -50.0), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(mode_shape(L, beta, 50.0).abs(), 2.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn stays_finite_for_large_beta_length() {
        // beta L = 100: the textbook form cancels e^100-sized terms
        for &x in &[-50.0, -10.0, 0.0, 25.0, 50.0] {
            let value = mode_shape(L, 1.0, x);
            assert!(value.is_finite());
            assert!(value.abs() < 3.0, "phi({x}) = {value}");
        }
        // beta L = 1000 overflows cosh in the textbook form
        assert!(mode_shape(L, 10.0, 50.0).is_finite());
    }

    #[test]
    fn superposition_is_linear_in_coefficients() {
        let coeffs = [-0.075, -0.075, -0.15, 0.15];
        let model = DeformationModel::new(L, &coeffs, &BETAS, 4, 0.0).unwrap();
        for &k in &[-3.0, 0.5, 2.0, 10.0] {
            let scaled: Vec<f64> = coeffs.iter().map(|c| c * k).collect();
            let scaled_model = DeformationModel::new(L, &scaled, &BETAS, 4, 0.0).unwrap();
            for &x in &[-50.0, -12.5, 0.0, 31.0, 50.0] {
                assert_relative_eq!(
                    scaled_model.deflection(x),
                    k * model.deflection(x),
                    max_relative = 1e-12,
                    epsilon = 1e-15
                );
            }
        }
    }

    #[test]
    fn deflection_respects_envelope() {
        let model =
            DeformationModel::new(L, &[-0.075, -0.075, -0.15, 0.15], &BETAS, 4, 0.0).unwrap();
        let bound = model.envelope();
        assert!(bound > 0.0 && bound <= 0.45 * 2.01);
        for i in 0..=400 {
            let x = -50.0 + i as f64 * 0.25;
            assert!(model.deflection(x).abs() <= bound + 1e-12);
        }
    }

    #[test]
    fn uses_only_first_n_modes() {
        let model = DeformationModel::new(L, &[0.1, 5.0], &[0.018751, 0.046941], 1, 0.0).unwrap();
        assert_eq!(model.modes.len(), 1);
        assert_relative_eq!(model.deflection(50.0), 0.1 * mode_shape(L, 0.018751, 50.0));
    }

    #[test]
    fn rejects_inadmissible_parameters() {
        assert!(matches!(
            DeformationModel::new(L, &[0.1], &[0.02], 2, 0.0),
            Err(PlatemeshError::Parameter(_))
        ));
        assert!(matches!(
            DeformationModel::new(L, &[0.1], &[-0.02], 1, 0.0),
            Err(PlatemeshError::Parameter(_))
        ));
        assert!(matches!(
            DeformationModel::new(0.0, &[0.1], &[0.02], 1, 0.0),
            Err(PlatemeshError::Parameter(_))
        ));
    }
}
