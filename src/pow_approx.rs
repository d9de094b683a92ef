//! Tabulated power-function approximations for the normalization hot path.
//!
//! `powf` is too slow to call once per sample when thousands of oscillators
//! are summed every buffer. Instead each cache builds a linearly-interpolated
//! lookup table for a fixed exponent, rebuilding only when the exponent (or,
//! for the shifted cache, the domain base) changes — which happens only on a
//! parameter update, never inside the per-buffer hot loop.

const LUT_SIZE: usize = 512;
/// Width of the shifted cache's domain, `[base, base + DOMAIN_SIZE]`.
const SHIFTED_DOMAIN_SIZE: f32 = 1.25;
const FAST_PATH_EPS: f32 = 1e-3;

fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
    (a - b).abs() <= eps
}

/// A `[0, 1]`-domain power cache, used for the volume-weighting exponent.
#[derive(Debug, Clone)]
pub struct UnitPow {
    expo: f32,
    lut: Vec<f32>,
}

impl UnitPow {
    pub fn new(expo: f32) -> Self {
        let mut s = Self { expo: f32::NAN, lut: Vec::new() };
        s.rebuild(expo);
        s
    }

    /// Rebuilds the table for a new exponent. Cheap to call rarely; never
    /// call this from the per-sample hot path.
    pub fn rebuild(&mut self, expo: f32) {
        if approx_eq(expo, self.expo, FAST_PATH_EPS) {
            return;
        }

        self.expo = expo;
        self.lut.clear();
        self.lut.reserve(LUT_SIZE);

        let inv_n = 1.0 / (LUT_SIZE - 1) as f32;
        for i in 0..LUT_SIZE {
            let t = i as f32 * inv_n;
            self.lut.push(t.powf(expo));
        }
    }

    /// Evaluates `x.clamp(0,1).powf(self.expo)`, using exact fast paths for
    /// the common exponents `{1, 2, 3, 4}` and linear LUT interpolation
    /// otherwise.
    #[inline]
    pub fn eval(&self, x: f32) -> f32 {
        let x = x.clamp(0.0, 1.0);

        if approx_eq(self.expo, 1.0, FAST_PATH_EPS) {
            return x;
        }
        if approx_eq(self.expo, 2.0, FAST_PATH_EPS) {
            return x * x;
        }
        if approx_eq(self.expo, 3.0, FAST_PATH_EPS) {
            return x * x * x;
        }
        if approx_eq(self.expo, 4.0, FAST_PATH_EPS) {
            let x2 = x * x;
            return x2 * x2;
        }

        let f = x * (LUT_SIZE - 1) as f32;
        let idx = f as usize;
        if idx >= LUT_SIZE - 1 {
            return self.lut[LUT_SIZE - 1];
        }
        let t = f - idx as f32;
        let y0 = self.lut[idx];
        let y1 = self.lut[idx + 1];
        y0 + (y1 - y0) * t
    }
}

/// A `[base, base + DOMAIN_SIZE]`-domain power cache, used for the
/// normalization curve of the additive orchestrator (§4.E step 8).
#[derive(Debug, Clone)]
pub struct ShiftedPow {
    base: f32,
    expo: f32,
    lut: Vec<f32>,
}

impl ShiftedPow {
    pub fn new(base: f32, expo: f32) -> Self {
        let mut s = Self { base: f32::NAN, expo: f32::NAN, lut: Vec::new() };
        s.rebuild(base, expo);
        s
    }

    pub fn rebuild(&mut self, base: f32, expo: f32) {
        if approx_eq(base, self.base, FAST_PATH_EPS) && approx_eq(expo, self.expo, FAST_PATH_EPS) {
            return;
        }

        self.base = base;
        self.expo = expo;
        self.lut.clear();
        self.lut.reserve(LUT_SIZE);

        let inv_n = 1.0 / (LUT_SIZE - 1) as f32;
        for i in 0..LUT_SIZE {
            let t01 = i as f32 * inv_n;
            let x = base + t01 * SHIFTED_DOMAIN_SIZE;
            self.lut.push(x.powf(expo));
        }
    }

    /// Evaluates `x.powf(self.expo)`, with exact fast paths for `expo ≈ {1,
    /// 0.5, 2}` and falling back to `powf` outright if `x` lies outside the
    /// cached domain (rare in steady state).
    #[inline]
    pub fn eval(&self, x: f32) -> f32 {
        if approx_eq(self.expo, 1.0, FAST_PATH_EPS) {
            return x;
        }
        if approx_eq(self.expo, 0.5, FAST_PATH_EPS) {
            return x.max(0.0).sqrt();
        }
        if approx_eq(self.expo, 2.0, FAST_PATH_EPS) {
            return x * x;
        }

        let lo = self.base;
        let hi = self.base + SHIFTED_DOMAIN_SIZE;
        if x < lo || x > hi {
            return x.powf(self.expo);
        }

        let t01 = (x - self.base) / SHIFTED_DOMAIN_SIZE;
        let f = t01 * (LUT_SIZE - 1) as f32;
        let idx = f as usize;
        if idx >= LUT_SIZE - 1 {
            return self.lut[LUT_SIZE - 1];
        }
        let t = f - idx as f32;
        let y0 = self.lut[idx];
        let y1 = self.lut[idx + 1];
        y0 + (y1 - y0) * t
    }
}
