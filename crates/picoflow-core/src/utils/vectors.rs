use auto_ops::{impl_op_ex, impl_op_ex_commutative};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Pseudorapidity returned for momenta along the beam axis.
const BEAM_AXIS_PSEUDORAPIDITY: f64 = 10e10;

/// A Cartesian 3-vector, used for track momenta.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// The $`x`$-component
    pub x: f64,
    /// The $`y`$-component
    pub y: f64,
    /// The $`z`$-component (along the beam)
    pub z: f64,
}

impl Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:6.3}, {:6.3}, {:6.3}]", self.x, self.y, self.z)
    }
}

impl Vec3 {
    /// Create a new 3-vector from its components
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Build a momentum from transverse momentum, azimuth and pseudorapidity.
    pub fn from_pt_eta_phi(pt: f64, eta: f64, phi: f64) -> Self {
        Self {
            x: pt * phi.cos(),
            y: pt * phi.sin(),
            z: pt * eta.sinh(),
        }
    }

    /// Dot product of two vectors
    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// The squared magnitude of the vector
    pub fn mag2(&self) -> f64 {
        self.dot(self)
    }

    /// The magnitude of the vector
    pub fn mag(&self) -> f64 {
        self.mag2().sqrt()
    }

    /// The transverse component $`\sqrt{x^2 + y^2}`$
    pub fn pt(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// The cosine of the polar angle
    pub fn costheta(&self) -> f64 {
        let mag = self.mag();
        if mag == 0.0 {
            1.0
        } else {
            self.z / mag
        }
    }

    /// The azimuthal angle in $`(-\pi, \pi]`$, zero for the null vector
    pub fn phi(&self) -> f64 {
        if self.x == 0.0 && self.y == 0.0 {
            0.0
        } else {
            self.y.atan2(self.x)
        }
    }

    /// The pseudorapidity $`-\ln\tan(\theta/2)`$.
    ///
    /// Vectors along the beam axis return $`\pm 10^{11}`$ (zero for the null vector) rather than
    /// an infinity.
    pub fn pseudorapidity(&self) -> f64 {
        let costheta = self.costheta();
        if costheta * costheta < 1.0 {
            -0.5 * ((1.0 - costheta) / (1.0 + costheta)).ln()
        } else if self.z == 0.0 {
            0.0
        } else if self.z > 0.0 {
            BEAM_AXIS_PSEUDORAPIDITY
        } else {
            -BEAM_AXIS_PSEUDORAPIDITY
        }
    }

    /// Shorthand for [`Vec3::pseudorapidity`]
    pub fn eta(&self) -> f64 {
        self.pseudorapidity()
    }

    fn add(&self, other: &Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    fn sub(&self, other: &Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    fn scale(&self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    fn neg(&self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl_op_ex!(+ |a: &Vec3, b: &Vec3| -> Vec3 { a.add(b) });
impl_op_ex!(-|a: &Vec3, b: &Vec3| -> Vec3 { a.sub(b) });
impl_op_ex!(-|a: &Vec3| -> Vec3 { a.neg() });
impl_op_ex_commutative!(*|a: &Vec3, b: &f64| -> Vec3 { a.scale(*b) });

impl std::iter::Sum for Vec3 {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |a, b| a + b)
    }
}
