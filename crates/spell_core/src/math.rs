//! Fixed-point math utilities for deterministic resolution.
//!
//! Every multiplier the engine applies (variance windows, effectiveness,
//! resist modifiers) is computed in fixed-point so two zones fed the same
//! inputs produce bit-identical results on any CPU.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all engine math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
/// Range: approximately -2,147,483,648 to 2,147,483,647
/// Precision: approximately 0.00000000023
pub type Fixed = I32F32;

/// Fixed-point 2D vector used for positions, headings and ground targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// Serde support for authored decimal values (`damage: 100.0`).
///
/// Authoring files are written by hand, so they carry plain numbers rather
/// than raw bits. Conversion happens once at load time.
pub mod fixed_decimal {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as a decimal number.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.to_num::<f64>())
    }

    /// Deserialize from a decimal number.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Fixed::checked_from_num(value)
            .ok_or_else(|| serde::de::Error::custom(format!("value {value} out of range")))
    }
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from integer world coordinates.
    #[must_use]
    pub fn from_ints(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy))
    }

    /// Euclidean distance.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        fixed_sqrt(self.distance_squared(other))
    }

    /// Whether `other` lies within `radius` world units of this point.
    #[must_use]
    pub fn within_radius(self, other: Self, radius: u32) -> bool {
        let r = Fixed::from_num(radius);
        self.distance_squared(other) <= r.saturating_mul(r)
    }

    /// Dot product of two vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x * other.x + self.y * other.y
    }

    /// Normalize vector using fixed-point math.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len_sq = self.dot(self);

        if len_sq == Fixed::ZERO {
            return Self::ZERO;
        }

        let len = fixed_sqrt(len_sq);
        if len == Fixed::ZERO {
            return Self::ZERO;
        }

        Self::new(self.x / len, self.y / len)
    }
}

/// Computes the square root of a fixed-point number using binary search.
fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }

    let mut low = Fixed::ZERO;
    let mut high = if value > Fixed::from_num(1) {
        value
    } else {
        Fixed::from_num(1)
    };

    for _ in 0..48 {
        let mid = (low + high) / Fixed::from_num(2);
        let mid_sq = mid.saturating_mul(mid);

        if mid_sq <= value {
            low = mid;
        } else {
            high = mid;
        }
    }

    low
}

/// Cosine of an angle in whole degrees (0..=180).
///
/// Bhaskara's rational approximation; exact at 0, 60, 90, 120 and 180
/// degrees and within 0.002 elsewhere, which is plenty for arc checks.
#[must_use]
pub fn cos_degrees(degrees: u32) -> Fixed {
    let d = degrees.min(180);
    if d > 90 {
        return -cos_degrees(180 - d);
    }
    let d_sq = Fixed::from_num(d * d);
    let k = Fixed::from_num(32_400);
    (k - d_sq * Fixed::from_num(4)) / (k + d_sq)
}

/// Whether `target` lies inside the arc of `view_angle` degrees centred on
/// `facing` as seen from `origin`.
///
/// `facing` must be a unit vector. A target standing on the origin is
/// always considered in front.
#[must_use]
pub fn is_in_front(origin: Vec2Fixed, facing: Vec2Fixed, target: Vec2Fixed, view_angle: u32) -> bool {
    if view_angle >= 360 {
        return true;
    }
    let dir = target - origin;
    let len = fixed_sqrt(dir.dot(dir));
    if len == Fixed::ZERO {
        return true;
    }
    let half = cos_degrees(view_angle / 2);
    facing.dot(dir) >= half.saturating_mul(len)
}

/// Relative difficulty of `compare` as seen by an actor of `level`.
///
/// Positive values mean `compare` is higher level. The step widens by one
/// level for every ten levels of the observer, so the same gap counts for
/// less at higher levels.
#[must_use]
pub fn con_level(level: u8, compare: u8) -> Fixed {
    let step = ((u32::from(level) + 9) / 10).max(1);
    let diff = i32::from(compare) - i32::from(level);
    Fixed::from_num(diff) / Fixed::from_num(step)
}

/// `n` percent as a fixed-point fraction.
#[must_use]
pub fn percent(n: i32) -> Fixed {
    Fixed::from_num(n) / Fixed::from_num(100)
}

impl std::ops::Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}
