use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

/// Planar coordinates of a sample point (Lambert projection, km or m).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

impl Coordinates {
    pub fn new(x: f64, y: f64) -> Self {
        Coordinates { x, y }
    }

    /// Textual point identifier used in every artifact: `(x,y)`.
    pub fn point_id(&self) -> String {
        format!("({},{})", self.x, self.y)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

impl Ord for Coordinates {
    fn cmp(&self, other: &Self) -> Ordering {
        self.x
            .total_cmp(&other.x)
            .then_with(|| self.y.total_cmp(&other.y))
    }
}

impl PartialOrd for Coordinates {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Coordinates {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Coordinates {}

impl Hash for Coordinates {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.x.to_bits().hash(state);
        self.y.to_bits().hash(state);
    }
}

/// Share of each crop family around a point, in percent. Carried through to
/// the balance output untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CropShares {
    pub irrigated: f64,
    pub cereals: f64,
    pub prairies: f64,
    pub permanent: f64,
    pub vineyards: f64,
}

/// A fixed sample point with its soil capacity and crop coefficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub coordinates: Coordinates,
    /// Maximum water-holding capacity in mm
    pub ru_max: f64,
    /// Crop coefficient applied to ETP
    pub kc: f64,
    pub crop_shares: Option<CropShares>,
}

impl Point {
    pub fn new(coordinates: Coordinates, ru_max: f64, kc: f64) -> Self {
        Point {
            coordinates,
            ru_max,
            kc,
            crop_shares: None,
        }
    }

    pub fn id(&self) -> String {
        self.coordinates.point_id()
    }
}
