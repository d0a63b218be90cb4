/// Absolute tolerance used when checking Stokes vectors and Mueller matrices for physical realizability.
pub const PHYSICAL_TOLERANCE: f64 = 1e-9;
/// Intensities below this are treated as zero when computing normalized quantities.
pub const INTENSITY_EPSILON: f64 = 1e-12;
/// |S3| below this (relative to S0) is reported as having no handedness.
pub const HANDEDNESS_EPSILON: f64 = 1e-9;
/// Minimum absolute value of the dot product between a ray and a device normal for an intersection to count.
pub const PARALLEL_THRESHOLD: f64 = 1e-9;
/// Minimum distance traversed by a ray to an intersection. Closer intersections are treated as co-located.
pub const RAYCAST_MINIMUM_DISTANCE: f64 = 1e-6;
/// Two intersections closer than this along the same ray are equidistant and resolved by declaration order.
pub const TIE_DISTANCE: f64 = 1e-9;
/// Minimum vector length to be considered non-degenerate.
pub const VEC_LENGTH_THRESHOLD: f64 = 1e-9;
/// Relative tolerance when matching thin-film parameters against surrogate records.
pub const SURROGATE_MATCH_TOLERANCE: f64 = 1e-6;
/// Magic bytes at the start of a surrogate model payload.
pub const SURROGATE_MAGIC: &[u8; 4] = b"PCSM";
/// Supported surrogate model format version.
pub const SURROGATE_VERSION: u16 = 1;
/// Incident medium index assumed for mirrors and thin films when `n1` is not given.
pub const DEFAULT_INCIDENT_INDEX: f64 = 1.0;
/// Substrate index assumed for thin films when `n2` is not given.
pub const DEFAULT_SUBSTRATE_INDEX: f64 = 1.5;
/// Transmitted fraction of a non-polarizing beam splitter when `splitRatio` is not given.
pub const DEFAULT_SPLIT_RATIO: f64 = 0.5;
