/// Kalman filter primitives and the IMM motion filter
pub mod kalman;

/// Angle arithmetic on headings and bearings
pub mod angle;
