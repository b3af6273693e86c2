/// Numerical core of the people-flow analysis.
///
/// Submodules:
/// - `distance`: great-circle distance between coordinates.
/// - `series`: time × location pivot of counts.
/// - `zones`: sensor → zone roll-up.
/// - `gravity`: gravity-model flow per edge and timestamp.

pub mod distance;
pub mod gravity;
pub mod series;
pub mod zones;
