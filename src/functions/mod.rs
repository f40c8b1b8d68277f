// Functions are organized by pipeline stage
pub mod calculus;
pub mod classify;
pub mod linear_algebra;
pub mod solve;
