//! different utility modules used throughout the project
/// tiny module for per-phase solver timing (tic/tac accumulators) and elapsed-time pretty printing
pub mod solver_utils;
