//! Grid Traffic Simulation Library
//!
//! A deterministic road-traffic simulation on a cell grid: demand-driven
//! dispatch, A* routing with highway shortcuts, intersection right-of-way
//! and facility parking, runnable headless from the console.

pub mod simulation;
