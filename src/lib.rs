pub mod logging;
pub mod models;
pub mod scenario;
pub mod simulation;
