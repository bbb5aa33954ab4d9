//! Local/Probe Collector
//! Mission: Produce `Sample`s for the server's own host without an
//! agent, and run the admin-configured ping targets, on the same
//! cadences an agent would use.

pub mod local;
pub mod probe;

pub use local::LocalCollector;
pub use probe::ProbeRunner;
