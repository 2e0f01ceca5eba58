//! Real-time adaptive scan scheduling for tandem mass spectrometry
//! acquisition.
//!
//! Scan-by-scan, the [`planner`] decides which physical measurement to
//! request next, a survey scan (MS1), a partitioned multiplexed survey
//! (BoxCar), or a targeted fragmentation scan (MS2), based on the spectra
//! observed so far, elapsed run time, and a dynamic exclusion policy that
//! avoids re-targeting recently fragmented precursors.
//!
//! The host instrument harness interacts with the engine through the
//! [`planner::ScanPlanner`] capability and the submission machinery in
//! [`driver`].

pub mod config;
pub mod deisotope;
pub mod driver;
pub mod exclusion;
pub mod peaks;
pub mod planner;
pub mod scan;
