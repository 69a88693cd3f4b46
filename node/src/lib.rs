pub mod ambient;
pub mod clock;
pub mod config;
pub mod dht22;
pub mod errors;
pub mod link;
pub mod metrics;
pub mod occupancy;
pub mod ranging;
pub mod scheduler;
pub mod sim;
pub mod sntp;
pub mod telemetry;
pub mod timer;
pub mod uploader;
pub mod weather;
