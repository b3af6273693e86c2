/// Gravity-model pedestrian flow estimation from people-counting sensors.
///
/// Reads hourly sensor counts, pivots them into a time × location table
/// (optionally rolled up into zones), and scores each configured edge with
/// a gravity model. Results are written as CSV for charting and GIS tools.

pub mod analysis;
pub mod config;
pub mod export;
pub mod ingest;
pub mod locations;
pub mod logging;
pub mod model;
pub mod pipeline;
