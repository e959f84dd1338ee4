pub mod api;
pub mod coc;
pub mod config;
pub mod league;
pub mod metrics;
pub mod snapshot;
