pub mod api;
pub mod config;
pub mod db;
pub mod elo;
pub mod error;
pub mod leaderboard;
pub mod metrics;
pub mod model;
pub mod pairing;
pub mod queue;
pub mod seed;
pub mod selector;
pub mod session;
pub mod store;
