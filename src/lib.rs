//! Counts how many songs were listened to per day. History comes either from exported
//! streaming history archives or from the streaming service's API, where days without observed
//! history can be estimated from top tracks.
//!

pub mod api;
pub mod cli;
pub mod tally;
pub mod utils;
