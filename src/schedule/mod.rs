//! Scheduled recording windows

pub mod engine;
pub mod types;

pub use engine::ScheduleEngine;
pub use types::{
    describe_options, ScheduleError, ScheduleId, ScheduleResult, ScheduleSummary, ScheduleWindow,
};
