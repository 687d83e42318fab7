pub mod interval_scheduler;

pub use interval_scheduler::{
    IntervalScheduler, Overrun, OverrunCallback, SchedulerOptions, SchedulerState, TickCallback,
};
