pub mod simulator;

pub use simulator::{fluvius_sample, render_record, MeterSimulator, TelegramBuilder};
