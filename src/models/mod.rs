pub mod command;
pub mod record;
pub mod sample;

pub use command::WorkerCommand;
pub use record::LocationRecord;
pub use sample::RawSample;
