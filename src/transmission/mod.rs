mod report;
mod transmitter;

pub use report::TransmitReport;
pub use transmitter::Transmitter;
