pub mod encoder;
pub mod network;
pub mod optim;
pub mod sequence;
pub mod temporal;

pub use sequence::{CancelToken, SequenceModel, TrainingReport};
pub use temporal::TemporalRegressor;
