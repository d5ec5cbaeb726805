pub mod chatter;
pub mod classifier;
pub mod phrases;

pub use chatter::{ChatterContext, ChatterOutcome};
pub use classifier::{Address, Classification, Classifier, CommandLine};
