pub mod policy;

pub use policy::{ArgumentRejection, SecurityPolicy};
