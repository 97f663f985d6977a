//! Request and response body handling.

mod pipeline;
mod reader;
mod shadow;
mod source;
mod split;

pub use pipeline::{BodyPipeline, Demand};
pub use reader::BodyReader;
pub use source::{BodySource, RequestBody};
pub use split::BackpressureMode;
