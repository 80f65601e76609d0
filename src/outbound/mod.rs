//! Outbound side: writing payloads to remote endpoints

mod dispatcher;
mod duplicate;
mod filename;
mod payload;

pub use dispatcher::{Dispatched, OutboundDispatcher, OutboundMessage};
pub use duplicate::unique_name;
pub use filename::{FilenameParser, TemplateFilenameParser, DEFAULT_DATE_FORMAT};
pub use payload::{OutputHandler, Payload};
