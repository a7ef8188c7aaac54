//! Message handling - parsing bodies and dispatching sync events

pub mod dispatcher;
pub mod parser;

pub use dispatcher::EventDispatcher;
pub use parser::MessageParser;
