pub use lab_protocol::*;
