// Mappers - backend responses to the client contract

pub mod response;

pub use response::{normalize, RelayBody};
