mod enums;
mod primitives;
mod websocket;

// Re-export all types
pub use enums::*;
pub use primitives::*;
pub use websocket::*;
