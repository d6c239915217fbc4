//! # Types
//!
//! Small value types shared by the register engine and the module map.

pub mod address;
pub mod process;
pub mod registers;

// Re-export all public types
pub use address::Address;
pub use process::{FileIdentity, ProcessId};
pub use registers::{RegisterBuffer, RegisterCache, RegisterIndex, RegisterSelection, SpecialRegister};
