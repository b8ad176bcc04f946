//! # Sonde Platform
//!
//! Core types shared by every protocol module in the Sonde probing engine:
//! the unified error taxonomy (`SondeError`, `SondeResult`) and the uniform
//! [`ProtocolResult`] value handed back to the routing layer.
//!
//! # Examples
//!
//! ```
//! use sonde_platform::{SondeError, SondeResult};
//!
//! fn example() -> SondeResult<u16> {
//!     Ok(22)
//! }
//!
//! # fn main() -> SondeResult<()> {
//! assert_eq!(example()?, 22);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod outcome;

pub use error::{SondeError, SondeResult};
pub use outcome::ProtocolResult;

/// Platform version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
