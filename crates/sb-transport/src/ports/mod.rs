//! Ports (traits) for the collaborators the dialer stack consumes.
//!
//! # Strategic Purpose
//! The outbound registry, DNS router, DNS transport registry, deprecation
//! reporting and interface discovery all live outside this crate. The
//! [`DialerFactory`](crate::DialerFactory) receives them as explicit
//! dependencies instead of looking them up from ambient process state; a
//! missing one degrades or fails exactly as a missing registry would.

pub mod deprecation;
pub mod dns;
pub mod interface;
pub mod outbound;

pub use deprecation::*;
pub use dns::*;
pub use interface::*;
pub use outbound::*;
