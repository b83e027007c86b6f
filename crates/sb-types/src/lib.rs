//! sb-types: cross-crate stable contracts for the outbound dialer stack
//! (destinations, DNS/network strategies, dialer options, error classes).

pub mod destination;
pub mod errors;
pub mod network;
pub mod options;

pub use destination::{Destination, ParseDestinationError};
pub use errors::ErrorClass;
pub use network::{DomainStrategy, InterfaceType, NetworkStrategy};
pub use options::{
    DialerOptions, TlsFragmentOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_FALLBACK_DELAY,
    DEFAULT_TLS_FRAGMENT_FALLBACK_DELAY,
};
