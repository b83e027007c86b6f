//! Deprecation reporting port (Go parity: experimental/deprecated).

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

static PROCESS_REPORTER: OnceLock<Arc<LogDeprecationReporter>> = OnceLock::new();

/// Deprecated configuration shapes detected while composing dialers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Deprecation {
    /// A domain destination is dialed without detour and without an explicit
    /// `domain_resolver`, relying on the implicit default DNS server.
    MissingDomainResolver,
}

impl Deprecation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MissingDomainResolver => "missing-domain-resolver",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingDomainResolver => {
                "dialing a domain without `domain_resolver` relies on the implicit default \
                 DNS server, which is deprecated; set `domain_resolver` in dialer options"
            }
        }
    }
}

impl fmt::Display for Deprecation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub trait DeprecationReporter: Send + Sync {
    fn report(&self, deprecation: Deprecation);
}

/// Logs each deprecation kind once through `tracing`.
#[derive(Debug, Default)]
pub struct LogDeprecationReporter {
    reported: Mutex<HashSet<Deprecation>>,
}

impl LogDeprecationReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reporter shared by the whole process; the default for every
    /// `DialerFactory`, so each kind is logged once per process.
    pub fn global() -> Arc<LogDeprecationReporter> {
        PROCESS_REPORTER
            .get_or_init(|| Arc::new(LogDeprecationReporter::new()))
            .clone()
    }

    pub fn reported(&self) -> Vec<Deprecation> {
        match self.reported.lock() {
            Ok(set) => set.iter().copied().collect(),
            Err(poisoned) => poisoned.into_inner().iter().copied().collect(),
        }
    }
}

impl DeprecationReporter for LogDeprecationReporter {
    fn report(&self, deprecation: Deprecation) {
        let first = match self.reported.lock() {
            Ok(mut set) => set.insert(deprecation),
            Err(poisoned) => poisoned.into_inner().insert(deprecation),
        };
        if first {
            tracing::warn!(deprecation = %deprecation, "{}", deprecation.message());
        }
    }
}
