//! Runtime configuration resolved from the process environment.
//!
//! This is the "ambient" configuration surface: knobs that affect logging
//! verbosity or paper over card quirks, never anything that changes the
//! cryptographic semantics of an operation. Each [`Setting`] is looked up
//! independently so unit tests can exercise the parsing logic without
//! touching real process state (see [`Setting::resolve_from`]).

use std::env;

/// A single named runtime knob.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Setting {
    /// Log full APDU command/reply bytes at trace level.
    ///
    /// Env var: `PIVCARD_APDU_TRACE` (`1`/`true` to enable).
    ApduTrace,

    /// Apply the chain-engine workaround that rewrites a trailing `0x6A80`
    /// to `0x9000` when an earlier chained segment returned `0x9000`.
    ///
    /// Env var: `PIVCARD_CHAIN_FIXUP_6A80` (`0`/`false` to disable).
    /// Default: enabled.
    ChainFixup6A80,
}

impl Setting {
    fn env_var(self) -> &'static str {
        match self {
            Setting::ApduTrace => "PIVCARD_APDU_TRACE",
            Setting::ChainFixup6A80 => "PIVCARD_CHAIN_FIXUP_6A80",
        }
    }

    fn default_value(self) -> bool {
        match self {
            Setting::ApduTrace => false,
            Setting::ChainFixup6A80 => true,
        }
    }

    /// Resolve this setting's boolean value from the process environment.
    pub fn enabled(self) -> bool {
        self.resolve_from(|name| env::var(name).ok())
    }

    /// Resolve this setting using a caller-supplied lookup function, so the
    /// parsing rules can be unit tested without mutating the real
    /// environment.
    fn resolve_from(self, lookup: impl Fn(&str) -> Option<String>) -> bool {
        match lookup(self.env_var()) {
            None => self.default_value(),
            Some(v) => matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "on"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        assert!(!Setting::ApduTrace.resolve_from(|_| None));
        assert!(Setting::ChainFixup6A80.resolve_from(|_| None));
    }

    #[test]
    fn recognizes_truthy_values() {
        for v in ["1", "true", "TRUE", "yes", "on"] {
            assert!(Setting::ApduTrace.resolve_from(|_| Some(v.to_string())));
        }
    }

    #[test]
    fn recognizes_falsy_values() {
        for v in ["0", "false", "no", "off", "garbage"] {
            assert!(!Setting::ChainFixup6A80.resolve_from(|_| Some(v.to_string())));
        }
    }
}
