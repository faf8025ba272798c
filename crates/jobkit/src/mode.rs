//! Run modes
//!
//! A [`Mode`] combines one base flag ([`Mode::GENERATE`] or [`Mode::APPLY`])
//! with the optional additive [`Mode::ACTIONS`] flag.

use crate::error::Error;
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

/// Bit-flag value selecting generate-vs-apply and whether actions run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode(u8);

impl Mode {
    /// Render templates and write them to an output sink
    pub const GENERATE: Mode = Mode(1 << 0);
    /// Render templates and apply them to the target cluster
    pub const APPLY: Mode = Mode(1 << 1);
    /// Only valid in combination with GENERATE or APPLY
    pub const ACTIONS: Mode = Mode(1 << 2);

    pub const GENERATE_WITH_ACTIONS: Mode = Mode(Self::GENERATE.0 | Self::ACTIONS.0);
    pub const APPLY_WITH_ACTIONS: Mode = Mode(Self::APPLY.0 | Self::ACTIONS.0);

    /// Mode names accepted by [`Mode::from_str`]
    pub const NAMES: [&'static str; 4] = [
        "apply",
        "apply-with-actions",
        "generate",
        "generate-with-actions",
    ];

    /// Check whether all flags of `other` are set
    pub fn contains(self, other: Mode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether action steps are executed
    pub fn runs_actions(self) -> bool {
        self.contains(Self::ACTIONS)
    }

    /// Whether output goes to a sink instead of a cluster
    pub fn is_generate(self) -> bool {
        self.contains(Self::GENERATE)
    }

    /// Kebab-case name of this mode
    pub fn name(self) -> &'static str {
        match self {
            Self::APPLY => "apply",
            Self::APPLY_WITH_ACTIONS => "apply-with-actions",
            Self::GENERATE => "generate",
            Self::GENERATE_WITH_ACTIONS => "generate-with-actions",
            _ => "unknown",
        }
    }
}

impl BitOr for Mode {
    type Output = Mode;

    fn bitor(self, rhs: Mode) -> Mode {
        Mode(self.0 | rhs.0)
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apply" => Ok(Self::APPLY),
            "apply-with-actions" => Ok(Self::APPLY_WITH_ACTIONS),
            "generate" => Ok(Self::GENERATE),
            "generate-with-actions" => Ok(Self::GENERATE_WITH_ACTIONS),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
