//! Step classification and decoding
//!
//! A job's steps arrive as loosely typed mappings. Which kind of step a
//! mapping describes is decided by which key is present; when several are,
//! `tmplt` wins over `wait`, which wins over `action`.

use crate::error::{Error, Result};
use crate::values::Values;
use serde::Deserialize;
use std::fmt;

pub const KEY_TMPLT: &str = "tmplt";
pub const KEY_WAIT: &str = "wait";
pub const KEY_ACTION: &str = "action";

/// The kind of work a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Expand a manifest template and apply it
    Render,
    /// Wait for a cluster condition
    Wait,
    /// Expand a template and run a side-effecting action
    Action,
}

impl StepKind {
    /// Document key that selects this kind
    pub fn key(self) -> &'static str {
        match self {
            StepKind::Render => KEY_TMPLT,
            StepKind::Wait => KEY_WAIT,
            StepKind::Action => KEY_ACTION,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Classify a raw step document, `None` if no step key is present
pub fn classify(raw: &Values) -> Option<StepKind> {
    [StepKind::Render, StepKind::Wait, StepKind::Action]
        .into_iter()
        .find(|kind| raw.get(kind.key()).is_some())
}

/// Field set shared by all step kinds, as written in the job document
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
struct GenericStep {
    tmplt: String,
    wait: String,
    action: String,
    #[serde(rename = "portForward")]
    port_forward: String,
    values: Values,
}

/// A decoded, typed step
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Render {
        /// Template path relative to the job file
        template: String,
        /// Step-local values
        values: Values,
    },
    Wait {
        /// Wait-for-condition flags
        flags: String,
    },
    Action {
        /// Action template path relative to the job file
        template: String,
        /// Flags for a port-forward running alongside the action
        port_forward: String,
        /// Step-local values
        values: Values,
    },
}

impl Step {
    /// Classify and decode a raw step document
    ///
    /// Structural errors (a field of the wrong type) and documents without
    /// a step key are fatal.
    pub fn decode(id: usize, raw: &Values) -> Result<Step> {
        let generic: GenericStep = serde_yaml::from_value(raw.clone().into_value())
            .map_err(|source| Error::Decode { id, source })?;

        let kind = classify(raw).ok_or_else(|| Error::UnknownStep {
            id,
            keys: raw.keys().map(str::to_string).collect(),
        })?;

        Ok(match kind {
            StepKind::Render => Step::Render {
                template: generic.tmplt,
                values: generic.values,
            },
            StepKind::Wait => Step::Wait {
                flags: generic.wait,
            },
            StepKind::Action => Step::Action {
                template: generic.action,
                port_forward: generic.port_forward,
                values: generic.values,
            },
        })
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Step::Render { .. } => StepKind::Render,
            Step::Wait { .. } => StepKind::Wait,
            Step::Action { .. } => StepKind::Action,
        }
    }
}
