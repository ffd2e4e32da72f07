//! Errors raised while talking to the gateway or driving the manager.

use std::borrow::Borrow;
use std::fmt;
use std::io;
use thiserror::Error;

/// Failures reported by a [`GatewayClient`](crate::nat::GatewayClient)
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Discovery found no usable gateway
    #[error("No valid gateway found: {0}")]
    NotFound(String),

    /// External address query failed
    #[error("External address unavailable: {0}")]
    Unavailable(String),

    /// Add or remove of a single port mapping was refused or failed
    #[error("{action} of port {port} failed{}: {reason}", code_suffix(.action, .code))]
    Mapping {
        /// What was attempted
        action: MappingAction,
        /// Port the request was for
        port: u16,
        /// Numeric reason code, if the gateway gave one
        code: Option<u16>,
        /// Reason text
        reason: String,
    },
}

impl GatewayError {
    /// Numeric reason code attached to a mapping failure, if any
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Mapping { code, .. } => *code,
            _ => None,
        }
    }
}

fn code_suffix(action: impl Borrow<MappingAction>, code: impl Borrow<Option<u16>>) -> String {
    match *code.borrow() {
        Some(code) => match action.borrow().reason_name(code) {
            Some(known) => format!(" with code {} ({})", code, known),
            None => format!(" with code {}", code),
        },
        None => String::new(),
    }
}

/// Which mapping operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingAction {
    /// AddPortMapping
    Add,
    /// DeletePortMapping
    Remove,
}

impl fmt::Display for MappingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "AddPortMapping"),
            Self::Remove => write!(f, "DeletePortMapping"),
        }
    }
}

/// Errors returned by [`MappingManager`](crate::nat::MappingManager) to its caller
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Nothing to map
    #[error("Refusing to start with an empty port set")]
    EmptyPortSet,

    /// The worker thread could not be created
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Reason codes an IGD may return from AddPortMapping (WANIPConnection:1 and :2)
const ADD_REASONS: &[(u16, &str)] = &[
    (402, "Invalid Args"),
    (501, "Action Failed"),
    (606, "Action not authorized"),
    (715, "WildCardNotPermittedInSrcIP"),
    (716, "WildCardNotPermittedInExtPort"),
    (718, "ConflictInMappingEntry"),
    (724, "SamePortValuesRequired"),
    (725, "OnlyPermanentLeasesSupported"),
    (726, "RemoteHostOnlySupportsWildcard"),
    (727, "ExternalPortOnlySupportsWildcard"),
    (728, "NoPortMapsAvailable"),
    (729, "ConflictWithOtherMechanisms"),
    (732, "WildCardNotPermittedInIntPort"),
];

/// Reason codes an IGD may return from DeletePortMapping
const REMOVE_REASONS: &[(u16, &str)] = &[
    (402, "Invalid Args"),
    (501, "Action Failed"),
    (606, "Action not authorized"),
    (714, "NoSuchEntryInArray"),
];

impl MappingAction {
    /// Symbolic name of a reason code this action can fail with
    pub fn reason_name(self, code: u16) -> Option<&'static str> {
        let table = match self {
            Self::Add => ADD_REASONS,
            Self::Remove => REMOVE_REASONS,
        };
        table.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_error_display_known_code() {
        let err = GatewayError::Mapping {
            action: MappingAction::Add,
            port: 8080,
            code: Some(718),
            reason: "conflict".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "AddPortMapping of port 8080 failed with code 718 (ConflictInMappingEntry): conflict"
        );
        assert_eq!(err.code(), Some(718));
    }

    #[test]
    fn test_mapping_error_display_without_code() {
        let err = GatewayError::Mapping {
            action: MappingAction::Remove,
            port: 443,
            code: None,
            reason: "timed out".to_string(),
        };
        assert_eq!(err.to_string(), "DeletePortMapping of port 443 failed: timed out");
        assert_eq!(GatewayError::NotFound("none".into()).code(), None);
    }

    #[test]
    fn test_unknown_code_is_still_reported() {
        let err = GatewayError::Mapping {
            action: MappingAction::Add,
            port: 1,
            code: Some(999),
            reason: "?".to_string(),
        };
        assert!(err.to_string().contains("with code 999:"));
    }

    #[test]
    fn test_reason_names_depend_on_action() {
        assert_eq!(MappingAction::Remove.reason_name(714), Some("NoSuchEntryInArray"));
        assert_eq!(MappingAction::Add.reason_name(714), None);
        assert_eq!(MappingAction::Add.reason_name(718), Some("ConflictInMappingEntry"));
        assert_eq!(MappingAction::Remove.reason_name(718), None);
        assert_eq!(MappingAction::Add.reason_name(501), Some("Action Failed"));

        let err = GatewayError::Mapping {
            action: MappingAction::Remove,
            port: 80,
            code: Some(714),
            reason: "not mapped".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "DeletePortMapping of port 80 failed with code 714 (NoSuchEntryInArray): not mapped"
        );
    }
}
