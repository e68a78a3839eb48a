//! Error types for graph construction and payload validation.
//!
//! These cover configuration mistakes that are reported at build or load
//! time. Contract violations during a run (pushing onto a full edge,
//! attaching a stepper twice, ...) are programming errors and panic instead.

use thiserror::Error;

/// Errors raised while importing a raw value into a typed payload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    #[error("unknown field '{field}' for payload '{spec}'")]
    UnknownField { spec: String, field: String },

    #[error("payload '{spec}' expects an object, found {found}")]
    NotAnObject { spec: String, found: String },

    #[error("invalid value for payload '{spec}': {reason}")]
    Invalid { spec: String, reason: String },
}

/// Errors raised while building types or instances.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("device '{0}' already exists")]
    DuplicateDevice(String),

    #[error("edge '{0}' already exists")]
    DuplicateEdge(String),

    #[error("no device called '{0}'")]
    UnknownDevice(String),

    #[error("device type '{device_type}' has no input port '{port}'")]
    UnknownInput { device_type: String, port: String },

    #[error("device type '{device_type}' has no output port '{port}'")]
    UnknownOutput { device_type: String, port: String },

    #[error("edge type mismatch: output '{src_port}' carries '{src_type}' but input '{dst_port}' expects '{dst_type}'")]
    EdgeTypeMismatch {
        src_port: String,
        src_type: String,
        dst_port: String,
        dst_type: String,
    },

    #[error("device type '{device_type}' declares {count} outputs, at most {max} are supported")]
    TooManyOutputs {
        device_type: String,
        count: usize,
        max: usize,
    },

    #[error("device type '{device_type}' declares port '{port}' twice")]
    DuplicatePort { device_type: String, port: String },

    #[error("graph type '{graph_type}' declares device type '{device_type}' twice")]
    DuplicateDeviceType {
        graph_type: String,
        device_type: String,
    },

    #[error("graph type '{graph_type}' has no device type '{device_type}'")]
    UnknownDeviceType {
        graph_type: String,
        device_type: String,
    },

    #[error("no graph type called '{0}'")]
    UnknownGraphType(String),

    #[error("graph type '{0}' is already registered")]
    DuplicateGraphType(String),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Result type for graph construction.
pub type GraphResult<T> = Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_error_wraps_unmodified() {
        let inner = PayloadError::UnknownField {
            spec: "cell_properties".to_string(),
            field: "bogus".to_string(),
        };
        let err: GraphError = inner.clone().into();
        assert_eq!(err, GraphError::Payload(inner.clone()));
        assert_eq!(err.to_string(), inner.to_string());
    }

    #[test]
    fn test_messages() {
        let err = GraphError::DuplicateDevice("d_0_1".to_string());
        assert_eq!(err.to_string(), "device 'd_0_1' already exists");

        let err = GraphError::UnknownInput {
            device_type: "cell".to_string(),
            port: "west".to_string(),
        };
        assert!(err.to_string().contains("west"));
    }
}
