#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("DecodeError: failed to decode application config: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("EncodeError: failed to render application config: {0}")]
    Encode(#[from] serde_yaml::Error),

    #[error("UnknownPresetError: unrecognized resource preset: {0}")]
    UnknownPreset(String),

    #[error("UnknownFrameworkError: unrecognized application type: {0}")]
    UnknownFramework(String),

    #[error("QuantityParseError: invalid quantity {value:?} for resources.{field}")]
    QuantityParse { field: &'static str, value: String },

    #[error("MissingResourcesError: either resourcePreset or resources must be defined")]
    MissingResources,

    #[error("TypeMismatchError: expected a {expected} object but got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("MissingField: object has no {0}")]
    MissingField(&'static str),

    #[error("ConflictError: {kind} {name} was modified concurrently")]
    Conflict { kind: String, name: String },

    #[error("reconciliation cancelled")]
    Cancelled,

    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Store conflicts, transport failures and cancellation clear up on retry.
    /// Everything else needs a spec edit first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Conflict { .. } | Error::KubeError(_) | Error::Cancelled
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retryable() {
        assert!(!Error::MissingResources.is_retryable());
        assert!(!Error::UnknownPreset("huge".into()).is_retryable());
        assert!(
            !Error::QuantityParse {
                field: "cpu",
                value: "lots".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn store_errors_are_retryable() {
        let conflict = Error::Conflict {
            kind: "Deployment".into(),
            name: "demo".into(),
        };
        assert!(conflict.is_retryable());
        assert!(Error::Cancelled.is_retryable());
    }

    #[test]
    fn quantity_error_names_the_field() {
        let err = Error::QuantityParse {
            field: "memory",
            value: "8 gigs".into(),
        };
        assert_eq!(
            err.to_string(),
            "QuantityParseError: invalid quantity \"8 gigs\" for resources.memory"
        );
    }
}
