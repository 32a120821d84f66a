use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackerError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("input and output buffers must not alias")]
    AliasedBuffers,

    #[error("arena exhausted: requested {requested} elements, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("failed to deserialize: {0}")]
    Deserialize(String),
}

impl TrackerError {
    pub(crate) fn param(msg: impl Into<String>) -> Self {
        TrackerError::InvalidParameter(msg.into())
    }

    pub(crate) fn size(msg: impl Into<String>) -> Self {
        TrackerError::InvalidSize(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let errors = [
            TrackerError::param("levels"),
            TrackerError::size("template"),
            TrackerError::AliasedBuffers,
            TrackerError::OutOfMemory { requested: 8, available: 4 },
            TrackerError::Deserialize("truncated".into()),
        ];
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(messages[0], "invalid parameter: levels");
        assert_eq!(messages[3], "arena exhausted: requested 8 elements, 4 available");
        for e in &errors {
            match e {
                TrackerError::InvalidParameter(_)
                | TrackerError::InvalidSize(_)
                | TrackerError::AliasedBuffers
                | TrackerError::OutOfMemory { .. }
                | TrackerError::Deserialize(_) => {}
            }
        }
    }
}
