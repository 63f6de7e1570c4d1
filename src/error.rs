/// Why a single contract could not be turned into a transfer event.
///
/// These never escape a block: the worker logs and counts them, then moves on
/// to the next contract.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' has wrong type, expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("invalid hex in '{field}': {details}")]
    InvalidHex {
        field: &'static str,
        details: String,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("invalid hex address '{address}': {source}")]
    Hex {
        address: String,
        #[source]
        source: hex::FromHexError,
    },
}

/// Administrative requests rejected before any work is scheduled.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error("{0} is not running")]
    NotRunning(&'static str),

    #[error("invalid block range {start}..={end}: {reason}")]
    InvalidRange {
        start: i64,
        end: i64,
        reason: String,
    },

    #[error(transparent)]
    Other(#[from] eyre::Report),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecodeError::WrongType {
            field: "amount",
            expected: "unsigned integer",
        };
        assert_eq!(
            err.to_string(),
            "field 'amount' has wrong type, expected unsigned integer"
        );

        let err = ControlError::InvalidRange {
            start: 10,
            end: 5,
            reason: "start is after end".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid block range 10..=5: start is after end"
        );

        assert_eq!(
            ControlError::AlreadyRunning("block monitor").to_string(),
            "block monitor is already running"
        );
    }
}
