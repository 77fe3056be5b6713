use thiserror::Error;

/// Per-symbol failures. Each one skips the symbol; none aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("{symbol}: insufficient history ({available} bars, need {required})")]
    InsufficientHistory {
        symbol: String,
        required: usize,
        available: usize,
    },

    #[error("{symbol}: missing data ({reason})")]
    MissingData { symbol: String, reason: String },
}

impl PipelineError {
    pub fn symbol(&self) -> &str {
        match self {
            PipelineError::InsufficientHistory { symbol, .. } => symbol,
            PipelineError::MissingData { symbol, .. } => symbol,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InsufficientHistory { .. } => "insufficient_history",
            PipelineError::MissingData { .. } => "missing_data",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_symbol() {
        let err = PipelineError::InsufficientHistory {
            symbol: "13010".to_string(),
            required: 14,
            available: 9,
        };
        assert_eq!(
            err.to_string(),
            "13010: insufficient history (9 bars, need 14)"
        );
        assert_eq!(err.symbol(), "13010");
        assert_eq!(err.kind(), "insufficient_history");

        let missing = PipelineError::MissingData {
            symbol: "99840".to_string(),
            reason: "no rows".to_string(),
        };
        assert_eq!(missing.to_string(), "99840: missing data (no rows)");
        assert_eq!(missing.kind(), "missing_data");
    }
}
