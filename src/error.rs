// ============================================================
// Core Error Taxonomy
// ============================================================
// Every failure inside the model and training loop is one of
// four kinds. None of them are recovered locally: the loop
// returns the error and the run is aborted.
//
//   Config    — invalid hyperparameters, caught before training
//   Data      — a batch that violates the length invariants
//   Numerical — the loss became NaN or infinite
//   Device    — the requested backend is not available
//
// The application and CLI layers work with anyhow::Result;
// QaError converts into anyhow::Error through `?`.

use thiserror::Error;

/// Errors raised by the question-answering core.
#[derive(Debug, Error)]
pub enum QaError {
    /// Hyperparameters that cannot produce a well-typed model or run.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A sequence or batch that breaks the length/shape contract.
    #[error("Data error: {0}")]
    Data(String),

    /// Loss diverged.
    #[error("Numerical error: loss is {value} at epoch {epoch}, batch {batch}")]
    Numerical {
        value: f64,
        epoch: usize,
        batch: usize,
    },

    /// Accelerator missing or not compiled in.
    #[error("Device error: {0}")]
    Device(String),
}

impl QaError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    pub fn device(message: impl Into<String>) -> Self {
        Self::Device(message.into())
    }
}

pub type QaResult<T> = std::result::Result<T, QaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_error_kind() {
        let errors = [
            QaError::config("embedding_size (50) != question code size (100)"),
            QaError::data("story length 0 in row 3"),
            QaError::Numerical { value: f64::NAN, epoch: 2, batch: 7 },
            QaError::device("wgpu support not compiled in"),
        ];
        let expected = ["Configuration", "Data", "Numerical", "Device"];

        for (err, prefix) in errors.iter().zip(expected) {
            assert!(err.to_string().starts_with(prefix), "{err}");
        }
    }

    #[test]
    fn test_numerical_error_reports_position() {
        let err = QaError::Numerical { value: f64::INFINITY, epoch: 3, batch: 12 };
        let msg = err.to_string();
        assert!(msg.contains("epoch 3"));
        assert!(msg.contains("batch 12"));
    }
}
