//! Error types for the stake batcher

use alloy::primitives::Address;
use alloy::sol;
use alloy::sol_types::SolError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, BatcherError>;

/// Fatal errors. Each of these unwinds to the run coordinator and ends the run.
#[derive(Debug, Error)]
pub enum BatcherError {
    /// Missing or invalid setup, raised before any remote call
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input file
    #[error("Source read error: {0}")]
    SourceRead(String),

    /// Amount that cannot be represented as an 18-decimal fixed point value
    #[error("Amount format error for {input:?}: {reason}")]
    AmountFormat { input: String, reason: String },

    /// Addresses and amounts arrays disagree in length
    #[error("Shape mismatch: {addresses} addresses vs {amounts} amounts")]
    ShapeMismatch { addresses: usize, amounts: usize },

    /// Remote state disagrees with the expected amount
    #[error("Validation mismatch for {address}: expected {expected}, actual {actual}")]
    ValidationMismatch {
        address: Address,
        expected: String,
        actual: String,
    },

    /// Staking contract circuit breaker is engaged
    #[error("Staking contract {0} is paused")]
    ContractPaused(Address),

    /// Remote ledger error outside of a batch submission
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Result log write error
    #[error("Result log error: {0}")]
    ResultLog(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors at the remote ledger boundary
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Network, RPC or timeout failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Execution reverted
    #[error("Execution reverted: {0}")]
    Reverted(String),

    /// Signing key lacks the capability required by the contract
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Unexpected response shape
    #[error("Decoding error: {0}")]
    Decode(String),
}

const PERMISSION_MARKERS: &[&str] = &[
    "caller is not the owner",
    "ownableunauthorizedaccount",
    "accesscontrolunauthorizedaccount",
    "accesscontrol:",
    "not authorized",
];

const REVERT_MARKERS: &[&str] = &["revert", "execution reverted", "invalid opcode"];

sol! {
    /// OpenZeppelin v5 `Ownable`
    error OwnableUnauthorizedAccount(address account);

    /// OpenZeppelin v5 `AccessControl`
    error AccessControlUnauthorizedAccount(address account, bytes32 neededRole);
}

/// Nodes usually report custom errors as raw revert data only
fn permission_selectors() -> [String; 2] {
    [
        format!("0x{}", hex::encode(OwnableUnauthorizedAccount::SELECTOR)),
        format!("0x{}", hex::encode(AccessControlUnauthorizedAccount::SELECTOR)),
    ]
}

impl LedgerError {
    /// Classify an RPC or contract error by its rendered message.
    pub fn classify<E: std::fmt::Display>(err: E) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();

        let denied = PERMISSION_MARKERS.iter().any(|m| lowered.contains(m))
            || permission_selectors().iter().any(|s| lowered.contains(s.as_str()));

        if denied {
            LedgerError::PermissionDenied(message)
        } else if REVERT_MARKERS.iter().any(|m| lowered.contains(m)) {
            LedgerError::Reverted(message)
        } else {
            LedgerError::Transport(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_owner_only_revert() {
        let err = LedgerError::classify("execution reverted: Ownable: caller is not the owner");
        assert!(matches!(err, LedgerError::PermissionDenied(_)));
    }

    #[test]
    fn test_permission_selectors() {
        assert_eq!(hex::encode(OwnableUnauthorizedAccount::SELECTOR), "118cdaa7");
        assert_eq!(hex::encode(AccessControlUnauthorizedAccount::SELECTOR), "e2517d3f");
    }

    #[test]
    fn test_classify_raw_custom_error_data() {
        let err = LedgerError::classify(
            "server returned an error response: error code 3: execution reverted, data: \"0x118cdaa7000000000000000000000000f39fd6e51aad88f6f4ce6ab8827279cfffb922a1\"",
        );
        assert!(matches!(err, LedgerError::PermissionDenied(_)));

        let err = LedgerError::classify(
            "execution reverted, data: \"0xE2517D3F00000000000000000000000070997970c51812dc3a010c7d01b50e0d17dc79c8\"",
        );
        assert!(matches!(err, LedgerError::PermissionDenied(_)));

        // unrelated custom error stays a plain revert
        let err = LedgerError::classify(
            "execution reverted, data: \"0xfb8f41b2000000000000000000000000b2\"",
        );
        assert!(matches!(err, LedgerError::Reverted(_)));
    }

    #[test]
    fn test_classify_plain_revert() {
        let err = LedgerError::classify("execution reverted: ERC20: insufficient allowance");
        assert_eq!(
            err,
            LedgerError::Reverted("execution reverted: ERC20: insufficient allowance".to_string())
        );
    }

    #[test]
    fn test_classify_transport() {
        let err = LedgerError::classify("error sending request for url (http://localhost:8545/)");
        assert!(matches!(err, LedgerError::Transport(_)));
    }

    #[test]
    fn test_validation_mismatch_message() {
        let err = BatcherError::ValidationMismatch {
            address: Address::ZERO,
            expected: "0".to_string(),
            actual: "12.5".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("expected 0"));
        assert!(text.contains("actual 12.5"));
    }
}
