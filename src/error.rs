//! Error taxonomy for the coordination engine
//!
//! Errors are grouped by what the caller can do about them:
//! - [`ValidationError`]: bad or malicious input, never mutates state
//! - [`StateError`]: a precondition on proposal/contract state does not hold
//! - [`CollaboratorError`]: transient backend/chain failure, safe to retry
//! - [`ChainError`]: the chain reported a terminal failure

use crate::config::ConfigError;
use crate::crypto::KeyError;
use crate::multisig::ProposalStatus;
use thiserror::Error;

/// Caller mistakes or malicious input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Signer not authorized: {0}")]
    UnauthorizedSigner(String),
    #[error("Already signed by {0}")]
    DuplicateSignature(String),
    #[error("Invalid signature from {0}")]
    InvalidSignature(String),
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),
    #[error("Invalid contract: {0}")]
    InvalidContract(String),
}

/// Preconditions on stored state that do not hold
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Proposal not found: {0}")]
    NotFound(String),
    #[error("Contract not found: {0}")]
    ContractNotFound(String),
    #[error("Quorum not reached: have {have}, need {need}")]
    QuorumNotReached { have: usize, need: u32 },
    #[error("Stale proposal: built for counter {target}, contract is at {current}")]
    StaleProposal { target: u64, current: u64 },
    #[error("Proposal already submitted: {0}")]
    AlreadySubmitted(String),
    #[error("Proposal {id} is closed ({status:?})")]
    Closed { id: String, status: ProposalStatus },
    #[error("Proposal has not been submitted: {0}")]
    NotSubmitted(String),
}

/// Transient failures of the backend or chain collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Terminal failures reported by the chain
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Origination rejected: {0}")]
    OriginationRejected(String),
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),
    #[error("Confirmation failed: {0}")]
    ConfirmationFailed(String),
}

/// Top-level error returned by every engine operation
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("State error: {0}")]
    State(#[from] StateError),
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Crypto error: {0}")]
    Crypto(#[from] KeyError),
}

impl EngineError {
    /// Whether retrying the same call can succeed without changing the input
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Collaborator(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
