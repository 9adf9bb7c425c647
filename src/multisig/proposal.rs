//! Proposals awaiting multisig authorization
//!
//! A proposal is an operation against one contract, pinned to the
//! contract's counter at creation time. Owners sign the digest of its
//! canonical payload; once `threshold` distinct owners have signed, the
//! proposal is quorate and can be submitted.

use crate::crypto::{sha256, sha256_hex, verify_digest, KeyError};
use crate::error::{StateError, ValidationError};
use crate::multisig::contract::{ContractState, Owner};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local sequence so ids stay unique within one nanosecond
static PROPOSAL_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// What the caller asks the owners to authorize
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProposalKind {
    /// Move `amount` from the contract to `destination`
    Transfer { destination: String, amount: u64 },
    /// Re-approve the transfer of `target` against the current counter
    Approve { target: String },
    /// Veto `target`; executing it consumes the counter slot without moving funds
    Reject { target: String },
}

impl ProposalKind {
    /// The proposal this one acts on, if any
    pub fn target(&self) -> Option<&str> {
        match self {
            ProposalKind::Transfer { .. } => None,
            ProposalKind::Approve { target } | ProposalKind::Reject { target } => Some(target),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProposalKind::Transfer { .. } => "transfer",
            ProposalKind::Approve { .. } => "approve",
            ProposalKind::Reject { .. } => "reject",
        }
    }
}

/// A transfer out of the contract
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferAction {
    pub destination: String,
    pub amount: u64,
}

/// The effect an executed proposal has on chain
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperationAction {
    Transfer(TransferAction),
    /// Consume the counter without moving funds
    Cancel,
}

/// Canonical operation bytes plus the counter they were built against
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payload {
    #[serde(with = "hex::serde")]
    pub operation: Vec<u8>,
    pub target_counter: u64,
}

#[derive(Serialize)]
struct EncodedOperation<'a> {
    contract: &'a str,
    counter: u64,
    kind: &'a ProposalKind,
    action: &'a OperationAction,
}

impl Payload {
    /// Encode an operation for `contract` at `counter`
    pub fn encode(
        contract: &str,
        counter: u64,
        kind: &ProposalKind,
        action: &OperationAction,
    ) -> Result<Self, ValidationError> {
        let operation = serde_json::to_vec(&EncodedOperation {
            contract,
            counter,
            kind,
            action,
        })
        .map_err(|e| ValidationError::InvalidProposal(format!("unencodable payload: {}", e)))?;

        Ok(Self {
            operation,
            target_counter: counter,
        })
    }

    /// The 32 bytes owners sign
    pub fn digest(&self) -> Vec<u8> {
        sha256(&self.operation)
    }
}

/// Lifecycle of a proposal
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProposalStatus {
    /// Collecting signatures
    Open,
    /// Threshold reached, ready to execute
    Quorate,
    /// Claimed by one executor, submission in flight
    Submitting,
    /// Accepted by the chain, awaiting confirmation
    Submitted,
    /// Finalized on chain
    Confirmed,
    /// Vetoed, rejected by the chain, or failed to confirm
    Failed,
    /// Stayed open past its time-to-live
    Expired,
}

const VALID_TRANSITIONS: &[(ProposalStatus, ProposalStatus)] = &[
    (ProposalStatus::Open, ProposalStatus::Quorate),
    (ProposalStatus::Open, ProposalStatus::Failed),
    (ProposalStatus::Open, ProposalStatus::Expired),
    (ProposalStatus::Quorate, ProposalStatus::Submitting),
    (ProposalStatus::Quorate, ProposalStatus::Failed),
    (ProposalStatus::Submitting, ProposalStatus::Submitted),
    (ProposalStatus::Submitting, ProposalStatus::Failed),
    (ProposalStatus::Submitted, ProposalStatus::Confirmed),
    (ProposalStatus::Submitted, ProposalStatus::Failed),
];

impl ProposalStatus {
    pub fn can_transition_to(self, next: ProposalStatus) -> bool {
        VALID_TRANSITIONS.contains(&(self, next))
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProposalStatus::Confirmed | ProposalStatus::Failed | ProposalStatus::Expired
        )
    }

    /// Whether the chain has been (or is being) asked to execute it
    pub fn is_committed(self) -> bool {
        matches!(
            self,
            ProposalStatus::Submitting | ProposalStatus::Submitted | ProposalStatus::Confirmed
        )
    }
}

/// Why a proposal ended up `Failed`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// A reject ballot reached quorum
    Vetoed { by: String },
    /// A re-approval of this transfer reached quorum
    Superseded { by: String },
    SubmissionRejected { message: String },
    ConfirmationFailed { message: String },
}

/// A single owner's signature on a proposal
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signature {
    /// Address of the signer
    pub owner: String,
    /// Public key the signature was checked against (hex)
    pub public_key: String,
    /// Compact ECDSA signature over the payload digest
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
    /// When the signature was recorded
    pub recorded_at: DateTime<Utc>,
}

impl Signature {
    pub fn new(owner: &Owner, bytes: Vec<u8>) -> Self {
        Self {
            owner: owner.address.clone(),
            public_key: owner.public_key.clone(),
            bytes,
            recorded_at: Utc::now(),
        }
    }

    /// Verify this signature against a payload digest
    pub fn verify(&self, digest: &[u8]) -> Result<bool, KeyError> {
        let pubkey = crate::crypto::public_key_from_hex(&self.public_key)?;
        verify_digest(&pubkey, digest, &self.bytes)
    }
}

/// A proposed operation and its collected signatures
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proposal {
    /// Unique proposal ID
    pub id: String,
    /// Contract the operation runs against
    pub contract: String,
    pub kind: ProposalKind,
    /// What executing the proposal does
    pub action: OperationAction,
    pub payload: Payload,
    /// Signatures keyed by owner address
    pub signatures: BTreeMap<String, Signature>,
    /// Threshold copied from the contract at creation
    pub threshold: u32,
    pub status: ProposalStatus,
    /// Owner whose signature first reached the threshold
    pub quorum_reached_by: Option<String>,
    /// Chain reference once submitted
    pub operation_hash: Option<String>,
    pub failure: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    /// When status last changed
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    /// Create an open proposal pinned to the contract's current counter
    pub fn new(
        contract: &ContractState,
        kind: ProposalKind,
        action: OperationAction,
    ) -> Result<Self, ValidationError> {
        let now = Utc::now();
        let payload = Payload::encode(&contract.address, contract.counter, &kind, &action)?;

        let id_data = format!(
            "{}{}{}{}{}",
            contract.address,
            hex::encode(&payload.operation),
            contract.counter,
            now.timestamp_nanos_opt().unwrap_or(0),
            PROPOSAL_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        let id = sha256_hex(id_data.as_bytes())[..32].to_string();

        Ok(Self {
            id,
            contract: contract.address.clone(),
            kind,
            action,
            payload,
            signatures: BTreeMap::new(),
            threshold: contract.threshold,
            status: ProposalStatus::Open,
            quorum_reached_by: None,
            operation_hash: None,
            failure: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// The digest owners sign
    pub fn signing_digest(&self) -> Vec<u8> {
        self.payload.digest()
    }

    pub fn target_counter(&self) -> u64 {
        self.payload.target_counter
    }

    /// Get number of signatures collected
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// Get owners who have already signed
    pub fn signed_by(&self) -> Vec<&str> {
        self.signatures.keys().map(String::as_str).collect()
    }

    /// The transfer this proposal would execute, if it moves funds
    pub fn transfer(&self) -> Option<&TransferAction> {
        match &self.action {
            OperationAction::Transfer(transfer) => Some(transfer),
            OperationAction::Cancel => None,
        }
    }

    pub fn is_vetoed(&self) -> bool {
        matches!(self.failure, Some(FailureReason::Vetoed { .. }))
    }

    /// Whether an approval may still re-approve this proposal's transfer
    ///
    /// Not once the transfer was vetoed, re-approved elsewhere, or handed
    /// to the chain.
    pub fn is_reapprovable(&self) -> bool {
        !self.status.is_committed()
            && !matches!(
                self.failure,
                Some(FailureReason::Vetoed { .. }) | Some(FailureReason::Superseded { .. })
            )
    }

    /// Whether an open proposal has outlived `ttl`
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        // A deadline past the representable range never arrives
        self.status == ProposalStatus::Open
            && self
                .created_at
                .checked_add_signed(ttl)
                .map_or(false, |deadline| now > deadline)
    }

    /// Move to `next`, refusing any transition the state machine does not allow
    pub fn transition(&mut self, next: ProposalStatus) -> Result<(), StateError> {
        if !self.status.can_transition_to(next) {
            return Err(StateError::Closed {
                id: self.id.clone(),
                status: self.status,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `Failed`, recording why
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), StateError> {
        self.transition(ProposalStatus::Failed)?;
        self.failure = Some(reason);
        Ok(())
    }

    /// Add a signature from an owner of `contract`
    ///
    /// Returns `true` if this signature brought the proposal to quorum. The
    /// caller is responsible for checking that the proposal is still open.
    pub fn add_signature(
        &mut self,
        owner: &str,
        bytes: Vec<u8>,
        contract: &ContractState,
    ) -> Result<bool, ValidationError> {
        // Check signer is authorized
        let owner = contract
            .owner(owner)
            .ok_or_else(|| ValidationError::UnauthorizedSigner(owner.to_string()))?;

        // Check not already signed by this owner
        if self.signatures.contains_key(&owner.address) {
            return Err(ValidationError::DuplicateSignature(owner.address.clone()));
        }

        // Verify the signature
        let signature = Signature::new(owner, bytes);
        match signature.verify(&self.signing_digest()) {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                return Err(ValidationError::InvalidSignature(owner.address.clone()))
            }
        }

        self.signatures.insert(owner.address.clone(), signature);
        self.updated_at = Utc::now();

        // First signature to reach the threshold is credited with quorum
        if self.status == ProposalStatus::Open
            && self.signatures.len() >= self.threshold as usize
        {
            self.status = ProposalStatus::Quorate;
            self.quorum_reached_by = Some(owner.address.clone());
            return Ok(true);
        }

        Ok(false)
    }

    /// Build the operation handed to the chain
    pub fn finalize(&self) -> Result<AssembledOperation, StateError> {
        if self.signatures.len() < self.threshold as usize {
            return Err(StateError::QuorumNotReached {
                have: self.signatures.len(),
                need: self.threshold,
            });
        }

        let signatures = self
            .signatures
            .values()
            .map(|s| QuorumSignature {
                public_key: s.public_key.clone(),
                signature: hex::encode(&s.bytes),
            })
            .collect();

        Ok(AssembledOperation {
            proposal_id: self.id.clone(),
            contract: self.contract.clone(),
            counter: self.payload.target_counter,
            action: self.action.clone(),
            operation: self.payload.operation.clone(),
            signatures,
        })
    }
}

/// One signature as carried in the on-chain parameter
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuorumSignature {
    pub public_key: String,
    pub signature: String,
}

/// Final operation submitted to the contract
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssembledOperation {
    pub proposal_id: String,
    pub contract: String,
    pub counter: u64,
    pub action: OperationAction,
    #[serde(with = "hex::serde")]
    pub operation: Vec<u8>,
    pub signatures: Vec<QuorumSignature>,
}

impl AssembledOperation {
    /// Content hash; identical operations hash identically
    pub fn content_hash(&self) -> String {
        let mut data = self.operation.clone();
        for sig in &self.signatures {
            data.extend_from_slice(sig.public_key.as_bytes());
            data.extend_from_slice(sig.signature.as_bytes());
        }
        sha256_hex(&data)
    }
}
