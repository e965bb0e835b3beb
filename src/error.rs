use thiserror::Error;

/// Failures of the DID challenge handshake.
///
/// Every variant is surfaced to the caller as `401` with the `Display` text as
/// the cause; internal detail stays in the logs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Malformed authorization header: {0}")]
    /// The `authorization` value could not be parsed into a DID proof.
    MalformedHeader(String),

    #[error("Unknown or expired challenge: {0}")]
    /// The referenced challenge id is not in the session store.
    UnknownChallenge(String),

    #[error("Challenge {0} has already been used")]
    /// The referenced session already completed its handshake.
    ChallengeAlreadyUsed(String),

    #[error("Could not resolve DID {did}: {reason}")]
    /// The DID resolver failed to produce an identity profile.
    DidResolution {
        /// DID the caller claimed.
        did: String,
        /// Resolver failure, already stringified.
        reason: String,
    },

    #[error("Signature verification failed for {0}")]
    /// The proof did not verify against the claimed identity.
    InvalidProof(String),

    #[error("Session {0} has no verified agent DID")]
    /// Verification returned a session that never had `agent_did` set.
    MissingAgentDid(String),
}

/// Failures of DID resolution.
#[derive(Error, Debug)]
pub enum DidError {
    #[error("Unsupported DID method: {0}")]
    UnsupportedMethod(String),

    #[error("Invalid DID: {0}")]
    InvalidDid(String),

    #[error("DID document for {0} contains no usable verification method")]
    NoVerificationMethod(String),

    #[error("DID resolver request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("DID resolver returned status {status} for {did}")]
    HttpStatus { did: String, status: u16 },
}

/// Failures talking to the remote knowledge search API.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Knowledge API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Knowledge API returned status {0}")]
    HttpStatus(u16),
}
