use thiserror::Error;

/// Errors raised while building or deserializing a [`crate::mphf::Mphf`].
#[derive(Debug, Error)]
pub enum MphError {
    /// No level configuration peeled the full item set within the configured
    /// depth budget.
    #[error("MPHF construction exceeded max levels ({0}) without resolving all items")]
    MaxLevelsExceeded(u32),
    /// The serialized blob was short, malformed, or carried trailing bytes.
    #[error("MPHF deserialization failed: {0}")]
    Deserialize(&'static str),
    /// Bincode-level serialization failure (feature = "serde" convenience path).
    #[cfg(feature = "serde")]
    #[error("serialization error: {0}")]
    Serde(#[from] Box<bincode::ErrorKind>),
}

/// Errors raised while building or querying a [`crate::mmph::BucketMmph`].
#[derive(Debug, Error)]
pub enum MmphError {
    /// Construction input was not sorted under the ordering predicate the
    /// variant requires.
    #[error(
        "input keys are not sorted under the required ordering predicate ({0}); \
         the AZFT-backed variant requires TrieCompare order for mixed-length keys"
    )]
    InputNotSorted(&'static str),
    /// Two equal keys appeared in the input.
    #[error("duplicate key at positions {0} and {1}")]
    DuplicateKey(usize, usize),
    /// A construction parameter was out of the range the data layout assumes.
    #[error("parameter out of range: {0}")]
    ParameterOutOfRange(&'static str),
    /// The AZFT Las Vegas rebuild loop exhausted its attempt budget.
    #[error(
        "approximate z-fast trie rebuild exhausted {0} attempts without validating; \
         increase the signature width S and/or index width I"
    )]
    RebuildExhausted(u32),
    /// Propagated failure from the underlying MPHF builder.
    #[error(transparent)]
    Mphf(#[from] MphError),
}
