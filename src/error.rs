use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ImportError>;

/// Everything that can go wrong while importing a model.
///
/// All conversion failures funnel into this enum; the binary catches it at
/// the top level, reports the message and exits non-zero. No partial success
/// is ever reported as success.
#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    /// The network definition is malformed: syntax errors, unknown layer
    /// types, duplicate layer names, dangling bottom references.
    #[error("malformed network definition: {0}")]
    Parse(String),

    /// A name was looked up that the graph does not contain.
    #[error("no entry named `{0}`")]
    Lookup(String),

    /// The layer kind parses but has no TensorFlow mapping. Fatal for the
    /// whole conversion: a partial graph is not meaningful to the target.
    #[error("no TensorFlow mapping for layer type `{0}`")]
    UnsupportedLayer(String),

    /// Shape inference produced something inconsistent.
    #[error("shape error at `{layer}`: {reason}")]
    Shape { layer: String, reason: String },

    /// A stored weight tensor disagrees with the shape the layer mapper
    /// declared for it. Never silently coerced.
    #[error("weight tensor `{layer}/{slot}` has shape {actual:?}, expected {expected:?}")]
    WeightShapeMismatch {
        layer: String,
        slot: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A layer present in the graph has no entry in the weight file.
    #[error("missing weights for `{0}`")]
    WeightLoad(String),

    /// The builder result cannot yield the expected network class.
    #[error("generated code does not define a loadable class: {0}")]
    CodeLoad(String),

    /// A freeze/optimize capability failed. These originate outside the
    /// core taxonomy and are passed through with the capability's message.
    #[error("freeze operation `{op}` failed: {reason}")]
    Freeze { op: String, reason: String },

    /// The execution session was used after being closed.
    #[error("session is closed")]
    SessionClosed,

    #[error("cannot read `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("weight archive error: {0}")]
    NpzRead(#[from] ndarray_npy::ReadNpzError),

    #[error("weight archive error: {0}")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),
}
