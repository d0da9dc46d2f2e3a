//! `caffe-import` converts convolutional networks authored for the Caffe
//! framework into TensorFlow-style graphs. It parses the `.prototxt`
//! definition and `.caffemodel` weights, maps each layer onto target
//! operators, reorders weight tensors into the target's conventions,
//! generates a Rust source file that rebuilds the network through the
//! crate's [`tf::Network`] API, and can export a frozen, inference-ready
//! standalone graph artifact.

#[macro_use]
extern crate derive_new;

/// The source-framework side: parsing, IR, shape inference, weights.
pub mod caffe;

/// The target side: graph builder, code generation, session and freezing.
pub mod tf;

mod convert;
mod error;
mod export;
mod formatter;
mod logger;

pub use convert::Converter;
pub use error::{ImportError, Result};
pub use export::{ExportState, StandaloneExporter};
pub use formatter::format_tokens;
