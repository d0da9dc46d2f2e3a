//! Wire-format subset of the source framework's `NetParameter` protobuf,
//! covering what weight extraction needs. Field numbers follow caffe.proto;
//! everything else on the wire is skipped by the decoder.

/// Top-level message of a `.caffemodel` file.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NetParameter {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    /// Modern layer definitions.
    #[prost(message, repeated, tag = "100")]
    pub layer: Vec<LayerParameter>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LayerParameter {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub r#type: Option<String>,
    /// Stored parameter tensors, e.g. kernel and bias for a convolution.
    #[prost(message, repeated, tag = "7")]
    pub blobs: Vec<BlobProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlobProto {
    #[prost(message, optional, tag = "7")]
    pub shape: Option<BlobShape>,
    #[prost(float, repeated, tag = "5")]
    pub data: Vec<f32>,
    // Legacy 4D dimension fields, used when `shape` is absent.
    #[prost(int32, optional, tag = "1")]
    pub num: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub channels: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub height: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    pub width: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlobShape {
    #[prost(int64, repeated, tag = "1")]
    pub dim: Vec<i64>,
}

impl BlobProto {
    /// The stored dimensions, preferring the modern `shape` message and
    /// falling back to the legacy 4D fields with leading 1s stripped.
    pub fn dims(&self) -> Vec<usize> {
        if let Some(shape) = &self.shape {
            return shape.dim.iter().map(|&d| d.max(0) as usize).collect();
        }
        let legacy = [self.num, self.channels, self.height, self.width]
            .map(|d| d.unwrap_or(1).max(0) as usize);
        let skip = legacy.iter().take_while(|&&d| d == 1).count().min(3);
        legacy[skip..].to_vec()
    }
}
