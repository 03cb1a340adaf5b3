pub mod backfill;
pub mod error;
pub mod face;
pub mod identify;
pub mod index;
#[cfg(feature = "facial-recognition")]
pub mod onnx;

pub use error::PipelineError;
pub use face::{FaceCrop, FaceDetector, FaceEmbedder, FaceModels, ModelError};
