pub mod artifact;
pub mod engine;
pub mod layers;
pub mod model;
pub mod tensor;

pub use artifact::{load_artifact, source_for, ArtifactSource, FileSource, HttpSource};
pub use engine::{InferenceBackend, LayersBackend, ModelState, ModelStatus, PredictionEngine};
pub use model::{ModelHandle, ModelInfo, SequentialModel};
pub use tensor::{element_count, MemoryInfo, Tensor, TensorTracker};
