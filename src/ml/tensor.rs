use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Live tensor accounting shared by every tensor a model allocates.
#[derive(Debug, Default)]
pub struct TensorTracker {
    live_tensors: AtomicUsize,
    live_bytes: AtomicUsize,
    total_allocated: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub num_tensors: usize,
    pub num_bytes: usize,
    pub total_allocated: usize,
}

impl TensorTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn memory(&self) -> MemoryInfo {
        MemoryInfo {
            num_tensors: self.live_tensors.load(Ordering::SeqCst),
            num_bytes: self.live_bytes.load(Ordering::SeqCst),
            total_allocated: self.total_allocated.load(Ordering::SeqCst),
        }
    }

    fn acquire(&self, bytes: usize) {
        self.live_tensors.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.total_allocated.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, bytes: usize) {
        self.live_tensors.fetch_sub(1, Ordering::SeqCst);
        self.live_bytes.fetch_sub(bytes, Ordering::SeqCst);
    }
}

/// Number of elements in `shape`, or `None` if it overflows `usize`.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// Dense float32 tensor in row-major order. The buffer is released, and the
/// tracker decremented, when the tensor is dropped.
#[derive(Debug)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
    tracker: Arc<TensorTracker>,
}

impl Tensor {
    pub fn new(
        tracker: &Arc<TensorTracker>,
        shape: Vec<usize>,
        data: Vec<f32>,
    ) -> Result<Self, String> {
        if element_count(&shape) != Some(data.len()) {
            return Err(format!(
                "cannot build tensor of shape {:?} from {} values",
                shape,
                data.len()
            ));
        }
        tracker.acquire(data.len() * std::mem::size_of::<f32>());
        Ok(Self {
            shape,
            data,
            tracker: tracker.clone(),
        })
    }

    pub fn zeros(tracker: &Arc<TensorTracker>, shape: Vec<usize>) -> Result<Self, String> {
        let len = element_count(&shape)
            .ok_or_else(|| format!("tensor shape {:?} is too large", shape))?;
        Self::new(tracker, shape, vec![0.0; len])
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Same buffer, new shape. Element count must match.
    pub fn reshape(mut self, shape: Vec<usize>) -> Result<Self, String> {
        if element_count(&shape) != Some(self.data.len()) {
            return Err(format!(
                "cannot reshape tensor of shape {:?} into {:?}",
                self.shape, shape
            ));
        }
        self.shape = shape;
        Ok(self)
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        self.tracker
            .release(self.data.len() * std::mem::size_of::<f32>());
    }
}
