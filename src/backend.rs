//! Backend abstraction
//!
//! NdArray (CPU) is the default so the classifier runs anywhere; CUDA is
//! available behind the `cuda` feature and takes precedence when enabled.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type DefaultBackend = burn::backend::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray")))]
compile_error!("At least one backend (ndarray or cuda) must be enabled!");

/// The autodiff backend used for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Backend used by the unit tests
#[cfg(test)]
pub type TestBackend = burn::backend::NdArray;

/// Autodiff backend used by the unit tests
#[cfg(test)]
pub type TestAutodiffBackend = Autodiff<TestBackend>;

/// Get the default device
pub fn default_device() -> <DefaultBackend as Backend>::Device {
    <DefaultBackend as Backend>::Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(not(feature = "cuda"))]
    {
        "NdArray (CPU)"
    }
}
