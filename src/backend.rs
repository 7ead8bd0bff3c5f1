//! Backend selection: CPU ndarray by default, wgpu behind the `wgpu` feature

use burn::tensor::backend::Backend;
use log::info;

#[cfg(not(feature = "wgpu"))]
pub type AutoBackend = burn::backend::NdArray;

#[cfg(feature = "wgpu")]
pub type AutoBackend = burn::backend::Wgpu;

pub fn get_device() -> <AutoBackend as Backend>::Device {
    Default::default()
}

pub fn print_backend_info() {
    #[cfg(not(feature = "wgpu"))]
    info!("Backend: ndarray (CPU)");
    #[cfg(feature = "wgpu")]
    info!("Backend: wgpu (GPU)");
    info!("Device: {:?}", get_device());
}
