use candle_core::Device;

/// CUDA device 0 when the `cuda` feature is on and a GPU answers, CPU otherwise.
pub fn select_device(force_cpu: bool) -> Device {
    if force_cpu {
        return Device::Cpu;
    }
    match Device::cuda_if_available(0) {
        Ok(device) => device,
        Err(e) => {
            tracing::warn!("Failed to initialize CUDA device 0: {}. Falling back to CPU.", e);
            Device::Cpu
        }
    }
}
