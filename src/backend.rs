use burn::backend::wgpu::WgpuDevice;
use burn::backend::{Autodiff, Wgpu};

pub type InferenceBackend = Wgpu;
pub type TrainingBackend = Autodiff<InferenceBackend>;

/// Devices for `num_gpus` accelerators, or the CPU when `num_gpus` is 0.
pub fn devices(num_gpus: usize) -> Vec<WgpuDevice> {
    if num_gpus == 0 {
        vec![WgpuDevice::Cpu]
    } else {
        (0..num_gpus).map(WgpuDevice::DiscreteGpu).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_gpus_means_cpu() {
        assert_eq!(devices(0), vec![WgpuDevice::Cpu]);
        assert_eq!(
            devices(2),
            vec![WgpuDevice::DiscreteGpu(0), WgpuDevice::DiscreteGpu(1)]
        );
    }
}
