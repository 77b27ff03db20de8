//! GPU compute backend
//!
//! Grids live in storage buffers. Dispatches recorded during a tick are
//! encoded into a single compute pass on `execute`; wgpu orders dispatches
//! that touch the same buffers, so the declared read/write sets are enough
//! to keep stages in sequence. All parameter blocks of a tick share one
//! uniform buffer addressed with dynamic offsets.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use glam::UVec3;
use wgpu::util::DeviceExt;
use wgpu::{BindGroupLayout, ComputePipeline, Device, Queue};

use super::{BackendError, BufferHandle, ComputeBackend, Dispatch, GridFormat};
use crate::constants::dispatch::THREADS_PER_GROUP;
use crate::kernels::{max_params_size, KernelId};

struct KernelPipeline {
    layout: BindGroupLayout,
    pipeline: ComputePipeline,
}

struct GridBuffer {
    buffer: wgpu::Buffer,
    resolution: UVec3,
    format: GridFormat,
}

impl GridBuffer {
    fn float_count(&self) -> usize {
        let r = self.resolution;
        r.x as usize * r.y as usize * r.z as usize * self.format.channels()
    }
}

/// Request a compute-capable device without a surface.
pub fn request_headless_device() -> Result<(Device, Queue), BackendError> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok_or(BackendError::NoAdapter)?;

    let info = adapter.get_info();
    log::info!("[WgpuBackend] Using adapter {} ({:?})", info.name, info.backend);

    // 8x8x8 workgroups need more than the default invocation limit, so ask
    // for everything the adapter offers.
    let limits = adapter.limits();
    if limits.max_compute_invocations_per_workgroup < THREADS_PER_GROUP {
        return Err(BackendError::DeviceRequest(format!(
            "adapter supports {} invocations per workgroup, {} required",
            limits.max_compute_invocations_per_workgroup, THREADS_PER_GROUP
        )));
    }

    pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("Fire Simulation Device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
        },
        None,
    ))
    .map_err(|e| BackendError::DeviceRequest(e.to_string()))
}

/// Production backend running the kernels through wgpu.
pub struct WgpuBackend {
    device: Arc<Device>,
    queue: Arc<Queue>,
    pipelines: HashMap<KernelId, KernelPipeline>,
    grids: HashMap<BufferHandle, GridBuffer>,
    pending: Vec<Dispatch>,
    next_id: u64,
    uniform_stride: u64,
}

impl WgpuBackend {
    /// Compile every kernel pipeline on `device`.
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Result<Self, BackendError> {
        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let uniform_stride = align_to(max_params_size() as u64, alignment);

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipelines: HashMap<_, _> = KernelId::ALL
            .iter()
            .map(|&kernel| (kernel, create_kernel_pipeline(&device, kernel)))
            .collect();
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(BackendError::PipelineCreation(error.to_string()));
        }

        log::info!(
            "[WgpuBackend] Created {} kernel pipelines (uniform stride {} bytes)",
            KernelId::ALL.len(),
            uniform_stride
        );

        Ok(Self {
            device,
            queue,
            pipelines,
            grids: HashMap::new(),
            pending: Vec::new(),
            next_id: 0,
            uniform_stride,
        })
    }

    /// Request a headless device and build a backend on it.
    pub fn headless() -> Result<Self, BackendError> {
        let (device, queue) = request_headless_device()?;
        Self::new(Arc::new(device), Arc::new(queue))
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    fn grid(&self, handle: BufferHandle) -> &GridBuffer {
        match self.grids.get(&handle) {
            Some(grid) => grid,
            None => panic!("dispatch references unknown grid buffer {:?}", handle),
        }
    }

    fn create_bind_group(
        &self,
        dispatch: &Dispatch,
        uniforms: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        let kernel = dispatch.kernel();
        let pipeline = &self.pipelines[&kernel];

        let mut entries = Vec::with_capacity(dispatch.reads.len() + 2);
        entries.push(wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: uniforms,
                offset: 0,
                size: NonZeroU64::new(kernel.params_size() as u64),
            }),
        });
        for (slot, &handle) in dispatch.reads.iter().chain(dispatch.writes.iter()).enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: slot as u32 + 1,
                resource: self.grid(handle).buffer.as_entire_binding(),
            });
        }

        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.label()),
            layout: &pipeline.layout,
            entries: &entries,
        })
    }
}

impl ComputeBackend for WgpuBackend {
    fn allocate_grid(
        &mut self,
        resolution: UVec3,
        format: GridFormat,
    ) -> Result<BufferHandle, BackendError> {
        let cells = resolution.x as u64 * resolution.y as u64 * resolution.z as u64;
        let size = cells * format.texel_size();
        let limits = self.device.limits();
        let max_size = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);

        if size == 0 || size > max_size {
            return Err(BackendError::AllocationFailed {
                resolution,
                format,
                message: format!("{} bytes outside the device limit of {} bytes", size, max_size),
            });
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Fire Simulation Grid"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        self.next_id += 1;
        let handle = BufferHandle::from_raw(self.next_id);
        self.grids.insert(
            handle,
            GridBuffer {
                buffer,
                resolution,
                format,
            },
        );
        log::debug!("[WgpuBackend] Allocated {:?}: {} bytes", handle, size);
        Ok(handle)
    }

    fn release_grid(&mut self, handle: BufferHandle) {
        match self.grids.remove(&handle) {
            Some(grid) => grid.buffer.destroy(),
            None => log::warn!("[WgpuBackend] Release of unknown grid {:?}", handle),
        }
    }

    fn dispatch(&mut self, dispatch: Dispatch) {
        dispatch.assert_well_formed();
        let kernel = dispatch.kernel();
        for (&handle, &format) in dispatch.reads.iter().zip(kernel.inputs()) {
            assert_eq!(self.grid(handle).format, format, "{} input format mismatch", kernel.label());
        }
        assert_eq!(
            self.grid(dispatch.output()).format,
            kernel.output(),
            "{} output format mismatch",
            kernel.label()
        );
        log::trace!(
            "[WgpuBackend] Recorded {} groups={:?}",
            kernel.label(),
            dispatch.thread_groups
        );
        self.pending.push(dispatch);
    }

    fn execute(&mut self) -> Result<(), BackendError> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let stride = self.uniform_stride as usize;
        let mut uniform_data = vec![0u8; stride * pending.len()];
        for (slot, dispatch) in pending.iter().enumerate() {
            let bytes = dispatch.params.as_bytes();
            uniform_data[slot * stride..slot * stride + bytes.len()].copy_from_slice(bytes);
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let uniforms = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Fire Simulation Parameters"),
            contents: &uniform_data,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_groups: Vec<wgpu::BindGroup> = pending
            .iter()
            .map(|dispatch| self.create_bind_group(dispatch, &uniforms))
            .collect();

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Fire Simulation Encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Fire Simulation Tick"),
                timestamp_writes: None,
            });
            for (slot, (dispatch, bind_group)) in pending.iter().zip(&bind_groups).enumerate() {
                let groups = dispatch.thread_groups;
                pass.set_pipeline(&self.pipelines[&dispatch.kernel()].pipeline);
                pass.set_bind_group(0, bind_group, &[(slot * stride) as u32]);
                pass.dispatch_workgroups(groups.x, groups.y, groups.z);
            }
        }
        self.queue.submit(Some(encoder.finish()));

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("[WgpuBackend] Tick submission failed: {}", error);
            return Err(BackendError::ExecutionFailed(error.to_string()));
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.pending.clear();
    }

    fn read_grid(&mut self, handle: BufferHandle) -> Result<Vec<f32>, BackendError> {
        let grid = self.grids.get(&handle).ok_or(BackendError::UnknownBuffer(handle))?;
        let size = grid.buffer.size();

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Fire Simulation Readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Fire Simulation Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(&grid.buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| BackendError::ReadbackFailed("map callback dropped".to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

        let data = {
            let mapped = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&mapped).to_vec()
        };
        staging.unmap();
        Ok(data)
    }

    fn write_grid(&mut self, handle: BufferHandle, data: &[f32]) -> Result<(), BackendError> {
        let grid = self.grids.get(&handle).ok_or(BackendError::UnknownBuffer(handle))?;
        let expected = grid.float_count();
        if data.len() != expected {
            return Err(BackendError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        self.queue.write_buffer(&grid.buffer, 0, bytemuck::cast_slice(data));
        Ok(())
    }
}

fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment.max(1)) * alignment.max(1)
}

fn create_kernel_pipeline(device: &Device, kernel: KernelId) -> KernelPipeline {
    let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };

    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: NonZeroU64::new(kernel.params_size() as u64),
        },
        count: None,
    }];
    let inputs = kernel.inputs().len() as u32;
    entries.extend((0..inputs).map(|slot| storage(slot + 1, true)));
    entries.push(storage(inputs + 1, false));

    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(kernel.label()),
        entries: &entries,
    });

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(kernel.label()),
        source: wgpu::ShaderSource::Wgsl(kernel.shader_source().into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(kernel.label()),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(kernel.label()),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: kernel.entry_point(),
    });

    KernelPipeline { layout, pipeline }
}
