use crate::device::{GpuDevice, ResourceId};
use crate::error::DeviceError;
use crate::flip::BackBufferMap;
use crate::format::D3DFormat;
use crate::rebind::DeviceGeneration;
use crate::surface::SurfaceId;

/// Legacy device flavor the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LegacyDeviceType {
    #[default]
    Hal,
    /// Hardware transform-and-lighting HAL.
    TnlHal,
    Rgb,
}

/// The active device binding: one per legacy device creation or swap-chain reset.
#[derive(Debug)]
pub struct DeviceContext<D> {
    generation: DeviceGeneration,
    device: D,
    device_type: LegacyDeviceType,
    pub(crate) render_target: Option<SurfaceId>,
    pub(crate) depth_stencil: Option<SurfaceId>,
    pub(crate) slots: BackBufferMap,
}

impl<D: GpuDevice> DeviceContext<D> {
    pub fn new(device: D, device_type: LegacyDeviceType) -> Self {
        Self {
            generation: DeviceGeneration::next(),
            device,
            device_type,
            render_target: None,
            depth_stencil: None,
            slots: BackBufferMap::default(),
        }
    }

    pub fn generation(&self) -> DeviceGeneration {
        self.generation
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn device_type(&self) -> LegacyDeviceType {
        self.device_type
    }

    pub fn render_target(&self) -> Option<SurfaceId> {
        self.render_target
    }

    pub fn depth_stencil(&self) -> Option<SurfaceId> {
        self.depth_stencil
    }

    pub fn slots(&self) -> &BackBufferMap {
        &self.slots
    }

    pub(crate) fn into_device(self) -> D {
        self.device
    }

    /// Swap-chain buffer backing `surface`: its own slot when it is part of the flip chain,
    /// back buffer 0 otherwise.
    pub fn back_buffer_for(&mut self, surface: SurfaceId) -> Result<ResourceId, DeviceError> {
        match self.slots.slot(surface) {
            Some(slot) => self.device.back_buffer(slot),
            None => self.slots.fallback.ok_or(DeviceError::BackBufferOutOfRange {
                index: 0,
                count: self.device.back_buffer_count(),
            }),
        }
    }

    /// Format of the active back buffer, if the swap chain has one.
    pub fn back_buffer_format(&self) -> Option<D3DFormat> {
        let resource = self.slots.fallback?;
        self.device.resource_desc(resource).map(|desc| desc.format)
    }
}
