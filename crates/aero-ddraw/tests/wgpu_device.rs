#![cfg(feature = "wgpu-backend")]

mod common;

use aero_ddraw::device::wgpu_device::{SwapChainDesc, WgpuDevice};
use aero_ddraw::device::{LockAccess, Subresource};
use aero_ddraw::{
    BindOutcome, CompatOptions, DdrawRuntime, DeviceError, GpuDevice, LegacyDeviceType,
    LockFlags, SurfaceCaps, SurfaceCaps2, SurfaceDesc, SurfaceId, UploadOutcome,
};
use pretty_assertions::assert_eq;

use common::*;

fn runtime(test_name: &str) -> Option<DdrawRuntime<WgpuDevice>> {
    init_tracing();
    let device = match pollster::block_on(WgpuDevice::new_headless(SwapChainDesc::default())) {
        Ok(device) => device,
        Err(err) => {
            skip_or_panic(test_name, &format!("wgpu device init failed: {err}"));
            return None;
        }
    };
    let rt = DdrawRuntime::new(CompatOptions::default());
    rt.create_device(device, LegacyDeviceType::Hal);
    Some(rt)
}

fn fill(rt: &DdrawRuntime<WgpuDevice>, id: SurfaceId, value: u8) {
    rt.lock_surface(id, LockFlags::empty(), |locked| locked.bytes.fill(value))
        .unwrap();
}

#[test]
fn padded_rows_round_trip_through_the_gpu() {
    let Some(rt) = runtime(module_path!()) else {
        return;
    };
    let id = rt.create_surface(texture(255, 4)).unwrap();
    let content = pattern(1020 * 4);
    rt.write_surface(id, &content).unwrap();

    assert_eq!(
        rt.ensure_bound(id).unwrap(),
        BindOutcome::Bound {
            allocated: true,
            upload: UploadOutcome::Uploaded { levels: 1 },
        }
    );

    fill(&rt, id, 0);
    assert_eq!(
        rt.download(id).unwrap(),
        UploadOutcome::Uploaded { levels: 1 }
    );
    assert!(rt.read_surface(id).unwrap() == content);

    let stats = rt.stats().snapshot();
    assert_eq!(stats.row_by_row_copies, 2);
    assert_eq!(stats.skipped_uploads, 0);
}

#[test]
fn mip_levels_round_trip_through_the_gpu() {
    let Some(rt) = runtime(module_path!()) else {
        return;
    };
    let top = rt.create_surface(mip_texture(8, 8, argb8888())).unwrap();
    let mut levels = vec![top];
    loop {
        let last = *levels.last().unwrap();
        match rt.attached_surfaces(last).unwrap().first() {
            Some(&next) => levels.push(next),
            None => break,
        }
    }
    assert_eq!(levels.len(), 4);

    for (index, &id) in levels.iter().enumerate() {
        fill(&rt, id, 0x10 + index as u8);
    }
    rt.ensure_bound(top).unwrap();
    for &id in &levels {
        fill(&rt, id, 0);
    }
    assert_eq!(
        rt.download(top).unwrap(),
        UploadOutcome::Uploaded { levels: 4 }
    );
    for (index, &id) in levels.iter().enumerate() {
        let bytes = rt.read_surface(id).unwrap();
        assert!(
            bytes.iter().all(|&b| b == 0x10 + index as u8),
            "level {index} did not round trip"
        );
    }
}

#[test]
fn cube_faces_round_trip_through_the_gpu() {
    let Some(rt) = runtime(module_path!()) else {
        return;
    };
    let root = rt
        .create_surface(
            SurfaceDesc::new(SurfaceCaps::TEXTURE | SurfaceCaps::COMPLEX)
                .with_caps2(SurfaceCaps2::CUBEMAP | SurfaceCaps2::CUBEMAP_ALLFACES)
                .with_size(4, 4)
                .with_pixel_format(argb8888()),
        )
        .unwrap();
    let faces: Vec<SurfaceId> = std::iter::once(root)
        .chain(rt.attached_surfaces(root).unwrap())
        .collect();
    assert_eq!(faces.len(), 6);

    for (index, &id) in faces.iter().enumerate() {
        fill(&rt, id, 0x40 + index as u8);
    }
    assert!(rt.cube_texture_resource(root).unwrap().is_some());
    for &id in &faces {
        fill(&rt, id, 0);
    }
    assert_eq!(
        rt.download(root).unwrap(),
        UploadOutcome::Uploaded { levels: 6 }
    );
    for (index, &id) in faces.iter().enumerate() {
        let bytes = rt.read_surface(id).unwrap();
        assert!(bytes.iter().all(|&b| b == 0x40 + index as u8), "face {index}");
    }
}

#[test]
fn depth_buffers_bind_but_do_not_lock() {
    let Some(rt) = runtime(module_path!()) else {
        return;
    };
    let depth = rt.create_surface(depth_buffer(32, 32)).unwrap();
    let resource = rt.depth_stencil_resource(depth).unwrap().unwrap();

    let err = rt
        .with_device(|d| d.lock(resource, Subresource::BASE, LockAccess::Read).err())
        .unwrap();
    assert_eq!(err, Some(DeviceError::NotLockable));
}

#[test]
fn back_buffers_are_preallocated() {
    let Some(rt) = runtime(module_path!()) else {
        return;
    };
    let (count, first) = rt
        .with_device(|d| (d.back_buffer_count(), d.back_buffer(0)))
        .unwrap();
    assert_eq!(count, 1);
    let first = first.unwrap();
    assert!(rt.with_device(|d| d.texture(first).is_some()).unwrap());
    assert_eq!(
        rt.with_device(|d| d.back_buffer(1)).unwrap(),
        Err(DeviceError::BackBufferOutOfRange { index: 1, count: 1 })
    );
}
