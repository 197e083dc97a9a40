//! Screenshot capture using Windows Graphics Capture API.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ScreenCapture;

/// Captures the whole primary monitor.
#[derive(Debug, Default)]
pub struct MonitorCapture;

impl ScreenCapture for MonitorCapture {
    fn capture_screenshot(&self, destination: &Path) -> Result<PathBuf> {
        let img = platform::capture_primary_monitor()?;
        crate::paths::ensure_parent(destination)?;
        img.save(destination)?;
        debug!("Captured screenshot to {}", destination.display());
        Ok(destination.to_path_buf())
    }
}

#[cfg(not(windows))]
mod platform {
    use anyhow::{anyhow, Result};
    use image::RgbaImage;

    pub(super) fn capture_primary_monitor() -> Result<RgbaImage> {
        Err(anyhow!("Screen capture requires Windows"))
    }
}

#[cfg(windows)]
mod platform {
    use anyhow::{anyhow, Context, Result};
    use image::{ImageBuffer, Rgba, RgbaImage};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tracing::debug;

    use windows::core::Interface;
    use windows::Foundation::TypedEventHandler;
    use windows::Graphics::Capture::{Direct3D11CaptureFramePool, GraphicsCaptureItem};
    use windows::Graphics::DirectX::DirectXPixelFormat;
    use windows::Win32::Foundation::POINT;
    use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
    use windows::Win32::Graphics::Direct3D11::{
        D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D,
        D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAP_READ,
        D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
    };
    use windows::Win32::Graphics::Gdi::{MonitorFromPoint, HMONITOR, MONITOR_DEFAULTTOPRIMARY};
    use windows::Win32::System::WinRT::Direct3D11::CreateDirect3D11DeviceFromDXGIDevice;
    use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;

    /// Captures one frame of the primary monitor.
    ///
    /// 1. Creates a D3D11 device for GPU-accelerated capture
    /// 2. Uses Windows Graphics Capture API to grab a frame
    /// 3. Copies it through a staging texture for CPU read
    /// 4. Converts from BGRA to RGBA format
    pub(super) fn capture_primary_monitor() -> Result<RgbaImage> {
        let monitor = unsafe { MonitorFromPoint(POINT { x: 0, y: 0 }, MONITOR_DEFAULTTOPRIMARY) };

        let (device, context) = create_d3d11_device()?;
        let item = create_capture_item(monitor)?;
        let size = item.Size()?;
        debug!("Capture size: {}x{}", size.Width, size.Height);

        let d3d_device = create_direct3d_device(&device)?;
        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &d3d_device,
            DirectXPixelFormat::B8G8R8A8UIntNormalized,
            1,
            size,
        )?;
        let session = frame_pool.CreateCaptureSession(&item)?;

        // Set up frame arrival handling
        let frame_arrived = Arc::new(AtomicBool::new(false));
        let frame_arrived_clone = frame_arrived.clone();

        frame_pool.FrameArrived(&TypedEventHandler::new(
            move |_pool: &Option<Direct3D11CaptureFramePool>, _| {
                frame_arrived_clone.store(true, Ordering::SeqCst);
                Ok(())
            },
        ))?;

        session.StartCapture()?;

        // Wait for frame
        let start = std::time::Instant::now();
        while !frame_arrived.load(Ordering::SeqCst) {
            if start.elapsed().as_secs() > 5 {
                let _ = session.Close();
                let _ = frame_pool.Close();
                return Err(anyhow!("Timeout waiting for frame"));
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        let frame = frame_pool.TryGetNextFrame()?;
        let surface = frame.Surface()?;

        // Get the D3D11 texture from the surface
        let access: windows::Win32::System::WinRT::Direct3D11::IDirect3DDxgiInterfaceAccess =
            surface.cast()?;
        let texture: ID3D11Texture2D = unsafe { access.GetInterface()? };

        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut desc) };

        // Create staging texture for CPU read
        let staging_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.Width,
            Height: desc.Height,
            MipLevels: 1,
            ArraySize: 1,
            Format: desc.Format,
            SampleDesc: desc.SampleDesc,
            Usage: D3D11_USAGE_STAGING,
            BindFlags: Default::default(),
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: Default::default(),
        };

        let staging_texture = unsafe {
            let mut staging: Option<ID3D11Texture2D> = None;
            device.CreateTexture2D(&staging_desc, None, Some(&mut staging))?;
            staging.ok_or_else(|| anyhow!("Failed to create staging texture"))?
        };
        let staging_resource = staging_texture.cast::<ID3D11Resource>()?;

        unsafe {
            context.CopyResource(&staging_resource, &texture.cast::<ID3D11Resource>()?);
        }

        let mapped = unsafe {
            let mut mapped = Default::default();
            context.Map(&staging_resource, 0, D3D11_MAP_READ, 0, Some(&mut mapped))?;
            mapped
        };

        let width = (size.Width.max(0) as u32).min(desc.Width);
        let height = (size.Height.max(0) as u32).min(desc.Height);
        let row_pitch = mapped.RowPitch as usize;
        let src_data = unsafe {
            std::slice::from_raw_parts(
                mapped.pData as *const u8,
                (mapped.RowPitch * desc.Height) as usize,
            )
        };

        // BGRA -> RGBA
        let img: RgbaImage = ImageBuffer::from_fn(width, height, |x, y| {
            let offset = y as usize * row_pitch + x as usize * 4;
            Rgba([
                src_data[offset + 2],
                src_data[offset + 1],
                src_data[offset],
                255,
            ])
        });

        unsafe {
            context.Unmap(&staging_resource, 0);
        }

        session.Close()?;
        frame_pool.Close()?;

        Ok(img)
    }

    /// Creates a Direct3D 11 device and immediate context.
    fn create_d3d11_device() -> Result<(ID3D11Device, ID3D11DeviceContext)> {
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;

        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )?;
        }

        Ok((
            device.ok_or_else(|| anyhow!("Failed to create D3D11 device"))?,
            context.ok_or_else(|| anyhow!("Failed to create D3D11 context"))?,
        ))
    }

    /// Wraps a D3D11 device for the capture API.
    fn create_direct3d_device(
        device: &ID3D11Device,
    ) -> Result<windows::Graphics::DirectX::Direct3D11::IDirect3DDevice> {
        let dxgi_device: windows::Win32::Graphics::Dxgi::IDXGIDevice = device.cast()?;
        let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device)? };
        inspectable
            .cast()
            .context("Failed to cast to IDirect3DDevice")
    }

    fn create_capture_item(monitor: HMONITOR) -> Result<GraphicsCaptureItem> {
        let class_name = windows::core::h!("Windows.Graphics.Capture.GraphicsCaptureItem");
        let interop: IGraphicsCaptureItemInterop = unsafe {
            windows::Win32::System::WinRT::RoGetActivationFactory(class_name)
                .context("Failed to get IGraphicsCaptureItemInterop")?
        };

        unsafe {
            interop
                .CreateForMonitor(monitor)
                .context("Failed to create capture item for the primary monitor")
        }
    }
}
