use super::pixfmt::{fallback_hw_format, format_list, format_name, remap_sw_format};
use ffmpeg_next::ffi::{
    av_buffer_unref, av_frame_copy_props, av_hwdevice_ctx_create, av_hwdevice_find_type_by_name,
    av_hwdevice_get_hwframe_constraints, av_hwdevice_get_type_name, av_hwdevice_iterate_types,
    av_hwframe_constraints_free, av_hwframe_ctx_alloc, av_hwframe_ctx_init,
    av_hwframe_get_buffer, av_hwframe_transfer_data, AVBufferRef, AVHWDeviceType,
    AVHWFramesConstraints, AVHWFramesContext, AVPixelFormat,
};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;
use ffmpeg_next::software::scaling::{self, Flags};
use log::{debug, info, warn};
use probe_types::ProbeError;
use std::ffi::{CStr, CString};
use std::ptr::{null, null_mut};
use std::sync::Arc;

pub fn parse_device_type(name: &str) -> Result<AVHWDeviceType, ProbeError> {
    let c_name =
        CString::new(name).map_err(|_| ProbeError::UnknownDeviceType(name.to_string()))?;
    let device_type = unsafe { av_hwdevice_find_type_by_name(c_name.as_ptr()) };
    if device_type == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
        return Err(ProbeError::UnknownDeviceType(name.to_string()));
    }
    Ok(device_type)
}

pub fn device_type_name(device_type: AVHWDeviceType) -> String {
    let name = unsafe { av_hwdevice_get_type_name(device_type) };
    if name.is_null() {
        return format!("{:?}", device_type);
    }
    unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
}

/// Device types compiled into the linked FFmpeg.
pub fn available_device_types() -> Vec<String> {
    let mut names = Vec::new();
    let mut device_type = AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;
    loop {
        device_type = unsafe { av_hwdevice_iterate_types(device_type) };
        if device_type == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            break;
        }
        names.push(device_type_name(device_type));
    }
    names
}

/// Owns an FFmpeg hardware device context.
pub struct HardwareContext {
    ctx: *mut AVBufferRef,
    device_type: AVHWDeviceType,
}

impl HardwareContext {
    /// Opens a device of the given type. `device` selects a specific
    /// adapter (index, render node, ...) and is interpreted by FFmpeg.
    pub fn new(
        device_type: AVHWDeviceType,
        device: Option<&str>,
    ) -> Result<Arc<Self>, ProbeError> {
        let name = device_type_name(device_type);
        let device_cstr = device
            .map(CString::new)
            .transpose()
            .map_err(|_| ProbeError::HardwareDevice {
                device_type: name.clone(),
                reason: "device string contains a NUL byte".to_string(),
            })?;

        let mut hw_device_ctx = null_mut();
        let ret = unsafe {
            av_hwdevice_ctx_create(
                &mut hw_device_ctx,
                device_type,
                device_cstr.as_ref().map_or(null(), |d| d.as_ptr()),
                null_mut(),
                0,
            )
        };
        if ret < 0 {
            return Err(ProbeError::HardwareDevice {
                device_type: name,
                reason: ffmpeg_next::Error::from(ret).to_string(),
            });
        }

        info!(
            "Created {} device{}",
            name,
            device.map(|d| format!(" '{}'", d)).unwrap_or_default()
        );
        Ok(Arc::new(Self {
            ctx: hw_device_ctx,
            device_type,
        }))
    }

    pub fn as_ptr(&self) -> *mut AVBufferRef {
        self.ctx
    }

    pub fn device_type(&self) -> AVHWDeviceType {
        self.device_type
    }

    pub fn name(&self) -> String {
        device_type_name(self.device_type)
    }

    fn with_constraints<R>(&self, f: impl FnOnce(&AVHWFramesConstraints) -> R) -> Option<R> {
        unsafe {
            let mut constraints = av_hwdevice_get_hwframe_constraints(self.ctx, null());
            if constraints.is_null() {
                return None;
            }
            let result = f(&*constraints);
            av_hwframe_constraints_free(&mut constraints);
            Some(result)
        }
    }

    /// Format of frames that live on this device.
    pub fn hw_pixel_format(&self) -> AVPixelFormat {
        self.with_constraints(|c| unsafe { format_list(c.valid_hw_formats) })
            .and_then(|formats| formats.first().copied())
            .unwrap_or_else(|| fallback_hw_format(self.device_type))
    }

    /// `None` when the device does not report which layouts it accepts.
    pub fn supports_sw_format(&self, fmt: AVPixelFormat) -> Option<bool> {
        self.with_constraints(|c| unsafe { format_list(c.valid_sw_formats) })
            .filter(|formats| !formats.is_empty())
            .map(|formats| formats.contains(&fmt))
    }
}

impl Drop for HardwareContext {
    fn drop(&mut self) {
        unsafe {
            if !self.ctx.is_null() {
                av_buffer_unref(&mut self.ctx);
            }
        }
    }
}

unsafe impl Send for HardwareContext {}
unsafe impl Sync for HardwareContext {}

/// A pool of device frames that software frames are uploaded into.
pub struct HardwareFrames {
    frames_ref: *mut AVBufferRef,
    source_format: AVPixelFormat,
    sw_format: AVPixelFormat,
    converter: Option<scaling::Context>,
}

impl HardwareFrames {
    pub fn new(
        device: &HardwareContext,
        source_format: AVPixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Self, ProbeError> {
        let hw_format = device.hw_pixel_format();
        if hw_format == AVPixelFormat::AV_PIX_FMT_NONE {
            return Err(ProbeError::HardwareFrames(format!(
                "{} device has no frame format",
                device.name()
            )));
        }

        let sw_format = remap_sw_format(source_format);
        if sw_format != source_format {
            debug!(
                "Remapping {} to {} for upload",
                format_name(source_format),
                format_name(sw_format)
            );
        }
        if device.supports_sw_format(sw_format) == Some(false) {
            warn!(
                "{} device does not list {} as an upload format",
                device.name(),
                format_name(sw_format)
            );
        }

        let converter = if sw_format != source_format {
            Some(
                scaling::Context::get(
                    Pixel::from(source_format),
                    width,
                    height,
                    Pixel::from(sw_format),
                    width,
                    height,
                    Flags::BILINEAR,
                )
                .map_err(|e| {
                    ProbeError::HardwareFrames(format!(
                        "cannot convert {} to {}: {}",
                        format_name(source_format),
                        format_name(sw_format),
                        e
                    ))
                })?,
            )
        } else {
            None
        };

        let mut frames_ref = unsafe { av_hwframe_ctx_alloc(device.as_ptr()) };
        if frames_ref.is_null() {
            return Err(ProbeError::HardwareFrames(
                "Failed to allocate frames context".to_string(),
            ));
        }

        unsafe {
            let hwfc = (*frames_ref).data as *mut AVHWFramesContext;
            (*hwfc).format = hw_format;
            (*hwfc).sw_format = sw_format;
            (*hwfc).width = width as i32;
            (*hwfc).height = height as i32;

            let ret = av_hwframe_ctx_init(frames_ref);
            if ret < 0 {
                av_buffer_unref(&mut frames_ref);
                return Err(ProbeError::HardwareFrames(
                    ffmpeg_next::Error::from(ret).to_string(),
                ));
            }
        }

        info!(
            "Uploading {}x{} {} frames as {}",
            width,
            height,
            format_name(sw_format),
            format_name(hw_format)
        );
        Ok(Self {
            frames_ref,
            source_format,
            sw_format,
            converter,
        })
    }

    /// Copies a software frame into a fresh frame from the pool.
    pub fn upload(&mut self, frame: &Video) -> Result<Video, ProbeError> {
        let converted;
        let source = match self.converter.as_mut() {
            Some(converter) => {
                let mut out = Video::empty();
                converter.run(frame, &mut out).map_err(|e| {
                    ProbeError::HardwareFrames(format!(
                        "converting {} to {} for upload: {}",
                        format_name(self.source_format),
                        format_name(self.sw_format),
                        e
                    ))
                })?;
                converted = out;
                &converted
            }
            None => frame,
        };

        let mut hw_frame = Video::empty();
        unsafe {
            let ret = av_hwframe_get_buffer(self.frames_ref, hw_frame.as_mut_ptr(), 0);
            if ret < 0 {
                return Err(ProbeError::HardwareFrames(format!(
                    "Error allocating hardware frame: {}",
                    ffmpeg_next::Error::from(ret)
                )));
            }
            let ret = av_hwframe_transfer_data(hw_frame.as_mut_ptr(), source.as_ptr(), 0);
            if ret < 0 {
                return Err(ProbeError::FFmpeg(format!(
                    "Error uploading frame: {}",
                    ffmpeg_next::Error::from(ret)
                )));
            }
            let ret = av_frame_copy_props(hw_frame.as_mut_ptr(), frame.as_ptr());
            if ret < 0 {
                return Err(ProbeError::FFmpeg(format!(
                    "Error copying frame properties: {}",
                    ffmpeg_next::Error::from(ret)
                )));
            }
        }
        Ok(hw_frame)
    }
}

impl Drop for HardwareFrames {
    fn drop(&mut self) {
        unsafe {
            if !self.frames_ref.is_null() {
                av_buffer_unref(&mut self.frames_ref);
            }
        }
    }
}

/// Copies a device frame back into host memory.
pub fn download(frame: &Video) -> Result<Video, ProbeError> {
    let mut sw_frame = Video::empty();
    unsafe {
        let ret = av_hwframe_transfer_data(sw_frame.as_mut_ptr(), frame.as_ptr(), 0);
        if ret < 0 {
            return Err(ProbeError::FFmpeg(format!(
                "Failed to transfer frame: {}",
                ffmpeg_next::Error::from(ret)
            )));
        }
        let ret = av_frame_copy_props(sw_frame.as_mut_ptr(), frame.as_ptr());
        if ret < 0 {
            return Err(ProbeError::FFmpeg(format!(
                "Error copying frame properties: {}",
                ffmpeg_next::Error::from(ret)
            )));
        }
    }
    Ok(sw_frame)
}
