use ffmpeg_next::ffi::{
    av_get_pix_fmt_name, av_pix_fmt_desc_get, AVHWDeviceType, AVPixelFormat,
    AV_PIX_FMT_FLAG_HWACCEL,
};
use std::ffi::CStr;

#[cfg(target_endian = "little")]
mod native {
    use super::AVPixelFormat;
    pub const GBRAP16: AVPixelFormat = AVPixelFormat::AV_PIX_FMT_GBRAP16LE;
    pub const RGBA64: AVPixelFormat = AVPixelFormat::AV_PIX_FMT_RGBA64LE;
    pub const GBRP16: AVPixelFormat = AVPixelFormat::AV_PIX_FMT_GBRP16LE;
    pub const GBRP10: AVPixelFormat = AVPixelFormat::AV_PIX_FMT_GBRP10LE;
    pub const X2BGR10: AVPixelFormat = AVPixelFormat::AV_PIX_FMT_X2BGR10LE;
}

#[cfg(target_endian = "big")]
mod native {
    use super::AVPixelFormat;
    pub const GBRAP16: AVPixelFormat = AVPixelFormat::AV_PIX_FMT_GBRAP16BE;
    pub const RGBA64: AVPixelFormat = AVPixelFormat::AV_PIX_FMT_RGBA64BE;
    pub const GBRP16: AVPixelFormat = AVPixelFormat::AV_PIX_FMT_GBRP16BE;
    pub const GBRP10: AVPixelFormat = AVPixelFormat::AV_PIX_FMT_GBRP10BE;
    pub const X2BGR10: AVPixelFormat = AVPixelFormat::AV_PIX_FMT_X2BGR10BE;
}

/// Picks the layout a software frame is uploaded as.
///
/// GPU frame pools do not accept every planar/packed layout the software
/// decoders emit, so a handful are swapped for an equivalent the upload path
/// handles. Everything else passes through.
pub fn remap_sw_format(fmt: AVPixelFormat) -> AVPixelFormat {
    use AVPixelFormat::*;

    match fmt {
        f if f == native::GBRAP16 => native::RGBA64,
        AV_PIX_FMT_RGB48LE | AV_PIX_FMT_RGB48BE => native::GBRP16,
        f if f == native::GBRP10 => native::X2BGR10,
        AV_PIX_FMT_BGR0 => AV_PIX_FMT_RGB0,
        other => other,
    }
}

/// True when frames of this format live in device memory.
pub fn is_hardware_format(fmt: AVPixelFormat) -> bool {
    if fmt == AVPixelFormat::AV_PIX_FMT_NONE {
        return false;
    }
    let desc = unsafe { av_pix_fmt_desc_get(fmt) };
    if desc.is_null() {
        return false;
    }
    unsafe { (*desc).flags & AV_PIX_FMT_FLAG_HWACCEL as u64 != 0 }
}

pub fn format_name(fmt: AVPixelFormat) -> String {
    let name = unsafe { av_get_pix_fmt_name(fmt) };
    if name.is_null() {
        return "none".to_string();
    }
    unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
}

/// Device memory format used when a device reports no frame constraints.
pub fn fallback_hw_format(device_type: AVHWDeviceType) -> AVPixelFormat {
    use AVHWDeviceType::*;
    use AVPixelFormat::*;

    match device_type {
        AV_HWDEVICE_TYPE_VULKAN => AV_PIX_FMT_VULKAN,
        AV_HWDEVICE_TYPE_CUDA => AV_PIX_FMT_CUDA,
        AV_HWDEVICE_TYPE_VAAPI => AV_PIX_FMT_VAAPI,
        AV_HWDEVICE_TYPE_QSV => AV_PIX_FMT_QSV,
        AV_HWDEVICE_TYPE_VIDEOTOOLBOX => AV_PIX_FMT_VIDEOTOOLBOX,
        AV_HWDEVICE_TYPE_D3D11VA => AV_PIX_FMT_D3D11,
        AV_HWDEVICE_TYPE_DXVA2 => AV_PIX_FMT_DXVA2_VLD,
        AV_HWDEVICE_TYPE_DRM => AV_PIX_FMT_DRM_PRIME,
        AV_HWDEVICE_TYPE_OPENCL => AV_PIX_FMT_OPENCL,
        AV_HWDEVICE_TYPE_VDPAU => AV_PIX_FMT_VDPAU,
        AV_HWDEVICE_TYPE_MEDIACODEC => AV_PIX_FMT_MEDIACODEC,
        _ => AV_PIX_FMT_NONE,
    }
}

/// Collects an `AV_PIX_FMT_NONE`-terminated list.
///
/// # Safety
/// `list` must be null or point to a terminated array that outlives the call.
pub unsafe fn format_list(list: *const AVPixelFormat) -> Vec<AVPixelFormat> {
    let mut formats = Vec::new();
    if list.is_null() {
        return formats;
    }
    let mut i = 0;
    loop {
        let format = *list.offset(i);
        if format == AVPixelFormat::AV_PIX_FMT_NONE {
            break;
        }
        formats.push(format);
        i += 1;
    }
    formats
}
