use super::hardware::download;
use super::pixfmt::is_hardware_format;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;
use ffmpeg_next::software::scaling::{Context, Flags};
use log::info;
use probe_types::ProbeError;
use std::path::Path;

/// Writes `frame` as an RGBA PNG, pulling it back from the device first if
/// needed.
pub fn save_png(frame: &Video, path: &Path) -> Result<(), ProbeError> {
    let downloaded;
    let frame = if is_hardware_format(frame.format().into()) {
        downloaded = download(frame)?;
        &downloaded
    } else {
        frame
    };

    let (width, height) = (frame.width(), frame.height());
    let mut scaler = Context::get(
        frame.format(),
        width,
        height,
        Pixel::RGBA,
        width,
        height,
        Flags::BILINEAR,
    )
    .map_err(|e| ProbeError::Image(format!("Error creating RGBA scaler: {}", e)))?;

    let mut rgba = Video::empty();
    scaler
        .run(frame, &mut rgba)
        .map_err(|e| ProbeError::Image(format!("Error converting frame: {}", e)))?;

    // Rows may be padded past width * 4.
    let row = width as usize * 4;
    let stride = rgba.stride(0);
    let data = rgba.data(0);
    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        pixels.extend_from_slice(&data[y * stride..y * stride + row]);
    }

    let image = image::RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| ProbeError::Image("Failed to create image".to_string()))?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| ProbeError::Image(e.to_string()))?;

    info!("Saved {}x{} snapshot to {}", width, height, path.display());
    Ok(())
}
