#[cfg(test)]
mod tests {
    use super::super::decoder::{select_hw_format, HwFormatState};
    use super::super::encoder::software_target;
    use super::super::pixfmt::format_list;
    use super::super::{
        available_device_types, encoder_private_options, fallback_hw_format, format_name,
        is_hardware_format, parse_device_type, remap_sw_format, HardwareContext, OptionKind,
    };
    use ffmpeg_next::ffi::{AVHWDeviceType, AVPixelFormat};
    use ffmpeg_next::format::Pixel;
    use probe_types::ProbeError;

    #[cfg(target_endian = "little")]
    #[test]
    fn test_remap_table() {
        use AVPixelFormat::*;

        assert_eq!(remap_sw_format(AV_PIX_FMT_GBRAP16LE), AV_PIX_FMT_RGBA64LE);
        assert_eq!(remap_sw_format(AV_PIX_FMT_RGB48LE), AV_PIX_FMT_GBRP16LE);
        assert_eq!(remap_sw_format(AV_PIX_FMT_RGB48BE), AV_PIX_FMT_GBRP16LE);
        assert_eq!(remap_sw_format(AV_PIX_FMT_GBRP10LE), AV_PIX_FMT_X2BGR10LE);
        assert_eq!(remap_sw_format(AV_PIX_FMT_BGR0), AV_PIX_FMT_RGB0);
    }

    #[test]
    fn test_remap_passthrough() {
        use AVPixelFormat::*;

        for fmt in [
            AV_PIX_FMT_YUV420P,
            AV_PIX_FMT_NV12,
            AV_PIX_FMT_P010LE,
            AV_PIX_FMT_RGB0,
            AV_PIX_FMT_RGBA,
        ] {
            assert_eq!(remap_sw_format(fmt), fmt);
        }
    }

    #[test]
    fn test_hardware_format_flag() {
        use AVPixelFormat::*;

        assert!(is_hardware_format(AV_PIX_FMT_VULKAN));
        assert!(is_hardware_format(AV_PIX_FMT_CUDA));
        assert!(is_hardware_format(AV_PIX_FMT_VAAPI));
        assert!(!is_hardware_format(AV_PIX_FMT_YUV420P));
        assert!(!is_hardware_format(AV_PIX_FMT_NV12));
        assert!(!is_hardware_format(AV_PIX_FMT_NONE));
    }

    #[test]
    fn test_format_names() {
        assert_eq!(format_name(AVPixelFormat::AV_PIX_FMT_YUV420P), "yuv420p");
        assert_eq!(format_name(AVPixelFormat::AV_PIX_FMT_VULKAN), "vulkan");
        assert_eq!(format_name(AVPixelFormat::AV_PIX_FMT_NONE), "none");
    }

    #[test]
    fn test_fallback_formats_are_hardware() {
        use AVHWDeviceType::*;

        for device_type in [
            AV_HWDEVICE_TYPE_VULKAN,
            AV_HWDEVICE_TYPE_CUDA,
            AV_HWDEVICE_TYPE_VAAPI,
            AV_HWDEVICE_TYPE_QSV,
            AV_HWDEVICE_TYPE_DRM,
        ] {
            assert!(is_hardware_format(fallback_hw_format(device_type)));
        }
        assert_eq!(
            fallback_hw_format(AV_HWDEVICE_TYPE_NONE),
            AVPixelFormat::AV_PIX_FMT_NONE
        );
    }

    #[test]
    fn test_format_list_stops_at_none() {
        let list = [
            AVPixelFormat::AV_PIX_FMT_NV12,
            AVPixelFormat::AV_PIX_FMT_YUV420P,
            AVPixelFormat::AV_PIX_FMT_NONE,
            AVPixelFormat::AV_PIX_FMT_RGBA,
        ];
        let formats = unsafe { format_list(list.as_ptr()) };
        assert_eq!(
            formats,
            vec![
                AVPixelFormat::AV_PIX_FMT_NV12,
                AVPixelFormat::AV_PIX_FMT_YUV420P
            ]
        );
        assert!(unsafe { format_list(std::ptr::null()) }.is_empty());
    }

    #[test]
    fn test_device_type_lookup() {
        assert_eq!(
            parse_device_type("vulkan").unwrap(),
            AVHWDeviceType::AV_HWDEVICE_TYPE_VULKAN
        );
        assert_eq!(
            parse_device_type("cuda").unwrap(),
            AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA
        );
        assert_eq!(
            parse_device_type("teapot"),
            Err(ProbeError::UnknownDeviceType("teapot".to_string()))
        );
        assert!(parse_device_type("vul\0kan").is_err());
    }

    #[test]
    fn test_hardware_detection() {
        // Whatever this machine has, failures must come back as device errors.
        for name in available_device_types() {
            let device_type = parse_device_type(&name).expect("listed type parses");
            match HardwareContext::new(device_type, None) {
                Ok(ctx) => {
                    println!("{} hardware acceleration available", name);
                    assert_eq!(ctx.device_type(), device_type);
                    assert_eq!(ctx.name(), name);
                }
                Err(e) => assert!(
                    matches!(e, ProbeError::HardwareDevice { .. }),
                    "unexpected error for {}: {}",
                    name,
                    e
                ),
            }
        }
    }

    #[test]
    fn test_encoder_options() {
        assert!(matches!(
            encoder_private_options("no_such_encoder"),
            Err(ProbeError::EncoderNotFound(_))
        ));

        if ffmpeg_next::encoder::find_by_name("mpeg4").is_none() {
            return;
        }
        let options = encoder_private_options("mpeg4").expect("mpeg4 options");
        assert_eq!(options.encoder, "mpeg4");
        assert!(!options.options.is_empty());
        assert!(options
            .options
            .iter()
            .any(|o| !matches!(o.kind, OptionKind::Constant { .. })));
        assert!(options.to_string().starts_with("mpeg4 private options"));
    }

    #[test]
    fn test_get_format_prefers_the_device_format() {
        use AVPixelFormat::*;

        let mut context = ffmpeg_next::codec::Context::new();
        let mut state = HwFormatState {
            pix_fmt: AV_PIX_FMT_VULKAN,
        };
        let ctx = unsafe { context.as_mut_ptr() };
        unsafe {
            (*ctx).opaque = &mut state as *mut HwFormatState as *mut std::ffi::c_void;
        }

        let offered = [AV_PIX_FMT_NV12, AV_PIX_FMT_VULKAN, AV_PIX_FMT_NONE];
        assert_eq!(
            unsafe { select_hw_format(ctx, offered.as_ptr()) },
            AV_PIX_FMT_VULKAN
        );

        // Device format not offered: first software format wins.
        let offered = [
            AV_PIX_FMT_VAAPI,
            AV_PIX_FMT_NV12,
            AV_PIX_FMT_YUV420P,
            AV_PIX_FMT_NONE,
        ];
        assert_eq!(
            unsafe { select_hw_format(ctx, offered.as_ptr()) },
            AV_PIX_FMT_NV12
        );

        let offered = [AV_PIX_FMT_CUDA, AV_PIX_FMT_NONE];
        assert_eq!(
            unsafe { select_hw_format(ctx, offered.as_ptr()) },
            AV_PIX_FMT_NONE
        );

        unsafe {
            (*ctx).opaque = std::ptr::null_mut();
        }
        let offered = [AV_PIX_FMT_VULKAN, AV_PIX_FMT_YUV420P, AV_PIX_FMT_NONE];
        assert_eq!(
            unsafe { select_hw_format(ctx, offered.as_ptr()) },
            AV_PIX_FMT_YUV420P
        );
    }

    #[test]
    fn test_encoder_software_target() {
        let vulkan = Pixel::from(AVPixelFormat::AV_PIX_FMT_VULKAN);
        let vaapi = Pixel::from(AVPixelFormat::AV_PIX_FMT_VAAPI);

        assert_eq!(
            software_target("libx264", Pixel::YUV420P, &[Pixel::YUV420P, Pixel::NV12]),
            Ok(None)
        );
        assert_eq!(software_target("rawvideo", Pixel::NV12, &[]), Ok(None));
        assert_eq!(
            software_target("png", Pixel::YUV420P, &[Pixel::RGB24, Pixel::RGBA]),
            Ok(Some(Pixel::RGB24))
        );
        // Device formats listed first are skipped.
        assert_eq!(
            software_target("h264_vaapi", Pixel::YUV420P, &[vaapi, Pixel::NV12]),
            Ok(Some(Pixel::NV12))
        );

        match software_target("h264_vulkan", Pixel::YUV420P, &[vulkan]) {
            Err(ProbeError::EncoderInput(reason)) => {
                assert!(reason.contains("h264_vulkan"), "{}", reason);
                assert!(reason.contains("vulkan"), "{}", reason);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
