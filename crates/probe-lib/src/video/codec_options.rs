use ffmpeg_next::ffi::{self, AVOption, AVOptionType};
use probe_types::ProbeError;
use std::ffi::CStr;
use std::fmt;

/// Default value and range of a private encoder option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionKind {
    Int {
        default: i64,
        min: Option<i64>,
        max: Option<i64>,
    },
    Float {
        default: f64,
        min: f64,
        max: f64,
    },
    Bool {
        default: bool,
    },
    Flags {
        default: i64,
    },
    String {
        default: Option<String>,
    },
    /// A named value of an enum-like option (`AV_OPT_TYPE_CONST`).
    Constant {
        value: i64,
        unit: String,
    },
    Other,
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionKind::Int { default, min, max } => {
                write!(f, "int, default {}", default)?;
                match (min, max) {
                    (Some(min), Some(max)) => write!(f, " [{}, {}]", min, max),
                    (Some(min), None) => write!(f, " [{}, ..]", min),
                    (None, Some(max)) => write!(f, " [.., {}]", max),
                    (None, None) => Ok(()),
                }
            }
            OptionKind::Float { default, min, max } => {
                write!(f, "float, default {} [{}, {}]", default, min, max)
            }
            OptionKind::Bool { default } => write!(f, "bool, default {}", default),
            OptionKind::Flags { default } => write!(f, "flags, default 0b{:b}", default),
            OptionKind::String { default: Some(d) } => write!(f, "string, default \"{}\"", d),
            OptionKind::String { default: None } => write!(f, "string"),
            OptionKind::Constant { value, unit } => write!(f, "{} = {}", unit, value),
            OptionKind::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncoderOption {
    pub name: String,
    pub help: Option<String>,
    pub kind: OptionKind,
}

impl fmt::Display for EncoderOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let OptionKind::Constant { .. } = self.kind {
            write!(f, "    {:<22} {}", self.name, self.kind)?;
        } else {
            write!(f, "  -{:<23} {}", self.name, self.kind)?;
        }
        if let Some(help) = &self.help {
            write!(f, "  ({})", help)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub encoder: String,
    pub options: Vec<EncoderOption>,
}

impl fmt::Display for EncoderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} private options ({}):", self.encoder, self.options.len())?;
        for option in &self.options {
            writeln!(f, "{}", option)?;
        }
        Ok(())
    }
}

fn c_string(ptr: *const std::os::raw::c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

/// Ranges pinned at the integer limits mean "unbounded".
fn bound(value: f64) -> Option<i64> {
    if value <= i32::MIN as f64 || value >= i32::MAX as f64 {
        None
    } else {
        Some(value as i64)
    }
}

fn option_kind(opt: &AVOption) -> OptionKind {
    unsafe {
        match opt.type_ {
            AVOptionType::AV_OPT_TYPE_INT | AVOptionType::AV_OPT_TYPE_INT64 => OptionKind::Int {
                default: opt.default_val.i64_,
                min: bound(opt.min),
                max: bound(opt.max),
            },
            AVOptionType::AV_OPT_TYPE_FLOAT | AVOptionType::AV_OPT_TYPE_DOUBLE => {
                OptionKind::Float {
                    default: opt.default_val.dbl,
                    min: opt.min,
                    max: opt.max,
                }
            }
            AVOptionType::AV_OPT_TYPE_BOOL => OptionKind::Bool {
                default: opt.default_val.i64_ != 0,
            },
            AVOptionType::AV_OPT_TYPE_FLAGS => OptionKind::Flags {
                default: opt.default_val.i64_,
            },
            AVOptionType::AV_OPT_TYPE_STRING => OptionKind::String {
                default: c_string(opt.default_val.str_),
            },
            AVOptionType::AV_OPT_TYPE_CONST => OptionKind::Constant {
                value: opt.default_val.i64_,
                unit: c_string(opt.unit).unwrap_or_default(),
            },
            _ => OptionKind::Other,
        }
    }
}

/// Lists the private AVOptions of the named encoder, in declaration order.
pub fn encoder_private_options(name: &str) -> Result<EncoderOptions, ProbeError> {
    let codec = ffmpeg_next::encoder::find_by_name(name)
        .ok_or_else(|| ProbeError::EncoderNotFound(name.to_string()))?;

    let mut options = Vec::new();
    unsafe {
        let class = (*codec.as_ptr()).priv_class;
        if !class.is_null() {
            let mut opt: *const AVOption = std::ptr::null();
            loop {
                opt = ffi::av_opt_next(&class as *const _ as *const _, opt);
                if opt.is_null() {
                    break;
                }
                let opt = &*opt;
                options.push(EncoderOption {
                    name: c_string(opt.name).unwrap_or_default(),
                    help: c_string(opt.help),
                    kind: option_kind(opt),
                });
            }
        }
    }

    Ok(EncoderOptions {
        encoder: codec.name().to_string(),
        options,
    })
}
