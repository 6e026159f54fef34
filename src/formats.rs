//! Format Registry
//!
//! Closed set of output formats and the FFmpeg flags that produce each one.
//! Pure lookup, no I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Requested-format values that mean "keep the source format".
const KEEP_ORIGINAL: &[&str] = &["original", "keep"];

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpeg,
    Png,
    Webp,
    Bmp,
}

/// Everything needed to name, serve and produce one format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub format: Format,
    pub name: &'static str,
    /// Canonical extension first.
    pub extensions: &'static [&'static str],
    /// Canonical MIME type first.
    pub mime_types: &'static [&'static str],
    pub codec: &'static str,
    pub container: &'static str,
    /// Whether the numeric quality knob changes the output.
    pub supports_quality: bool,
    /// `-compression_level` passed to FFmpeg, if the encoder has one.
    pub compression_level: Option<u8>,
}

static JPEG: FormatDescriptor = FormatDescriptor {
    format: Format::Jpeg,
    name: "jpeg",
    extensions: &["jpg", "jpeg", "jpe"],
    mime_types: &["image/jpeg", "image/jpg", "image/pjpeg"],
    codec: "mjpeg",
    container: "image2",
    supports_quality: true,
    compression_level: None,
};

static PNG: FormatDescriptor = FormatDescriptor {
    format: Format::Png,
    name: "png",
    extensions: &["png"],
    mime_types: &["image/png"],
    codec: "png",
    container: "image2",
    supports_quality: false,
    compression_level: Some(9),
};

static WEBP: FormatDescriptor = FormatDescriptor {
    format: Format::Webp,
    name: "webp",
    extensions: &["webp"],
    mime_types: &["image/webp"],
    codec: "libwebp",
    container: "webp",
    supports_quality: true,
    compression_level: Some(4),
};

static BMP: FormatDescriptor = FormatDescriptor {
    format: Format::Bmp,
    name: "bmp",
    extensions: &["bmp", "dib"],
    mime_types: &["image/bmp", "image/x-ms-bmp"],
    codec: "bmp",
    container: "image2",
    supports_quality: false,
    compression_level: None,
};

impl Format {
    pub const ALL: [Format; 4] = [Format::Jpeg, Format::Png, Format::Webp, Format::Bmp];

    pub fn descriptor(self) -> &'static FormatDescriptor {
        match self {
            Format::Jpeg => &JPEG,
            Format::Png => &PNG,
            Format::Webp => &WEBP,
            Format::Bmp => &BMP,
        }
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Canonical file extension, without the dot.
    pub fn extension(self) -> &'static str {
        self.descriptor().extensions[0]
    }

    pub fn mime_type(self) -> &'static str {
        self.descriptor().mime_types[0]
    }

    /// Look a format up by name (`jpg` is accepted as an alias).
    pub fn from_name(name: &str) -> Option<Format> {
        let name = name.trim().to_ascii_lowercase();
        if name == "jpg" {
            return Some(Format::Jpeg);
        }
        Format::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Look a format up by extension, with or without the leading dot.
    pub fn from_extension(ext: &str) -> Option<Format> {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        Format::ALL
            .into_iter()
            .find(|f| f.descriptor().extensions.contains(&ext.as_str()))
    }

    pub fn from_mime_type(mime: &str) -> Option<Format> {
        let mime = mime.trim().to_ascii_lowercase();
        Format::ALL
            .into_iter()
            .find(|f| f.descriptor().mime_types.contains(&mime.as_str()))
    }

    /// Map the 1-100 quality scale (higher is better) onto FFmpeg's
    /// `-q:v` scale for MJPEG, 31-2 (lower is better).
    fn jpeg_qscale(quality: u8) -> u8 {
        let q = quality.clamp(1, 100) as u32;
        (31 - ((q - 1) * 29 + 49) / 99) as u8
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why `resolve` did not return what was asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// The caller named a format that does not exist.
    UnknownFormat(String),
    /// The source extension is not one we recognise.
    UnknownExtension(String),
    /// The inferred format is switched off by the allow-list.
    Disabled(Format),
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::UnknownFormat(name) => write!(f, "unknown format '{}'", name),
            Fallback::UnknownExtension(ext) => write!(f, "unrecognised extension '{}'", ext),
            Fallback::Disabled(format) => write!(f, "format '{}' is disabled", format),
        }
    }
}

/// Outcome of [`FormatRegistry::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub format: Format,
    /// Set when the default was substituted.
    pub fallback: Option<Fallback>,
    /// True when the format came from the caller, not from the source file.
    pub explicit: bool,
}

impl Resolution {
    pub fn descriptor(&self) -> &'static FormatDescriptor {
        self.format.descriptor()
    }
}

#[derive(Debug, Clone)]
pub struct FormatRegistry {
    allowed: Vec<Format>,
    default_format: Format,
}

impl FormatRegistry {
    pub fn new(allowed: Vec<Format>, default_format: Format) -> Self {
        Self {
            allowed,
            default_format,
        }
    }

    pub fn default_format(&self) -> Format {
        self.default_format
    }

    pub fn allowed(&self) -> &[Format] {
        &self.allowed
    }

    /// Pick the output format.
    ///
    /// An explicit, known format wins. An unknown one falls back to the
    /// default with a warning. Without a request (or with the keep-original
    /// sentinel) the format follows `source_extension`, again falling back to
    /// the default when the extension is unrecognised.
    pub fn resolve(&self, requested: Option<&str>, source_extension: &str) -> Resolution {
        let requested = requested.map(str::trim).filter(|r| !r.is_empty()).filter(|r| {
            !KEEP_ORIGINAL
                .iter()
                .any(|k| r.eq_ignore_ascii_case(k))
        });

        if let Some(name) = requested {
            return match Format::from_name(name) {
                Some(format) => Resolution {
                    format,
                    fallback: None,
                    explicit: true,
                },
                None => {
                    let fallback = Fallback::UnknownFormat(name.to_string());
                    warn!(
                        requested = %crate::telemetry::sanitize_for_log(name),
                        default = %self.default_format,
                        "Unknown output format requested, using default"
                    );
                    Resolution {
                        format: self.default_format,
                        fallback: Some(fallback),
                        explicit: false,
                    }
                }
            };
        }

        match Format::from_extension(source_extension) {
            Some(format) => Resolution {
                format,
                fallback: None,
                explicit: false,
            },
            None => {
                warn!(
                    extension = %crate::telemetry::sanitize_for_log(source_extension),
                    default = %self.default_format,
                    "Unrecognised source extension, using default format"
                );
                Resolution {
                    format: self.default_format,
                    fallback: Some(Fallback::UnknownExtension(source_extension.to_string())),
                    explicit: false,
                }
            }
        }
    }

    /// Known *and* enabled by the operator's allow-list.
    pub fn is_supported(&self, name: &str) -> bool {
        Format::from_name(name)
            .map(|f| self.is_allowed(f))
            .unwrap_or(false)
    }

    pub fn is_allowed(&self, format: Format) -> bool {
        self.allowed.contains(&format)
    }

    pub fn extension_for(&self, format: Format) -> &'static str {
        format.extension()
    }

    pub fn mime_type_for(&self, format: Format) -> &'static str {
        format.mime_type()
    }

    /// Build the FFmpeg argument vector, one argument per element.
    ///
    /// Paths are passed through untouched as single elements; nothing here is
    /// ever joined into a command string. `quality` is ignored for formats
    /// whose descriptor does not support it.
    pub fn arguments_for(
        &self,
        format: Format,
        quality: u8,
        input: &Path,
        output: &Path,
    ) -> Vec<String> {
        let d = format.descriptor();
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-frames:v".into(),
            "1".into(),
            "-c:v".into(),
            d.codec.into(),
        ];

        if d.supports_quality {
            match format {
                Format::Jpeg => {
                    args.push("-q:v".into());
                    args.push(Format::jpeg_qscale(quality).to_string());
                }
                Format::Webp => {
                    args.push("-quality".into());
                    args.push(quality.clamp(1, 100).to_string());
                }
                Format::Png | Format::Bmp => {}
            }
        }

        if let Some(level) = d.compression_level {
            args.push("-compression_level".into());
            args.push(level.to_string());
        }

        args.push("-f".into());
        args.push(d.container.into());
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new(Format::ALL.to_vec(), Format::Jpeg)
    }
}
