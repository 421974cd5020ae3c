// src/error.rs
//
// Unified error handling for imgingest
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - UserError: Invalid input, recoverable
// - CodecError: Format/encoding issues
// - ResourceLimit: Size/memory/file limits
// - InternalBug: Library bugs (should not happen)

use std::borrow::Cow;
use thiserror::Error;

/// Error taxonomy for callers that want coarse-grained handling.
///
/// - UserError: Invalid input, recoverable by the user
/// - CodecError: Format/encoding issues
/// - ResourceLimit: Size/memory/file limits
/// - InternalBug: Library bugs (should not happen)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input, recoverable by user
    UserError,
    /// Format/encoding issues
    CodecError,
    /// Size/memory/file limits
    ResourceLimit,
    /// Library bugs (should not happen)
    InternalBug,
}

/// imgingest error types
///
/// Every failure the pipeline can surface. EXIF parse anomalies are
/// deliberately absent: they resolve to the default orientation instead.
#[derive(Debug, Error)]
pub enum IngestError {
    // Input gate
    #[error("Input is {size} bytes, over the {max} byte upload limit")]
    TooLarge { size: u64, max: u64 },

    #[error("Unsupported image format: {detail}")]
    UnsupportedFormat { detail: Cow<'static, str> },

    // Legacy codec bridge - terminal after both attempts
    #[error("Failed to convert {format} image")]
    ConversionFailed { format: Cow<'static, str> },

    // Raster errors
    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // File I/O (path-based entry point). A failed mmap falls back to a plain
    // read, so this is the only error the file path can surface.
    #[error("Failed to read file '{path}': {source}")]
    FileReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    // Internal Errors
    #[error("Internal error: {message}")]
    Internal { message: Cow<'static, str> },
}

impl Clone for IngestError {
    fn clone(&self) -> Self {
        match self {
            Self::TooLarge { size, max } => Self::TooLarge {
                size: *size,
                max: *max,
            },
            Self::UnsupportedFormat { detail } => Self::UnsupportedFormat {
                detail: detail.clone(),
            },
            Self::ConversionFailed { format } => Self::ConversionFailed {
                format: format.clone(),
            },
            Self::DecodeFailed { message } => Self::DecodeFailed {
                message: message.clone(),
            },
            Self::EncodeFailed { format, message } => Self::EncodeFailed {
                format: format.clone(),
                message: message.clone(),
            },
            Self::FileReadFailed { path, source } => Self::FileReadFailed {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::Internal { message } => Self::Internal {
                message: message.clone(),
            },
        }
    }
}

// Constructor Helpers
impl IngestError {
    pub fn too_large(size: u64, max: u64) -> Self {
        Self::TooLarge { size, max }
    }

    pub fn unsupported_format(detail: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            detail: detail.into(),
        }
    }

    pub fn conversion_failed(format: impl Into<Cow<'static, str>>) -> Self {
        Self::ConversionFailed {
            format: format.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn file_read_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TooLarge { .. } | Self::UnsupportedFormat { .. } => ErrorCategory::UserError,

            Self::ConversionFailed { .. }
            | Self::DecodeFailed { .. }
            | Self::EncodeFailed { .. } => ErrorCategory::CodecError,

            Self::FileReadFailed { .. } => ErrorCategory::ResourceLimit,

            Self::Internal { .. } => ErrorCategory::InternalBug,
        }
    }

    /// Check if this error is recoverable (user can fix it)
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::UserError | ErrorCategory::ResourceLimit => true,
            ErrorCategory::CodecError | ErrorCategory::InternalBug => false,
        }
    }

    /// One actionable, user-facing message per failure. This is the only string
    /// the caller should show to an end user; raw codec errors stay internal.
    pub fn user_message(&self) -> String {
        match self {
            Self::TooLarge { size, max } => {
                let size_mb = *size as f64 / (1024.0 * 1024.0);
                let max_mb = *max as f64 / (1024.0 * 1024.0);
                format!(
                    "This image is {size_mb:.1} MB; the limit is {max_mb:.0} MB. \
                     Please pick a smaller photo."
                )
            }
            Self::UnsupportedFormat { .. } => {
                "This file does not look like a supported image. \
                 Please use a JPEG, PNG, WebP, HEIC or AVIF photo."
                    .to_string()
            }
            Self::ConversionFailed { format } => {
                format!(
                    "This {format} photo could not be converted. \
                     Please convert it to JPEG using your device's photo app and try again."
                )
            }
            Self::DecodeFailed { .. } => {
                "This image could not be read. It may be corrupted; please try another photo."
                    .to_string()
            }
            Self::EncodeFailed { .. } | Self::Internal { .. } => {
                "Something went wrong while preparing this image. Please try again.".to_string()
            }
            Self::FileReadFailed { .. } => {
                "This file could not be opened. Please check it still exists and try again."
                    .to_string()
            }
        }
    }
}

impl ErrorCategory {
    /// Get string representation of error category
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ResourceLimit => "ResourceLimit",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, IngestError>;
