//! References to images held by the render engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

/// Which engine directory an image lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Input,
    #[default]
    Output,
    Temp,
}

impl ImageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Input => "input",
            ImageKind::Output => "output",
            ImageKind::Temp => "temp",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(ImageKind::Input),
            "output" => Ok(ImageKind::Output),
            "temp" => Ok(ImageKind::Temp),
            other => Err(CoreError::Validation(format!(
                "Unknown image type '{other}', expected input, output or temp"
            ))),
        }
    }
}

/// Location of one image on the render engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: ImageKind,
}

impl ImageRef {
    pub fn new(filename: impl Into<String>, subfolder: impl Into<String>, kind: ImageKind) -> Self {
        Self {
            filename: filename.into(),
            subfolder: subfolder.into(),
            kind,
        }
    }

    /// Relay URL under which browsers fetch this image.
    pub fn proxy_url(&self) -> String {
        format!(
            "/api/images/{}?type={}&subfolder={}",
            urlencoding::encode(&self.filename),
            self.kind,
            urlencoding::encode(&self.subfolder),
        )
    }
}

/// An image the engine accepted as workflow input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    /// Name the engine stored the file under.
    pub filename: String,
    /// Engine subfolder, empty when stored at the input root.
    pub subfolder: String,
    /// Name of the file as the browser sent it.
    pub original_filename: String,
    pub uploaded_at: Timestamp,
}

impl UploadedImage {
    pub fn image_ref(&self) -> ImageRef {
        ImageRef::new(&self.filename, &self.subfolder, ImageKind::Input)
    }
}
