//! Shader loading
//!
//! Shaders are looked up by file name in one configured directory and passed to
//! the backend untouched. `.wgsl` files are read as text, `.spv` files as SPIR-V
//! words; anything else is rejected.

use crate::error::{EngineError, EngineResult};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq)]
pub enum ShaderCode {
    Wgsl(String),
    SpirV(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShaderBlob {
    pub name: String,
    pub code: ShaderCode,
}

impl ShaderBlob {
    pub fn wgsl(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: ShaderCode::Wgsl(source.into()),
        }
    }

    /// Cheap entry point check used before handing WGSL to a backend.
    /// SPIR-V blobs are opaque and always pass.
    pub fn declares_entry_point(&self, entry: &str) -> bool {
        match &self.code {
            ShaderCode::Wgsl(source) => {
                let needle = format!("fn {}(", entry);
                source.lines().any(|line| line.contains(&needle))
            }
            ShaderCode::SpirV(_) => true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ShaderLibrary {
    directory: PathBuf,
}

impl ShaderLibrary {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn load(&self, file_name: &str) -> EngineResult<ShaderBlob> {
        let path = self.directory.join(file_name);
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let code = match extension.as_str() {
            "wgsl" => ShaderCode::Wgsl(fs::read_to_string(&path).map_err(|e| {
                EngineError::ShaderLoad {
                    path: path.clone(),
                    error: e.to_string(),
                }
            })?),
            "spv" => {
                let bytes = fs::read(&path).map_err(|e| EngineError::ShaderLoad {
                    path: path.clone(),
                    error: e.to_string(),
                })?;
                if bytes.is_empty() || bytes.len() % 4 != 0 {
                    return Err(EngineError::ShaderLoad {
                        path,
                        error: format!("SPIR-V length {} is not a multiple of 4", bytes.len()),
                    });
                }
                ShaderCode::SpirV(bytes)
            }
            other => {
                return Err(EngineError::ShaderLoad {
                    path,
                    error: format!("unsupported shader extension '{}'", other),
                })
            }
        };

        log::debug!("[ShaderLibrary::load] Loaded {:?}", path);
        Ok(ShaderBlob {
            name: file_name.to_string(),
            code,
        })
    }
}
