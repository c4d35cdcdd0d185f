//! Shader blobs for the Orrery engine.
//!
//! GLSL sources live in this crate's `shaders/` directory and are compiled
//! to `<name>.spv` by the build script. At runtime a [`ShaderLibrary`] loads
//! the SPIR-V for a logical shader name from a directory; the engine treats
//! the result as an opaque word blob.

use orrery_core::{Error, Result};
use std::path::{Path, PathBuf};

/// SPIR-V magic number, first word of every module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Environment variable overriding the shader directory.
pub const SHADER_DIR_ENV: &str = "ORRERY_SHADER_DIR";

/// Mesh vertex shader.
pub const MESH_VERT: &str = "mesh.vert";
/// Mesh fragment shader.
pub const MESH_FRAG: &str = "mesh.frag";
/// Point light billboard vertex shader.
pub const POINT_LIGHT_VERT: &str = "point_light.vert";
/// Point light billboard fragment shader.
pub const POINT_LIGHT_FRAG: &str = "point_light.frag";
/// Gravity integration compute shader.
pub const GRAVITY_COMP: &str = "gravity.comp";
/// Force field compute shader.
pub const FIELD_COMP: &str = "field.comp";

/// Every shader the build compiles.
pub const ALL: [&str; 6] = [
    MESH_VERT,
    MESH_FRAG,
    POINT_LIGHT_VERT,
    POINT_LIGHT_FRAG,
    GRAVITY_COMP,
    FIELD_COMP,
];

/// Convert a little-endian byte blob to SPIR-V words.
///
/// The blob must be a whole number of words and start with the SPIR-V magic.
pub fn bytes_to_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidData(format!(
            "SPIR-V blob of {} bytes is not a whole number of words",
            bytes.len()
        )));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(Error::InvalidData(format!(
            "Bad SPIR-V magic {other:#010x}"
        ))),
        None => Err(Error::InvalidData("Empty SPIR-V blob".to_string())),
    }
}

/// Loads precompiled shaders by logical name.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    dir: PathBuf,
}

impl ShaderLibrary {
    /// Library reading from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory from `ORRERY_SHADER_DIR`, else the build's output.
    pub fn from_env() -> Self {
        std::env::var_os(SHADER_DIR_ENV).map_or_else(
            || Self::new(Self::bundled_dir()),
            Self::new,
        )
    }

    /// Where the build script wrote the compiled shaders.
    pub fn bundled_dir() -> PathBuf {
        Path::new(env!("OUT_DIR")).join("shaders")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the blob for `name`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.spv"))
    }

    /// Load the SPIR-V words for `name`.
    pub fn load(&self, name: &str) -> Result<Vec<u32>> {
        let path = self.path(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("shader blob {}", path.display())));
            }
            Err(e) => return Err(e.into()),
        };
        let words = bytes_to_spirv(&bytes).map_err(|e| match e {
            Error::InvalidData(msg) => Error::InvalidData(format!("{}: {msg}", path.display())),
            other => other,
        })?;
        tracing::debug!("Loaded shader {name} ({} words)", words.len());
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("orrery-shaders-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn converts_words() {
        let words = bytes_to_spirv(&blob(&[SPIRV_MAGIC, 0x0001_0000, 42])).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000, 42]);
    }

    #[test]
    fn rejects_partial_word() {
        let mut bytes = blob(&[SPIRV_MAGIC]);
        bytes.push(0);
        assert!(matches!(bytes_to_spirv(&bytes), Err(Error::InvalidData(_))));
    }

    #[test]
    fn rejects_bad_magic_and_empty() {
        assert!(bytes_to_spirv(&blob(&[0xdead_beef])).is_err());
        assert!(bytes_to_spirv(&[]).is_err());
    }

    #[test]
    fn loads_by_name() {
        let dir = scratch_dir("load");
        std::fs::write(dir.join("field.comp.spv"), blob(&[SPIRV_MAGIC, 7])).unwrap();

        let library = ShaderLibrary::new(&dir);
        assert_eq!(library.path(FIELD_COMP), dir.join("field.comp.spv"));
        assert_eq!(library.load(FIELD_COMP).unwrap(), vec![SPIRV_MAGIC, 7]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn build_compiles_every_shader() {
        let library = ShaderLibrary::new(ShaderLibrary::bundled_dir());
        for name in ALL {
            let words = library.load(name).unwrap();
            assert!(words.len() > 5, "{name} is only a header");
        }
    }

    #[test]
    fn missing_blob_is_not_found() {
        let dir = scratch_dir("missing");
        let library = ShaderLibrary::new(&dir);
        assert!(matches!(library.load("nope"), Err(Error::NotFound(_))));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
