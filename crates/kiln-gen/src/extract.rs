//! Archive extraction and primary model selection

use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::metadata::METADATA_FILE_NAME;
use crate::provider::{ArchiveFormat, DownloadedArchive};

pub const GEOMETRY_EXTENSIONS: &[&str] = &["obj", "glb", "gltf", "fbx", "stl", "ply"];
pub const MATERIAL_EXTENSIONS: &[&str] = &["mtl"];
pub const TEXTURE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tga", "bmp", "webp"];

/// File name used for a separately downloaded preview image
pub const PREVIEW_FILE_NAME: &str = "preview.png";

/// Role of an extracted file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Geometry,
    Material,
    Texture,
    Preview,
    Other,
}

impl ArtifactKind {
    /// Classify by extension; images whose stem mentions "preview" are previews
    pub fn classify(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if GEOMETRY_EXTENSIONS.contains(&ext.as_str()) {
            ArtifactKind::Geometry
        } else if MATERIAL_EXTENSIONS.contains(&ext.as_str()) {
            ArtifactKind::Material
        } else if TEXTURE_EXTENSIONS.contains(&ext.as_str()) {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_ascii_lowercase();
            if stem.contains("preview") {
                ArtifactKind::Preview
            } else {
                ArtifactKind::Texture
            }
        } else {
            ArtifactKind::Other
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArtifactKind::Geometry => "geometry",
            ArtifactKind::Material => "material",
            ArtifactKind::Texture => "texture",
            ArtifactKind::Preview => "preview",
            ArtifactKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// One file written into the destination directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
}

/// Everything a result archive unpacked into
#[derive(Debug, Clone)]
pub struct ExtractedArtifactSet {
    pub destination: PathBuf,
    pub primary_model_file: PathBuf,
    /// All other files (materials, textures, previews, extra meshes)
    pub companion_files: Vec<ArtifactFile>,
    /// Every file in archive listing order, primary included
    pub files: Vec<ArtifactFile>,
}

impl ExtractedArtifactSet {
    pub fn files_of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &ArtifactFile> {
        self.files.iter().filter(move |f| f.kind == kind)
    }
}

/// Unpack `archive` into `destination` and choose the primary model file.
///
/// Entries are flattened to their base names. Directories, `__`-prefixed
/// paths (e.g. `__MACOSX/`) and dot-files are skipped; a repeated base name
/// keeps the first occurrence. Fails with `NoGeometryFound` when nothing
/// with a geometry extension was written.
pub fn extract(archive: &DownloadedArchive, destination: &Path) -> Result<ExtractedArtifactSet> {
    fs::create_dir_all(destination)?;

    let mut files = match &archive.format {
        ArchiveFormat::Zip => unzip_flat(&archive.bytes, destination)?,
        ArchiveFormat::Raw { extension } => {
            let path = destination.join(format!("model.{}", extension));
            fs::write(&path, &archive.bytes)?;
            vec![artifact(path, archive.bytes.len() as u64)]
        }
    };

    if let Some(preview) = &archive.preview {
        let path = destination.join(PREVIEW_FILE_NAME);
        if files.iter().any(|f| f.path == path) {
            debug!("archive already contains {}, keeping it", PREVIEW_FILE_NAME);
        } else {
            fs::write(&path, preview)?;
            files.push(ArtifactFile {
                path,
                kind: ArtifactKind::Preview,
                size_bytes: preview.len() as u64,
            });
        }
    }

    let primary = select_primary(&files).ok_or_else(|| {
        KilnError::NoGeometryFound(format!(
            "{} file(s) extracted from {}, none with extension {}",
            files.len(),
            archive.source_url,
            GEOMETRY_EXTENSIONS.join("/")
        ))
    })?;
    let primary_model_file = files[primary].path.clone();

    info!(
        primary = %primary_model_file.display(),
        files = files.len(),
        "extracted result archive"
    );

    let companion_files = files
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != primary)
        .map(|(_, f)| f.clone())
        .collect();

    Ok(ExtractedArtifactSet {
        destination: destination.to_path_buf(),
        primary_model_file,
        companion_files,
        files,
    })
}

/// Index of the largest geometry file; ties go to the earliest
pub fn select_primary(files: &[ArtifactFile]) -> Option<usize> {
    files
        .iter()
        .enumerate()
        .filter(|(_, f)| f.kind == ArtifactKind::Geometry)
        .fold(None, |best: Option<(usize, u64)>, (i, f)| match best {
            Some((_, size)) if size >= f.size_bytes => best,
            _ => Some((i, f.size_bytes)),
        })
        .map(|(i, _)| i)
}

fn artifact(path: PathBuf, size_bytes: u64) -> ArtifactFile {
    ArtifactFile {
        kind: ArtifactKind::classify(&path),
        path,
        size_bytes,
    }
}

fn is_skipped(entry: &Path) -> bool {
    let hidden_dir = entry.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| s.starts_with("__"))
            .unwrap_or(false)
    });
    let dot_file = entry
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true);
    hidden_dir || dot_file
}

fn unzip_flat(bytes: &[u8], destination: &Path) -> Result<Vec<ArtifactFile>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| KilnError::Download(format!("Result is not a readable ZIP archive: {}", e)))?;

    let mut files = Vec::new();
    let mut seen = HashSet::new();

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| KilnError::Download(format!("Failed to read ZIP entry {}: {}", i, e)))?;
        if entry.is_dir() {
            continue;
        }

        let Some(entry_path) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            warn!(entry = %entry.name(), "skipping unsafe archive entry");
            continue;
        };
        if is_skipped(&entry_path) {
            debug!(entry = %entry_path.display(), "skipping archive metadata entry");
            continue;
        }
        let Some(base_name) = entry_path.file_name().map(|n| n.to_os_string()) else {
            continue;
        };
        if base_name == METADATA_FILE_NAME {
            warn!(entry = %entry_path.display(), "skipping archive entry that would clash with the job manifest");
            continue;
        }
        if !seen.insert(base_name.clone()) {
            warn!(entry = %entry_path.display(), "duplicate file name in archive, keeping the first");
            continue;
        }

        let out_path = destination.join(&base_name);
        let mut out = fs::File::create(&out_path)?;
        let size = std::io::copy(&mut entry, &mut out)?;
        files.push(artifact(out_path, size));
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::build_zip;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln_extract_test_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn zip_archive(entries: &[(&str, &[u8])]) -> DownloadedArchive {
        DownloadedArchive::detect(
            "https://cdn.example.com/job/result.zip",
            "OBJ",
            build_zip(entries).unwrap(),
        )
    }

    #[test]
    fn test_largest_geometry_is_primary() {
        let dir = temp_dir();
        let low = vec![b'v'; 1024];
        let full = vec![b'v'; 50 * 1024];
        let archive = zip_archive(&[
            ("model_lowres.obj", low.as_slice()),
            ("model.obj", full.as_slice()),
            ("model.mtl", b"newmtl clay\n"),
            ("texture_diffuse.png", b"\x89PNG"),
        ]);

        let set = extract(&archive, &dir).unwrap();
        assert_eq!(set.primary_model_file, dir.join("model.obj"));
        assert_eq!(set.files.len(), 4);
        assert_eq!(set.companion_files.len(), 3);
        assert_eq!(fs::metadata(dir.join("model.obj")).unwrap().len(), 50 * 1024);
        assert_eq!(set.files_of_kind(ArtifactKind::Material).count(), 1);
        assert_eq!(set.files_of_kind(ArtifactKind::Texture).count(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_bundled_manifest_is_not_extracted() {
        let dir = temp_dir();
        let archive = zip_archive(&[
            ("model.obj", b"v 0 0 0\n"),
            ("result/metadata.json", b"{\"vendor\": true}"),
        ]);

        let set = extract(&archive, &dir).unwrap();
        assert_eq!(set.files.len(), 1);
        assert!(!dir.join(METADATA_FILE_NAME).exists());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_equal_sizes_pick_first_listed() {
        let dir = temp_dir();
        let mesh = vec![b'v'; 2048];
        let archive = zip_archive(&[("b_mesh.glb", mesh.as_slice()), ("a_mesh.glb", mesh.as_slice())]);

        let set = extract(&archive, &dir).unwrap();
        assert_eq!(set.primary_model_file, dir.join("b_mesh.glb"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_no_geometry_is_an_error() {
        let dir = temp_dir();
        let archive = zip_archive(&[("model.mtl", b"newmtl a\n"), ("albedo.png", b"\x89PNG")]);

        let err = extract(&archive, &dir).unwrap_err();
        assert!(matches!(err, KilnError::NoGeometryFound(_)));
        // partial output stays for debugging
        assert!(dir.join("albedo.png").exists());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_nested_and_metadata_entries() {
        let dir = temp_dir();
        let archive = zip_archive(&[
            ("__MACOSX/._model.obj", b"junk"),
            (".DS_Store", b"junk"),
            ("output/mesh/model.obj", b"v 0 0 0\n"),
            ("output/textures/model_preview.jpg", b"jpg"),
        ]);

        let set = extract(&archive, &dir).unwrap();
        assert_eq!(set.primary_model_file, dir.join("model.obj"));
        assert_eq!(set.files.len(), 2);
        assert_eq!(set.files_of_kind(ArtifactKind::Preview).count(), 1);
        assert!(!dir.join(".DS_Store").exists());
        assert!(!dir.join("._model.obj").exists());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_raw_model_and_preview() {
        let dir = temp_dir();
        let archive = DownloadedArchive::detect(
            "https://cdn.example.com/job/0.glb",
            "GLB",
            b"glTF-binary".to_vec(),
        )
        .with_preview(Some(b"\x89PNG".to_vec()));

        let set = extract(&archive, &dir).unwrap();
        assert_eq!(set.primary_model_file, dir.join("model.glb"));
        assert_eq!(set.companion_files.len(), 1);
        assert_eq!(set.companion_files[0].kind, ArtifactKind::Preview);
        assert!(dir.join(PREVIEW_FILE_NAME).exists());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_zip_is_download_error() {
        let dir = temp_dir();
        let archive = DownloadedArchive::detect(
            "https://cdn.example.com/job/result.zip",
            "OBJ",
            b"PK\x03\x04 truncated".to_vec(),
        );
        assert!(matches!(
            extract(&archive, &dir),
            Err(KilnError::Download(_))
        ));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_classify() {
        assert_eq!(ArtifactKind::classify(Path::new("a/Model.OBJ")), ArtifactKind::Geometry);
        assert_eq!(ArtifactKind::classify(Path::new("model.mtl")), ArtifactKind::Material);
        assert_eq!(ArtifactKind::classify(Path::new("Preview.PNG")), ArtifactKind::Preview);
        assert_eq!(ArtifactKind::classify(Path::new("normal.tga")), ArtifactKind::Texture);
        assert_eq!(ArtifactKind::classify(Path::new("scene.bin")), ArtifactKind::Other);
        assert_eq!(ArtifactKind::classify(Path::new("README")), ArtifactKind::Other);
    }
}
