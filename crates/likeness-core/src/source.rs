//! Image loading from disk and dataset folder enumeration.
//!
//! An enrollment or test root holds one sub-directory per identity; the
//! directory name is the identity id.

use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("image not found: {0}")]
    NotFound(PathBuf),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("{path} is {width}x{height}, larger than {max}px")]
    TooLarge {
        path: PathBuf,
        width: u32,
        height: u32,
        max: u32,
    },
}

/// A decoded RGB image and the file name it came from.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub name: String,
    pub image: RgbImage,
}

/// One identity folder under a dataset root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityFolder {
    pub identity: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ImageLoader {
    max_dimension: u32,
}

impl ImageLoader {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// Decode one file to RGB.
    ///
    /// The header is checked against the size cap before the pixel data is
    /// decoded.
    pub fn load(&self, path: &Path) -> Result<SourceImage, SourceError> {
        if !path.is_file() {
            return Err(SourceError::NotFound(path.to_path_buf()));
        }
        let (width, height) = image::image_dimensions(path).map_err(|source| decode_err(path, source))?;
        if width.max(height) > self.max_dimension {
            return Err(SourceError::TooLarge {
                path: path.to_path_buf(),
                width,
                height,
                max: self.max_dimension,
            });
        }
        let image = image::open(path)
            .map_err(|source| decode_err(path, source))?
            .to_rgb8();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(SourceImage { name, image })
    }

    /// Load every image in `dir`, sorted by file name.
    ///
    /// Files without a recognised image extension are ignored. Any image
    /// that fails to load fails the whole call.
    pub fn load_folder(&self, dir: &Path) -> Result<Vec<SourceImage>, SourceError> {
        image_paths(dir)?.iter().map(|p| self.load(p)).collect()
    }
}

/// Paths of image files directly inside `dir`, sorted by file name.
pub fn image_paths(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let mut paths: Vec<PathBuf> = read_dir(dir)?
        .into_iter()
        .filter(|p| p.is_file() && ImageFormat::from_path(p).is_ok())
        .collect();
    paths.sort();
    debug!(dir = %dir.display(), images = paths.len(), "listed images");
    Ok(paths)
}

/// Identity sub-directories of `root`, sorted by name.
pub fn identity_folders(root: &Path) -> Result<Vec<IdentityFolder>, SourceError> {
    let mut folders: Vec<IdentityFolder> = read_dir(root)?
        .into_iter()
        .filter(|p| p.is_dir())
        .filter_map(|path| {
            let identity = path.file_name()?.to_str()?.to_string();
            Some(IdentityFolder { identity, path })
        })
        .collect();
    folders.sort_by(|a, b| a.identity.cmp(&b.identity));
    Ok(folders)
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    if !dir.is_dir() {
        return Err(SourceError::NotADirectory(dir.to_path_buf()));
    }
    let io_err = |source| SourceError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        paths.push(entry.map_err(io_err)?.path());
    }
    Ok(paths)
}

fn decode_err(path: &Path, source: image::ImageError) -> SourceError {
    SourceError::Decode {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::checkerboard;

    #[test]
    fn test_load_png_as_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        checkerboard(32, 24, 64, 192).save(&path).unwrap();

        let loaded = ImageLoader::new(4096).load(&path).unwrap();
        assert_eq!(loaded.name, "face.png");
        assert_eq!(loaded.image.dimensions(), (32, 24));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ImageLoader::new(4096)
            .load(Path::new("/nonexistent/face.png"))
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn test_load_garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();
        let err = ImageLoader::new(4096).load(&path).unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }

    #[test]
    fn test_load_rejects_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        checkerboard(64, 16, 64, 192).save(&path).unwrap();
        let err = ImageLoader::new(32).load(&path).unwrap_err();
        assert!(matches!(err, SourceError::TooLarge { width: 64, height: 16, max: 32, .. }));
    }

    #[test]
    fn test_folder_listing_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.png", "c.png"] {
            checkerboard(8, 8, 64, 192).save(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let images = ImageLoader::new(4096).load_folder(dir.path()).unwrap();
        let names: Vec<&str> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn test_identity_folders() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("zoe")).unwrap();
        std::fs::create_dir(root.path().join("adam")).unwrap();
        std::fs::write(root.path().join("README"), b"x").unwrap();

        let folders = identity_folders(root.path()).unwrap();
        let ids: Vec<&str> = folders.iter().map(|f| f.identity.as_str()).collect();
        assert_eq!(ids, vec!["adam", "zoe"]);
        assert!(matches!(
            identity_folders(&root.path().join("missing")),
            Err(SourceError::NotADirectory(_))
        ));
    }
}
