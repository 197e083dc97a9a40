use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::engine::OcrError;

/// Windows install locations used by the common Tesseract installers.
const COMMON_INSTALL_DIRS: [&str; 2] = [
    r"C:\Program Files\Tesseract-OCR",
    r"C:\Program Files (x86)\Tesseract-OCR",
];

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "tesseract.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "tesseract";

/// Where the engine binary and its language data live.
#[derive(Debug, Clone, PartialEq)]
pub struct TesseractPaths {
    pub executable: PathBuf,
    /// `None` lets Tesseract use its compiled-in default.
    pub tessdata: Option<PathBuf>,
}

/// Returns the per-user directory for a private Tesseract copy
pub fn get_tesseract_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trainer")
        .join("tesseract")
}

/// Locates Tesseract, preferring an explicitly configured executable.
///
/// Search order: `configured`, the per-user directory, `PATH`, the common
/// Windows install locations.
pub fn find_tesseract(configured: Option<&Path>) -> Result<TesseractPaths, OcrError> {
    let executable = find_tesseract_executable(configured)?;
    let tessdata = find_tessdata_dir(&executable);
    debug!(
        "Using Tesseract {} (tessdata: {})",
        executable.display(),
        tessdata
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "default".into())
    );
    Ok(TesseractPaths { executable, tessdata })
}

/// Finds the Tesseract executable
pub fn find_tesseract_executable(configured: Option<&Path>) -> Result<PathBuf, OcrError> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(OcrError::EngineUnavailable(format!(
            "configured Tesseract not found at {}",
            path.display()
        )));
    }

    let local_exe = get_tesseract_dir().join(EXECUTABLE_NAME);
    if local_exe.exists() {
        return Ok(local_exe);
    }

    // Check PATH
    if let Ok(output) = std::process::Command::new("tesseract")
        .arg("--version")
        .output()
    {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    for dir in &COMMON_INSTALL_DIRS {
        let p = Path::new(dir).join("tesseract.exe");
        if p.exists() {
            info!("Found Tesseract at: {}", p.display());
            return Ok(p);
        }
    }

    Err(OcrError::EngineUnavailable(
        "Tesseract not found. Install Tesseract-OCR, add it to PATH or set tesseract_path in config.json"
            .into(),
    ))
}

/// Finds a tessdata directory containing `eng.traineddata`.
///
/// Checks `TESSDATA_PREFIX` (and its `tessdata` child), the directory next to
/// the executable, the per-user directory and the common install locations.
pub fn find_tessdata_dir(executable: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let prefix = PathBuf::from(prefix);
        candidates.push(prefix.join("tessdata"));
        candidates.push(prefix);
    }
    if let Some(parent) = executable.parent() {
        candidates.push(parent.join("tessdata"));
    }
    candidates.push(get_tesseract_dir().join("tessdata"));
    candidates.extend(COMMON_INSTALL_DIRS.iter().map(|d| Path::new(d).join("tessdata")));

    candidates
        .into_iter()
        .find(|dir| dir.join("eng.traineddata").exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_executable_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join(EXECUTABLE_NAME);
        std::fs::write(&exe, b"").unwrap();
        assert_eq!(find_tesseract_executable(Some(&exe)).unwrap(), exe);
    }

    #[test]
    fn test_missing_configured_executable_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("missing").join(EXECUTABLE_NAME);
        let err = find_tesseract_executable(Some(&exe)).unwrap_err();
        assert!(matches!(err, OcrError::EngineUnavailable(_)));
    }

    #[test]
    fn test_tessdata_next_to_executable() {
        let dir = tempfile::tempdir().unwrap();
        let tessdata = dir.path().join("tessdata");
        std::fs::create_dir_all(&tessdata).unwrap();
        std::fs::write(tessdata.join("eng.traineddata"), b"").unwrap();
        let exe = dir.path().join(EXECUTABLE_NAME);

        // TESSDATA_PREFIX, when set on the test machine, takes precedence.
        if std::env::var("TESSDATA_PREFIX").is_err() {
            assert_eq!(find_tessdata_dir(&exe), Some(tessdata));
        }
    }
}
