use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::ZipArchive;

use crate::app::config::expand_home;
use crate::app::models::ApkInfo;

/// Split APKs extracted from a `.apks`/`.xapk` bundle. The files live as long as this value.
pub struct SplitApkBundle {
    pub apk_paths: Vec<String>,
    _temp_dir: TempDir,
}

pub fn is_split_bundle(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_lowercase().as_str(), "apks" | "xapk"))
        .unwrap_or(false)
}

pub fn normalize_apk_path(path: &str) -> PathBuf {
    expand_home(path.trim())
}

pub fn extract_split_apks(path: &Path) -> Result<SplitApkBundle, String> {
    let file = File::open(path).map_err(|err| format!("Failed to open bundle: {err}"))?;
    let mut archive = ZipArchive::new(file).map_err(|err| format!("Invalid bundle: {err}"))?;
    let temp_dir = TempDir::new().map_err(|err| format!("Failed to create temp dir: {err}"))?;
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| format!("Failed to read bundle: {err}"))?;
        let name = entry.name().to_string();
        if !name.to_lowercase().ends_with(".apk") {
            continue;
        }
        let file_name = Path::new(&name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| "Invalid apk name".to_string())?;
        let target = temp_dir.path().join(file_name);
        let mut output =
            File::create(&target).map_err(|err| format!("Failed to extract apk: {err}"))?;
        io::copy(&mut entry, &mut output).map_err(|err| format!("Failed to write apk: {err}"))?;
        extracted.push(target.to_string_lossy().to_string());
    }

    if extracted.is_empty() {
        return Err("Bundle contains no .apk files".to_string());
    }

    // base.apk first; adb install-multiple expects the base split before config splits.
    extracted.sort_by_key(|path| {
        let name = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("")
            .to_lowercase();
        if name.contains("base") {
            (0, name)
        } else {
            (1, name)
        }
    });

    Ok(SplitApkBundle {
        apk_paths: extracted,
        _temp_dir: temp_dir,
    })
}

pub fn get_apk_info(path: &Path) -> ApkInfo {
    let mut info = ApkInfo {
        path: path.to_string_lossy().to_string(),
        file_size_bytes: 0,
        is_split_bundle: is_split_bundle(path),
        error: None,
    };

    if !path.is_file() {
        info.error = Some(format!("File not found: {}", path.display()));
        return info;
    }

    if let Ok(metadata) = fs::metadata(path) {
        info.file_size_bytes = metadata.len();
    }

    match File::open(path) {
        Ok(file) => {
            if let Err(err) = ZipArchive::new(file) {
                info.error = Some(format!("Not a valid APK archive: {err}"));
            }
        }
        Err(err) => {
            info.error = Some(format!("Failed to open APK: {err}"));
        }
    }

    info
}
