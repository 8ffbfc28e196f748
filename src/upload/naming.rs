//! Object naming policy
//!
//! Stored objects are named `{upload-start-epoch-ms}-{stem}.{extension}`,
//! where the stem is the original file name without its extension and the
//! extension comes from the declared MIME type. When the MIME type has no
//! known extension the object is stored without one.

use super::types::UploadMetadata;

/// Stem used when the client declared no usable file name
const FALLBACK_STEM: &str = "upload";

/// Preferred extensions for common types. `mime_guess` lists several
/// extensions per type in no useful order, so the usual one is pinned here.
const PREFERRED_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpeg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
    ("image/heic", "heic"),
    ("image/tiff", "tif"),
    ("video/mp4", "mp4"),
    ("video/quicktime", "mov"),
    ("video/webm", "webm"),
    ("video/x-matroska", "mkv"),
    ("video/x-msvideo", "avi"),
    ("video/mpeg", "mpeg"),
    ("audio/mpeg", "mp3"),
    ("application/pdf", "pdf"),
    ("application/zip", "zip"),
    ("application/json", "json"),
    ("application/octet-stream", "bin"),
    ("text/plain", "txt"),
];

/// Build the stored object name for an upload started at `start_epoch_ms`
pub fn object_name(start_epoch_ms: i64, metadata: &UploadMetadata) -> String {
    let stem = metadata
        .filename()
        .map(file_stem)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_STEM.to_string());

    match metadata.filetype().and_then(extension_for_mime) {
        Some(ext) => format!("{}-{}.{}", start_epoch_ms, stem, ext),
        None => format!("{}-{}", start_epoch_ms, stem),
    }
}

/// File name without directories and without its last extension.
///
/// Directory components are dropped so a client cannot steer the object
/// outside the store. A leading dot is part of the stem (`.bashrc`).
pub fn file_stem(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let stem = match base.rfind('.') {
        Some(pos) if pos > 0 => &base[..pos],
        _ => base,
    };

    stem.chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Extension for a MIME type, ignoring parameters such as `; charset=utf-8`
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    if essence.is_empty() {
        return None;
    }

    if let Some((_, ext)) = PREFERRED_EXTENSIONS.iter().find(|(m, _)| *m == essence) {
        return Some(ext);
    }

    mime_guess::get_mime_extensions_str(&essence).and_then(|exts| exts.first().copied())
}

/// Insert a disambiguating suffix before the extension:
/// `1700000000000-clip.mp4` becomes `1700000000000-clip-3f2a9c1e.mp4`.
pub fn with_suffix(name: &str, suffix: &str) -> String {
    match name.rfind('.') {
        Some(pos) if pos > 0 => format!("{}-{}{}", &name[..pos], suffix, &name[pos..]),
        _ => format!("{}-{}", name, suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_name_from_filename_and_type() {
        let metadata = UploadMetadata::new()
            .with("filename", "original.mov")
            .with("filetype", "video/mp4");

        assert_eq!(
            object_name(1_700_000_000_000, &metadata),
            "1700000000000-original.mp4"
        );
    }

    #[test]
    fn test_unknown_type_has_no_extension() {
        let metadata = UploadMetadata::new()
            .with("filename", "notes.xyz")
            .with("filetype", "application/x-does-not-exist");

        assert_eq!(object_name(42, &metadata), "42-notes");

        let untyped = UploadMetadata::new().with("filename", "notes.xyz");
        assert_eq!(object_name(42, &untyped), "42-notes");
    }

    #[test]
    fn test_missing_filename_uses_fallback() {
        let metadata = UploadMetadata::new().with("filetype", "image/png");
        assert_eq!(object_name(7, &metadata), "7-upload.png");
    }

    #[test]
    fn test_file_stem_strips_directories() {
        assert_eq!(file_stem("../../etc/passwd"), "passwd");
        assert_eq!(file_stem("C:\\Users\\me\\photo.final.jpg"), "photo.final");
        assert_eq!(file_stem(".bashrc"), ".bashrc");
        assert_eq!(file_stem("plain"), "plain");
    }

    #[test]
    fn test_extension_ignores_parameters() {
        assert_eq!(extension_for_mime("text/plain; charset=utf-8"), Some("txt"));
        assert_eq!(extension_for_mime("IMAGE/JPEG"), Some("jpeg"));
        assert_eq!(extension_for_mime(""), None);
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(with_suffix("1-clip.mp4", "abcd"), "1-clip-abcd.mp4");
        assert_eq!(with_suffix("1-clip", "abcd"), "1-clip-abcd");
    }
}
