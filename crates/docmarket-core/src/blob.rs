// Blob naming for uploaded document files

/// Folder inside the content bucket that holds document files.
pub const DOCUMENTS_FOLDER: &str = "documents";

/// Returns the lowercase extension of a file name, if it has one.
pub fn file_extension(file_name: &str) -> Option<String> {
    let name = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Builds the bucket object path for an uploaded file:
/// `documents/<doc_id>-<timestamp_millis>.<ext>`.
///
/// Files without an extension are stored as `.bin`.
pub fn blob_object_path(doc_id: i64, timestamp_millis: i64, file_name: &str) -> String {
    let ext = file_extension(file_name).unwrap_or_else(|| "bin".to_string());
    format!("{}/{}-{}.{}", DOCUMENTS_FOLDER, doc_id, timestamp_millis, ext)
}

/// MIME type sent with the upload.
pub fn content_type_for(file_name: &str) -> &'static str {
    match file_extension(file_name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}
