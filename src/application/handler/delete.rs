use std::fs;
use std::path::Path;

use crate::http::{Response, StatusCode};

/// DELETE of a resolved filesystem target. Only regular files inside the
/// server root or the upload directory may be removed.
pub fn handle_delete(target: &Path, server_root: &Path, upload_dir: &Path) -> Result<Response, StatusCode> {
    if !target.exists() {
        return Err(StatusCode::NotFound);
    }
    if target.is_dir() {
        return Err(StatusCode::Forbidden);
    }
    if !target.starts_with(server_root) && !target.starts_with(upload_dir) {
        return Err(StatusCode::Forbidden);
    }
    fs::remove_file(target).map_err(|_| StatusCode::InternalServerError)?;

    let mut resp = Response::new(StatusCode::Ok);
    resp.set_header("Content-Type", "application/json");
    resp.set_body(&b"{\"status\":\"success\",\"message\":\"File deleted successfully\"}"[..]);
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("webserv-delete-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn deletes_file_inside_root() {
        let root = scratch_dir("ok");
        let file = root.join("victim.txt");
        fs::write(&file, "x").unwrap();
        let resp = handle_delete(&file, &root, &root.join("uploads")).unwrap();
        assert_eq!(resp.status, 200);
        assert!(!file.exists());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_target_is_404() {
        let root = scratch_dir("missing");
        let err = handle_delete(&root.join("nope"), &root, &root).unwrap_err();
        assert_eq!(err, StatusCode::NotFound);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn directories_are_forbidden() {
        let root = scratch_dir("dir");
        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();
        let err = handle_delete(&sub, &root, &root).unwrap_err();
        assert_eq!(err, StatusCode::Forbidden);
        assert!(sub.exists());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn escaping_the_root_is_forbidden() {
        let root = scratch_dir("outside-root");
        let elsewhere = scratch_dir("outside-target");
        let file = elsewhere.join("a.txt");
        fs::write(&file, "x").unwrap();
        let err = handle_delete(&file, &root, &root.join("uploads")).unwrap_err();
        assert_eq!(err, StatusCode::Forbidden);
        assert!(file.exists());
        let _ = fs::remove_dir_all(&root);
        let _ = fs::remove_dir_all(&elsewhere);
    }
}
