//! Where meshes and material files come from.
//!
//! - the companion-file convention (`chair.obj` → `chair.mtl`)
//! - references from inside a material file (`map_Kd`)
//! - byte fetches over HTTP (wasm32), from a directory (native) or from memory

use std::collections::HashMap;
use std::sync::Arc;

#[cfg(target_arch = "wasm32")]
use gloo_net::http::Request;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{0}: not found")]
    NotFound(String),
    #[error("{path}: HTTP status {status}")]
    Status { path: String, status: u16 },
    #[error("{path}: {message}")]
    Transport { path: String, message: String },
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Derives the material file path for `mesh_path`.
///
/// Only a trailing `.{mesh_ext}` (ASCII case-insensitive) is replaced; the rest
/// of the path is kept as is. Paths with another extension yield `None`.
pub fn material_path_for(mesh_path: &str, mesh_ext: &str, material_ext: &str) -> Option<String> {
    let suffix_len = mesh_ext.len() + 1;
    if mesh_path.len() <= suffix_len {
        return None;
    }
    let split = mesh_path.len() - suffix_len;
    let (stem, suffix) = (mesh_path.get(..split)?, mesh_path.get(split..)?);
    let ext = suffix.strip_prefix('.')?;
    if !ext.eq_ignore_ascii_case(mesh_ext) {
        return None;
    }
    Some(format!("{stem}.{material_ext}"))
}

/// Resolves `reference`, as written inside the file at `referrer`, against
/// the directory of `referrer`. Absolute references are returned as is.
pub fn sibling_path(referrer: &str, reference: &str) -> String {
    let reference = reference.trim().replace('\\', "/");
    match referrer.rfind('/') {
        Some(dir) if !reference.starts_with('/') => format!("{}/{reference}", &referrer[..dir]),
        _ => reference,
    }
}

#[derive(Debug, Clone)]
pub enum AssetSource {
    /// Plain GETs, relative to the page unless `base_url` is set.
    #[cfg(target_arch = "wasm32")]
    Http { base_url: Option<String> },
    /// Files below `root`.
    #[cfg(not(target_arch = "wasm32"))]
    Directory { root: std::path::PathBuf },
    Memory(Arc<HashMap<String, Vec<u8>>>),
}

impl AssetSource {
    pub fn memory<I, K, V>(assets: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        Self::Memory(Arc::new(
            assets
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        match self {
            #[cfg(target_arch = "wasm32")]
            Self::Http { base_url } => fetch_http(base_url.as_deref(), path).await,
            #[cfg(not(target_arch = "wasm32"))]
            Self::Directory { root } => {
                let full = root.join(path.trim_start_matches('/'));
                std::fs::read(&full).map_err(|source| match source.kind() {
                    std::io::ErrorKind::NotFound => FetchError::NotFound(path.to_owned()),
                    _ => FetchError::Io {
                        path: path.to_owned(),
                        source,
                    },
                })
            }
            Self::Memory(assets) => assets
                .get(path)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(path.to_owned())),
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn join_url(base_url: Option<&str>, path: &str) -> String {
    match base_url {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/')),
        None => path.to_owned(),
    }
}

#[cfg(target_arch = "wasm32")]
async fn fetch_http(base_url: Option<&str>, path: &str) -> Result<Vec<u8>, FetchError> {
    let url = join_url(base_url, path);
    let transport = |e: gloo_net::Error| FetchError::Transport {
        path: path.to_owned(),
        message: e.to_string(),
    };

    let resp = Request::get(&url).send().await.map_err(transport)?;
    match resp.status() {
        404 => return Err(FetchError::NotFound(path.to_owned())),
        _ if !resp.ok() => {
            return Err(FetchError::Status {
                path: path.to_owned(),
                status: resp.status(),
            });
        }
        _ => {}
    }
    resp.binary().await.map_err(transport)
}
