//! Credential store: the on-disk authentication state for the single session.
//!
//! Layout of the session directory:
//! - `creds.json`: primary identity credentials (the file `SESSION_ID` seeds)
//! - `<category>-<id>.json`: signal key material written as the protocol rotates keys

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{errors::Error, Result};

pub const CREDS_FILE: &str = "creds.json";

/// Serialized identity (keys, device registration). Opaque to the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialState(pub serde_json::Value);

impl CredentialState {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.0)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self(serde_json::from_slice(bytes)?))
    }
}

/// Update to one signal key file. `value: None` removes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyWrite {
    pub category: String,
    pub id: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// Everything the transport needs to resume without re-pairing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub creds: CredentialState,
    /// Key files by file stem (`<category>-<id>`).
    #[serde(default)]
    pub keys: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    pub fn has_credentials(&self) -> bool {
        self.creds_path().is_file()
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| storage_err(&self.dir, e))
    }

    /// Load the primary credentials plus all key files.
    ///
    /// Returns `Ok(None)` when no `creds.json` exists yet (first run, pairing
    /// required).
    pub fn load(&self) -> Result<Option<AuthState>> {
        self.ensure_dir()?;

        let Some(creds) = self.load_creds()? else {
            return Ok(None);
        };

        let mut keys = BTreeMap::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| storage_err(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| storage_err(&self.dir, e))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == CREDS_FILE || !name.ends_with(".json") {
                continue;
            }
            let stem = name.trim_end_matches(".json").to_string();
            let bytes = fs::read(&path).map_err(|e| storage_err(&path, e))?;
            match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    keys.insert(stem, value);
                }
                Err(e) => debug!(file = %path.display(), error = %e, "skipping unreadable key file"),
            }
        }

        Ok(Some(AuthState { creds, keys }))
    }

    pub fn load_creds(&self) -> Result<Option<CredentialState>> {
        let path = self.creds_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| storage_err(&path, e))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(CredentialState::from_bytes(&bytes)?))
    }

    /// Persist rotated credentials. Durable once this returns.
    pub fn save(&self, creds: &CredentialState) -> Result<()> {
        self.ensure_dir()?;
        let path = self.creds_path();
        write_atomic(&path, &creds.to_bytes()?).map_err(|e| storage_err(&path, e))
    }

    pub fn write_keys(&self, writes: &[KeyWrite]) -> Result<()> {
        self.ensure_dir()?;
        for w in writes {
            let path = self.dir.join(key_file_name(&w.category, &w.id));
            match &w.value {
                Some(value) => {
                    let bytes = serde_json::to_vec(value)?;
                    write_atomic(&path, &bytes).map_err(|e| storage_err(&path, e))?;
                }
                None => match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(storage_err(&path, e)),
                },
            }
        }
        Ok(())
    }

    /// Seed `creds.json` from an externally supplied base64 blob.
    ///
    /// Never overwrites existing credentials. Returns whether anything was
    /// written. Malformed input leaves the store untouched.
    pub fn seed(&self, encoded: &str) -> Result<bool> {
        if self.has_credentials() {
            debug!(dir = %self.dir.display(), "credentials present; not seeding");
            return Ok(false);
        }

        let bytes = decode_session_id(encoded)?;
        serde_json::from_slice::<serde_json::Value>(&bytes).map_err(|e| {
            Error::InvalidCredentialEncoding(format!("decoded blob is not JSON: {e}"))
        })?;

        self.ensure_dir()?;
        let path = self.creds_path();
        write_atomic(&path, &bytes).map_err(|e| storage_err(&path, e))?;
        info!(file = %path.display(), "seeded credentials from SESSION_ID");
        Ok(true)
    }

    /// The re-exportable blob for the current credentials, if any.
    pub fn export_encoded(&self) -> Result<Option<String>> {
        let path = self.creds_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| storage_err(&path, e))?;
        Ok(Some(encode_session_id(&bytes)))
    }
}

pub fn encode_session_id(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// Decode a `SESSION_ID` blob. Accepts padded or unpadded, standard or
/// URL-safe alphabets, and ignores whitespace (pasted env values wrap).
pub fn decode_session_id(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(Error::InvalidCredentialEncoding(
            "SESSION_ID is empty".to_string(),
        ));
    }

    let engines = [
        &general_purpose::STANDARD,
        &general_purpose::STANDARD_NO_PAD,
        &general_purpose::URL_SAFE,
        &general_purpose::URL_SAFE_NO_PAD,
    ];
    let mut last_err = None;
    for engine in engines {
        match engine.decode(compact.as_bytes()) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => last_err = Some(e),
        }
    }
    Err(Error::InvalidCredentialEncoding(
        last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "undecodable".to_string()),
    ))
}

fn key_file_name(category: &str, id: &str) -> String {
    let raw = format!("{category}-{id}.json");
    raw.replace('/', "__").replace(':', "-")
}

fn storage_err(path: &Path, source: std::io::Error) -> Error {
    Error::StorageUnavailable {
        path: path.to_path_buf(),
        source,
    }
}

/// Write to a sibling temp file, fsync, then rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)
}
