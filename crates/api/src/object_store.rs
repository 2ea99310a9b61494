//! The content-addressed object store collaborator.
//!
//! Opaque binary assets referenced by filename. The hub routes bytes in
//! and out of this store via the `audio` command surface; it never
//! interprets them.

use crate::*;
use std::sync::Arc;

/// Metadata for one stored object.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    /// The object's filename.
    pub name: String,

    /// Size in bytes.
    pub size: usize,

    /// Upload time, ISO8601.
    pub uploaded: String,
}

/// One stored object's content.
#[derive(Debug, Clone)]
pub struct ObjectBody {
    /// The raw bytes.
    pub data: bytes::Bytes,

    /// The stored content type.
    pub content_type: String,
}

/// An object store holding opaque binary assets by filename.
pub trait ObjectStore: 'static + Send + Sync + std::fmt::Debug {
    /// List all stored objects.
    fn list(&self) -> BoxFut<'_, CxResult<Vec<ObjectInfo>>>;

    /// Get one object by name.
    fn get(&self, name: String) -> BoxFut<'_, CxResult<Option<ObjectBody>>>;

    /// Store an object, replacing any previous content under the name.
    fn put(
        &self,
        name: String,
        data: bytes::Bytes,
        content_type: String,
    ) -> BoxFut<'_, CxResult<()>>;
}

/// Trait-object [ObjectStore].
pub type DynObjectStore = Arc<dyn ObjectStore>;

/// A factory for constructing [ObjectStore] instances.
pub trait ObjectStoreFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> CxResult<()>;

    /// Validate the config.
    fn validate_config(&self, config: &config::Config) -> CxResult<()>;

    /// Construct an object store instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, CxResult<DynObjectStore>>;
}

/// Trait-object [ObjectStoreFactory].
pub type DynObjectStoreFactory = Arc<dyn ObjectStoreFactory>;

/// Infer a content type from a filename suffix.
pub fn content_type_for_name(name: &str) -> &'static str {
    let lower = name.to_ascii_lowercase();
    match lower.rsplit('.').next() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn content_type_inference() {
        assert_eq!("audio/mpeg", content_type_for_name("song.mp3"));
        assert_eq!("audio/mpeg", content_type_for_name("SONG.MP3"));
        assert_eq!("audio/wav", content_type_for_name("a.b.wav"));
        assert_eq!("audio/ogg", content_type_for_name("x.ogg"));
        assert_eq!("audio/flac", content_type_for_name("x.flac"));
        assert_eq!("audio/mp4", content_type_for_name("x.m4a"));
        assert_eq!(
            "application/octet-stream",
            content_type_for_name("notes.txt"),
        );
        assert_eq!(
            "application/octet-stream",
            content_type_for_name("no-suffix"),
        );
    }
}
