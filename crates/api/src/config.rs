//! Types for use when configuring cortex modules.

use crate::*;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> CxResult<D> {
    serde_json::from_str(
        &serde_json::to_string(s)
            .map_err(|e| CxError::other_src("encode", e))?,
    )
    .map_err(|e| CxError::other_src("decode", e))
}

/// Denotes a type used to configure a specific cortex module.
///
/// Each configurable module defines a `FooConfig` struct and a
/// `FooModConfig` wrapper whose single field names the module. The
/// wrapper's serialized key is the module's slot in the [Config] map,
/// so module configs cannot collide without being noticed at setup.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
}

/// Cortex configuration. A JSON map of module-name to module config,
/// loadable from disk and tolerant of missing properties.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Config(serde_json::Map<String, serde_json::Value>);

impl Config {
    /// Merge a module's default configuration into this config.
    /// Refuses to overwrite an already-registered module name.
    pub fn set_module_config<M: ModConfig>(&mut self, m: &M) -> CxResult<()> {
        let value: serde_json::Value = tc(m)?;
        let map = match value {
            serde_json::Value::Object(map) => map,
            _ => {
                return Err(CxError::other(
                    "module config must serialize to an object",
                ))
            }
        };
        for (name, module) in map {
            if self.0.contains_key(&name) {
                return Err(CxError::other(format!(
                    "Refusing to overwrite conflicting module name: {name}"
                )));
            }
            self.0.insert(name, module);
        }
        Ok(())
    }

    /// Extract a module config. Missing slots fall back to the module's
    /// defaults so a hand-edited config file can stay sparse.
    pub fn get_module_config<M: ModConfig>(&self) -> CxResult<M> {
        tc(&self.0)
    }
}
