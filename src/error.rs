use thiserror::Error;

/// Crate-wide error type.
///
/// Command-validation errors (`UnknownDevice`, `UnregisteredScene`,
/// `DuplicateScene`, `InvalidPayload`) are the only variants that should ever
/// reach a caller outside a device's own scheduler task. The remaining
/// variants are constructed internally by a scheduler, logged, and turned
/// into a state transition rather than propagated further.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unregistered scene: {0}")]
    UnregisteredScene(String),

    #[error("duplicate scene registration: {0}")]
    DuplicateScene(String),

    #[error("scene {0:?} rejected at registration: {1}")]
    InvalidSceneDescriptor(String, String),

    #[error("payload is not a JSON object")]
    InvalidPayload,

    #[error("scene {scene:?} on {device:?} (generation {generation}): {source}")]
    SceneLifecycle {
        device: String,
        scene: String,
        generation: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("push to {device:?} failed: {source}")]
    Transport {
        device: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("asset decoding failed for {path:?}: {source}")]
    AssetDecoding {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
