pub mod audio;
pub mod fallback;
pub mod provider;
pub mod realtime;
pub mod registry;
pub mod stream;

// Re-export commonly used types for convenience
pub use audio::{AudioEncoding, AudioFormat, AudioNormalizer, CodecError};

pub use fallback::{
    AttemptFailure, AttemptRequest, FailureReason, FallbackError, FallbackOrchestrator,
    FallbackPlan, FallbackSuccess, Strategy, StreamingSuccess,
};

pub use provider::{
    AdapterFactory, Capability, ErrorClass, ProviderAdapter, ProviderConfig, ProviderError,
    ProviderKind, ProviderResult, default_adapter_factory,
};

pub use realtime::{BridgeSettings, RealtimeBridge};

pub use registry::{ProviderRef, ProviderRegistry, RegistryError};

pub use stream::{ChunkStream, StreamChunk, StreamCommitError, StreamMultiplexer};
