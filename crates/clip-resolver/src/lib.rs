//! mvgen Clip Resolver
//!
//! Turns every scene of a manifest into a concrete, probed media file:
//! - **File scenes:** existence check and ffprobe measurement
//! - **Generation scenes:** submit, poll with backoff, fetch, probe
//! - **Reuse:** previously generated clips are kept with `skip_existing`
//!
//! Resolution runs with bounded concurrency and honors run cancellation.

pub mod backend;
pub mod poller;
pub mod probe;
pub mod resolver;

pub use backend::{
    BackendError, GeneratedAsset, GenerationBackend, GenerationRequest, HttpGenerationBackend,
    JobHandle, JobStatus,
};
pub use poller::{JobPoller, JobState};
pub use probe::{parse_duration_json, parse_ffprobe_json, FfprobeProber, MediaProber};
pub use resolver::{ClipResolver, ResolveAction, ResolverOptions, SceneResolution};
