//! System-wide constants.

/// Engine label carrying the owning project name.
pub const LABEL_PROJECT: &str = "com.docker.compose.project";

/// Engine label carrying the declared service name.
pub const LABEL_SERVICE: &str = "com.docker.compose.service";

/// Engine label marking one-off containers.
pub const LABEL_ONEOFF: &str = "com.docker.compose.oneoff";

/// Value of [`LABEL_ONEOFF`] for every container this workspace creates.
pub const ONEOFF_FALSE: &str = "False";

/// Tag appended to image references that declare none.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Shared-memory size used when a service declares none (64 MiB).
pub const DEFAULT_SHM_SIZE: u64 = 67_108_864;

/// Default engine endpoint when `DOCKER_HOST` is not set.
pub const DEFAULT_ENGINE_URL: &str = "http://localhost:2375";

/// Default number of containers started concurrently in a batch.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Manifest file names probed by manifest discovery, in priority order.
pub const MANIFEST_FILE_NAMES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Environment variable naming the engine endpoint.
pub const ENV_DOCKER_HOST: &str = "DOCKER_HOST";

/// Environment variable overriding the batch worker limit.
pub const ENV_MAX_WORKERS: &str = "BERTH_MAX_WORKERS";
