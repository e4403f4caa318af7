//! Container engine stderr filtering
//!
//! Engines print image pull progress on stderr alongside the function's own
//! diagnostics. These filters drop the engine lines so only the function's
//! output reaches the user.

use regex::Regex;
use std::sync::LazyLock;

/// Substrings identifying docker pull chatter, e.g.
/// `aafbf7df3ddf: Pulling fs layer` or `Status: Downloaded newer image for ...`
const DOCKER_NOISE: &[&str] = &[
    ": Already exists",
    ": Pulling fs layer",
    ": Verifying Checksum",
    ": Download complete",
    ": Pulling from",
    ": Waiting",
    ": Pull complete",
    "Digest: sha256",
    "Status: Downloaded newer image",
    "Unable to find image",
];

/// Substrings identifying podman pull chatter, e.g.
/// `Trying to pull gcr.io/kpt-fn/starlark:v0.3...`
const PODMAN_NOISE: &[&str] = &[
    "Trying to pull",
    "Getting image source signatures",
    "Copying blob sha256:",
    "Copying config sha256:",
    "Writing manifest to image destination",
    "Storing signatures",
];

/// Podman echoes the pulled image id as a bare digest line
static SHA256_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Fa-f0-9]{64}$").expect("valid regex"));

fn is_docker_cli_output(line: &str) -> bool {
    DOCKER_NOISE.iter().any(|pattern| line.contains(pattern))
}

fn is_podman_cli_output(line: &str) -> bool {
    PODMAN_NOISE.iter().any(|pattern| line.contains(pattern)) || SHA256_LINE.is_match(line)
}

fn filter_lines(input: &str, is_noise: fn(&str) -> bool) -> String {
    input
        .lines()
        .filter(|line| !is_noise(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove docker CLI messages from captured stderr
pub fn filter_docker_output(input: &str) -> String {
    filter_lines(input, is_docker_cli_output)
}

/// Remove podman CLI messages from captured stderr
pub fn filter_podman_output(input: &str) -> String {
    filter_lines(input, is_podman_cli_output)
}
