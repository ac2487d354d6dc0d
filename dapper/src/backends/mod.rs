pub use docker::DockerEngine;

mod docker;

#[cfg(test)]
pub mod recording;
