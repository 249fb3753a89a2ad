use pkgnav_metadata::ParseError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProjectError>;

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("failed to launch {tool}: {source}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool}: {status}: {stderr}")]
    ToolExit {
        tool: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("project control loop has shut down")]
    Closed,
}
